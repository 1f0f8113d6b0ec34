//! Message framing for the line protocol
//!
//! One JSON envelope per line. Lines are decoded to [`RawEnvelope`] so that
//! a body which fails to decode can still be answered with an error.

use bytes::{Buf, BufMut, BytesMut};
use rumor_core::types::{Body, Envelope};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

/// Maximum line size (16 MB)
const MAX_LINE_SIZE: usize = 16 * 1024 * 1024;

/// Envelope whose body has not been decoded yet
pub type RawEnvelope = Envelope<serde_json::Value>;

/// A single decoded line. Invalid JSON or an oversized line is reported
/// for that line only and does not end the stream.
pub type Decoded = Result<RawEnvelope, FrameError>;

/// Framing errors
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("Frame too large: {0} bytes (max {MAX_LINE_SIZE})")]
    TooLarge(usize),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Codec for newline-delimited JSON envelopes
///
/// Wire format:
/// - N bytes: UTF-8 JSON object `{"src", "dest", "body"}`
/// - 1 byte: `\n`
pub struct EnvelopeCodec {
    max_line: usize,
    /// Bytes already scanned for a newline
    next_index: usize,
    /// Skipping the rest of an oversized line
    discarding: bool,
}

impl EnvelopeCodec {
    /// Create a new codec
    pub fn new() -> Self {
        Self::with_max_line(MAX_LINE_SIZE)
    }

    /// Create codec with a custom line limit
    pub fn with_max_line(max_line: usize) -> Self {
        Self {
            max_line,
            next_index: 0,
            discarding: false,
        }
    }
}

impl Default for EnvelopeCodec {
    fn default() -> Self {
        Self::new()
    }
}

fn trim(line: &[u8]) -> &[u8] {
    let start = line
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(line.len());
    let end = line
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |i| i + 1);
    &line[start..end]
}

impl Decoder for EnvelopeCodec {
    type Item = Decoded;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let newline = src[self.next_index..].iter().position(|b| *b == b'\n');

            if self.discarding {
                match newline {
                    Some(offset) => {
                        src.advance(self.next_index + offset + 1);
                        self.next_index = 0;
                        self.discarding = false;
                        continue;
                    }
                    None => {
                        src.clear();
                        self.next_index = 0;
                        return Ok(None);
                    }
                }
            }

            let Some(offset) = newline else {
                if src.len() > self.max_line {
                    let len = src.len();
                    src.clear();
                    self.next_index = 0;
                    self.discarding = true;
                    return Ok(Some(Err(FrameError::TooLarge(len))));
                }
                self.next_index = src.len();
                return Ok(None);
            };

            let end = self.next_index + offset;
            self.next_index = 0;
            let line = src.split_to(end + 1);
            if end > self.max_line {
                return Ok(Some(Err(FrameError::TooLarge(end))));
            }
            let line = trim(&line[..end]);
            if line.is_empty() {
                continue;
            }
            return Ok(Some(serde_json::from_slice(line).map_err(FrameError::from)));
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }

        // Final line without a trailing newline
        self.next_index = 0;
        let rest = src.split_to(src.len());
        if std::mem::take(&mut self.discarding) {
            return Ok(None);
        }
        let line = trim(&rest);
        if line.is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_slice(line).map_err(FrameError::from)))
    }
}

impl Encoder<Envelope<Body>> for EnvelopeCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Envelope<Body>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let line = serde_json::to_vec(&item)?;
        if line.len() > self.max_line {
            return Err(FrameError::TooLarge(line.len()));
        }

        dst.reserve(line.len() + 1);
        dst.put_slice(&line);
        dst.put_u8(b'\n');

        Ok(())
    }
}
