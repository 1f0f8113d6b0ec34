//! Error types for rumor

use crate::types::Payload;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, Error>;

/// Decoding errors for inbound messages
#[derive(Debug, Error)]
pub enum Error {
    /// Body failed to decode into any known payload shape
    #[error("malformed body: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Required field absent from the payload
    #[error("missing required field: {0}")]
    MissingField(String),

    /// Payload decoded but is not the reply shape the caller expected
    #[error("unexpected payload: expected {expected}, got {got}")]
    UnexpectedPayload {
        expected: &'static str,
        got: &'static str,
    },
}

/// Numeric error codes carried in `error` bodies
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u32", into = "u32")]
pub enum ErrorCode {
    Timeout,
    NodeNotFound,
    NotSupported,
    TemporarilyUnavailable,
    MalformedRequest,
    Crash,
    Abort,
    KeyDoesNotExist,
    KeyAlreadyExists,
    PreconditionFailed,
    TxnConflict,
    /// Any code this implementation does not name
    Other(u32),
}

impl ErrorCode {
    /// Whether the failed operation definitely did not take effect
    pub fn is_definite(&self) -> bool {
        !matches!(self, Self::Timeout | Self::Crash | Self::Other(_))
    }
}

impl From<u32> for ErrorCode {
    fn from(code: u32) -> Self {
        match code {
            0 => Self::Timeout,
            1 => Self::NodeNotFound,
            10 => Self::NotSupported,
            11 => Self::TemporarilyUnavailable,
            12 => Self::MalformedRequest,
            13 => Self::Crash,
            14 => Self::Abort,
            20 => Self::KeyDoesNotExist,
            21 => Self::KeyAlreadyExists,
            22 => Self::PreconditionFailed,
            30 => Self::TxnConflict,
            other => Self::Other(other),
        }
    }
}

impl From<ErrorCode> for u32 {
    fn from(code: ErrorCode) -> Self {
        match code {
            ErrorCode::Timeout => 0,
            ErrorCode::NodeNotFound => 1,
            ErrorCode::NotSupported => 10,
            ErrorCode::TemporarilyUnavailable => 11,
            ErrorCode::MalformedRequest => 12,
            ErrorCode::Crash => 13,
            ErrorCode::Abort => 14,
            ErrorCode::KeyDoesNotExist => 20,
            ErrorCode::KeyAlreadyExists => 21,
            ErrorCode::PreconditionFailed => 22,
            ErrorCode::TxnConflict => 30,
            ErrorCode::Other(other) => other,
        }
    }
}

/// A typed failure returned by a request handler and sent back as an `error` body
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{code:?}: {text}")]
pub struct RpcError {
    pub code: ErrorCode,
    pub text: String,
}

impl RpcError {
    pub fn new(code: ErrorCode, text: impl Into<String>) -> Self {
        Self {
            code,
            text: text.into(),
        }
    }

    pub fn malformed(text: impl Into<String>) -> Self {
        Self::new(ErrorCode::MalformedRequest, text)
    }

    pub fn not_supported(kind: &str) -> Self {
        Self::new(ErrorCode::NotSupported, format!("unsupported message type: {kind}"))
    }

    pub fn unavailable(text: impl Into<String>) -> Self {
        Self::new(ErrorCode::TemporarilyUnavailable, text)
    }

    pub fn timeout(text: impl Into<String>) -> Self {
        Self::new(ErrorCode::Timeout, text)
    }

    /// Wire form of this error
    pub fn into_payload(self) -> Payload {
        Payload::Error {
            code: self.code,
            text: self.text,
        }
    }
}

impl From<Error> for RpcError {
    fn from(err: Error) -> Self {
        Self::malformed(err.to_string())
    }
}
