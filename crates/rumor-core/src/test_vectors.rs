//! Wire test vectors
//!
//! Exact JSON shapes exchanged with clients, peers and the KV service.
//! These MUST stay byte-compatible with the line protocol.

use crate::error::ErrorCode;
use crate::types::*;
use serde_json::json;
use std::collections::BTreeSet;

fn decode(value: serde_json::Value) -> Envelope {
    serde_json::from_value(value).unwrap()
}

fn encode(envelope: &Envelope) -> serde_json::Value {
    serde_json::to_value(envelope).unwrap()
}

fn ids(values: &[i64]) -> BTreeSet<MessageId> {
    values.iter().copied().map(MessageId).collect()
}

#[test]
fn init_request() {
    let envelope = decode(json!({
        "src": "c0",
        "dest": "n1",
        "body": {"type": "init", "msg_id": 1, "node_id": "n1", "node_ids": ["n1", "n2", "n3"]}
    }));

    assert_eq!(envelope.body.msg_id, Some(1));
    assert_eq!(
        envelope.body.payload,
        Payload::Init {
            node_id: NodeId::from("n1"),
            node_ids: vec!["n1".into(), "n2".into(), "n3".into()],
        }
    );
}

#[test]
fn broadcast_request_and_reply() {
    let request = decode(json!({
        "src": "c1",
        "dest": "n1",
        "body": {"type": "broadcast", "message": 1000, "msg_id": 2}
    }));
    assert_eq!(
        request.body.payload,
        Payload::Broadcast {
            message: MessageId(1000)
        }
    );

    let reply = Envelope::new(
        "n1".into(),
        "c1".into(),
        Body::reply(2, Payload::BroadcastOk),
    );
    assert_eq!(
        encode(&reply),
        json!({"src": "n1", "dest": "c1", "body": {"type": "broadcast_ok", "in_reply_to": 2}})
    );
}

#[test]
fn broadcast_read_reply() {
    let reply = Envelope::new(
        "n1".into(),
        "c1".into(),
        Body::reply(3, Payload::messages(ids(&[1, 8, 72]))),
    );
    assert_eq!(
        encode(&reply)["body"],
        json!({"type": "read_ok", "in_reply_to": 3, "messages": [1, 8, 72]})
    );
}

#[test]
fn topology_request() {
    let request = decode(json!({
        "src": "c1",
        "dest": "n1",
        "body": {
            "type": "topology",
            "msg_id": 4,
            "topology": {"n1": ["n2", "n3"], "n2": ["n1"], "n3": ["n1"]}
        }
    }));

    match request.body.payload {
        Payload::Topology { topology } => {
            assert_eq!(topology.len(), 3);
            assert_eq!(topology[&NodeId::from("n1")], vec![NodeId::from("n2"), NodeId::from("n3")]);
        }
        other => panic!("unexpected payload {other:?}"),
    }
}

#[test]
fn gossip_is_oneway() {
    let gossip = Envelope::new(
        "n1".into(),
        "n2".into(),
        Body::oneway(Payload::Gossip { msgs: ids(&[2, 1]) }),
    );
    assert_eq!(
        encode(&gossip),
        json!({"src": "n1", "dest": "n2", "body": {"type": "gossip", "msgs": [1, 2]}})
    );
}

#[test]
fn counter_add_and_read() {
    let add = decode(json!({
        "src": "c2",
        "dest": "n1",
        "body": {"type": "add", "delta": 5, "msg_id": 7}
    }));
    assert_eq!(add.body.payload, Payload::Add { delta: 5 });

    // Client reads carry no key
    let read = decode(json!({"src": "c2", "dest": "n1", "body": {"type": "read", "msg_id": 8}}));
    assert_eq!(read.body.payload, Payload::Read { key: None });

    let reply = Envelope::new("n1".into(), "c2".into(), Body::reply(8, Payload::value(12)));
    assert_eq!(
        encode(&reply)["body"],
        json!({"type": "read_ok", "in_reply_to": 8, "value": 12})
    );
}

#[test]
fn kv_requests() {
    let read = Envelope::new(
        "n1".into(),
        "seq-kv".into(),
        Body::request(9, Payload::Read {
            key: Some("counter".into()),
        }),
    );
    assert_eq!(
        encode(&read)["body"],
        json!({"type": "read", "msg_id": 9, "key": "counter"})
    );

    let cas = Envelope::new(
        "n1".into(),
        "seq-kv".into(),
        Body::request(10, Payload::Cas {
            key: "counter".into(),
            from: 3,
            to: 7,
            create_if_not_exists: true,
        }),
    );
    assert_eq!(
        encode(&cas)["body"],
        json!({
            "type": "cas",
            "msg_id": 10,
            "key": "counter",
            "from": 3,
            "to": 7,
            "create_if_not_exists": true
        })
    );
}

#[test]
fn error_codes() {
    let reply = decode(json!({
        "src": "seq-kv",
        "dest": "n1",
        "body": {"type": "error", "in_reply_to": 10, "code": 22, "text": "expected 3, had 4"}
    }));
    assert_eq!(reply.body.in_reply_to, Some(10));
    assert_eq!(
        reply.body.payload,
        Payload::Error {
            code: ErrorCode::PreconditionFailed,
            text: "expected 3, had 4".into(),
        }
    );

    // Unknown codes survive a round trip
    let unknown = decode(json!({
        "src": "n2",
        "dest": "n1",
        "body": {"type": "error", "in_reply_to": 1, "code": 1001}
    }));
    assert_eq!(encode(&unknown)["body"]["code"], json!(1001));
    assert!(!ErrorCode::Other(1001).is_definite());
    assert!(ErrorCode::PreconditionFailed.is_definite());
}

#[test]
fn unknown_type_is_malformed() {
    let result: Result<Envelope, _> = serde_json::from_value(json!({
        "src": "c1",
        "dest": "n1",
        "body": {"type": "txn", "msg_id": 1}
    }));
    assert!(result.is_err());

    let result: Result<Envelope, _> = serde_json::from_value(json!({
        "src": "c1",
        "dest": "n1",
        "body": {"type": "broadcast", "message": "not-a-number", "msg_id": 1}
    }));
    assert!(result.is_err());
}

#[test]
fn generate_and_echo() {
    let generate = decode(json!({"src": "c1", "dest": "n1", "body": {"type": "generate", "msg_id": 3}}));
    assert_eq!(generate.body.payload, Payload::Generate);
    assert_eq!(generate.kind(), "generate");

    let echo = decode(json!({
        "src": "c1",
        "dest": "n1",
        "body": {"type": "echo", "msg_id": 4, "echo": "Please echo 35"}
    }));
    assert_eq!(
        echo.body.payload,
        Payload::Echo {
            echo: json!("Please echo 35")
        }
    );
}
