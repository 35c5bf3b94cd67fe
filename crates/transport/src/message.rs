//! Message shapes carried over the wire.

use serde::{Deserialize, Serialize};

/// Sequence number used to correlate a response with its request.
pub type Seq = i64;

/// A message pushed by the debugger bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Message {
    /// The answer to a command sent by the session.
    Response(Response),
    /// An unsolicited notification (log line, async indication, heartbeat).
    Event(Event),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub seq: Seq,
    /// Sequence number of the request being answered.
    pub request_seq: Seq,
    pub success: bool,
    pub command: String,
    /// Backend error text when `success` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub seq: Seq,
    /// `console`, `target`, `gdb`, `async` or `heartbeat`.
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
}

/// A command issued by the session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub seq: Seq,
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<serde_json::Value>,
}

/// Response written by a mock bridge in tests.
#[derive(Debug, Clone, Serialize)]
pub struct OutgoingResponse {
    pub seq: Seq,
    pub request_seq: Seq,
    pub success: bool,
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
}

/// Event written by a mock bridge in tests.
#[derive(Debug, Clone, Serialize)]
pub struct OutgoingEvent {
    pub seq: Seq,
    pub event: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
}

/// Anything that can be written to the wire.
///
/// Sessions only ever write `Request`; the other two variants let a mock
/// bridge share the same writer type.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutgoingMessage {
    Request(Request),
    Response(OutgoingResponse),
    Event(OutgoingEvent),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserialize_rejected_response() {
        let json = r#"{
            "seq": 4,
            "type": "response",
            "request_seq": 2,
            "success": false,
            "command": "breakpoint.insert",
            "message": "No symbol table is loaded."
        }"#;

        let msg: Message = serde_json::from_str(json).unwrap();
        match msg {
            Message::Response(r) => {
                assert!(!r.success);
                assert_eq!(r.request_seq, 2);
                assert_eq!(r.message.as_deref(), Some("No symbol table is loaded."));
                assert!(r.body.is_none());
            }
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[test]
    fn deserialize_async_event() {
        let json = r#"{
            "seq": 7,
            "type": "event",
            "event": "async",
            "body": {"indication": "thread-created", "result": {"id": "2", "group-id": "i1"}}
        }"#;

        let msg: Message = serde_json::from_str(json).unwrap();
        assert!(matches!(msg, Message::Event(e) if e.event == "async" && e.body.is_some()));
    }

    #[test]
    fn serialize_request_without_arguments() {
        let msg = OutgoingMessage::Request(Request {
            seq: 1,
            command: "exec.next".to_string(),
            arguments: None,
        });

        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""type":"request""#));
        assert!(json.contains(r#""command":"exec.next""#));
        assert!(!json.contains("arguments"));
    }
}
