//! Helpers for exercising the wire layer without a real bridge.

mod memory;

pub use memory::MemoryTransport;

use serde::Serialize;

use crate::message::Request;
use crate::reader::FrameReader;
use crate::transport::Transport;
use crate::writer::FrameWriter;

/// Split the bridge end of a connection: it reads the session's requests
/// and writes responses and events.
pub fn split_bridge<T: Transport>(
    transport: T,
) -> (FrameReader<T::Read, Request>, FrameWriter<T::Write>) {
    let (read, write) = transport.into_split();
    (FrameReader::new(read), FrameWriter::new(write))
}

/// Frame a single JSON document.
///
/// ```
/// use transport::testing::frame_message;
///
/// let bytes = frame_message(&serde_json::json!({"seq": 1, "type": "event", "event": "heartbeat"}));
/// assert!(bytes.starts_with(b"Content-Length: "));
/// ```
pub fn frame_message(msg: &impl Serialize) -> Vec<u8> {
    let json = serde_json::to_string(msg).expect("test message serializes");
    format!("Content-Length: {}\r\n\r\n{}", json.len(), json).into_bytes()
}

pub fn frame_messages<T: Serialize>(msgs: &[T]) -> Vec<u8> {
    msgs.iter().flat_map(frame_message).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn frames_are_concatenated() {
        let bytes = frame_messages(&[
            json!({"seq": 1, "type": "event", "event": "console", "body": "a"}),
            json!({"seq": 2, "type": "event", "event": "target", "body": "b"}),
        ]);
        let s = String::from_utf8(bytes).unwrap();

        assert_eq!(s.matches("Content-Length:").count(), 2);
        assert!(s.find(r#""body":"a""#).unwrap() < s.find(r#""body":"b""#).unwrap());
    }
}
