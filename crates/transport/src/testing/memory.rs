use tokio::io::{DuplexStream, duplex};

use crate::transport::Transport;

/// One end of an in-memory connection.
///
/// Whatever one end writes, the other end reads.
///
/// ```
/// use transport::{split, testing::{MemoryTransport, split_bridge}};
///
/// let (session_end, bridge_end) = MemoryTransport::pair();
/// let (_session_reader, _session_writer) = split(session_end);
/// let (_bridge_reader, _bridge_writer) = split_bridge(bridge_end);
/// ```
pub struct MemoryTransport {
    read: DuplexStream,
    write: DuplexStream,
}

impl MemoryTransport {
    pub fn pair() -> (Self, Self) {
        Self::pair_with_buffer_size(64 * 1024)
    }

    pub fn pair_with_buffer_size(buffer_size: usize) -> (Self, Self) {
        let (a_write, b_read) = duplex(buffer_size);
        let (b_write, a_read) = duplex(buffer_size);

        (
            MemoryTransport {
                read: a_read,
                write: a_write,
            },
            MemoryTransport {
                read: b_read,
                write: b_write,
            },
        )
    }
}

impl Transport for MemoryTransport {
    type Read = DuplexStream;
    type Write = DuplexStream;

    fn into_split(self) -> (Self::Read, Self::Write) {
        (self.read, self.write)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Message, OutgoingEvent, OutgoingMessage, Request};
    use crate::split;
    use crate::testing::split_bridge;
    use futures::StreamExt;

    #[tokio::test]
    async fn request_and_event_cross_over() {
        let (session, bridge) = MemoryTransport::pair();
        let (mut session_reader, mut session_writer) = split(session);
        let (mut bridge_reader, mut bridge_writer) = split_bridge(bridge);

        session_writer
            .send(OutgoingMessage::Request(Request {
                seq: 0,
                command: "exec.interrupt".to_string(),
                arguments: None,
            }))
            .await
            .unwrap();

        let request = bridge_reader.next().await.unwrap().unwrap();
        assert_eq!(request.command, "exec.interrupt");

        bridge_writer
            .send(OutgoingMessage::Event(OutgoingEvent {
                seq: 1,
                event: "heartbeat".to_string(),
                body: None,
            }))
            .await
            .unwrap();

        let msg = session_reader.next().await.unwrap().unwrap();
        assert!(matches!(msg, Message::Event(e) if e.event == "heartbeat"));
    }

    #[tokio::test]
    async fn dropping_writer_ends_peer_stream() {
        let (session, bridge) = MemoryTransport::pair();
        let (_session_reader, session_writer) = split(session);
        let (mut bridge_reader, _bridge_writer) = split_bridge(bridge);

        drop(session_writer);

        assert!(bridge_reader.next().await.is_none());
    }
}
