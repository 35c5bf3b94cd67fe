use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use pin_project_lite::pin_project;
use serde::de::DeserializeOwned;
use tokio::io::AsyncRead;
use tokio_util::codec::FramedRead;

use crate::codec::FrameCodec;
use crate::error::CodecError;
use crate::message::Message;

pin_project! {
    /// Stream of messages decoded from the bridge's byte stream.
    ///
    /// The stream ends (`None`) when the peer closes the connection. Frames
    /// with an undecodable body are skipped. After a header error the stream
    /// also ends, since the framing can no longer be trusted.
    pub struct FrameReader<R, T = Message> {
        #[pin]
        inner: FramedRead<R, FrameCodec<T>>,
    }
}

impl<R, T> FrameReader<R, T>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    pub fn new(reader: R) -> Self {
        Self::with_codec(reader, FrameCodec::new())
    }

    pub fn with_codec(reader: R, codec: FrameCodec<T>) -> Self {
        Self {
            inner: FramedRead::new(reader, codec),
        }
    }

    pub fn get_ref(&self) -> &R {
        self.inner.get_ref()
    }

    pub fn into_inner(self) -> R {
        self.inner.into_inner()
    }
}

impl<R, T> Stream for FrameReader<R, T>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    type Item = Result<T, CodecError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.project().inner.poll_next(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::io::Cursor;

    use crate::testing::frame_messages;

    #[tokio::test]
    async fn reads_events_and_responses_in_order() {
        let data = frame_messages(&[
            serde_json::json!({"seq": 1, "type": "event", "event": "console", "body": "Starting program\n"}),
            serde_json::json!({"seq": 2, "type": "response", "request_seq": 0, "success": true, "command": "exec.run"}),
        ]);

        let mut reader: FrameReader<_> = FrameReader::new(Cursor::new(data));

        let first = reader.next().await.unwrap().unwrap();
        assert!(matches!(first, Message::Event(e) if e.event == "console"));

        let second = reader.next().await.unwrap().unwrap();
        assert!(matches!(second, Message::Response(r) if r.command == "exec.run"));

        assert!(reader.next().await.is_none());
    }

    #[tokio::test]
    async fn unknown_message_shape_does_not_end_the_stream() {
        let data = frame_messages(&[
            serde_json::json!({"type": "output"}),
            serde_json::json!({"seq": 4, "type": "event", "event": "heartbeat"}),
        ]);

        let mut reader: FrameReader<_> = FrameReader::new(Cursor::new(data));

        let next = reader.next().await.unwrap().unwrap();
        assert!(matches!(next, Message::Event(e) if e.event == "heartbeat"));
        assert!(reader.next().await.is_none());
    }

    #[tokio::test]
    async fn empty_input_is_end_of_stream() {
        let mut reader: FrameReader<_> = FrameReader::new(Cursor::new(Vec::new()));
        assert!(reader.next().await.is_none());
    }
}
