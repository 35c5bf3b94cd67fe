use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Sink;
use pin_project_lite::pin_project;
use tokio::io::AsyncWrite;
use tokio_util::codec::FramedWrite;

use crate::codec::FrameCodec;
use crate::error::CodecError;
use crate::message::OutgoingMessage;

pin_project! {
    /// Sink that frames outgoing messages onto the bridge's byte stream.
    pub struct FrameWriter<W> {
        #[pin]
        inner: FramedWrite<W, FrameCodec>,
    }
}

impl<W> FrameWriter<W>
where
    W: AsyncWrite + Unpin,
{
    pub fn new(writer: W) -> Self {
        Self::with_codec(writer, FrameCodec::new())
    }

    pub fn with_codec(writer: W, codec: FrameCodec) -> Self {
        Self {
            inner: FramedWrite::new(writer, codec),
        }
    }

    /// Encode, write and flush a single message.
    pub async fn send(&mut self, msg: OutgoingMessage) -> Result<(), CodecError> {
        use futures::SinkExt;
        SinkExt::send(&mut self.inner, msg).await
    }

    pub fn get_ref(&self) -> &W {
        self.inner.get_ref()
    }

    /// Writing through this bypasses framing; only do it between sends.
    pub fn get_mut(&mut self) -> &mut W {
        self.inner.get_mut()
    }

    pub fn into_inner(self) -> W {
        self.inner.into_inner()
    }
}

impl<W> Sink<OutgoingMessage> for FrameWriter<W>
where
    W: AsyncWrite + Unpin,
{
    type Error = CodecError;

    fn poll_ready(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.project().inner.poll_ready(cx)
    }

    fn start_send(self: Pin<&mut Self>, item: OutgoingMessage) -> Result<(), Self::Error> {
        self.project().inner.start_send(item)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.project().inner.poll_flush(cx)
    }

    fn poll_close(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.project().inner.poll_close(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Request;
    use std::io::Cursor;

    #[tokio::test]
    async fn writes_one_frame_per_message() {
        let mut writer = FrameWriter::new(Cursor::new(Vec::new()));

        for (seq, command) in [(1, "thread.listIds"), (2, "breakpoint.list")] {
            writer
                .send(OutgoingMessage::Request(Request {
                    seq,
                    command: command.to_string(),
                    arguments: None,
                }))
                .await
                .unwrap();
        }

        let output = String::from_utf8(writer.into_inner().into_inner()).unwrap();
        assert_eq!(output.matches("Content-Length:").count(), 2);
        let first = output.find("thread.listIds").unwrap();
        let second = output.find("breakpoint.list").unwrap();
        assert!(first < second);
    }
}
