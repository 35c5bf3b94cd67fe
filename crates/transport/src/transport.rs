use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

use crate::reader::FrameReader;
use crate::writer::FrameWriter;

/// A duplex byte stream that can be split into independently owned halves.
pub trait Transport: Send + 'static {
    type Read: AsyncRead + Unpin + Send + 'static;
    type Write: AsyncWrite + Unpin + Send + 'static;

    fn into_split(self) -> (Self::Read, Self::Write);
}

impl Transport for TcpStream {
    type Read = OwnedReadHalf;
    type Write = OwnedWriteHalf;

    fn into_split(self) -> (Self::Read, Self::Write) {
        TcpStream::into_split(self)
    }
}

/// Split a transport into a framed reader and writer.
///
/// The halves are used from different tasks: the reader feeds the event
/// channel and completes pending commands, the writer issues commands.
pub fn split<T: Transport>(transport: T) -> (FrameReader<T::Read>, FrameWriter<T::Write>) {
    let (read, write) = transport.into_split();
    (FrameReader::new(read), FrameWriter::new(write))
}
