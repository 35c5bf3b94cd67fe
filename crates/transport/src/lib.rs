//! Wire layer between a godbg session and the debugger bridge.
//!
//! The bridge fronts a GDB/MI style backend. Both directions carry JSON
//! documents framed with a `Content-Length` header:
//!
//! ```text
//! Content-Length: <length>\r\n
//! \r\n
//! <JSON body>
//! ```
//!
//! - [`FrameCodec`] implements `Encoder` and `Decoder` for those frames
//! - [`FrameReader`] turns an `AsyncRead` into a `Stream` of [`Message`]s
//! - [`FrameWriter`] turns an `AsyncWrite` into a `Sink` of [`OutgoingMessage`]s
//!
//! # Usage
//!
//! ```ignore
//! use futures::StreamExt;
//! use transport::{connect, Message};
//!
//! let (mut reader, mut writer) = transport::connect("127.0.0.1:4000").await?;
//!
//! while let Some(msg) = reader.next().await {
//!     match msg? {
//!         Message::Response(r) => { /* complete a pending command */ }
//!         Message::Event(e) => { /* forward to the event channel */ }
//!     }
//! }
//! ```
//!
//! Correlating responses with requests and interpreting events is left to
//! the `debugger` crate.

mod codec;
mod error;
mod message;
mod reader;
mod transport;
mod writer;

pub mod testing;

pub use codec::FrameCodec;
pub use error::CodecError;
pub use message::{Event, Message, OutgoingEvent, OutgoingMessage, OutgoingResponse, Request, Response, Seq};
pub use reader::FrameReader;
pub use transport::{Transport, split};
pub use writer::FrameWriter;

use std::io;
use tokio::net::{TcpStream, ToSocketAddrs};

/// Connect to a debugger bridge over TCP and return a reader/writer pair.
pub async fn connect(
    addr: impl ToSocketAddrs,
) -> io::Result<(
    FrameReader<tokio::net::tcp::OwnedReadHalf>,
    FrameWriter<tokio::net::tcp::OwnedWriteHalf>,
)> {
    let stream = TcpStream::connect(addr).await?;
    tracing::debug!(peer = ?stream.peer_addr().ok(), "connected to debugger bridge");
    Ok(split(stream))
}
