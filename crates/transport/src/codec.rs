use std::marker::PhantomData;

use bytes::{Buf, BufMut, BytesMut};
use serde::de::DeserializeOwned;
use tokio_util::codec::{Decoder, Encoder};

use crate::error::CodecError;
use crate::message::{Message, OutgoingMessage};

const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;
const SEPARATOR: &[u8] = b"\r\n\r\n";
const CONTENT_LENGTH: &str = "content-length";

/// `Content-Length` framing for JSON messages.
///
/// Incomplete input is left in the buffer untouched until the whole frame
/// has arrived; a frame whose announced size is above the limit is rejected
/// before its body is buffered.
///
/// A frame whose body is not a valid `T` is consumed, logged and skipped, so
/// one bad message does not end the stream. Header errors are fatal since
/// the frame boundary is lost.
///
/// `T` is the decoded item: [`Message`] on the session side, `Request` on
/// the side of a mock bridge. Both sides encode [`OutgoingMessage`].
pub struct FrameCodec<T = Message> {
    max_frame_size: usize,
    _item: PhantomData<fn() -> T>,
}

impl<T> FrameCodec<T> {
    pub fn new() -> Self {
        Self::with_max_size(DEFAULT_MAX_FRAME_SIZE)
    }

    pub fn with_max_size(max_frame_size: usize) -> Self {
        Self {
            max_frame_size,
            _item: PhantomData,
        }
    }
}

impl<T> Default for FrameCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for FrameCodec<T> {
    fn clone(&self) -> Self {
        Self::with_max_size(self.max_frame_size)
    }
}

impl<T> std::fmt::Debug for FrameCodec<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameCodec")
            .field("max_frame_size", &self.max_frame_size)
            .finish()
    }
}

impl<T: DeserializeOwned> Decoder for FrameCodec<T> {
    type Item = T;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let Some(header_len) = src.windows(SEPARATOR.len()).position(|w| w == SEPARATOR)
            else {
                return Ok(None);
            };

            let body_len = content_length(&src[..header_len])?;
            if body_len > self.max_frame_size {
                return Err(CodecError::FrameTooLarge {
                    size: body_len,
                    max: self.max_frame_size,
                });
            }

            let body_start = header_len + SEPARATOR.len();
            let frame_len = body_start + body_len;
            if src.len() < frame_len {
                src.reserve(frame_len - src.len());
                return Ok(None);
            }

            let message = serde_json::from_slice(&src[body_start..frame_len]);
            src.advance(frame_len);
            match message {
                Ok(message) => return Ok(Some(message)),
                Err(error) => {
                    tracing::warn!(%error, body_len, "skipping undecodable frame");
                }
            }
        }
    }
}

impl<T> Encoder<OutgoingMessage> for FrameCodec<T> {
    type Error = CodecError;

    fn encode(&mut self, item: OutgoingMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let body = serde_json::to_vec(&item).map_err(CodecError::JsonSerialize)?;
        let header = format!("Content-Length: {}\r\n\r\n", body.len());

        dst.reserve(header.len() + body.len());
        dst.put_slice(header.as_bytes());
        dst.put_slice(&body);
        Ok(())
    }
}

fn content_length(header: &[u8]) -> Result<usize, CodecError> {
    let header = std::str::from_utf8(header).map_err(|_| CodecError::InvalidUtf8)?;

    header
        .split("\r\n")
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case(CONTENT_LENGTH))
        .ok_or(CodecError::MissingContentLength)
        .and_then(|(_, value)| {
            value
                .trim()
                .parse()
                .map_err(|_| CodecError::MalformedContentLength)
        })
}
