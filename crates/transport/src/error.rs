use std::io;

/// Failures while framing or unframing messages.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("frame header is not valid UTF-8")]
    InvalidUtf8,

    #[error("malformed Content-Length header value")]
    MalformedContentLength,

    #[error("missing Content-Length header")]
    MissingContentLength,

    /// The announced body length is above the codec limit.
    #[error("frame of {size} bytes exceeds the {max} byte limit")]
    FrameTooLarge { size: usize, max: usize },

    #[error("could not encode message: {0}")]
    JsonSerialize(#[source] serde_json::Error),
}
