use std::time::Duration;

use crate::types::ThreadId;

/// Failures of a command or follow-up request.
///
/// Nothing here is fatal: the caller decides whether to retry. Stale results
/// are not errors and never show up here.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The call did not complete. No local state was changed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The backend completed the call and reported a failure.
    #[error("{command} failed: {message}")]
    BackendRejection { command: String, message: String },

    /// The event channel has closed; the session accepts no more commands.
    #[error("the debugger session has closed")]
    SessionClosed,

    /// Step, next and continue need exactly one selected, stopped thread.
    #[error("execution controls are disabled: no stopped thread is selected")]
    ExecutionDisabled,

    #[error("unknown thread {0}")]
    UnknownThread(ThreadId),

    #[error("no variable {0:?} in the current view")]
    UnknownVariable(String),

    /// Only root entries with children can be expanded.
    #[error("variable {0:?} cannot be expanded")]
    NotExpandable(String),
}

impl SessionError {
    pub fn is_closed(&self) -> bool {
        matches!(self, SessionError::SessionClosed)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("sending {command}: {source}")]
    Send {
        command: String,
        #[source]
        source: transport::CodecError,
    },

    #[error("{command} timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    /// The connection went away while the call was pending.
    #[error("connection lost while waiting for {command}")]
    Disconnected { command: String },

    /// The response body did not have the expected shape.
    #[error("decoding {command} response: {source}")]
    Decode {
        command: String,
        #[source]
        source: serde_json::Error,
    },
}

pub type Result<T, E = SessionError> = std::result::Result<T, E>;
