//! The notification side of the backend connection.

use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::sync::mpsc;

use crate::types::ThreadId;

/// Where a log line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogOrigin {
    /// Debugger console output.
    Console,
    /// Output of the program being debugged.
    Target,
    /// The backend's own diagnostics.
    Backend,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub origin: LogOrigin,
    pub text: String,
}

/// Whether a stop or resume applies to one thread or to all of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    One,
    All,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopRecord {
    pub thread_id: Option<ThreadId>,
    pub scope: Scope,
    pub reason: Option<String>,
}

impl StopRecord {
    /// The process is terminating rather than pausing.
    pub fn is_exit(&self) -> bool {
        self.reason
            .as_deref()
            .is_some_and(|reason| reason.starts_with("exited"))
    }
}

/// An unsolicited state change pushed by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Indication {
    ThreadCreated { id: ThreadId },
    ThreadExited { id: ThreadId },
    ThreadSelected { id: ThreadId },
    Stopped(StopRecord),
    Running {
        thread_id: Option<ThreadId>,
        scope: Scope,
    },
    /// Anything else (`breakpoint-modified`, `library-loaded`, ...).
    Other { name: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    Log(LogLine),
    Indication(Indication),
    Heartbeat,
}

#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error("unknown event {0:?}")]
    UnknownEvent(String),

    #[error("{event} event has no text body")]
    MissingText { event: String },

    #[error("malformed async record: {0}")]
    MalformedRecord(#[source] serde_json::Error),

    #[error("{indication} indication has no {field}")]
    MissingField {
        indication: String,
        field: &'static str,
    },
}

#[derive(Deserialize)]
struct AsyncRecord {
    #[serde(alias = "Indication")]
    indication: String,
    #[serde(alias = "Result", default)]
    result: Map<String, Value>,
}

fn field<'a>(result: &'a Map<String, Value>, name: &str) -> Option<&'a str> {
    result.get(name).and_then(Value::as_str)
}

fn required_id(
    indication: &str,
    result: &Map<String, Value>,
    name: &'static str,
) -> Result<ThreadId, EventError> {
    field(result, name)
        .map(ThreadId::from)
        .ok_or_else(|| EventError::MissingField {
            indication: indication.to_string(),
            field: name,
        })
}

impl Indication {
    fn parse(record: AsyncRecord) -> Result<Self, EventError> {
        let AsyncRecord { indication, result } = record;
        let parsed = match indication.as_str() {
            "thread-created" => Indication::ThreadCreated {
                id: required_id(&indication, &result, "id")?,
            },
            "thread-exited" => Indication::ThreadExited {
                id: required_id(&indication, &result, "id")?,
            },
            "thread-selected" => Indication::ThreadSelected {
                id: required_id(&indication, &result, "id")?,
            },
            "stopped" => {
                let thread_id = field(&result, "thread-id");
                let all = thread_id == Some("all") || field(&result, "stopped-threads") == Some("all");
                Indication::Stopped(StopRecord {
                    thread_id: thread_id.filter(|id| *id != "all").map(ThreadId::from),
                    scope: if all { Scope::All } else { Scope::One },
                    reason: field(&result, "reason").map(str::to_string),
                })
            }
            "running" => match field(&result, "thread-id") {
                None | Some("all") => Indication::Running {
                    thread_id: None,
                    scope: Scope::All,
                },
                Some(id) => Indication::Running {
                    thread_id: Some(ThreadId::from(id)),
                    scope: Scope::One,
                },
            },
            _ => Indication::Other { name: indication },
        };
        Ok(parsed)
    }
}

impl Notification {
    /// Interpret a wire event.
    pub fn from_event(event: &transport::Event) -> Result<Self, EventError> {
        let origin = match event.event.as_str() {
            "console" => LogOrigin::Console,
            "target" => LogOrigin::Target,
            "gdb" => LogOrigin::Backend,
            "heartbeat" => return Ok(Notification::Heartbeat),
            "async" => {
                let body = event.body.clone().unwrap_or(Value::Null);
                let record: AsyncRecord =
                    serde_json::from_value(body).map_err(EventError::MalformedRecord)?;
                return Indication::parse(record).map(Notification::Indication);
            }
            other => return Err(EventError::UnknownEvent(other.to_string())),
        };

        let text = event
            .body
            .as_ref()
            .and_then(Value::as_str)
            .ok_or_else(|| EventError::MissingText {
                event: event.event.clone(),
            })?;
        Ok(Notification::Log(LogLine {
            origin,
            text: text.to_string(),
        }))
    }
}

pub type EventSender = mpsc::UnboundedSender<Notification>;

/// Create an event channel. It closes once every sender is dropped.
pub fn channel() -> (EventSender, EventChannel) {
    let (tx, rx) = mpsc::unbounded_channel();
    (tx, EventChannel { rx })
}

/// Ordered stream of notifications. `recv` yields `None` once the backend
/// session has ended.
pub struct EventChannel {
    rx: mpsc::UnboundedReceiver<Notification>,
}

impl EventChannel {
    pub async fn recv(&mut self) -> Option<Notification> {
        self.rx.recv().await
    }
}
