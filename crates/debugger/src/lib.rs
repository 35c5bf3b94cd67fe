//! Client-side session state for a multi-threaded GDB/MI style debugger.
//!
//! A [`SessionReconciler`] keeps a local model of the debuggee in step with
//! the backend:
//!
//! - commands go out through a [`CommandGateway`], usually a
//!   [`TransportGateway`] over the framed wire protocol
//! - indications come back on an [`EventChannel`] and are applied in order
//! - threads, the selection, breakpoints and the variable tree are derived
//!   from both, and a [`SessionSnapshot`] gives a consistent view of them
//!
//! ```ignore
//! use debugger::{SessionConfig, SessionReconciler};
//!
//! let session = SessionReconciler::connect("127.0.0.1:4000", &SessionConfig::load_default()?).await?;
//! session.insert_breakpoint("main.go:12").await?;
//! session.run().await?;
//! ```

pub mod breakpoints;
pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod gate;
pub mod gateway;
mod model;
mod pending_requests;
pub mod reconciler;
pub mod selection;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod threads;
pub mod types;
pub mod variables;
mod wire;

pub use breakpoints::BreakpointRegistry;
pub use config::{ConfigError, ExecutionMode, SessionConfig};
pub use connection::TransportGateway;
pub use error::{Result, SessionError, TransportError};
pub use events::{EventChannel, EventSender, Indication, LogLine, LogOrigin, Notification};
pub use gateway::{Command, CommandGateway, GatewayExt};
pub use reconciler::{SessionReconciler, SessionSnapshot};
pub use selection::SelectionController;
pub use threads::ThreadRegistry;
pub use types::{
    Breakpoint, BreakpointId, ExecutionState, Frame, Thread, ThreadId, Variable, VariableNode,
};
pub use variables::{ExpandOutcome, Expansion, VariableTreeCache};
