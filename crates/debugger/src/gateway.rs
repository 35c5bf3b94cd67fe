//! The command side of the backend connection.
//!
//! A [`CommandGateway`] sends one [`Command`] and resolves with the response
//! body. It is stateless and never retries; [`GatewayExt`] layers typed
//! decoding of the response bodies on top.

use std::future::Future;

use serde::{Deserialize, de::DeserializeOwned};
use serde_json::{Value, json};

use crate::{
    error::{Result, TransportError},
    types::{Breakpoint, BreakpointId, Frame, ThreadDetails, ThreadId, ThreadIds, Variable},
};

/// Every call the backend understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    ExecNext,
    ExecStep,
    ExecContinue,
    ExecInterrupt,
    ExecRun,
    ExecSetArgs { args: Vec<String> },
    GdbExit,
    ThreadSelect { thread_id: ThreadId },
    ThreadInfo { thread_id: ThreadId },
    ThreadListIds,
    FrameStackList { thread_id: ThreadId },
    FrameVariablesList {
        thread_id: ThreadId,
        frame: usize,
        all_values: bool,
    },
    VariableCreate { expression: String },
    VariableListChildren { name: String, all_values: bool },
    BreakpointInsert { location: String },
    BreakpointEnable { ids: Vec<BreakpointId> },
    BreakpointDisable { ids: Vec<BreakpointId> },
    BreakpointList,
    FileGet { path: String },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::ExecNext => "exec.next",
            Command::ExecStep => "exec.step",
            Command::ExecContinue => "exec.continue",
            Command::ExecInterrupt => "exec.interrupt",
            Command::ExecRun => "exec.run",
            Command::ExecSetArgs { .. } => "exec.setArgs",
            Command::GdbExit => "gdb.exit",
            Command::ThreadSelect { .. } => "thread.select",
            Command::ThreadInfo { .. } => "thread.info",
            Command::ThreadListIds => "thread.listIds",
            Command::FrameStackList { .. } => "frame.stackList",
            Command::FrameVariablesList { .. } => "frame.variablesList",
            Command::VariableCreate { .. } => "variable.create",
            Command::VariableListChildren { .. } => "variable.listChildren",
            Command::BreakpointInsert { .. } => "breakpoint.insert",
            Command::BreakpointEnable { .. } => "breakpoint.enable",
            Command::BreakpointDisable { .. } => "breakpoint.disable",
            Command::BreakpointList => "breakpoint.list",
            Command::FileGet { .. } => "file.get",
        }
    }

    pub fn arguments(&self) -> Option<Value> {
        let args = match self {
            Command::ExecNext
            | Command::ExecStep
            | Command::ExecContinue
            | Command::ExecInterrupt
            | Command::ExecRun
            | Command::GdbExit
            | Command::ThreadListIds
            | Command::BreakpointList => return None,
            Command::ExecSetArgs { args } => json!({ "Args": args.join(" ") }),
            Command::ThreadSelect { thread_id }
            | Command::ThreadInfo { thread_id }
            | Command::FrameStackList { thread_id } => json!({ "ThreadId": thread_id }),
            Command::FrameVariablesList {
                thread_id,
                frame,
                all_values,
            } => json!({ "Thread": thread_id, "Frame": frame, "AllValues": all_values }),
            Command::VariableCreate { expression } => json!({ "Expression": expression }),
            Command::VariableListChildren { name, all_values } => {
                json!({ "Name": name, "AllValues": all_values })
            }
            Command::BreakpointInsert { location } => json!({ "Location": location }),
            Command::BreakpointEnable { ids } | Command::BreakpointDisable { ids } => {
                json!({ "Breakpoints": ids })
            }
            Command::FileGet { path } => json!({ "File": path }),
        };
        Some(args)
    }
}

/// Sends a command and resolves with the backend's response body.
///
/// Implementations surface transport failures and timeouts as
/// [`SessionError::Transport`](crate::SessionError::Transport) and backend
/// failures as
/// [`SessionError::BackendRejection`](crate::SessionError::BackendRejection).
pub trait CommandGateway: Send + Sync {
    fn call(&self, command: Command) -> impl Future<Output = Result<Option<Value>>> + Send;
}

#[derive(Deserialize)]
struct ThreadInfoBody {
    #[serde(default)]
    threads: Vec<ThreadDetails>,
}

#[derive(Deserialize)]
struct StackListBody {
    #[serde(default)]
    stack: Vec<Frame>,
}

#[derive(Deserialize)]
struct VariablesBody {
    #[serde(default)]
    variables: Vec<Variable>,
}

#[derive(Deserialize)]
struct ChildrenBody {
    #[serde(default)]
    children: Vec<Variable>,
}

#[derive(Deserialize)]
struct InsertedBreakpointBody {
    bkpt: Breakpoint,
}

#[derive(Deserialize)]
struct BreakpointTableBody {
    #[serde(rename = "BreakPointTable")]
    table: BreakpointTable,
}

#[derive(Deserialize)]
struct BreakpointTable {
    #[serde(default)]
    body: Vec<Breakpoint>,
}

fn decode<T: DeserializeOwned>(command: &'static str, body: Option<Value>) -> Result<T> {
    let body = body.unwrap_or_else(|| Value::Object(Default::default()));
    serde_json::from_value(body).map_err(|source| {
        TransportError::Decode {
            command: command.to_string(),
            source,
        }
        .into()
    })
}

/// Typed wrappers for the commands that return data.
pub trait GatewayExt: CommandGateway {
    /// Details for one thread. Some backends answer with every thread, so
    /// the result is filtered down to the one asked for.
    fn thread_info(
        &self,
        thread_id: &ThreadId,
    ) -> impl Future<Output = Result<Option<ThreadDetails>>> + Send {
        let thread_id = thread_id.clone();
        async move {
            let command = Command::ThreadInfo {
                thread_id: thread_id.clone(),
            };
            let name = command.name();
            let body: ThreadInfoBody = decode(name, self.call(command).await?)?;
            Ok(body.threads.into_iter().find(|t| t.id == thread_id))
        }
    }

    fn thread_list_ids(&self) -> impl Future<Output = Result<ThreadIds>> + Send {
        async move { decode("thread.listIds", self.call(Command::ThreadListIds).await?) }
    }

    fn stack_list(&self, thread_id: &ThreadId) -> impl Future<Output = Result<Vec<Frame>>> + Send {
        let command = Command::FrameStackList {
            thread_id: thread_id.clone(),
        };
        async move {
            let body: StackListBody = decode("frame.stackList", self.call(command).await?)?;
            Ok(body.stack)
        }
    }

    fn variables_list(
        &self,
        thread_id: &ThreadId,
        frame: usize,
    ) -> impl Future<Output = Result<Vec<Variable>>> + Send {
        let command = Command::FrameVariablesList {
            thread_id: thread_id.clone(),
            frame,
            all_values: true,
        };
        async move {
            let body: VariablesBody = decode("frame.variablesList", self.call(command).await?)?;
            Ok(body.variables)
        }
    }

    fn variable_create(&self, expression: &str) -> impl Future<Output = Result<Variable>> + Send {
        let command = Command::VariableCreate {
            expression: expression.to_string(),
        };
        async move { decode("variable.create", self.call(command).await?) }
    }

    fn variable_list_children(
        &self,
        name: &str,
    ) -> impl Future<Output = Result<Vec<Variable>>> + Send {
        let command = Command::VariableListChildren {
            name: name.to_string(),
            all_values: true,
        };
        async move {
            let body: ChildrenBody = decode("variable.listChildren", self.call(command).await?)?;
            Ok(body.children)
        }
    }

    fn breakpoint_insert(&self, location: &str) -> impl Future<Output = Result<Breakpoint>> + Send {
        let command = Command::BreakpointInsert {
            location: location.to_string(),
        };
        async move {
            let body: InsertedBreakpointBody =
                decode("breakpoint.insert", self.call(command).await?)?;
            Ok(body.bkpt)
        }
    }

    fn breakpoint_list(&self) -> impl Future<Output = Result<Vec<Breakpoint>>> + Send {
        async move {
            let body: BreakpointTableBody =
                decode("breakpoint.list", self.call(Command::BreakpointList).await?)?;
            Ok(body.table.body)
        }
    }

    fn file_get(&self, path: &str) -> impl Future<Output = Result<String>> + Send {
        let command = Command::FileGet {
            path: path.to_string(),
        };
        async move { decode("file.get", self.call(command).await?) }
    }
}

impl<G: CommandGateway + ?Sized> GatewayExt for G {}
