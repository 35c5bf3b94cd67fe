use std::{borrow::Borrow, fmt};

use serde::{Deserialize, Serialize};

use crate::wire;

/// Backend-assigned thread identifier. Opaque: never parsed as a number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThreadId(String);

impl ThreadId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ThreadId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ThreadId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl Borrow<str> for ThreadId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Backend-assigned breakpoint number (`"1"`, `"2.1"` for locations).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BreakpointId(String);

impl BreakpointId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BreakpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BreakpointId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionState {
    #[default]
    Unknown,
    Running,
    Stopped,
}

impl ExecutionState {
    /// Interpret the `state` field of a thread-info record.
    pub fn from_backend(state: &str) -> Self {
        match state {
            "stopped" => ExecutionState::Stopped,
            "running" => ExecutionState::Running,
            _ => ExecutionState::Unknown,
        }
    }
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutionState::Unknown => "unknown",
            ExecutionState::Running => "running",
            ExecutionState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// One entry of a call stack, innermost first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    #[serde(default, deserialize_with = "wire::number")]
    pub level: usize,
    #[serde(rename = "func", default)]
    pub function: String,
    /// Empty for frames without debug information.
    #[serde(default)]
    pub file: String,
    #[serde(default, deserialize_with = "wire::optional_number")]
    pub line: Option<u32>,
    #[serde(rename = "addr", default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

impl Frame {
    pub fn has_source(&self) -> bool {
        !self.file.is_empty()
    }

    /// Last path component of the source file, for compact display.
    pub fn short_file(&self) -> &str {
        self.file
            .rsplit(['/', '\\'])
            .find(|segment| !segment.is_empty())
            .unwrap_or(&self.file)
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {}", self.level, self.function)?;
        if self.has_source() {
            write!(f, " at {}", self.short_file())?;
            if let Some(line) = self.line {
                write!(f, ":{line}")?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Thread {
    pub id: ThreadId,
    pub name: String,
    pub state: ExecutionState,
    /// Empty unless the thread is stopped and its stack has been fetched.
    pub stack: Vec<Frame>,
    /// Bumped on every stop/run transition; stack results tagged with an
    /// older epoch are stale.
    pub epoch: u64,
}

impl Thread {
    pub(crate) fn new(id: ThreadId) -> Self {
        Self {
            id,
            name: String::new(),
            state: ExecutionState::Unknown,
            stack: Vec::new(),
            epoch: 0,
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.state == ExecutionState::Stopped
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Breakpoint {
    #[serde(rename = "number")]
    pub id: BreakpointId,
    #[serde(rename = "func", default)]
    pub function: String,
    #[serde(default)]
    pub file: String,
    #[serde(default, deserialize_with = "wire::optional_number")]
    pub line: Option<u32>,
    #[serde(deserialize_with = "wire::flag", default = "enabled_by_default")]
    pub enabled: bool,
}

fn enabled_by_default() -> bool {
    true
}

impl fmt::Display for Breakpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.id, self.function)?;
        if !self.file.is_empty() {
            write!(f, " at {}", self.file)?;
            if let Some(line) = self.line {
                write!(f, ":{line}")?;
            }
        }
        if !self.enabled {
            f.write_str(" (disabled)")?;
        }
        Ok(())
    }
}

/// A variable object as reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Variable {
    /// Local name for frame variables, object handle (`var1`, `var1.x`) for
    /// created variables and their children.
    pub name: String,
    /// Sub-path of a child relative to its parent.
    #[serde(rename = "exp", alias = "expr", default)]
    pub expression: Option<String>,
    #[serde(default)]
    pub value: String,
    #[serde(rename = "type", default)]
    pub type_name: Option<String>,
    #[serde(rename = "numchild", default, deserialize_with = "wire::number")]
    pub child_count: usize,
}

/// One row of the flat variable display list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableNode {
    /// What the user would type to address this value.
    pub expression: String,
    /// Handle used to ask the backend for children.
    pub handle: String,
    pub type_name: Option<String>,
    pub value: String,
    pub child_count: usize,
    pub is_root: bool,
}

impl VariableNode {
    pub(crate) fn root(expression: impl Into<String>, variable: Variable) -> Self {
        Self {
            expression: expression.into(),
            handle: variable.name,
            type_name: variable.type_name,
            value: variable.value,
            child_count: variable.child_count,
            is_root: true,
        }
    }

    /// A child is addressed as `(parent)` followed by its own sub-path.
    pub(crate) fn child(parent_expression: &str, variable: Variable) -> Self {
        let expression = match variable.name.find('.') {
            Some(dot) => format!("({parent_expression}){}", &variable.name[dot..]),
            None => match &variable.expression {
                Some(sub_path) => format!("({parent_expression}).{sub_path}"),
                None => variable.name.clone(),
            },
        };

        Self {
            expression,
            handle: variable.name,
            type_name: variable.type_name,
            value: variable.value,
            child_count: variable.child_count,
            is_root: false,
        }
    }

    pub fn is_expandable(&self) -> bool {
        self.is_root && self.child_count > 0
    }
}

/// Result of `thread.listIds`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct ThreadIds {
    #[serde(rename = "thread-ids", default)]
    pub thread_ids: Vec<ThreadId>,
    #[serde(rename = "current-thread-id", default)]
    pub current_thread_id: Option<ThreadId>,
}

impl ThreadIds {
    /// The current thread, ignoring the empty id some backends report when
    /// there is none.
    pub fn current(&self) -> Option<&ThreadId> {
        self.current_thread_id
            .as_ref()
            .filter(|id| !id.as_str().is_empty())
    }
}

/// One record of `thread.info`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ThreadDetails {
    pub id: ThreadId,
    #[serde(rename = "target-id", default)]
    pub target_id: String,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub frame: Option<Frame>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_from_mi_record() {
        let frame: Frame = serde_json::from_value(serde_json::json!({
            "level": "1",
            "addr": "0x0000000000400c2a",
            "func": "main.worker",
            "file": "/home/user/go/src/app/worker.go",
            "line": "27"
        }))
        .unwrap();

        assert_eq!(frame.level, 1);
        assert_eq!(frame.line, Some(27));
        assert_eq!(frame.short_file(), "worker.go");
        assert_eq!(frame.to_string(), "#1 main.worker at worker.go:27");
    }

    #[test]
    fn frame_without_source() {
        let frame: Frame = serde_json::from_value(serde_json::json!({
            "level": "0",
            "func": "runtime.futex"
        }))
        .unwrap();

        assert!(!frame.has_source());
        assert_eq!(frame.to_string(), "#0 runtime.futex");
    }

    #[test]
    fn short_file_handles_windows_paths() {
        let frame = Frame {
            level: 0,
            function: "main".to_string(),
            file: r"C:\src\app\main.go".to_string(),
            line: Some(3),
            address: None,
        };
        assert_eq!(frame.short_file(), "main.go");
    }

    #[test]
    fn breakpoint_from_mi_record() {
        let bp: Breakpoint = serde_json::from_value(serde_json::json!({
            "number": "2",
            "type": "breakpoint",
            "enabled": "n",
            "func": "main.main",
            "file": "main.go",
            "line": "14"
        }))
        .unwrap();

        assert_eq!(bp.id, BreakpointId::from("2"));
        assert!(!bp.enabled);
        assert_eq!(bp.to_string(), "2 main.main at main.go:14 (disabled)");
    }

    #[test]
    fn child_expression_uses_parent() {
        let child: Variable = serde_json::from_value(serde_json::json!({
            "name": "var1.count",
            "exp": "count",
            "numchild": "0",
            "value": "3",
            "type": "int"
        }))
        .unwrap();

        let node = VariableNode::child("cfg", child);
        assert_eq!(node.expression, "(cfg).count");
        assert_eq!(node.handle, "var1.count");
        assert!(!node.is_expandable());
    }

    #[test]
    fn child_without_dotted_handle_falls_back_to_sub_path() {
        let child: Variable = serde_json::from_value(serde_json::json!({
            "name": "items_0",
            "expr": "0",
            "value": "7"
        }))
        .unwrap();

        assert_eq!(VariableNode::child("items", child).expression, "(items).0");
    }

    #[test]
    fn empty_current_thread_is_none() {
        let ids: ThreadIds = serde_json::from_value(serde_json::json!({
            "thread-ids": ["1", "2"],
            "current-thread-id": ""
        }))
        .unwrap();

        assert_eq!(ids.thread_ids.len(), 2);
        assert!(ids.current().is_none());
    }
}
