//! Built-in tool implementations for forgehand.
//!
//! Tools give the agent its hands inside a project: read, list, search,
//! write and edit files. Alongside the tools live the pieces the agent loop
//! uses to execute them well: the dedup [`cache`], the stale-read
//! [`read_index`], and the concurrent [`planner`].

pub mod cache;
pub mod edit;
pub mod file_read;
pub mod file_write;
pub mod grep;
pub mod list_files;
pub mod planner;
pub mod read_index;
pub mod read_tracker;

use forgehand_core::error::ToolError;
use forgehand_core::tool::ToolRegistry;
use forgehand_security::Workspace;
use std::fmt::Display;
use std::sync::Arc;

pub use cache::{CACHE_HIT_PREFIX, CacheConfig, CacheKey, ToolCache};
pub use planner::{Schedule, ToolPlanner};
pub use read_index::{READ_PATH_KEY, ReadIndex};
pub use read_tracker::ReadTracker;

/// Tools that never mutate anything; the sub-agent is limited to these.
pub const READ_ONLY_TOOLS: &[&str] = &["read_file", "list_files", "grep"];

/// Create a registry with every built-in file tool bound to `workspace`.
///
/// The read, write and edit tools share one [`ReadTracker`], so a file must
/// be read through this registry before it can be overwritten or edited.
pub fn default_registry(workspace: &Workspace) -> ToolRegistry {
    let tracker = Arc::new(ReadTracker::new());
    let mut registry = read_only_registry_with(workspace, tracker.clone());
    registry.register(Arc::new(file_write::WriteFileTool::new(
        workspace.clone(),
        tracker.clone(),
    )));
    registry.register(Arc::new(edit::EditTool::new(workspace.clone(), tracker)));
    registry
}

/// A registry holding only the [`READ_ONLY_TOOLS`].
pub fn read_only_registry(workspace: &Workspace) -> ToolRegistry {
    read_only_registry_with(workspace, Arc::new(ReadTracker::new()))
}

fn read_only_registry_with(workspace: &Workspace, tracker: Arc<ReadTracker>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(file_read::ReadFileTool::new(workspace.clone(), tracker)));
    registry.register(Arc::new(list_files::ListFilesTool::new(workspace.clone())));
    registry.register(Arc::new(grep::GrepTool::new(workspace.clone())));
    registry
}

pub(crate) fn required_str<'a>(args: &'a serde_json::Value, key: &str) -> Result<&'a str, ToolError> {
    args.get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| ToolError::InvalidArguments(format!("Missing '{key}' argument")))
}

pub(crate) fn optional_str<'a>(
    args: &'a serde_json::Value,
    key: &str,
) -> Result<Option<&'a str>, ToolError> {
    match args.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) => Ok(Some(s)),
        Some(_) => Err(ToolError::InvalidArguments(format!("'{key}' must be a string"))),
    }
}

/// Accepts integers and numeric strings; models send both.
pub(crate) fn optional_usize(args: &serde_json::Value, key: &str) -> Result<Option<usize>, ToolError> {
    let invalid = || ToolError::InvalidArguments(format!("'{key}' must be a non-negative integer"));
    match args.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::Number(n)) => n
            .as_u64()
            .map(|n| Some(n as usize))
            .ok_or_else(invalid),
        Some(serde_json::Value::String(s)) => s.trim().parse().map(Some).map_err(|_| invalid()),
        Some(_) => Err(invalid()),
    }
}

pub(crate) fn optional_bool(args: &serde_json::Value, key: &str) -> Result<Option<bool>, ToolError> {
    match args.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::Bool(b)) => Ok(Some(*b)),
        Some(serde_json::Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Ok(Some(true)),
            "false" => Ok(Some(false)),
            _ => Err(ToolError::InvalidArguments(format!("'{key}' must be a boolean"))),
        },
        Some(_) => Err(ToolError::InvalidArguments(format!("'{key}' must be a boolean"))),
    }
}

pub(crate) fn permission_denied(tool_name: &str, reason: impl Display) -> ToolError {
    ToolError::PermissionDenied {
        tool_name: tool_name.to_string(),
        reason: reason.to_string(),
    }
}
