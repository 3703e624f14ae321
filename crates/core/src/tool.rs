//! Tool trait — the single capability interface behind every agent action.
//!
//! Tools declare a [`RiskLevel`] (used by the planner to decide what may run
//! concurrently) and, optionally, the file they touch for a given set of
//! arguments (used for cache invalidation and stale-read suppression).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::error::ToolError;
use crate::message::MessageToolCall;
use crate::provider::ToolDefinition;

/// A request to execute a tool, with arguments already decoded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique call ID (matches the model's tool_call.id)
    pub id: String,

    /// Name of the tool to execute
    pub name: String,

    /// Arguments as a JSON object
    pub arguments: serde_json::Value,
}

impl ToolCall {
    /// Decode the raw argument string the model produced.
    pub fn parse(call: &MessageToolCall) -> Result<Self, String> {
        Ok(Self {
            id: call.id.clone(),
            name: call.name.clone(),
            arguments: parse_arguments(&call.arguments)?,
        })
    }
}

/// Decode a raw argument string into a JSON object. Empty input is `{}`.
pub fn parse_arguments(raw: &str) -> Result<serde_json::Value, String> {
    if raw.trim().is_empty() {
        return Ok(serde_json::Value::Object(serde_json::Map::new()));
    }
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(value @ serde_json::Value::Object(_)) => Ok(value),
        Ok(other) => Err(format!("expected a JSON object, got {other}")),
        Err(e) => Err(e.to_string()),
    }
}

/// The result of a tool execution. Never mutated after it is returned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// The call ID this result is for
    #[serde(default)]
    pub call_id: String,

    /// Whether the tool executed successfully
    pub success: bool,

    /// The output content
    pub output: String,

    /// Failure description, when `success` is false
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Structured details (paths, sizes, diff stats...)
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl ToolResult {
    /// A successful result.
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            call_id: String::new(),
            success: true,
            output: output.into(),
            error: None,
            metadata: serde_json::Map::new(),
        }
    }

    /// A failed result carrying an error description.
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            call_id: String::new(),
            success: false,
            output: String::new(),
            error: Some(error.into()),
            metadata: serde_json::Map::new(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn with_call_id(mut self, call_id: impl Into<String>) -> Self {
        self.call_id = call_id.into();
        self
    }

    /// The text placed in the tool message sent back to the model.
    pub fn message_content(&self) -> String {
        if self.success {
            self.output.clone()
        } else {
            format!("Error: {}", self.error.as_deref().unwrap_or(&self.output))
        }
    }
}

/// Declared risk of a tool. Only `Low` tools are read-only and safe to run
/// concurrently or to serve from the dedup cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn is_safe(&self) -> bool {
        matches!(self, RiskLevel::Low)
    }
}

/// The file a call touches, as declared by the tool for concrete arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileAccess {
    /// A read; `full` is false for partial (line-range) reads.
    Read { path: String, full: bool },
    /// A mutation of the file.
    Write { path: String },
}

impl FileAccess {
    pub fn path(&self) -> &str {
        match self {
            FileAccess::Read { path, .. } | FileAccess::Write { path } => path,
        }
    }

    pub fn is_write(&self) -> bool {
        matches!(self, FileAccess::Write { .. })
    }

    pub fn is_full_read(&self) -> bool {
        matches!(self, FileAccess::Read { full: true, .. })
    }
}

/// The core Tool trait.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "read_file", "edit").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the model).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Declared risk. Tools are treated as mutating unless they say otherwise.
    fn risk(&self) -> RiskLevel {
        RiskLevel::High
    }

    /// The file this call reads or writes, if any.
    fn file_access(&self, _arguments: &serde_json::Value) -> Option<FileAccess> {
        None
    }

    /// Per-call time budget, overriding the caller's default. Tools that
    /// legitimately run long (nested agents) set their own.
    fn timeout(&self) -> Option<std::time::Duration> {
        None
    }

    /// Called when a cached result of this call is handed back instead of
    /// executing it again. Tools that keep side state about their calls
    /// refresh it here.
    fn served_from_cache(&self, _arguments: &serde_json::Value) {}

    /// Execute the tool with the given arguments.
    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError>;

    /// Convert this tool into a ToolDefinition for sending to the model.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// Run a decoded call against a tool, converting every error into a failed
/// result tagged with the call id.
pub async fn invoke(tool: &dyn Tool, call: &ToolCall) -> ToolResult {
    let result = match tool.execute(call.arguments.clone()).await {
        Ok(result) => result,
        Err(e) => {
            debug!(tool = %call.name, error = %e, "Tool returned an error");
            ToolResult::failure(format!("Tool execution failed: {e}"))
        }
    };
    result.with_call_id(&call.id)
}

/// A registry of available tools, keyed by name.
///
/// Tools are held behind `Arc` so concurrent planner tasks can own a handle.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.insert(name, tool);
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Declared risk for a registered tool.
    pub fn risk(&self, name: &str) -> Option<RiskLevel> {
        self.tools.get(name).map(|t| t.risk())
    }

    /// All tool definitions, sorted by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<_> = self.tools.values().map(|t| t.to_definition()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Definitions restricted to an enabled set. Unknown names are ignored.
    pub fn definitions_for(&self, enabled: &[String]) -> Vec<ToolDefinition> {
        self.definitions()
            .into_iter()
            .filter(|d| enabled.iter().any(|e| e == &d.name))
            .collect()
    }

    /// Execute a decoded call. Never fails: faults become failed results.
    pub async fn execute_call(&self, call: &ToolCall) -> ToolResult {
        match self.tools.get(&call.name) {
            Some(tool) => invoke(tool.as_ref(), call).await,
            None => ToolResult::failure(format!("Unknown tool: {}", call.name)).with_call_id(&call.id),
        }
    }

    /// Execute a tool by name with the raw argument string from the model.
    pub async fn execute(&self, name: &str, raw_arguments: &str) -> ToolResult {
        if !self.tools.contains_key(name) {
            return ToolResult::failure(format!("Unknown tool: {name}"));
        }
        match parse_arguments(raw_arguments) {
            Ok(arguments) => {
                let call = ToolCall {
                    id: String::new(),
                    name: name.to_string(),
                    arguments,
                };
                self.execute_call(&call).await
            }
            Err(e) => ToolResult::failure(format!("Invalid arguments JSON: {e}")),
        }
    }

    /// List all registered tool names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
