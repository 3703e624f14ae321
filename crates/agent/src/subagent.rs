//! Sub-agent tool — delegate a focused task to a nested, read-only agent.
//!
//! The nested loop gets its own session, its own event bus and only the
//! read-only file tools, so it can explore but never mutate the project.
//! Its final answer becomes this tool's output.

use async_trait::async_trait;
use forgehand_core::error::{Error, ToolError};
use forgehand_core::event::EventBus;
use forgehand_core::provider::Provider;
use forgehand_core::tool::{RiskLevel, Tool, ToolResult};
use forgehand_security::Workspace;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::loop_runner::{AgentConfig, AgentLoop, AgentSession};

pub const SUBAGENT_MAX_ITERATIONS: u32 = 15;
/// Wall-clock budget for a whole nested run, replacing the per-tool timeout.
pub const DEFAULT_SUBAGENT_TIMEOUT: Duration = Duration::from_secs(30 * 60);

const AGENT_TYPES: &[&str] = &["explore", "architect", "coder", "tester", "general"];

fn role_prompt(agent_type: &str) -> &'static str {
    match agent_type {
        "explore" => {
            "You explore codebases. Find the files, symbols and call paths relevant to the task \
             and report them with paths and line numbers."
        }
        "architect" => {
            "You are a software architect. Study the relevant code and propose a concrete design: \
             components, data flow, and the files that would change."
        }
        "coder" => {
            "You are a senior engineer. Work out exactly what code change the task needs and \
             describe it precisely, quoting the code to replace."
        }
        "tester" => {
            "You write tests. Identify the behaviour to cover, the existing test conventions, \
             and the concrete test cases to add."
        }
        _ => "You are a focused assistant. Investigate the task with the available tools and answer concisely.",
    }
}

pub struct SubagentTool {
    provider: Arc<dyn Provider>,
    workspace: Workspace,
    config: AgentConfig,
    timeout: Duration,
}

impl SubagentTool {
    /// `parent` supplies the model and sampling settings; tools, planner
    /// and iteration limit are fixed for the nested loop.
    pub fn new(provider: Arc<dyn Provider>, workspace: Workspace, parent: &AgentConfig) -> Self {
        let config = AgentConfig {
            max_iterations: SUBAGENT_MAX_ITERATIONS.min(parent.max_iterations.max(1)),
            enabled_tools: None,
            enable_tool_planner: true,
            max_edits_per_file: None,
            ..parent.clone()
        };
        Self {
            provider,
            workspace,
            config,
            timeout: DEFAULT_SUBAGENT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.config.max_iterations = max.max(1);
        self
    }
}

#[async_trait]
impl Tool for SubagentTool {
    fn name(&self) -> &str {
        "subagent"
    }

    fn description(&self) -> &str {
        "Delegate a self-contained investigation to a sub-agent with read-only file tools. \
         Returns the sub-agent's final answer."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "agent_type": {
                    "type": "string",
                    "enum": AGENT_TYPES,
                    "description": "Kind of sub-agent (default: general)"
                },
                "task": {
                    "type": "string",
                    "description": "What the sub-agent should do"
                },
                "context": {
                    "type": "string",
                    "description": "Background the sub-agent needs (optional)"
                }
            },
            "required": ["task"]
        })
    }

    fn risk(&self) -> RiskLevel {
        RiskLevel::Medium
    }

    fn timeout(&self) -> Option<Duration> {
        Some(self.timeout)
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let task = arguments
            .get("task")
            .and_then(|v| v.as_str())
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'task' argument".into()))?;
        let agent_type = arguments
            .get("agent_type")
            .and_then(|v| v.as_str())
            .unwrap_or("general");
        if !AGENT_TYPES.contains(&agent_type) {
            return Ok(ToolResult::failure(format!(
                "Unknown agent_type: {agent_type} (expected one of: {})",
                AGENT_TYPES.join(", ")
            )));
        }

        let mut input = task.to_string();
        if let Some(context) = arguments.get("context").and_then(|v| v.as_str()).filter(|c| !c.is_empty()) {
            input = format!("{task}\n\nContext:\n{context}");
        }

        let config = AgentConfig {
            system_prompt: format!("{}\n\n{}", role_prompt(agent_type), self.config.system_prompt),
            ..self.config.clone()
        };
        let tools = Arc::new(forgehand_tools::read_only_registry(&self.workspace));
        let nested = AgentLoop::new(
            Arc::clone(&self.provider),
            tools,
            Arc::new(EventBus::default()),
            config,
        );
        // Not `start_session`: the nested calls stay agent-initiated.
        let mut session = AgentSession::new(self.config.cache);

        info!(agent_type, "Starting sub-agent");
        match nested.run(&mut session, &input).await {
            Ok(answer) => {
                debug!(agent_type, requests = session.requests(), "Sub-agent finished");
                Ok(ToolResult::ok(answer)
                    .with_metadata("agent_type", agent_type)
                    .with_metadata("requests", session.requests()))
            }
            Err(Error::IterationLimitExceeded { limit }) => Ok(ToolResult::failure(format!(
                "Sub-agent ({agent_type}) gave no final answer within {limit} turns"
            ))),
            Err(e) => Err(ToolError::ExecutionFailed {
                tool_name: self.name().into(),
                reason: e.to_string(),
            }),
        }
    }
}
