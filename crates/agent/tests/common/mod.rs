//! Shared fixtures for the agent integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use forgehand_core::error::{ProviderError, ToolError};
use forgehand_core::event::AgentEvent;
use forgehand_core::message::{Message, MessageToolCall};
use forgehand_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};
use forgehand_core::tool::{RiskLevel, Tool, ToolResult};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

// ── Mock Provider ────────────────────────────────────────────────────────

/// Returns scripted responses in sequence and records every request.
pub struct ScriptedProvider {
    responses: Mutex<VecDeque<ProviderResponse>>,
    requests: Mutex<Vec<ProviderRequest>>,
    delay: Duration,
    sessions: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new(responses: Vec<ProviderResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
            sessions: AtomicUsize::new(0),
        }
    }

    /// Every call takes `delay` before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn sessions(&self) -> usize {
        self.sessions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let call = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request);
            requests.len()
        };
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let response = self.responses.lock().unwrap().pop_front();
        Ok(response.unwrap_or_else(|| panic!("ScriptedProvider exhausted at call #{call}")))
    }

    fn new_session(&self) {
        self.sessions.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn text_response(text: &str) -> ProviderResponse {
    ProviderResponse {
        message: Message::assistant(text),
        usage: Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }),
        model: "mock-model".into(),
        finish_reason: Some("stop".into()),
    }
}

pub fn tool_response(calls: Vec<MessageToolCall>) -> ProviderResponse {
    let mut message = Message::assistant("");
    message.tool_calls = calls;
    ProviderResponse {
        message,
        usage: Some(Usage {
            prompt_tokens: 20,
            completion_tokens: 8,
            total_tokens: 28,
        }),
        model: "mock-model".into(),
        finish_reason: Some("tool_calls".into()),
    }
}

pub fn call(id: &str, name: &str, args: serde_json::Value) -> MessageToolCall {
    MessageToolCall {
        id: id.into(),
        name: name.into(),
        arguments: args.to_string(),
    }
}

/// Every event published so far, in order.
pub fn drain(rx: &mut broadcast::Receiver<Arc<AgentEvent>>) -> Vec<Arc<AgentEvent>> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

// ── Mock Tools ───────────────────────────────────────────────────────────

/// Records how many safe calls run at once and whether an unsafe call ever
/// ran alongside one.
#[derive(Default)]
pub struct Gauge {
    pub executions: AtomicUsize,
    active_safe: AtomicUsize,
    pub max_safe: AtomicUsize,
    pub unsafe_overlapped: AtomicBool,
}

pub struct SleepTool {
    pub name: &'static str,
    pub risk: RiskLevel,
    pub delay: Duration,
    pub gauge: Arc<Gauge>,
}

#[async_trait]
impl Tool for SleepTool {
    fn name(&self) -> &str {
        self.name
    }
    fn description(&self) -> &str {
        "sleeps, then echoes its argument"
    }
    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object", "properties": {"n": {"type": "integer"}}})
    }
    fn risk(&self) -> RiskLevel {
        self.risk
    }
    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        self.gauge.executions.fetch_add(1, Ordering::SeqCst);
        if self.risk.is_safe() {
            let now = self.gauge.active_safe.fetch_add(1, Ordering::SeqCst) + 1;
            self.gauge.max_safe.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.gauge.active_safe.fetch_sub(1, Ordering::SeqCst);
        } else {
            if self.gauge.active_safe.load(Ordering::SeqCst) > 0 {
                self.gauge.unsafe_overlapped.store(true, Ordering::SeqCst);
            }
            tokio::time::sleep(self.delay).await;
        }
        Ok(ToolResult::ok(format!("{}:{}", self.name, arguments["n"])))
    }
}
