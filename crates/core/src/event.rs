//! Agent events — one typed channel for every observability hook.
//!
//! Consumers subscribe to the [`EventBus`] and match on [`AgentEvent`]. A
//! consumer that only cares about `(name, arguments, result)` simply ignores
//! the `request_id` field.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use crate::provider::Usage;
use crate::tool::ToolResult;

/// Statistics for one model round-trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestStats {
    /// Wall-clock time from the start of the model call until its completion
    /// (or the end of the stream) was received.
    pub elapsed: Duration,

    /// Model that answered
    pub model: String,

    /// Token usage reported by the provider, if any
    pub usage: Option<Usage>,

    /// Number of tool calls the response requested
    pub tool_calls: usize,

    /// Whether the response was streamed
    pub streamed: bool,
}

impl RequestStats {
    pub fn elapsed_secs(&self) -> f64 {
        self.elapsed.as_secs_f64()
    }
}

/// Everything an observer can see happen during a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// One tool call finished (fresh execution or cache hit).
    ToolCompleted {
        name: String,
        /// The raw argument string the model produced
        arguments: String,
        result: ToolResult,
        /// The model request that asked for this call
        request_id: u64,
        cached: bool,
    },

    /// One model round-trip finished.
    RequestCompleted { request_id: u64, stats: RequestStats },

    /// Older history was replaced by a summary.
    ContextCompressed {
        tokens_before: usize,
        tokens_after: usize,
        summarized_messages: usize,
        memories_added: usize,
    },

    /// Relevant memory cards were inserted before the user message.
    MemoryInjected { cards: usize },
}

impl AgentEvent {
    /// Short name for logging.
    pub fn event_type(&self) -> &'static str {
        match self {
            AgentEvent::ToolCompleted { .. } => "tool_completed",
            AgentEvent::RequestCompleted { .. } => "request_completed",
            AgentEvent::ContextCompressed { .. } => "context_compressed",
            AgentEvent::MemoryInjected { .. } => "memory_injected",
        }
    }
}

/// A broadcast-based event bus.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub. Slow consumers
/// lag and lose the oldest events; publishers never block.
pub struct EventBus {
    sender: broadcast::Sender<Arc<AgentEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: AgentEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<AgentEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn event_bus_publish_subscribe() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(AgentEvent::ToolCompleted {
            name: "read_file".into(),
            arguments: r#"{"path":"a.txt"}"#.into(),
            result: ToolResult::ok("hello"),
            request_id: 3,
            cached: false,
        });

        let event = rx.recv().await.unwrap();
        match event.as_ref() {
            AgentEvent::ToolCompleted { name, request_id, .. } => {
                assert_eq!(name, "read_file");
                assert_eq!(*request_id, 3);
            }
            other => panic!("Expected ToolCompleted, got {other:?}"),
        }
    }

    #[test]
    fn event_bus_no_subscribers_doesnt_panic() {
        let bus = EventBus::new(16);
        bus.publish(AgentEvent::MemoryInjected { cards: 1 });
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let json = serde_json::to_value(AgentEvent::MemoryInjected { cards: 2 }).unwrap();
        assert_eq!(json["type"], "memory_injected");
        assert_eq!(AgentEvent::MemoryInjected { cards: 2 }.event_type(), "memory_injected");
    }
}
