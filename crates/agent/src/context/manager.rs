//! Context manager — keeps the conversation inside the model's window.
//!
//! Two independent jobs run before each outward model call:
//!
//! - **Compression**: once the estimated payload crosses the trigger, the
//!   older part of the history is replaced by one `context_summary` message
//!   and the summarizer's memory cards are appended to the store.
//! - **Memory injection**: stored cards relevant to the new user input are
//!   listed in one `memory_context` message placed right before it.
//!
//! Compression only ever replaces the summarized prefix. Older tool output
//! is clipped first; that clipping is kept only when it alone brings the
//! payload under the trigger or when the summary goes through. When the
//! summarizer fails or replies with something unreadable, the history is
//! left alone.

use forgehand_core::memory::MemoryStore;
use forgehand_core::message::{Message, Role};
use forgehand_core::provider::Provider;
use tracing::{debug, info, warn};

use super::summarizer::Summarizer;
use super::token::{estimate_messages_tokens, estimate_tokens, truncate_text};

/// Name tag of the synthetic summary message.
pub const SUMMARY_MESSAGE_NAME: &str = "context_summary";
pub const SUMMARY_HEADER: &str = "## Context Summary";
/// Name tag of the synthetic memory message.
pub const MEMORY_MESSAGE_NAME: &str = "memory_context";
pub const MEMORY_HEADER: &str = "## Relevant Memories";

pub const DEFAULT_CONTEXT_WINDOW: usize = 32_000;

/// Known context windows. Longest matching name wins for partial matches.
const MODEL_WINDOWS: &[(&str, usize)] = &[
    ("glm-4.6", 128_000),
    ("gpt-4", 8_192),
    ("gpt-4-turbo", 128_000),
    ("gpt-4o", 128_000),
    ("gpt-4o-mini", 128_000),
    ("gpt-3.5-turbo", 16_385),
    ("deepseek-chat", 64_000),
    ("deepseek-reasoner", 64_000),
    ("claude-3.5-sonnet", 200_000),
    ("claude-3.7-sonnet", 200_000),
    ("o1", 128_000),
    ("o1-mini", 128_000),
    ("o3-mini", 128_000),
];

/// Context window for a model name: exact match, then the longest table
/// name contained in (or containing) the model name, then the default.
pub fn model_context_window(model: &str) -> usize {
    let model = model.trim().to_lowercase();
    if let Some((_, window)) = MODEL_WINDOWS.iter().find(|(name, _)| *name == model) {
        return *window;
    }
    MODEL_WINDOWS
        .iter()
        .filter(|(name, _)| !model.is_empty() && (model.contains(name) || name.contains(model.as_str())))
        .max_by_key(|(name, _)| name.len())
        .map(|(_, window)| *window)
        .unwrap_or(DEFAULT_CONTEXT_WINDOW)
}

/// Token budget and memory injection parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextConfig {
    /// Overrides the model window table.
    pub context_window: Option<usize>,
    pub compression_threshold: f64,
    pub retained_ratio: f64,
    pub min_messages_to_keep: usize,
    pub response_reserve_ratio: f64,
    pub min_reserve_tokens: usize,
    pub tool_message_trim_tokens: usize,
    pub tool_trim_keep_last: usize,
    pub summary_max_tokens: usize,
    pub summary_input_max_tokens: usize,
    pub summary_chunk_tokens: usize,
    pub memory_injection: bool,
    pub memory_top_k: usize,
    pub memory_max_tokens: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            context_window: None,
            compression_threshold: 0.8,
            retained_ratio: 0.6,
            min_messages_to_keep: 4,
            response_reserve_ratio: 0.1,
            min_reserve_tokens: 2000,
            tool_message_trim_tokens: 1200,
            tool_trim_keep_last: 1,
            summary_max_tokens: 1200,
            summary_input_max_tokens: 60_000,
            summary_chunk_tokens: 12_000,
            memory_injection: true,
            memory_top_k: 5,
            memory_max_tokens: 800,
        }
    }
}

/// What one successful compression did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressionReport {
    pub tokens_before: usize,
    pub tokens_after: usize,
    pub summarized_messages: usize,
    pub memories_added: usize,
}

/// A `memory_context` message ready to insert.
#[derive(Debug, Clone)]
pub struct MemoryInjection {
    pub message: Message,
    pub cards: usize,
}

#[derive(Debug, Clone)]
pub struct ContextManager {
    config: ContextConfig,
    window: usize,
}

impl ContextManager {
    pub fn new(model: &str, config: ContextConfig) -> Self {
        let window = config.context_window.unwrap_or_else(|| model_context_window(model));
        Self { config, window }
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// Tokens held back for the model's reply.
    pub fn reserve_tokens(&self) -> usize {
        ((self.window as f64 * self.config.response_reserve_ratio) as usize).max(self.config.min_reserve_tokens)
    }

    /// Payload size at which compression kicks in.
    pub fn trigger_tokens(&self) -> usize {
        let by_ratio = (self.window as f64 * self.config.compression_threshold) as usize;
        by_ratio.min(self.window.saturating_sub(self.reserve_tokens()))
    }

    /// Payload size compression aims for.
    pub fn target_tokens(&self) -> usize {
        (self.window.saturating_sub(self.reserve_tokens()) as f64 * self.config.retained_ratio) as usize
    }

    pub fn needs_compression(&self, messages: &[Message]) -> bool {
        estimate_messages_tokens(messages) >= self.trigger_tokens()
    }

    /// Clip verbose tool messages, all but the newest `tool_trim_keep_last`.
    /// Returns how many were clipped.
    pub fn trim_tool_messages(&self, messages: &mut [Message]) -> usize {
        let limit = self.config.tool_message_trim_tokens;
        let tool_slots: Vec<usize> = messages
            .iter()
            .enumerate()
            .filter(|(_, m)| m.role == Role::Tool)
            .map(|(i, _)| i)
            .collect();
        let protected = tool_slots.len().saturating_sub(self.config.tool_trim_keep_last);
        let mut trimmed = 0;
        for &slot in &tool_slots[..protected] {
            let message = &mut messages[slot];
            if estimate_tokens(&message.content) > limit {
                message.content = truncate_text(&message.content, limit);
                trimmed += 1;
            }
        }
        trimmed
    }

    /// Index into the non-system, non-summary messages where the verbatim
    /// suffix starts. Keeps at least `min_messages_to_keep`, then as many
    /// more as fit `keep_budget`, and never starts on a tool message.
    fn keep_from(&self, rest: &[Message], keep_budget: usize) -> usize {
        let mut start = rest.len();
        let mut used = 0;
        while start > 0 {
            let tokens = estimate_messages_tokens(std::slice::from_ref(&rest[start - 1]));
            let kept = rest.len() - start;
            if kept >= self.config.min_messages_to_keep && used + tokens > keep_budget {
                break;
            }
            used += tokens;
            start -= 1;
        }
        while start > 0 && start < rest.len() && rest[start].role == Role::Tool {
            start -= 1;
        }
        start
    }

    /// Compress `messages` in place if they are over budget.
    ///
    /// Returns `None` when nothing was summarized: under budget, nothing old
    /// enough to fold, or the summarizer failed.
    pub async fn compress(
        &self,
        messages: &mut Vec<Message>,
        provider: &dyn Provider,
        model: &str,
        store: Option<&dyn MemoryStore>,
    ) -> Option<CompressionReport> {
        if !self.needs_compression(messages) {
            return None;
        }
        let tokens_before = estimate_messages_tokens(messages);
        let mut working = messages.clone();
        let trimmed = self.trim_tool_messages(&mut working);
        if trimmed > 0 {
            debug!(trimmed, "Clipped verbose tool messages");
            if !self.needs_compression(&working) {
                *messages = working;
                return None;
            }
        }

        let mut system = Vec::new();
        let mut previous_summary = None;
        let mut rest = Vec::new();
        for message in working {
            if message.role == Role::System {
                system.push(message);
            } else if message.role == Role::Assistant && message.is_named(SUMMARY_MESSAGE_NAME) {
                let body = message.content.strip_prefix(SUMMARY_HEADER).unwrap_or(&message.content);
                previous_summary = Some(body.trim().to_string());
            } else {
                rest.push(message);
            }
        }

        let available = self.target_tokens().saturating_sub(estimate_messages_tokens(&system));
        let keep_budget = available.saturating_sub(self.config.summary_max_tokens);
        let split = self.keep_from(&rest, keep_budget);
        if split == 0 {
            debug!(messages = rest.len(), "Nothing old enough to summarize");
            return None;
        }

        let summarizer = Summarizer::new(provider, model).with_limits(
            self.config.summary_max_tokens,
            self.config.summary_input_max_tokens,
            self.config.summary_chunk_tokens,
        );
        let summary = match summarizer.summarize(&rest[..split], previous_summary.as_deref()).await {
            Ok(summary) => summary,
            Err(e) => {
                warn!(error = %e, "Context summarization failed, keeping history as is");
                return None;
            }
        };

        let memories_added = match store {
            Some(store) if !summary.memories.is_empty() => match store.append(summary.memories).await {
                Ok(added) => added,
                Err(e) => {
                    warn!(error = %e, store = store.name(), "Failed to persist memory cards");
                    0
                }
            },
            _ => 0,
        };

        let summary_message =
            Message::assistant(format!("{SUMMARY_HEADER}\n{}", summary.text)).with_name(SUMMARY_MESSAGE_NAME);
        let mut compressed = system;
        compressed.push(summary_message);
        compressed.extend(rest.drain(split..));
        *messages = compressed;

        let report = CompressionReport {
            tokens_before,
            tokens_after: estimate_messages_tokens(messages),
            summarized_messages: split,
            memories_added,
        };
        info!(
            tokens_before = report.tokens_before,
            tokens_after = report.tokens_after,
            summarized = report.summarized_messages,
            memories = report.memories_added,
            "Compressed conversation context"
        );
        Some(report)
    }

    /// Build the `memory_context` message for `query`, if any stored card is
    /// relevant. Store failures are logged and treated as no memories.
    pub async fn memory_message(&self, store: &dyn MemoryStore, query: &str) -> Option<MemoryInjection> {
        if !self.config.memory_injection || self.config.memory_top_k == 0 {
            return None;
        }
        let cards = match forgehand_memory::search(store, query, self.config.memory_top_k).await {
            Ok(cards) => cards,
            Err(e) => {
                warn!(error = %e, store = store.name(), "Memory search failed");
                return None;
            }
        };

        let mut body = String::from(MEMORY_HEADER);
        let mut included = 0;
        for card in &cards {
            let mut line = format!("\n- [{}] {}", card.kind.as_str(), card.content.trim());
            if !card.tags.is_empty() {
                line.push_str(&format!(" (tags: {})", card.tags.join(", ")));
            }
            if included > 0 && estimate_tokens(&body) + estimate_tokens(&line) > self.config.memory_max_tokens {
                break;
            }
            body.push_str(&line);
            included += 1;
        }
        if included == 0 {
            return None;
        }
        let body = truncate_text(&body, self.config.memory_max_tokens);
        debug!(cards = included, "Injecting relevant memories");
        Some(MemoryInjection {
            message: Message::assistant(body).with_name(MEMORY_MESSAGE_NAME),
            cards: included,
        })
    }
}
