//! Token estimation utilities.
//!
//! Character heuristic without a tokenizer: CJK ideographs cost about
//! two-thirds of a token each, everything else about a quarter. Good enough
//! to decide when to compress; never used for billing.

use forgehand_core::message::Message;
use forgehand_core::provider::ToolDefinition;

/// Fixed cost added to any non-empty text.
const TEXT_OVERHEAD: usize = 4;
/// Role and delimiter cost of one message.
const MESSAGE_OVERHEAD: usize = 3;
/// Per-message framing cost inside a sequence.
const SEQUENCE_OVERHEAD: usize = 2;
/// Envelope of one tool call.
const TOOL_CALL_OVERHEAD: usize = 10;

fn is_cjk(c: char) -> bool {
    ('\u{4e00}'..='\u{9fff}').contains(&c)
}

/// Estimate the token count for a string.
pub fn estimate_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    let (cjk, other) = text
        .chars()
        .fold((0usize, 0usize), |(cjk, other), c| if is_cjk(c) { (cjk + 1, other) } else { (cjk, other + 1) });
    (cjk as f64 / 1.5 + other as f64 / 4.0) as usize + TEXT_OVERHEAD
}

/// Estimate tokens for a single message, including its tool calls and name.
pub fn estimate_message_tokens(message: &Message) -> usize {
    let mut tokens = MESSAGE_OVERHEAD + estimate_tokens(&message.content);
    for call in &message.tool_calls {
        tokens += estimate_tokens(&call.name) + estimate_tokens(&call.arguments) + TOOL_CALL_OVERHEAD;
    }
    if let Some(name) = &message.name {
        tokens += estimate_tokens(name);
    }
    tokens
}

/// Estimate tokens for a message sequence as sent to the model.
pub fn estimate_messages_tokens(messages: &[Message]) -> usize {
    messages
        .iter()
        .map(|m| estimate_message_tokens(m) + SEQUENCE_OVERHEAD)
        .sum()
}

/// Estimate tokens for a slice of tool definitions (serialized as JSON).
pub fn estimate_tools_tokens(tools: &[ToolDefinition]) -> usize {
    tools
        .iter()
        .map(|t| estimate_tokens(&serde_json::to_string(t).unwrap_or_default()))
        .sum()
}

/// Clip `text` to roughly `max_tokens`, keeping its head and tail.
///
/// Returns the text unchanged when it already fits.
pub fn truncate_text(text: &str, max_tokens: usize) -> String {
    if estimate_tokens(text) <= max_tokens {
        return text.to_string();
    }
    let chars: Vec<char> = text.chars().collect();
    let target = (max_tokens * 4).max(80);
    if chars.len() <= target {
        return text.to_string();
    }
    let head = target / 2;
    let tail = target - head;
    let omitted = chars.len() - head - tail;
    let head: String = chars[..head].iter().collect();
    let tail: String = chars[chars.len() - tail..].iter().collect();
    format!("{head}\n...[truncated {omitted} chars]...\n{tail}")
}
