//! Context summarizer — an isolated model call that condenses history.
//!
//! The reply is expected to be a JSON object `{summary, memories: [...]}`.
//! Unknown fields are ignored. Anything that cannot be read as that shape is
//! reported as [`SummaryError::Malformed`] so the caller can keep its history
//! as it was.

use forgehand_core::error::ProviderError;
use forgehand_core::memory::{MemoryCard, MemoryKind};
use forgehand_core::message::Message;
use forgehand_core::provider::{Provider, ProviderRequest};
use serde::Deserialize;
use tracing::debug;

use super::token::{estimate_tokens, truncate_text};

/// Per-message cap inside the summarizer input.
const MESSAGE_MAX_TOKENS: usize = 2000;
const SUMMARY_TEMPERATURE: f32 = 0.2;

/// Source tag stored on cards extracted by the summarizer.
pub const SUMMARY_SOURCE: &str = "context_summary";

const SYSTEM_PROMPT: &str = "You condense conversation history for a coding agent. \
You are given a conversation (user, assistant and tool messages) and possibly an earlier summary. \
Reply with one JSON object:\n\
{\n  \"summary\": \"markdown: current goal, background, key facts, constraints, decisions, open TODOs, important code or commands\",\n  \"memories\": [\n    {\"content\": \"a retrievable fact, decision or setting\", \"type\": \"goal|decision|constraint|todo|code|fact\", \"tags\": [\"topic keywords\"]}\n  ]\n}\n\
Rules:\n\
- The summary drops repetition and small talk but keeps enough detail for the agent to continue.\n\
- Memories hold only what may need recalling later, one sentence each.\n\
- Output valid JSON only, nothing else.";

#[derive(Debug, thiserror::Error)]
pub enum SummaryError {
    #[error("summarizer call failed: {0}")]
    Provider(#[from] ProviderError),

    #[error("summarizer reply was not usable: {0}")]
    Malformed(String),
}

/// What the summarizer produced.
#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub text: String,
    pub memories: Vec<MemoryCard>,
}

#[derive(Deserialize)]
struct Reply {
    #[serde(default)]
    summary: serde_json::Value,
    #[serde(default)]
    memories: Vec<serde_json::Value>,
}

#[derive(Deserialize)]
struct ReplyMemory {
    #[serde(default)]
    content: String,
    #[serde(rename = "type", default)]
    kind: MemoryKind,
    #[serde(default)]
    tags: Vec<serde_json::Value>,
}

pub struct Summarizer<'a> {
    provider: &'a dyn Provider,
    model: String,
    max_output_tokens: usize,
    max_input_tokens: usize,
    chunk_tokens: usize,
}

impl<'a> Summarizer<'a> {
    pub fn new(provider: &'a dyn Provider, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            max_output_tokens: 1200,
            max_input_tokens: 60_000,
            chunk_tokens: 12_000,
        }
    }

    pub fn with_limits(mut self, max_output_tokens: usize, max_input_tokens: usize, chunk_tokens: usize) -> Self {
        self.max_output_tokens = max_output_tokens;
        self.max_input_tokens = max_input_tokens;
        self.chunk_tokens = chunk_tokens.max(1);
        self
    }

    /// Summarize `messages`, folding in `previous` when given. Oversized
    /// input is summarized chunk by chunk and the chunk summaries merged.
    pub async fn summarize(&self, messages: &[Message], previous: Option<&str>) -> Result<Summary, SummaryError> {
        let formatted = format_messages(messages);
        if estimate_tokens(&formatted) <= self.max_input_tokens {
            return self.summarize_text(&formatted, previous).await;
        }

        let chunks = split_by_tokens(messages, self.chunk_tokens);
        debug!(chunks = chunks.len(), "Summarizing history in chunks");
        let mut merged = Vec::with_capacity(chunks.len());
        let mut memories = Vec::new();
        for (i, chunk) in chunks.iter().enumerate() {
            let partial = self.summarize_text(&format_messages(chunk), None).await?;
            merged.push(format!("Chunk {} summary:\n{}", i + 1, partial.text));
            memories.extend(partial.memories);
        }
        let mut summary = self.summarize_text(&merged.join("\n\n"), previous).await?;
        memories.append(&mut summary.memories);
        summary.memories = memories;
        Ok(summary)
    }

    async fn summarize_text(&self, text: &str, previous: Option<&str>) -> Result<Summary, SummaryError> {
        let mut payload = String::new();
        if let Some(previous) = previous.filter(|p| !p.trim().is_empty()) {
            payload.push_str(&format!("Previous summary:\n{previous}\n\n"));
        }
        payload.push_str(&format!("Conversation history:\n{text}"));

        let mut request = ProviderRequest::new(
            self.model.clone(),
            vec![Message::system(SYSTEM_PROMPT), Message::user(payload)],
        );
        request.temperature = SUMMARY_TEMPERATURE;
        request.max_tokens = Some(self.max_output_tokens as u32);

        let response = self.provider.complete(request).await?;
        let summary = parse_reply(&response.message.content)?;
        Ok(Summary {
            text: truncate_text(&summary.text, self.max_output_tokens),
            memories: summary.memories,
        })
    }
}

/// `[i][role] content`, one line per message, 1-based.
pub fn format_messages(messages: &[Message]) -> String {
    messages
        .iter()
        .enumerate()
        .map(|(i, m)| {
            let content = truncate_text(&m.content, MESSAGE_MAX_TOKENS);
            format!("[{}][{}] {}", i + 1, m.role.as_str(), content).trim().to_string()
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn split_by_tokens(messages: &[Message], chunk_tokens: usize) -> Vec<&[Message]> {
    let mut chunks = Vec::new();
    let mut start = 0;
    let mut current = 0;
    for (i, message) in messages.iter().enumerate() {
        let tokens = estimate_tokens(&message.content);
        if i > start && current + tokens > chunk_tokens {
            chunks.push(&messages[start..i]);
            start = i;
            current = 0;
        }
        current += tokens;
    }
    if start < messages.len() {
        chunks.push(&messages[start..]);
    }
    chunks
}

/// The whole reply as JSON, else the outermost `{...}` span.
fn extract_json(text: &str) -> Option<Reply> {
    let text = text.trim();
    if let Ok(reply) = serde_json::from_str(text) {
        return Some(reply);
    }
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&text[start..=end]).ok()
}

/// Parse a summarizer reply. A missing or empty summary is malformed.
pub fn parse_reply(text: &str) -> Result<Summary, SummaryError> {
    let reply = extract_json(text).ok_or_else(|| SummaryError::Malformed("no JSON object in reply".into()))?;
    let summary = match reply.summary {
        serde_json::Value::String(s) => s.trim().to_string(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    };
    if summary.is_empty() {
        return Err(SummaryError::Malformed("reply has no summary".into()));
    }

    let memories = reply
        .memories
        .into_iter()
        .filter_map(|raw| serde_json::from_value::<ReplyMemory>(raw).ok())
        .filter_map(|m| {
            let content = m.content.trim();
            if content.is_empty() {
                return None;
            }
            let tags = m.tags.iter().filter_map(|t| match t {
                serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
                serde_json::Value::Number(n) => Some(n.to_string()),
                _ => None,
            });
            Some(MemoryCard::new(content, m.kind).with_tags(tags).with_source(SUMMARY_SOURCE))
        })
        .collect();

    Ok(Summary { text: summary, memories })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{SequentialMockProvider, make_text_response};

    fn canned(replies: &[&str]) -> SequentialMockProvider {
        SequentialMockProvider::new(replies.iter().map(|r| make_text_response(r)).collect())
    }

    #[test]
    fn parses_wrapped_json_and_ignores_unknown_fields() {
        let text = "Here you go:\n```json\n{\"summary\": \"Goal: fix parser\", \"extra\": 1, \
                    \"memories\": [{\"content\": \"Use nom\", \"type\": \"decision\", \"tags\": [\"parser\"], \"score\": 9}, \
                    {\"content\": \"  \"}, \"junk\"]}\n```";
        let summary = parse_reply(text).unwrap();
        assert_eq!(summary.text, "Goal: fix parser");
        assert_eq!(summary.memories.len(), 1);
        assert_eq!(summary.memories[0].kind, MemoryKind::Decision);
        assert_eq!(summary.memories[0].tags, vec!["parser"]);
        assert_eq!(summary.memories[0].source.as_deref(), Some(SUMMARY_SOURCE));
    }

    #[test]
    fn malformed_replies_are_rejected() {
        assert!(matches!(parse_reply("no json here"), Err(SummaryError::Malformed(_))));
        assert!(matches!(parse_reply("{\"memories\": []}"), Err(SummaryError::Malformed(_))));
        assert!(matches!(parse_reply("[1, 2]"), Err(SummaryError::Malformed(_))));
    }

    #[test]
    fn formats_numbered_roles() {
        let text = format_messages(&[Message::user("hi"), Message::tool_result("c", "grep", "x")]);
        assert_eq!(text, "[1][user] hi\n[2][tool] x");
    }

    #[tokio::test]
    async fn request_is_isolated_and_folds_previous_summary() {
        let provider = canned(&[r#"{"summary": "s"}"#]);
        let summarizer = Summarizer::new(&provider, "m").with_limits(300, 60_000, 12_000);
        let summary = summarizer
            .summarize(&[Message::user("hello")], Some("old"))
            .await
            .unwrap();
        assert_eq!(summary.text, "s");

        let requests = provider.requests();
        assert_eq!(requests.len(), 1);
        let req = &requests[0];
        assert!(req.tools.is_empty());
        assert_eq!(req.max_tokens, Some(300));
        assert_eq!(req.messages.len(), 2);
        assert_eq!(req.messages[1].content, "Previous summary:\nold\n\nConversation history:\n[1][user] hello");
    }

    #[tokio::test]
    async fn oversized_input_is_chunked() {
        let provider = canned(&[
            r#"{"summary": "one", "memories": [{"content": "a"}]}"#,
            r#"{"summary": "two"}"#,
            r#"{"summary": "merged", "memories": [{"content": "b"}]}"#,
        ]);
        let summarizer = Summarizer::new(&provider, "m").with_limits(1200, 50, 40);
        let messages = vec![Message::user("x".repeat(120)), Message::assistant("y".repeat(120))];
        let summary = summarizer.summarize(&messages, None).await.unwrap();

        assert_eq!(summary.text, "merged");
        let contents: Vec<_> = summary.memories.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["a", "b"]);
        let requests = provider.requests();
        assert_eq!(requests.len(), 3);
        assert!(requests[2].messages[1].content.contains("Chunk 1 summary:\none\n\nChunk 2 summary:\ntwo"));
    }
}
