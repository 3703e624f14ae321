//! OpenAI-compatible provider implementation.
//!
//! Works with OpenAI, GitHub Copilot, OpenRouter, DeepSeek, Ollama, vLLM and
//! any endpoint exposing `/chat/completions`.
//!
//! Supports:
//! - Chat completions (non-streaming and streaming SSE)
//! - Tool use / function calling
//! - An `X-Initiator` header per call, so the backend can tell the
//!   human-initiated first call of a session from agent follow-ups

use async_trait::async_trait;
use forgehand_core::error::ProviderError;
use forgehand_core::message::{Message, MessageToolCall, Role};
use forgehand_core::provider::*;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, trace, warn};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);
pub const INITIATOR_HEADER: &str = "X-Initiator";

/// An OpenAI-compatible LLM provider.
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
    initiated: AtomicBool,
}

impl OpenAiCompatProvider {
    /// Create a new OpenAI-compatible provider with the default timeout.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Result<Self, ProviderError> {
        Self::with_timeout(name, base_url, api_key, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::NotConfigured(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client,
            initiated: AtomicBool::new(false),
        })
    }

    /// Create an OpenAI provider (convenience constructor).
    pub fn openai(api_key: impl Into<String>) -> Result<Self, ProviderError> {
        Self::new("openai", "https://api.openai.com/v1", api_key)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `user` for the first call of a session, `agent` for every call after.
    fn next_initiator(&self) -> &'static str {
        if self.initiated.swap(true, Ordering::SeqCst) {
            "agent"
        } else {
            "user"
        }
    }

    /// Convert our Message types to OpenAI API format.
    fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage> {
        messages
            .iter()
            .map(|m| ApiMessage {
                role: m.role.as_str().to_string(),
                content: Some(m.content.clone()),
                name: match m.role {
                    Role::Tool | Role::Assistant => None,
                    _ => m.name.clone(),
                },
                tool_calls: if m.tool_calls.is_empty() {
                    None
                } else {
                    Some(
                        m.tool_calls
                            .iter()
                            .map(|tc| ApiToolCall {
                                id: tc.id.clone(),
                                r#type: "function".into(),
                                function: ApiFunction {
                                    name: tc.name.clone(),
                                    arguments: tc.arguments.clone(),
                                },
                            })
                            .collect(),
                    )
                },
                tool_call_id: m.tool_call_id.clone(),
            })
            .collect()
    }

    /// Convert tool definitions to OpenAI API format.
    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<ApiToolDefinition> {
        tools
            .iter()
            .map(|t| ApiToolDefinition {
                r#type: "function".into(),
                function: ApiToolFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.parameters.clone(),
                },
            })
            .collect()
    }

    fn request_body(request: &ProviderRequest, stream: bool) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request.messages),
            "temperature": request.temperature,
            "stream": stream,
        });
        if stream {
            body["stream_options"] = serde_json::json!({ "include_usage": true });
        }
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }
        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&request.tools));
        }
        body
    }

    /// POST the body and map non-200 statuses onto the error taxonomy.
    async fn send(&self, body: &serde_json::Value, stream: bool) -> Result<reqwest::Response, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let initiator = self.next_initiator();
        debug!(provider = %self.name, initiator, stream, "Sending completion request");

        let mut builder = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .header(INITIATOR_HEADER, initiator);
        if stream {
            builder = builder.header("Accept", "text/event-stream");
        }

        let response = builder.json(body).send().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout(e.to_string())
            } else {
                ProviderError::Network(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        if status == 200 {
            return Ok(response);
        }
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        let error_body = response.text().await.unwrap_or_default();
        warn!(provider = %self.name, status, body = %error_body, "Provider returned error");
        Err(map_status(status, error_body, retry_after))
    }
}

fn map_status(status: u16, body: String, retry_after: Option<u64>) -> ProviderError {
    match status {
        429 => ProviderError::RateLimited {
            retry_after_secs: retry_after.unwrap_or(5),
        },
        401 | 403 => ProviderError::AuthenticationFailed(if body.is_empty() {
            "Invalid API key or insufficient permissions".into()
        } else {
            body
        }),
        _ => ProviderError::ApiError {
            status_code: status,
            message: body,
        },
    }
}

#[async_trait]
impl Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let body = Self::request_body(&request, false);
        let response = self.send(&body, false).await?;

        let api_response: ApiResponse = response.json().await.map_err(|e| ProviderError::ApiError {
            status_code: 200,
            message: format!("Failed to parse response: {e}"),
        })?;

        let choice = api_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::ApiError {
                status_code: 200,
                message: "No choices in response".into(),
            })?;

        let mut message = Message::assistant(choice.message.content.unwrap_or_default());
        message.tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| MessageToolCall {
                id: tc.id,
                name: tc.function.name,
                arguments: tc.function.arguments,
            })
            .collect();

        Ok(ProviderResponse {
            message,
            usage: api_response.usage.map(Usage::from),
            model: api_response.model.unwrap_or(request.model),
            finish_reason: choice.finish_reason,
        })
    }

    async fn stream(&self, request: ProviderRequest) -> Result<ChunkReceiver, ProviderError> {
        let body = Self::request_body(&request, true);
        let response = self.send(&body, true).await?;

        let (tx, rx) = tokio::sync::mpsc::channel(64);
        let provider_name = self.name.clone();

        tokio::spawn(pump_sse(response.bytes_stream(), tx, provider_name));

        Ok(rx)
    }

    fn new_session(&self) {
        self.initiated.store(false, Ordering::SeqCst);
    }
}

/// Turn an SSE byte stream into chunks on `tx`. Ends on `[DONE]`, on the
/// usage chunk, or when the body ends.
async fn pump_sse<S, B, E>(
    byte_stream: S,
    tx: tokio::sync::mpsc::Sender<Result<StreamChunk, ProviderError>>,
    provider_name: String,
)
where
    S: futures::Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let mut byte_stream = std::pin::pin!(byte_stream);
    let mut lines = SseLines::default();
    let mut calls = ToolCallAccumulators::default();

    while let Some(chunk_result) = byte_stream.next().await {
        let bytes = match chunk_result {
            Ok(b) => b,
            Err(e) => {
                let _ = tx.send(Err(ProviderError::StreamInterrupted(e.to_string()))).await;
                return;
            }
        };
        lines.push(bytes.as_ref());

        while let Some(line) = lines.next_line() {
            let Some(data) = line.strip_prefix("data:").map(str::trim) else {
                continue;
            };
            if data == "[DONE]" {
                let _ = tx.send(Ok(calls.final_chunk(None))).await;
                return;
            }

            let parsed = match serde_json::from_str::<StreamResponse>(data) {
                Ok(parsed) => parsed,
                Err(e) => {
                    trace!(provider = %provider_name, error = %e, "Ignoring unparseable SSE chunk");
                    continue;
                }
            };

            if let Some(choice) = parsed.choices.into_iter().next() {
                calls.absorb(choice.delta.tool_calls.unwrap_or_default());
                if let Some(content) = choice.delta.content.filter(|c| !c.is_empty()) {
                    let chunk = StreamChunk {
                        content: Some(content),
                        ..Default::default()
                    };
                    if tx.send(Ok(chunk)).await.is_err() {
                        return;
                    }
                }
            }

            if let Some(usage) = parsed.usage {
                let _ = tx.send(Ok(calls.final_chunk(Some(usage.into())))).await;
                return;
            }
        }
    }

    // Stream ended without [DONE]
    let _ = tx.send(Ok(calls.final_chunk(None))).await;
}

/// Splits raw body bytes into lines. Bytes are only decoded once a whole
/// line is in, so a character split across network chunks stays intact.
#[derive(Debug, Default)]
struct SseLines {
    buffer: Vec<u8>,
}

impl SseLines {
    fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    fn next_line(&mut self) -> Option<String> {
        let end = self.buffer.iter().position(|&b| b == b'\n')?;
        let raw: Vec<u8> = self.buffer.drain(..=end).collect();
        let line = String::from_utf8_lossy(&raw[..end]);
        Some(line.trim_end_matches('\r').to_string())
    }
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolCall {
    id: String,
    r#type: String,
    function: ApiFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize)]
struct ApiToolDefinition {
    r#type: String,
    function: ApiToolFunction,
}

#[derive(Debug, Serialize)]
struct ApiToolFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    model: Option<String>,
    choices: Vec<ApiChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

impl From<ApiUsage> for Usage {
    fn from(u: ApiUsage) -> Self {
        Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        }
    }
}

// --- Streaming SSE types ---

/// A single SSE `data: {...}` chunk from a streaming response.
#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<StreamToolCallDelta>>,
}

/// A tool call delta — arrives incrementally across chunks.
#[derive(Debug, Deserialize)]
struct StreamToolCallDelta {
    index: u32,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<StreamFunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct StreamFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

/// Incremental tool call deltas, keyed (and later emitted) by index.
#[derive(Default)]
struct ToolCallAccumulators {
    calls: BTreeMap<u32, MessageToolCall>,
}

impl ToolCallAccumulators {
    fn absorb(&mut self, deltas: Vec<StreamToolCallDelta>) {
        for delta in deltas {
            let acc = self.calls.entry(delta.index).or_insert_with(|| MessageToolCall {
                id: String::new(),
                name: String::new(),
                arguments: String::new(),
            });
            if let Some(id) = delta.id {
                acc.id = id;
            }
            if let Some(func) = delta.function {
                if let Some(name) = func.name {
                    acc.name = name;
                }
                if let Some(args) = func.arguments {
                    acc.arguments.push_str(&args);
                }
            }
        }
    }

    fn final_chunk(&mut self, usage: Option<Usage>) -> StreamChunk {
        StreamChunk {
            content: None,
            tool_calls: std::mem::take(&mut self.calls).into_values().collect(),
            done: true,
            usage,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> OpenAiCompatProvider {
        OpenAiCompatProvider::new("test", "http://localhost:9/v1/", "sk-test").unwrap()
    }

    #[test]
    fn constructor_trims_base_url() {
        let provider = provider();
        assert_eq!(provider.name(), "test");
        assert_eq!(provider.base_url(), "http://localhost:9/v1");
        assert!(OpenAiCompatProvider::openai("k").unwrap().base_url().contains("api.openai.com"));
    }

    #[test]
    fn initiator_is_user_then_agent_until_new_session() {
        let provider = provider();
        assert_eq!(provider.next_initiator(), "user");
        assert_eq!(provider.next_initiator(), "agent");
        assert_eq!(provider.next_initiator(), "agent");
        provider.new_session();
        assert_eq!(provider.next_initiator(), "user");
    }

    #[test]
    fn status_mapping() {
        assert!(matches!(
            map_status(429, String::new(), Some(30)),
            ProviderError::RateLimited { retry_after_secs: 30 }
        ));
        assert!(matches!(map_status(401, String::new(), None), ProviderError::AuthenticationFailed(_)));
        assert!(matches!(map_status(403, "nope".into(), None), ProviderError::AuthenticationFailed(m) if m == "nope"));
        assert!(matches!(
            map_status(500, "boom".into(), None),
            ProviderError::ApiError { status_code: 500, .. }
        ));
    }

    #[test]
    fn message_conversion() {
        let mut assistant = Message::assistant("thinking...");
        assistant.tool_calls = vec![MessageToolCall {
            id: "call_1".into(),
            name: "read_file".into(),
            arguments: r#"{"path":"a.rs"}"#.into(),
        }];
        let messages = vec![
            Message::system("You are helpful"),
            Message::user("Hello"),
            assistant,
            Message::tool_result("call_1", "read_file", "fn main() {}"),
        ];
        let api = OpenAiCompatProvider::to_api_messages(&messages);
        assert_eq!(api[0].role, "system");
        assert_eq!(api[2].tool_calls.as_ref().unwrap()[0].function.name, "read_file");
        assert_eq!(api[3].role, "tool");
        assert_eq!(api[3].tool_call_id.as_deref(), Some("call_1"));
        assert!(api[3].name.is_none());
    }

    #[test]
    fn request_body_includes_tools_and_stream_options() {
        let mut request = ProviderRequest::new("gpt-4o", vec![Message::user("hi")]);
        request.tools = vec![ToolDefinition {
            name: "grep".into(),
            description: "search".into(),
            parameters: serde_json::json!({"type": "object"}),
        }];
        let body = OpenAiCompatProvider::request_body(&request, true);
        assert_eq!(body["tools"][0]["type"], "function");
        assert_eq!(body["tools"][0]["function"]["name"], "grep");
        assert_eq!(body["stream_options"]["include_usage"], true);

        let body = OpenAiCompatProvider::request_body(&ProviderRequest::new("m", vec![]), false);
        assert!(body.get("tools").is_none());
        assert!(body.get("stream_options").is_none());
    }

    #[test]
    fn parse_response_with_finish_reason() {
        let data = r#"{"model":"gpt-4o","choices":[{"message":{"role":"assistant","content":null,"tool_calls":[{"id":"c1","type":"function","function":{"name":"grep","arguments":"{}"}}]},"finish_reason":"tool_calls"}],"usage":{"prompt_tokens":3,"completion_tokens":2,"total_tokens":5}}"#;
        let parsed: ApiResponse = serde_json::from_str(data).unwrap();
        assert_eq!(parsed.choices[0].finish_reason.as_deref(), Some("tool_calls"));
        assert_eq!(parsed.choices[0].message.tool_calls.as_ref().unwrap()[0].id, "c1");
        assert_eq!(Usage::from(parsed.usage.unwrap()).total_tokens, 5);
    }

    #[test]
    fn accumulators_assemble_deltas_in_index_order() {
        let mut acc = ToolCallAccumulators::default();
        let first = r#"{"choices":[{"delta":{"tool_calls":[{"index":1,"id":"call_b","function":{"name":"grep","arguments":""}},{"index":0,"id":"call_a","function":{"name":"read_file","arguments":"{\"path\""}}]}}]}"#;
        let second = r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":":\"a.rs\"}"}}]}}]}"#;
        for data in [first, second] {
            let parsed: StreamResponse = serde_json::from_str(data).unwrap();
            let choice = parsed.choices.into_iter().next().unwrap();
            acc.absorb(choice.delta.tool_calls.unwrap());
        }

        let chunk = acc.final_chunk(None);
        assert!(chunk.done);
        assert_eq!(chunk.tool_calls.len(), 2);
        assert_eq!(chunk.tool_calls[0].id, "call_a");
        assert_eq!(chunk.tool_calls[0].arguments, r#"{"path":"a.rs"}"#);
        assert_eq!(chunk.tool_calls[1].name, "grep");
    }

    #[test]
    fn parse_stream_usage_chunk() {
        let data = r#"{"choices":[],"usage":{"prompt_tokens":10,"completion_tokens":5,"total_tokens":15}}"#;
        let parsed: StreamResponse = serde_json::from_str(data).unwrap();
        assert!(parsed.choices.is_empty());
        assert_eq!(parsed.usage.unwrap().completion_tokens, 5);
    }

    #[test]
    fn sse_lines_wait_for_the_newline() {
        let mut lines = SseLines::default();
        lines.push(b"data: a\r\nda");
        assert_eq!(lines.next_line().as_deref(), Some("data: a"));
        assert_eq!(lines.next_line(), None);
        lines.push(b"ta: b\n");
        assert_eq!(lines.next_line().as_deref(), Some("data: b"));
    }

    #[tokio::test]
    async fn multibyte_text_split_across_chunks_survives() {
        let body = "data: {\"choices\":[{\"delta\":{\"content\":\"默认模型\"}}]}\n\ndata: [DONE]\n";
        let bytes = body.as_bytes();
        // Cut inside the first CJK character's three-byte encoding.
        let cut = body.find('默').unwrap() + 1;
        let parts: Vec<Result<Vec<u8>, String>> = vec![Ok(bytes[..cut].to_vec()), Ok(bytes[cut..].to_vec())];

        let (tx, mut rx) = tokio::sync::mpsc::channel(8);
        pump_sse(futures::stream::iter(parts), tx, "test".into()).await;

        let first = rx.recv().await.unwrap().unwrap();
        assert_eq!(first.content.as_deref(), Some("默认模型"));
        let last = rx.recv().await.unwrap().unwrap();
        assert!(last.done);
    }
}
