//! The agent reasoning loop implementation.
//!
//! `AWAITING_MODEL → EXECUTING_TOOLS → AWAITING_MODEL → … → DONE`. Every
//! outward model call gets the next request id; that id is carried on the
//! `ToolCompleted` events of the calls it asked for and on its own
//! `RequestCompleted` event.

use forgehand_core::error::Error;
use forgehand_core::event::{AgentEvent, EventBus, RequestStats};
use forgehand_core::memory::MemoryStore;
use forgehand_core::message::{Conversation, Message, MessageToolCall};
use forgehand_core::provider::{Provider, ProviderRequest, ToolDefinition, Usage};
use forgehand_core::tool::{FileAccess, RiskLevel, ToolCall, ToolRegistry, ToolResult};
use forgehand_tools::planner::{DEFAULT_MAX_PARALLEL, DEFAULT_TOOL_TIMEOUT, execute_with_timeout};
use forgehand_tools::{CACHE_HIT_PREFIX, CacheConfig, CacheKey, ReadIndex, Schedule, ToolCache, ToolPlanner};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::context::{ContextConfig, ContextManager};

/// Final answer when the model asks for tools in a session without any.
pub const TOOLS_DISABLED_NOTICE: &str =
    "Tools are disabled for this session, so the requested tool calls were not run. \
     Answer directly or enable tools and try again.";

pub const DEFAULT_MAX_ITERATIONS: u32 = 25;

const EDIT_TOOL: &str = "edit";

/// Everything the loop needs to know besides its collaborators.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub model: String,
    pub system_prompt: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    /// Maximum model turns per `run`.
    pub max_iterations: u32,
    /// `None` offers every registered tool; an empty list disables tools.
    pub enabled_tools: Option<Vec<String>>,
    pub enable_tool_planner: bool,
    pub max_parallel_tools: usize,
    pub tool_timeout: Duration,
    pub streaming: bool,
    /// Successful `edit` calls allowed per file before further ones are rejected.
    pub max_edits_per_file: Option<usize>,
    pub auto_compress: bool,
    pub cache: CacheConfig,
    pub context: ContextConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o".into(),
            system_prompt: "You are a careful coding agent working inside a project directory. \
                            Read files before changing them and keep edits minimal."
                .into(),
            temperature: 0.7,
            max_tokens: None,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            enabled_tools: None,
            enable_tool_planner: false,
            max_parallel_tools: DEFAULT_MAX_PARALLEL,
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
            streaming: false,
            max_edits_per_file: None,
            auto_compress: true,
            cache: CacheConfig::default(),
            context: ContextConfig::default(),
        }
    }
}

/// Per-session state. One session is driven by one control flow; nothing
/// here is shared with planner tasks.
pub struct AgentSession {
    pub conversation: Conversation,
    request_counter: u64,
    usage: Usage,
    cache: ToolCache,
    read_index: ReadIndex,
    edit_counts: HashMap<String, usize>,
}

impl AgentSession {
    pub fn new(cache: CacheConfig) -> Self {
        Self {
            conversation: Conversation::new(),
            request_counter: 0,
            usage: Usage::default(),
            cache: ToolCache::new(cache),
            read_index: ReadIndex::new(),
            edit_counts: HashMap::new(),
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.conversation.messages
    }

    /// Token usage summed over every model call of the session.
    pub fn usage(&self) -> Usage {
        self.usage
    }

    /// Number of model calls made so far; also the last request id issued.
    pub fn requests(&self) -> u64 {
        self.request_counter
    }

    fn next_request_id(&mut self) -> u64 {
        self.request_counter += 1;
        self.request_counter
    }
}

struct Outcome {
    result: ToolResult,
    cached: bool,
}

impl Outcome {
    fn fresh(result: ToolResult) -> Self {
        Self { result, cached: false }
    }
}

/// The core agent loop that orchestrates LLM calls and tool execution.
pub struct AgentLoop {
    provider: Arc<dyn Provider>,
    tools: Arc<ToolRegistry>,
    events: Arc<EventBus>,
    memory: Option<Arc<dyn MemoryStore>>,
    context: ContextManager,
    planner: ToolPlanner,
    config: AgentConfig,
}

impl AgentLoop {
    pub fn new(
        provider: Arc<dyn Provider>,
        tools: Arc<ToolRegistry>,
        events: Arc<EventBus>,
        config: AgentConfig,
    ) -> Self {
        let context = ContextManager::new(&config.model, config.context.clone());
        let planner = ToolPlanner::new(config.max_parallel_tools, config.tool_timeout);
        Self {
            provider,
            tools,
            events,
            memory: None,
            context,
            planner,
            config,
        }
    }

    /// Attach the long-term memory store used for injection and for the
    /// cards extracted during compression.
    pub fn with_memory(mut self, memory: Arc<dyn MemoryStore>) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn context(&self) -> &ContextManager {
        &self.context
    }

    /// Start a new session. The provider's next call counts as
    /// human-initiated again.
    pub fn start_session(&self) -> AgentSession {
        self.provider.new_session();
        AgentSession::new(self.config.cache)
    }

    /// Definitions offered to the model. Empty means tools are disabled.
    pub fn tool_definitions(&self) -> Vec<ToolDefinition> {
        match &self.config.enabled_tools {
            Some(enabled) => self.tools.definitions_for(enabled),
            None => self.tools.definitions(),
        }
    }

    fn is_enabled(&self, name: &str) -> bool {
        self.config
            .enabled_tools
            .as_ref()
            .is_none_or(|enabled| enabled.iter().any(|e| e == name))
    }

    /// Answer `input`, calling tools as the model requests them.
    ///
    /// Fails with [`Error::IterationLimitExceeded`] when the model is still
    /// asking for tools after `max_iterations` turns; the history keeps
    /// everything up to that point.
    pub async fn run(&self, session: &mut AgentSession, input: &str) -> Result<String, Error> {
        info!(
            conversation_id = %session.conversation.id,
            messages = session.conversation.len(),
            "Processing user input"
        );

        if session.conversation.is_empty() {
            session.conversation.push(Message::system(&self.config.system_prompt));
        }
        self.inject_memories(session, input).await;
        session.conversation.push(Message::user(input));

        let definitions = self.tool_definitions();
        for iteration in 1..=self.config.max_iterations {
            if self.config.auto_compress {
                self.compress(session).await;
            }

            let request_id = session.next_request_id();
            debug!(request_id, iteration, "Agent loop iteration");
            let message = self.call_model(session, request_id, &definitions).await?;

            if message.tool_calls.is_empty() {
                let text = message.content.clone();
                session.conversation.push(message);
                return Ok(text);
            }

            if definitions.is_empty() {
                info!(
                    request_id,
                    ignored = message.tool_calls.len(),
                    "Model requested tools while tools are disabled"
                );
                session.conversation.push(Message::assistant(TOOLS_DISABLED_NOTICE));
                return Ok(TOOLS_DISABLED_NOTICE.to_string());
            }

            let calls = message.tool_calls.clone();
            session.conversation.push(message);
            let outcomes = self.execute_tools(session, &calls).await;
            self.record_results(session, request_id, &calls, outcomes);
        }

        warn!(
            conversation_id = %session.conversation.id,
            limit = self.config.max_iterations,
            "Iteration limit reached without a final answer"
        );
        Err(Error::IterationLimitExceeded {
            limit: self.config.max_iterations,
        })
    }

    async fn inject_memories(&self, session: &mut AgentSession, input: &str) {
        let Some(store) = &self.memory else {
            return;
        };
        if let Some(injection) = self.context.memory_message(store.as_ref(), input).await {
            session.conversation.push(injection.message);
            self.events.publish(AgentEvent::MemoryInjected { cards: injection.cards });
        }
    }

    async fn compress(&self, session: &mut AgentSession) {
        let mut messages = std::mem::take(&mut session.conversation.messages);
        let report = self
            .context
            .compress(
                &mut messages,
                self.provider.as_ref(),
                &self.config.model,
                self.memory.as_deref(),
            )
            .await;
        session.conversation.replace_messages(messages);

        if let Some(report) = report {
            session.read_index.rebuild(&session.conversation.messages);
            self.events.publish(AgentEvent::ContextCompressed {
                tokens_before: report.tokens_before,
                tokens_after: report.tokens_after,
                summarized_messages: report.summarized_messages,
                memories_added: report.memories_added,
            });
        }
    }

    /// One model round-trip. Publishes `RequestCompleted` with the elapsed
    /// time from the start of the call to the end of its (possibly streamed)
    /// response.
    async fn call_model(
        &self,
        session: &mut AgentSession,
        request_id: u64,
        definitions: &[ToolDefinition],
    ) -> Result<Message, Error> {
        let mut request = ProviderRequest::new(self.config.model.clone(), session.conversation.messages.clone());
        request.temperature = self.config.temperature;
        request.max_tokens = self.config.max_tokens;
        request.tools = definitions.to_vec();
        request.stream = self.config.streaming;

        let started = Instant::now();
        let (message, usage, model) = if self.config.streaming {
            let mut chunks = self.provider.stream(request).await?;
            let mut content = String::new();
            let mut tool_calls = Vec::new();
            let mut usage = None;
            while let Some(chunk) = chunks.recv().await {
                let chunk = chunk?;
                if let Some(delta) = chunk.content {
                    content.push_str(&delta);
                }
                tool_calls.extend(chunk.tool_calls);
                if chunk.usage.is_some() {
                    usage = chunk.usage;
                }
                if chunk.done {
                    break;
                }
            }
            let mut message = Message::assistant(content);
            message.tool_calls = tool_calls;
            (message, usage, self.config.model.clone())
        } else {
            let response = self.provider.complete(request).await?;
            (response.message, response.usage, response.model)
        };
        let elapsed = started.elapsed();

        if let Some(usage) = &usage {
            session.usage.add(usage);
        }
        let stats = RequestStats {
            elapsed,
            model,
            usage,
            tool_calls: message.tool_calls.len(),
            streamed: self.config.streaming,
        };
        debug!(
            request_id,
            elapsed_ms = stats.elapsed.as_millis() as u64,
            tool_calls = stats.tool_calls,
            "Model call completed"
        );
        self.events.publish(AgentEvent::RequestCompleted { request_id, stats });
        Ok(message)
    }

    /// Decode a model tool call. Calls that cannot run become failed results.
    fn admit(&self, call: &MessageToolCall) -> Result<ToolCall, ToolResult> {
        if !self.is_enabled(&call.name) || self.tools.get(&call.name).is_none() {
            return Err(ToolResult::failure(format!("Unknown tool: {}", call.name)).with_call_id(&call.id));
        }
        ToolCall::parse(call)
            .map_err(|e| ToolResult::failure(format!("Invalid arguments JSON: {e}")).with_call_id(&call.id))
    }

    fn is_safe(&self, name: &str) -> bool {
        self.tools.risk(name).is_some_and(|r| r.is_safe())
    }

    fn file_access(&self, call: &ToolCall) -> Option<FileAccess> {
        self.tools.get(&call.name)?.file_access(&call.arguments)
    }

    /// Run one turn's calls. Outcomes come back in call order.
    async fn execute_tools(&self, session: &mut AgentSession, calls: &[MessageToolCall]) -> Vec<Outcome> {
        let mut slots: Vec<Option<Outcome>> = calls.iter().map(|_| None).collect();
        let mut admitted: Vec<(usize, ToolCall)> = Vec::with_capacity(calls.len());
        for (i, raw) in calls.iter().enumerate() {
            match self.admit(raw) {
                Ok(call) => admitted.push((i, call)),
                Err(rejected) => slots[i] = Some(Outcome::fresh(rejected)),
            }
        }

        let order = if self.config.enable_tool_planner {
            let batch: Vec<ToolCall> = admitted.iter().map(|(_, c)| c.clone()).collect();
            match self.planner.plan(&self.tools, &batch) {
                Schedule::Phased { concurrent, sequential } => {
                    let safe: Vec<(usize, ToolCall)> = concurrent.iter().map(|&j| admitted[j].clone()).collect();
                    for (i, outcome) in self.run_safe_batch(session, safe).await {
                        slots[i] = Some(outcome);
                    }
                    sequential
                }
                Schedule::Sequential(order) => order,
            }
        } else {
            (0..admitted.len()).collect()
        };

        for j in order {
            let (i, call) = &admitted[j];
            slots[*i] = Some(self.run_one(session, call).await);
        }

        slots
            .into_iter()
            .zip(calls)
            .map(|(slot, call)| {
                slot.unwrap_or_else(|| {
                    Outcome::fresh(ToolResult::failure("Tool call was not scheduled").with_call_id(&call.id))
                })
            })
            .collect()
    }

    /// Safe calls of a phased turn: cache hits first, misses on the pool.
    async fn run_safe_batch(&self, session: &mut AgentSession, calls: Vec<(usize, ToolCall)>) -> Vec<(usize, Outcome)> {
        let mut outcomes = Vec::with_capacity(calls.len());
        let mut misses = Vec::new();
        for (i, call) in calls {
            match self.cache_hit(session, &call) {
                Some(hit) => outcomes.push((i, hit)),
                None => misses.push((i, call)),
            }
        }
        if misses.is_empty() {
            return outcomes;
        }

        let by_index: HashMap<usize, ToolCall> = misses.iter().cloned().collect();
        for (i, result) in self.planner.run_concurrent(Arc::clone(&self.tools), misses).await {
            if let Some(call) = by_index.get(&i) {
                self.after_execution(session, call, &result);
            }
            outcomes.push((i, Outcome::fresh(result)));
        }
        outcomes
    }

    /// One call in sequence: cache lookup, edit budget, execution.
    async fn run_one(&self, session: &mut AgentSession, call: &ToolCall) -> Outcome {
        if self.is_safe(&call.name)
            && let Some(hit) = self.cache_hit(session, call)
        {
            return hit;
        }
        if let Some(rejection) = self.check_edit_budget(session, call) {
            return Outcome::fresh(rejection);
        }
        let result = execute_with_timeout(&self.tools, call, self.config.tool_timeout).await;
        self.after_execution(session, call, &result);
        Outcome::fresh(result)
    }

    fn cache_hit(&self, session: &mut AgentSession, call: &ToolCall) -> Option<Outcome> {
        let hit = session.cache.get(&CacheKey::new(&call.name, &call.arguments))?;
        debug!(tool = %call.name, "Tool cache hit");
        if let Some(tool) = self.tools.get(&call.name) {
            tool.served_from_cache(&call.arguments);
        }
        Some(Outcome {
            result: hit.with_call_id(&call.id),
            cached: true,
        })
    }

    fn check_edit_budget(&self, session: &AgentSession, call: &ToolCall) -> Option<ToolResult> {
        let limit = self.config.max_edits_per_file?;
        if call.name != EDIT_TOOL {
            return None;
        }
        let path = self.file_access(call)?.path().to_string();
        let done = session.edit_counts.get(&path).copied().unwrap_or(0);
        if done < limit {
            return None;
        }
        warn!(path = %path, edits = done, "Rejecting edit over the per-file budget");
        Some(
            ToolResult::failure(format!(
                "EDIT REJECTED: {path} has already been edited {done} time(s) in this session. \
                 Stop making many small edits: re-read the file and combine all remaining \
                 changes into one larger edit, or rewrite it with write_file."
            ))
            .with_call_id(&call.id),
        )
    }

    /// Cache successful safe results; let successful writes evict what they
    /// made stale.
    fn after_execution(&self, session: &mut AgentSession, call: &ToolCall, result: &ToolResult) {
        if !result.success {
            return;
        }
        let access = self.file_access(call);
        if self.is_safe(&call.name) {
            let paths = match &access {
                Some(FileAccess::Read { path, .. }) => vec![path.clone()],
                _ => Vec::new(),
            };
            session
                .cache
                .insert(CacheKey::new(&call.name, &call.arguments), result.clone(), paths);
            return;
        }
        match access {
            Some(FileAccess::Write { path }) => {
                session.cache.invalidate_path(&path);
                session.read_index.record_write(&path);
                if call.name == EDIT_TOOL {
                    *session.edit_counts.entry(path).or_default() += 1;
                }
            }
            Some(FileAccess::Read { .. }) => {}
            None => {
                if self.tools.risk(&call.name) == Some(RiskLevel::High) {
                    debug!(tool = %call.name, "Mutating tool with unknown footprint, clearing cache");
                    session.cache.clear();
                }
            }
        }
    }

    /// Append tool messages in call order and publish their events.
    fn record_results(&self, session: &mut AgentSession, request_id: u64, calls: &[MessageToolCall], outcomes: Vec<Outcome>) {
        for (raw, outcome) in calls.iter().zip(outcomes) {
            let mut content = outcome.result.message_content();
            if outcome.cached {
                content = format!("{CACHE_HIT_PREFIX}{content}");
            }
            session
                .conversation
                .push(Message::tool_result(&raw.id, &raw.name, content));

            if outcome.result.success
                && let Ok(call) = ToolCall::parse(raw)
                && let Some(FileAccess::Read { path, full: true }) = self.file_access(&call)
            {
                let slot = session.conversation.len() - 1;
                session
                    .read_index
                    .record_read(&mut session.conversation.messages, &path, slot);
            }

            debug!(
                request_id,
                tool = %raw.name,
                success = outcome.result.success,
                cached = outcome.cached,
                "Tool call completed"
            );
            self.events.publish(AgentEvent::ToolCompleted {
                name: raw.name.clone(),
                arguments: raw.arguments.clone(),
                result: outcome.result,
                request_id,
                cached: outcome.cached,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{SequentialMockProvider, make_text_response, make_tool_call, make_tool_call_response};
    use async_trait::async_trait;
    use forgehand_core::error::ToolError;
    use forgehand_core::tool::Tool;
    use forgehand_memory::InMemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Echoes its `path`, counting executions. Declares a full read of it.
    struct CountingReadTool {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Tool for CountingReadTool {
        fn name(&self) -> &str {
            "read_file"
        }
        fn description(&self) -> &str {
            "fake read"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object"})
        }
        fn risk(&self) -> RiskLevel {
            RiskLevel::Low
        }
        fn file_access(&self, arguments: &serde_json::Value) -> Option<FileAccess> {
            Some(FileAccess::Read {
                path: arguments["path"].as_str()?.to_string(),
                full: true,
            })
        }
        async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ToolResult::ok(format!("content for {}", arguments["path"].as_str().unwrap_or(""))))
        }
    }

    /// Accepts every edit; the agent only sees `success`.
    struct AcceptingEditTool {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl Tool for AcceptingEditTool {
        fn name(&self) -> &str {
            "edit"
        }
        fn description(&self) -> &str {
            "fake edit"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object"})
        }
        fn file_access(&self, arguments: &serde_json::Value) -> Option<FileAccess> {
            Some(FileAccess::Write {
                path: arguments["file_path"].as_str()?.to_string(),
            })
        }
        async fn execute(&self, _arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Ok(ToolResult::failure("Not found"));
            }
            Ok(ToolResult::ok("Edit successful"))
        }
    }

    fn build_agent(provider: Arc<SequentialMockProvider>, tools: ToolRegistry, config: AgentConfig) -> AgentLoop {
        AgentLoop::new(provider, Arc::new(tools), Arc::new(EventBus::default()), config)
    }

    fn config() -> AgentConfig {
        AgentConfig {
            model: "mock-model".into(),
            system_prompt: "sys".into(),
            ..AgentConfig::default()
        }
    }

    #[tokio::test]
    async fn simple_text_response() {
        let provider = Arc::new(SequentialMockProvider::new(vec![make_text_response("Hello! How can I help?")]));
        let agent = build_agent(provider.clone(), ToolRegistry::new(), config());
        let mut session = agent.start_session();

        let response = agent.run(&mut session, "Hello!").await.unwrap();
        assert_eq!(response, "Hello! How can I help?");
        // System + User + Assistant
        assert_eq!(session.messages().len(), 3);
        assert_eq!(session.requests(), 1);
        assert_eq!(session.usage().total_tokens, 15);
    }

    #[tokio::test]
    async fn repeated_read_is_served_from_cache() {
        let provider = Arc::new(SequentialMockProvider::new(vec![
            make_tool_call_response(vec![make_tool_call("call-1", "read_file", serde_json::json!({"path": "a.txt"}))]),
            make_tool_call_response(vec![make_tool_call("call-2", "read_file", serde_json::json!({"path": "a.txt"}))]),
            make_text_response("done"),
        ]));
        let read = Arc::new(CountingReadTool { calls: AtomicUsize::new(0) });
        let mut tools = ToolRegistry::new();
        tools.register(read.clone());
        let agent = build_agent(provider, tools, config());
        let mut session = agent.start_session();

        assert_eq!(agent.run(&mut session, "hi").await.unwrap(), "done");
        assert_eq!(read.calls.load(Ordering::SeqCst), 1);

        let reads: Vec<_> = session.messages().iter().filter(|m| m.is_named("read_file")).collect();
        assert_eq!(reads.len(), 2);
        assert_eq!(reads[1].content, "(cache hit) content for a.txt");
        assert_eq!(reads[1].tool_call_id.as_deref(), Some("call-2"));
        assert!(reads[0].content.starts_with("(superseded)"));
    }

    #[tokio::test]
    async fn edits_invalidate_cached_reads() {
        let provider = Arc::new(SequentialMockProvider::new(vec![
            make_tool_call_response(vec![make_tool_call("1", "read_file", serde_json::json!({"path": "a.txt"}))]),
            make_tool_call_response(vec![make_tool_call(
                "2",
                "edit",
                serde_json::json!({"file_path": "a.txt", "old_string": "a", "new_string": "b"}),
            )]),
            make_tool_call_response(vec![make_tool_call("3", "read_file", serde_json::json!({"path": "a.txt"}))]),
            make_text_response("done"),
        ]));
        let read = Arc::new(CountingReadTool { calls: AtomicUsize::new(0) });
        let mut tools = ToolRegistry::new();
        tools.register(read.clone());
        tools.register(Arc::new(AcceptingEditTool {
            calls: AtomicUsize::new(0),
            fail: false,
        }));
        let agent = build_agent(provider, tools, config());
        let mut session = agent.start_session();

        agent.run(&mut session, "hi").await.unwrap();
        assert_eq!(read.calls.load(Ordering::SeqCst), 2);
        let reads: Vec<_> = session.messages().iter().filter(|m| m.is_named("read_file")).collect();
        assert_eq!(
            reads[0].content,
            "(superseded) Earlier read of a.txt replaced by the file was modified and re-read"
        );
        assert_eq!(reads[1].content, "content for a.txt");
    }

    #[tokio::test]
    async fn edit_budget_rejects_and_ignores_failures() {
        let edit_call = |id: &str| {
            make_tool_call(
                id,
                "edit",
                serde_json::json!({"file_path": "test.py", "old_string": "a", "new_string": "b"}),
            )
        };
        let provider = Arc::new(SequentialMockProvider::new(vec![
            make_tool_call_response(vec![edit_call("1")]),
            make_tool_call_response(vec![edit_call("2")]),
            make_text_response("done"),
        ]));
        let edit = Arc::new(AcceptingEditTool {
            calls: AtomicUsize::new(0),
            fail: false,
        });
        let mut tools = ToolRegistry::new();
        tools.register(edit.clone());
        let agent = build_agent(provider, tools, AgentConfig {
            max_edits_per_file: Some(1),
            ..config()
        });
        let mut session = agent.start_session();
        let mut events = agent.events().subscribe();

        agent.run(&mut session, "hi").await.unwrap();
        assert_eq!(edit.calls.load(Ordering::SeqCst), 1);

        let mut results = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let AgentEvent::ToolCompleted { result, .. } = event.as_ref() {
                results.push(result.clone());
            }
        }
        assert!(results[0].success);
        let error = results[1].error.as_deref().unwrap();
        assert!(error.starts_with("EDIT REJECTED"));
        assert!(error.contains("edit"));

        // Failed edits do not use up the budget.
        let provider = Arc::new(SequentialMockProvider::new(vec![
            make_tool_call_response(vec![edit_call("1")]),
            make_tool_call_response(vec![edit_call("2")]),
            make_text_response("done"),
        ]));
        let failing = Arc::new(AcceptingEditTool {
            calls: AtomicUsize::new(0),
            fail: true,
        });
        let mut tools = ToolRegistry::new();
        tools.register(failing.clone());
        let agent = build_agent(provider, tools, AgentConfig {
            max_edits_per_file: Some(1),
            ..config()
        });
        let mut session = agent.start_session();
        agent.run(&mut session, "hi").await.unwrap();
        assert_eq!(failing.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unknown_and_malformed_calls_become_failed_results() {
        let mut bad_args = make_tool_call("2", "read_file", serde_json::json!({}));
        bad_args.arguments = "{not json".into();
        let provider = Arc::new(SequentialMockProvider::new(vec![
            make_tool_call_response(vec![make_tool_call("1", "shell", serde_json::json!({})), bad_args]),
            make_text_response("done"),
        ]));
        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(CountingReadTool { calls: AtomicUsize::new(0) }));
        let agent = build_agent(provider, tools, config());
        let mut session = agent.start_session();

        agent.run(&mut session, "hi").await.unwrap();
        let tool_messages: Vec<_> = session
            .messages()
            .iter()
            .filter(|m| m.tool_call_id.is_some())
            .collect();
        assert_eq!(tool_messages[0].content, "Error: Unknown tool: shell");
        assert!(tool_messages[1].content.starts_with("Error: Invalid arguments JSON"));
    }

    #[tokio::test]
    async fn iteration_limit_is_an_error() {
        let provider = Arc::new(SequentialMockProvider::new(vec![
            make_tool_call_response(vec![make_tool_call("1", "read_file", serde_json::json!({"path": "a"}))]),
            make_tool_call_response(vec![make_tool_call("2", "read_file", serde_json::json!({"path": "b"}))]),
        ]));
        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(CountingReadTool { calls: AtomicUsize::new(0) }));
        let agent = build_agent(provider, tools, AgentConfig {
            max_iterations: 2,
            ..config()
        });
        let mut session = agent.start_session();

        let err = agent.run(&mut session, "loop forever").await.unwrap_err();
        assert!(matches!(err, Error::IterationLimitExceeded { limit: 2 }));
        // system, user, 2 x (assistant + tool)
        assert_eq!(session.messages().len(), 6);
    }

    #[tokio::test]
    async fn memories_are_injected_before_the_user_message() {
        let provider = Arc::new(SequentialMockProvider::new(vec![make_text_response("gpt-4o")]));
        let store = Arc::new(InMemoryStore::with_cards(vec![forgehand_core::memory::MemoryCard::new(
            "之前决定使用 gpt-4o 作为默认模型。",
            forgehand_core::memory::MemoryKind::Decision,
        )]));
        let agent = build_agent(provider.clone(), ToolRegistry::new(), config()).with_memory(store);
        let mut session = agent.start_session();

        agent.run(&mut session, "默认模型是什么？").await.unwrap();

        let payload = &provider.requests()[0].messages;
        assert_eq!(payload.len(), 3);
        assert!(payload[1].is_named("memory_context"));
        assert!(payload[1].content.contains("Relevant Memories"));
        assert_eq!(payload[2].content, "默认模型是什么？");
    }
}
