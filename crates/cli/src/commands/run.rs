//! `forgehand run` — work on one task and print the final answer.

use anyhow::{Context, bail};
use forgehand_agent::{AgentConfig, AgentLoop, ContextConfig, SubagentTool};
use forgehand_config::AppConfig;
use forgehand_core::event::{AgentEvent, EventBus};
use forgehand_core::provider::Provider;
use forgehand_memory::JsonFileStore;
use forgehand_providers::OpenAiCompatProvider;
use forgehand_security::Workspace;
use forgehand_tools::CacheConfig;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info};

/// Translate the file configuration plus command-line switches into the
/// loop's configuration.
pub fn agent_config(config: &AppConfig, planner: bool, no_tools: bool) -> AgentConfig {
    let defaults = AgentConfig::default();
    let enabled_tools = if no_tools {
        Some(Vec::new())
    } else {
        config.tools.enabled.clone()
    };
    AgentConfig {
        model: config.model.clone(),
        system_prompt: config.system_prompt.clone().unwrap_or(defaults.system_prompt),
        temperature: config.temperature,
        max_tokens: config.max_tokens,
        max_iterations: config.agent.max_iterations,
        enabled_tools,
        enable_tool_planner: planner || config.agent.enable_tool_planner,
        max_parallel_tools: config.agent.max_parallel_tools,
        tool_timeout: Duration::from_secs(config.agent.tool_timeout_secs),
        streaming: config.agent.streaming,
        max_edits_per_file: config.agent.max_edits_per_file,
        auto_compress: config.context.auto_compress,
        cache: CacheConfig {
            max_entries: config.cache.max_entries,
            ttl: Duration::from_secs(config.cache.ttl_secs),
        },
        context: ContextConfig {
            context_window: config.context.context_window,
            compression_threshold: config.context.compression_threshold,
            retained_ratio: config.context.retained_ratio,
            min_messages_to_keep: config.context.min_messages_to_keep,
            summary_max_tokens: config.context.summary_max_tokens,
            memory_injection: config.context.memory_injection,
            memory_top_k: config.context.memory_top_k,
            memory_max_tokens: config.context.memory_max_tokens,
            ..ContextConfig::default()
        },
    }
}

pub async fn run(config: AppConfig, task: &str, root: &Path, planner: bool, no_tools: bool) -> anyhow::Result<()> {
    let Some(api_key) = config.api_key.clone() else {
        bail!(
            "No API key configured. Set FORGEHAND_API_KEY or OPENAI_API_KEY, or add api_key to {}",
            AppConfig::config_dir().join("config.toml").display()
        );
    };

    let workspace = Workspace::new(root)
        .with_context(|| format!("Invalid project root {}", root.display()))?
        .allow_outside_root(config.tools.allow_outside_root);
    let provider: Arc<dyn Provider> = Arc::new(OpenAiCompatProvider::with_timeout(
        "openai",
        &config.base_url,
        api_key,
        Duration::from_secs(config.request_timeout_secs),
    )?);

    let agent_config = agent_config(&config, planner, no_tools);
    let mut tools = forgehand_tools::default_registry(&workspace);
    tools.register(Arc::new(
        SubagentTool::new(provider.clone(), workspace.clone(), &agent_config)
            .with_timeout(Duration::from_secs(config.agent.subagent_timeout_secs)),
    ));
    let store = Arc::new(JsonFileStore::for_project(workspace.root()));

    info!(
        model = %agent_config.model,
        root = %workspace.root().display(),
        planner = agent_config.enable_tool_planner,
        "Starting run"
    );
    let events = Arc::new(EventBus::default());
    let reporter = tokio::spawn(report_events(events.subscribe()));

    let agent = AgentLoop::new(provider, Arc::new(tools), events, agent_config).with_memory(store);
    let mut session = agent.start_session();
    let outcome = agent.run(&mut session, task).await;

    let usage = session.usage();
    info!(
        requests = session.requests(),
        prompt_tokens = usage.prompt_tokens,
        completion_tokens = usage.completion_tokens,
        "Run finished"
    );
    drop(agent);
    let _ = reporter.await;

    println!("{}", outcome?);
    Ok(())
}

/// Log what the loop does while it runs. Ends when the bus is dropped.
async fn report_events(mut rx: tokio::sync::broadcast::Receiver<Arc<AgentEvent>>) {
    loop {
        let event = match rx.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                debug!(skipped, "Event reporter lagged");
                continue;
            }
            Err(RecvError::Closed) => break,
        };
        match event.as_ref() {
            AgentEvent::ToolCompleted {
                name,
                result,
                request_id,
                cached,
                ..
            } => info!(tool = %name, request_id, success = result.success, cached, "Tool call"),
            AgentEvent::RequestCompleted { request_id, stats } => info!(
                request_id,
                elapsed_secs = stats.elapsed_secs(),
                tool_calls = stats.tool_calls,
                "Model request"
            ),
            AgentEvent::ContextCompressed {
                tokens_before,
                tokens_after,
                memories_added,
                ..
            } => info!(tokens_before, tokens_after, memories_added, "Context compressed"),
            AgentEvent::MemoryInjected { cards } => debug!(cards, "Memories injected"),
        }
    }
}
