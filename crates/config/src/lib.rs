//! Configuration loading and validation for forgehand.
//!
//! Loads configuration from `~/.forgehand/config.toml` (or an explicit path)
//! with environment variable overrides. Validates all settings on load.

use forgehand_tools::read_tracker::READ_EXPIRATION;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.forgehand/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key for the OpenAI-compatible endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Base URL of the chat completions API
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Model used for the main loop and for summarization
    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Max tokens per model response; provider default when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Replaces the built-in system prompt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    /// HTTP timeout for one model request
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default)]
    pub agent: AgentSection,

    #[serde(default)]
    pub context: ContextSection,

    #[serde(default)]
    pub cache: CacheSection,

    #[serde(default)]
    pub tools: ToolsSection,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_model() -> String {
    "gpt-4o".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_request_timeout() -> u64 {
    120
}
fn default_true() -> bool {
    true
}

fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("system_prompt", &self.system_prompt)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("agent", &self.agent)
            .field("context", &self.context)
            .field("cache", &self.cache)
            .field("tools", &self.tools)
            .finish()
    }
}

/// `[agent]` — loop limits and tool scheduling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSection {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Run read-only tool calls of one turn concurrently
    #[serde(default)]
    pub enable_tool_planner: bool,

    #[serde(default = "default_max_parallel_tools")]
    pub max_parallel_tools: usize,

    #[serde(default = "default_tool_timeout")]
    pub tool_timeout_secs: u64,

    #[serde(default)]
    pub streaming: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_edits_per_file: Option<usize>,

    /// Budget for a whole `subagent` call, which runs its own model turns
    #[serde(default = "default_subagent_timeout")]
    pub subagent_timeout_secs: u64,
}

fn default_max_iterations() -> u32 {
    25
}
fn default_max_parallel_tools() -> usize {
    4
}
fn default_tool_timeout() -> u64 {
    120
}
fn default_subagent_timeout() -> u64 {
    1800
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            enable_tool_planner: false,
            max_parallel_tools: default_max_parallel_tools(),
            tool_timeout_secs: default_tool_timeout(),
            streaming: false,
            max_edits_per_file: None,
            subagent_timeout_secs: default_subagent_timeout(),
        }
    }
}

/// `[context]` — compression and memory injection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextSection {
    #[serde(default = "default_true")]
    pub auto_compress: bool,

    /// Overrides the built-in model window table
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_window: Option<usize>,

    #[serde(default = "default_compression_threshold")]
    pub compression_threshold: f64,

    #[serde(default = "default_retained_ratio")]
    pub retained_ratio: f64,

    #[serde(default = "default_min_messages_to_keep")]
    pub min_messages_to_keep: usize,

    #[serde(default = "default_summary_max_tokens")]
    pub summary_max_tokens: usize,

    #[serde(default = "default_true")]
    pub memory_injection: bool,

    #[serde(default = "default_memory_top_k")]
    pub memory_top_k: usize,

    #[serde(default = "default_memory_max_tokens")]
    pub memory_max_tokens: usize,
}

fn default_compression_threshold() -> f64 {
    0.8
}
fn default_retained_ratio() -> f64 {
    0.6
}
fn default_min_messages_to_keep() -> usize {
    4
}
fn default_summary_max_tokens() -> usize {
    1200
}
fn default_memory_top_k() -> usize {
    5
}
fn default_memory_max_tokens() -> usize {
    800
}

impl Default for ContextSection {
    fn default() -> Self {
        Self {
            auto_compress: true,
            context_window: None,
            compression_threshold: default_compression_threshold(),
            retained_ratio: default_retained_ratio(),
            min_messages_to_keep: default_min_messages_to_keep(),
            summary_max_tokens: default_summary_max_tokens(),
            memory_injection: true,
            memory_top_k: default_memory_top_k(),
            memory_max_tokens: default_memory_max_tokens(),
        }
    }
}

/// `[cache]` — read-only tool result cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSection {
    #[serde(default = "default_cache_entries")]
    pub max_entries: usize,

    #[serde(default = "default_cache_ttl")]
    pub ttl_secs: u64,
}

fn default_cache_entries() -> usize {
    64
}
fn default_cache_ttl() -> u64 {
    300
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            max_entries: default_cache_entries(),
            ttl_secs: default_cache_ttl(),
        }
    }
}

/// `[tools]` — which tools the model is offered.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolsSection {
    /// Unset offers every registered tool; an empty list disables tools
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<Vec<String>>,

    /// Let file tools resolve paths outside the project root
    #[serde(default)]
    pub allow_outside_root: bool,
}

impl AppConfig {
    /// Load configuration from the default path (~/.forgehand/config.toml).
    ///
    /// Environment overrides:
    /// - `FORGEHAND_API_KEY`, then `OPENAI_API_KEY`, when no key is configured
    /// - `FORGEHAND_MODEL`
    /// - `FORGEHAND_BASE_URL`
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with_env(&Self::config_dir().join("config.toml"))
    }

    /// Load from `path`, then apply the environment overrides.
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_from(path)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if self.api_key.is_none() {
            self.api_key = var("FORGEHAND_API_KEY").or_else(|| var("OPENAI_API_KEY"));
        }
        if let Some(model) = var("FORGEHAND_MODEL") {
            self.model = model;
        }
        if let Some(url) = var("FORGEHAND_BASE_URL") {
            self.base_url = url;
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".forgehand")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::ValidationError(
                "temperature must be between 0.0 and 2.0".into(),
            ));
        }
        if self.agent.max_iterations == 0 {
            return Err(ConfigError::ValidationError("agent.max_iterations must be >= 1".into()));
        }
        if self.agent.max_parallel_tools == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_parallel_tools must be >= 1".into(),
            ));
        }
        for (name, value) in [
            ("context.compression_threshold", self.context.compression_threshold),
            ("context.retained_ratio", self.context.retained_ratio),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(ConfigError::ValidationError(format!(
                    "{name} must be in (0, 1], got {value}"
                )));
            }
        }
        let read_window = READ_EXPIRATION.as_secs();
        if self.cache.ttl_secs > read_window {
            return Err(ConfigError::ValidationError(format!(
                "cache.ttl_secs must be <= {read_window} (how long a read keeps a file editable), got {}",
                self.cache.ttl_secs
            )));
        }
        if self.context.context_window == Some(0) {
            return Err(ConfigError::ValidationError("context.context_window must be > 0".into()));
        }
        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// The configuration as TOML, with the API key omitted.
    pub fn to_redacted_toml(&self) -> String {
        let config = Self {
            api_key: None,
            ..self.clone()
        };
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_base_url(),
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: None,
            system_prompt: None,
            request_timeout_secs: default_request_timeout(),
            agent: AgentSection::default(),
            context: ContextSection::default(),
            cache: CacheSection::default(),
            tools: ToolsSection::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.model, "gpt-4o");
        assert_eq!(config.agent.max_iterations, 25);
        assert!(!config.agent.enable_tool_planner);
        assert!(config.tools.enabled.is_none());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.base_url, "https://api.openai.com/v1");
    }

    #[test]
    fn sections_parse_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
model = "gpt-4o-mini"

[agent]
enable_tool_planner = true
max_parallel_tools = 8
max_edits_per_file = 3

[context]
context_window = 16000
compression_threshold = 0.5

[cache]
ttl_secs = 30

[tools]
enabled = []
"#,
        )
        .unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.model, "gpt-4o-mini");
        assert!(config.agent.enable_tool_planner);
        assert_eq!(config.agent.max_parallel_tools, 8);
        assert_eq!(config.agent.max_edits_per_file, Some(3));
        assert_eq!(config.agent.max_iterations, 25);
        assert_eq!(config.context.context_window, Some(16000));
        assert_eq!(config.context.retained_ratio, 0.6);
        assert_eq!(config.cache.ttl_secs, 30);
        assert_eq!(config.cache.max_entries, 64);
        assert_eq!(config.tools.enabled, Some(vec![]));
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "model = [").unwrap();
        assert!(matches!(AppConfig::load_from(&path), Err(ConfigError::ParseError { .. })));
    }

    #[test]
    fn invalid_values_rejected() {
        let bad = [
            AppConfig {
                temperature: 5.0,
                ..AppConfig::default()
            },
            AppConfig {
                agent: AgentSection {
                    max_iterations: 0,
                    ..AgentSection::default()
                },
                ..AppConfig::default()
            },
            AppConfig {
                agent: AgentSection {
                    max_parallel_tools: 0,
                    ..AgentSection::default()
                },
                ..AppConfig::default()
            },
            AppConfig {
                context: ContextSection {
                    compression_threshold: 1.5,
                    ..ContextSection::default()
                },
                ..AppConfig::default()
            },
            AppConfig {
                context: ContextSection {
                    retained_ratio: 0.0,
                    ..ContextSection::default()
                },
                ..AppConfig::default()
            },
            AppConfig {
                cache: CacheSection {
                    ttl_secs: 900,
                    ..CacheSection::default()
                },
                ..AppConfig::default()
            },
        ];
        for config in bad {
            assert!(config.validate().is_err(), "{config:?}");
        }
    }

    #[test]
    fn environment_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("OPENAI_API_KEY", "sk-openai"),
            ("FORGEHAND_MODEL", "gpt-4.1"),
            ("FORGEHAND_BASE_URL", "http://localhost:8080/v1"),
        ]);
        let mut config = AppConfig::default();
        config.apply_overrides(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.api_key.as_deref(), Some("sk-openai"));
        assert_eq!(config.model, "gpt-4.1");
        assert_eq!(config.base_url, "http://localhost:8080/v1");

        // A configured key wins over the environment; FORGEHAND_API_KEY wins over OPENAI_API_KEY.
        let mut config = AppConfig {
            api_key: Some("from-file".into()),
            ..AppConfig::default()
        };
        config.apply_overrides(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.api_key.as_deref(), Some("from-file"));

        let mut config = AppConfig::default();
        config.apply_overrides(|k| match k {
            "FORGEHAND_API_KEY" => Some("sk-forge".into()),
            "OPENAI_API_KEY" => Some("sk-openai".into()),
            _ => None,
        });
        assert_eq!(config.api_key.as_deref(), Some("sk-forge"));
    }

    #[test]
    fn secrets_stay_out_of_output() {
        let config = AppConfig {
            api_key: Some("sk-secret".into()),
            ..AppConfig::default()
        };
        assert!(!format!("{config:?}").contains("sk-secret"));
        let toml_str = config.to_redacted_toml();
        assert!(!toml_str.contains("sk-secret"));
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.model, config.model);
    }
}
