pub mod config_cmd;
pub mod memory;
pub mod run;

use anyhow::Context;
use forgehand_config::AppConfig;
use std::path::Path;

/// Explicit path if given, otherwise `~/.forgehand/config.toml`.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<AppConfig> {
    match path {
        Some(path) => AppConfig::load_with_env(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => AppConfig::load().context("Failed to load config"),
    }
}
