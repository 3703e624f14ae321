//! `forgehand config` — show the effective configuration.

use forgehand_config::AppConfig;
use std::path::Path;

pub fn run(config: &AppConfig, path: Option<&Path>) {
    let source = path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| AppConfig::config_dir().join("config.toml"));
    println!("# source: {}", source.display());
    println!(
        "# api key: {}",
        if config.has_api_key() { "set" } else { "missing (set FORGEHAND_API_KEY or OPENAI_API_KEY)" }
    );
    println!();
    print!("{}", config.to_redacted_toml());
}
