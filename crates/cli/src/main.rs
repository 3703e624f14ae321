//! forgehand CLI — the main entry point.
//!
//! Commands:
//! - `run`     — Work on one task in a project directory
//! - `memory`  — List or search the project's memory cards
//! - `config`  — Show the effective configuration

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(
    name = "forgehand",
    about = "forgehand — a tool-using coding agent",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    /// Config file (default: ~/.forgehand/config.toml)
    #[arg(long, global = true, env = "FORGEHAND_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the agent on a single task
    Run {
        /// What the agent should do
        task: String,

        /// Project directory the file tools operate in
        #[arg(long, default_value = ".")]
        root: PathBuf,

        /// Run read-only tool calls concurrently
        #[arg(long)]
        planner: bool,

        /// Offer no tools to the model
        #[arg(long)]
        no_tools: bool,
    },

    /// List the project's memory cards, optionally ranked against a query
    Memory {
        #[arg(short, long)]
        query: Option<String>,

        #[arg(long, default_value = ".")]
        root: PathBuf,

        /// Max cards shown for a query
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },

    /// Print the effective configuration (API key omitted)
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if cli.log_json {
        builder.json().init();
    } else {
        builder.init();
    }

    let config = commands::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Run {
            task,
            root,
            planner,
            no_tools,
        } => commands::run::run(config, &task, &root, planner, no_tools).await?,
        Commands::Memory { query, root, limit } => {
            commands::memory::run(&root, query.as_deref(), limit).await?
        }
        Commands::Config => commands::config_cmd::run(&config, cli.config.as_deref()),
    }

    Ok(())
}
