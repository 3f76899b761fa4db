//! `coda`: run the agent server, ask one-off questions, inspect tools and config.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;
mod logging;

use commands::{Context, ask, config, start, tools};

/// LLM agent runtime with streaming tool orchestration
#[derive(Parser)]
#[command(name = "coda", author, version, about, propagate_version = true)]
pub struct Cli {
    /// Log at debug level and print session details
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Directory holding the user config.toml
    #[arg(long, global = true, env = "CODA_CONFIG_DIR")]
    pub config_dir: Option<PathBuf>,

    /// Directory holding the project coda.toml [default: current directory]
    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Serve the chat API over HTTP
    Start(start::StartArgs),

    /// Ask one question in-process and stream the answer to stdout
    Ask(ask::AskArgs),

    /// List the tools found in the tools directory
    Tools(tools::ToolsArgs),

    /// Inspect the merged configuration
    Config(config::ConfigArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_dir = cli
        .config_dir
        .clone()
        .or_else(coda_config::user_config_dir)
        .map_or_else(|| PathBuf::from("logs"), |dir| dir.join("logs"));
    let _log_guard = logging::init(cli.verbose, &log_dir);

    let loaded =
        coda_config::load_config_with_options(cli.project_dir.as_deref(), cli.config_dir.as_deref())?;
    for warning in &loaded.warnings {
        tracing::warn!("{warning}");
    }
    tracing::debug!(sources = ?loaded.loaded_from(), "configuration loaded");

    let ctx = Context {
        config: loaded,
        verbose: cli.verbose,
    };
    match cli.command {
        Commands::Start(args) => start::run(args, &ctx).await,
        Commands::Ask(args) => ask::run(args, &ctx).await,
        Commands::Tools(args) => tools::run(args, &ctx).await,
        Commands::Config(args) => config::run(args, &ctx).await,
    }
}
