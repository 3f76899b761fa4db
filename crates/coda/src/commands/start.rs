//! Start command - run the HTTP server.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::Args;
use coda_server::{AppState, Server, ServerConfig};

use super::Context;
use super::runtime::{self, Overrides};

/// Arguments for the start command.
#[derive(Args, Debug)]
pub struct StartArgs {
    /// Address to bind (overrides [server] bind)
    #[arg(short, long, env = "CODA_BIND")]
    pub bind: Option<SocketAddr>,

    /// Tools directory (overrides [tools] dir)
    #[arg(long, env = "CODA_TOOLS_DIR")]
    pub tools_dir: Option<PathBuf>,

    /// Session data directory (overrides [storage] data_dir)
    #[arg(long, env = "CODA_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Keep sessions in memory only
    #[arg(long)]
    pub ephemeral: bool,
}

/// Run the start command.
pub async fn run(args: StartArgs, ctx: &Context) -> Result<()> {
    let config = &ctx.config.config;
    let server_section = config.server();

    let bind = match args.bind {
        Some(addr) => addr,
        None => server_section
            .bind
            .parse()
            .with_context(|| format!("Invalid bind address '{}'", server_section.bind))?,
    };

    let overrides = Overrides {
        tools_dir: args.tools_dir,
        data_dir: args.data_dir,
        ephemeral: args.ephemeral,
    };
    let orchestrator = runtime::build_orchestrator(config, &overrides)?;

    let server_config = ServerConfig::new()
        .with_bind_address(bind)
        .with_cors_origins(server_section.cors_origins)
        .with_default_model(config.llm().default_model());

    tracing::info!(
        bind = %bind,
        tools = orchestrator.tools().len(),
        "Coda server starting"
    );

    Server::new(AppState::new(orchestrator, server_config))
        .run()
        .await
        .context("Server failed")
}
