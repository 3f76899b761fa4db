//! Ask command - one-shot question to the agent, run in-process.

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::Args;
use coda_agent::{CancellationToken, ChatTurn, TurnEvent};
use coda_llm::Message;
use coda_session::SessionId;
use futures::StreamExt;

use super::Context;
use super::runtime::{self, Overrides};

/// Arguments for the ask command.
#[derive(Args, Debug)]
pub struct AskArgs {
    /// The question or prompt to send
    #[arg(required = true)]
    pub prompt: String,

    /// Continue an existing session
    #[arg(short, long)]
    pub session: Option<String>,

    /// Model to use (overrides [llm] default_model)
    #[arg(short, long)]
    pub model: Option<String>,

    /// Tools directory (overrides [tools] dir)
    #[arg(long, env = "CODA_TOOLS_DIR")]
    pub tools_dir: Option<PathBuf>,

    /// Do not store the conversation
    #[arg(long)]
    pub ephemeral: bool,
}

/// Run the ask command.
pub async fn run(args: AskArgs, ctx: &Context) -> Result<()> {
    let config = &ctx.config.config;
    let overrides = Overrides {
        tools_dir: args.tools_dir,
        ephemeral: args.ephemeral,
        ..Default::default()
    };
    let orchestrator = runtime::build_orchestrator(config, &overrides)?;

    let model = args
        .model
        .unwrap_or_else(|| config.llm().default_model().to_string());
    let mut turn = ChatTurn::new(model, vec![Message::user(args.prompt)]);
    if let Some(raw) = args.session.as_deref() {
        let id: SessionId = raw
            .parse()
            .with_context(|| format!("Invalid session id '{raw}'"))?;
        turn = turn.with_session(id);
    }

    let cancellation = CancellationToken::new();
    let ctrl_c = cancellation.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let mut events = orchestrator.start_turn(turn, cancellation).await?;

    let mut stdout = std::io::stdout();
    let mut has_output = false;
    while let Some(event) = events.next().await {
        match event {
            TurnEvent::Content { content } => {
                print!("{content}");
                stdout.flush()?;
                has_output = true;
            }
            TurnEvent::Thought { thought } => {
                if has_output {
                    println!();
                    has_output = false;
                }
                eprintln!("[{thought}]");
            }
            TurnEvent::SessionId { session_id } if ctx.verbose => {
                eprintln!("Session: {session_id}");
            }
            TurnEvent::TokenUsage { token_usage } if ctx.verbose => {
                eprintln!("[tokens: {token_usage}]");
            }
            TurnEvent::Metrics {
                execution_time,
                decision_count,
            } if ctx.verbose => {
                eprintln!("[{execution_time:.2}s, {decision_count} tool calls]");
            }
            TurnEvent::Error { error } => {
                if has_output {
                    println!();
                }
                anyhow::bail!(error);
            }
            TurnEvent::Done => {
                if has_output {
                    println!();
                }
            }
            _ => {}
        }
    }

    Ok(())
}
