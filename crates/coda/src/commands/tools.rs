//! Tools command - list the tool catalog.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;

use super::Context;
use super::runtime::{self, Overrides};

/// Arguments for the tools command.
#[derive(Args, Debug)]
pub struct ToolsArgs {
    /// Tools directory (overrides [tools] dir)
    #[arg(long, env = "CODA_TOOLS_DIR")]
    pub dir: Option<PathBuf>,

    /// Print the full catalog as JSON
    #[arg(long)]
    pub json: bool,
}

/// Run the tools command.
pub async fn run(args: ToolsArgs, ctx: &Context) -> Result<()> {
    let overrides = Overrides {
        tools_dir: args.dir,
        ..Default::default()
    };
    let registry = runtime::load_tools(&ctx.config.config, &overrides)?;
    let catalog = registry.list_callable_tools();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&catalog)?);
        return Ok(());
    }

    if catalog.is_empty() {
        println!("No tools loaded.");
        return Ok(());
    }

    for tool in &catalog {
        let summary = tool.description.lines().next().unwrap_or("");
        println!("{:<32} {}", tool.name, summary);
    }
    Ok(())
}
