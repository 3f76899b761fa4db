//! Config command - configuration inspection.

use anyhow::Result;
use clap::{Args, Subcommand};
use coda_config::{CodaConfig, ProviderKind};

use super::Context;

/// Arguments for the config command.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Show the merged configuration with API keys redacted
    Show,

    /// Show which config files were checked and loaded
    Which,

    /// Show the user configuration file path
    Path,
}

/// Run the config command.
pub async fn run(args: ConfigArgs, ctx: &Context) -> Result<()> {
    match args.command {
        ConfigCommand::Show => cmd_show(ctx),
        ConfigCommand::Which => cmd_which(ctx),
        ConfigCommand::Path => cmd_path(),
    }
}

fn cmd_show(ctx: &Context) -> Result<()> {
    let config = redacted(&ctx.config.config);
    print!("{}", toml::to_string_pretty(&config)?);

    let llm = config.llm();
    println!();
    println!("# API keys");
    for kind in [ProviderKind::OpenAi, ProviderKind::Anthropic, ProviderKind::Gemini] {
        let status = match ctx.config.config.llm().api_key(kind) {
            Some(secret) => format!("set ({})", secret.source),
            None => "not set".to_string(),
        };
        println!("# {:<10} {}", kind.as_str(), status);
    }
    println!("# default model: {}", llm.default_model());
    Ok(())
}

fn cmd_which(ctx: &Context) -> Result<()> {
    for source in &ctx.config.sources {
        let mark = if source.loaded { "loaded" } else { "absent" };
        println!("{:<7} {}", mark, source.path.display());
    }
    for warning in &ctx.config.warnings {
        println!("warning: {warning}");
    }
    Ok(())
}

fn cmd_path() -> Result<()> {
    match coda_config::user_config_path() {
        Some(path) => println!("{}", path.display()),
        None => anyhow::bail!("No config directory available on this platform"),
    }
    Ok(())
}

/// Copy of `config` with plaintext API keys masked.
fn redacted(config: &CodaConfig) -> CodaConfig {
    let mut config = config.clone();
    if let Some(llm) = config.llm.as_mut() {
        for provider in [&mut llm.openai, &mut llm.anthropic, &mut llm.gemini]
            .into_iter()
            .flatten()
        {
            if provider.api_key.is_some() {
                provider.api_key = Some("********".to_string());
            }
        }
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redacted_masks_keys() {
        let config = CodaConfig::from_toml(
            "[llm.openai]\napi_key = \"sk-secret\"\nbase_url = \"http://proxy\"\n",
        )
        .unwrap();

        let shown = toml::to_string_pretty(&redacted(&config)).unwrap();
        assert!(!shown.contains("sk-secret"));
        assert!(shown.contains("********"));
        assert!(shown.contains("http://proxy"));
    }
}
