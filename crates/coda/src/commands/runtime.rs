//! Building the agent runtime from configuration.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use coda_agent::{
    CompactorConfig, OrchestratorConfig, SessionOrchestrator, ToolRegistry, load_tools_dir,
    resolve_system_prompt,
};
use coda_config::{CodaConfig, LlmConfig, ProviderKind, StorageBackend};
use coda_llm::{AnthropicConfig, GeminiConfig, LlmClient, LlmClientConfig, OpenAiConfig};
use coda_session::{JsonlStore, MemoryStore, SharedStore};

/// Command-line overrides for file configuration.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub tools_dir: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
    /// Keep sessions in memory only.
    pub ephemeral: bool,
}

/// Provider settings for the LLM client.
pub fn llm_client_config(llm: &LlmConfig) -> LlmClientConfig {
    let mut config = LlmClientConfig::new();

    let mut openai = OpenAiConfig::default();
    if let Some(key) = llm.api_key(ProviderKind::OpenAi) {
        tracing::debug!(source = %key.source, "OpenAI key resolved");
        openai.api_key = Some(key.value);
    }
    if let Some(provider) = llm.provider(ProviderKind::OpenAi) {
        if let Some(url) = &provider.base_url {
            openai.base_url = url.clone();
        }
        if let Some(secs) = provider.timeout_secs {
            openai.timeout = Duration::from_secs(secs);
        }
    }
    config = config.with_openai(openai);

    if let Some(key) = llm.api_key(ProviderKind::Anthropic) {
        let mut anthropic = AnthropicConfig::new(key.value);
        if let Some(provider) = llm.provider(ProviderKind::Anthropic) {
            if let Some(url) = &provider.base_url {
                anthropic.base_url = url.clone();
            }
            if let Some(secs) = provider.timeout_secs {
                anthropic.timeout = Duration::from_secs(secs);
            }
        }
        config = config.with_anthropic(anthropic);
    }

    if let Some(key) = llm.api_key(ProviderKind::Gemini) {
        let mut gemini = GeminiConfig::new(key.value);
        if let Some(provider) = llm.provider(ProviderKind::Gemini) {
            if let Some(url) = &provider.base_url {
                gemini.base_url = url.clone();
            }
            if let Some(secs) = provider.timeout_secs {
                gemini.timeout = Duration::from_secs(secs);
            }
        }
        config = config.with_gemini(gemini);
    }

    config
}

/// Open the configured session store.
pub fn open_store(config: &CodaConfig, overrides: &Overrides) -> SharedStore {
    let storage = config.storage();
    if overrides.ephemeral || storage.backend == StorageBackend::Memory {
        tracing::info!("Using in-memory session store");
        return Arc::new(MemoryStore::new());
    }

    let data_dir = overrides
        .data_dir
        .clone()
        .unwrap_or_else(|| storage.data_dir());
    tracing::info!(data_dir = %data_dir.display(), "Using JSONL session store");
    Arc::new(JsonlStore::new(data_dir))
}

/// Load tools from the configured directory.
pub fn load_tools(config: &CodaConfig, overrides: &Overrides) -> Result<ToolRegistry> {
    let tools = config.tools();
    let dir = overrides.tools_dir.as_deref().unwrap_or(tools.dir.as_path());
    Ok(load_tools_dir(dir, Duration::from_secs(tools.timeout_secs))?)
}

/// Orchestrator settings from the `[agent]` and `[compaction]` sections.
pub fn orchestrator_config(config: &CodaConfig) -> Result<OrchestratorConfig> {
    let agent = config.agent();
    let compaction = config.compaction();

    let system_prompt = resolve_system_prompt(
        agent.system_prompt.as_deref(),
        agent.system_prompt_file.as_deref(),
    )?;

    Ok(OrchestratorConfig::default()
        .with_system_prompt(system_prompt)
        .with_max_iterations(agent.max_iterations)
        .with_compaction(CompactorConfig {
            threshold: compaction.threshold,
            keep_recent: compaction.keep_recent,
            model: compaction.model,
        }))
}

/// Build the orchestrator with every collaborator wired in.
pub fn build_orchestrator(config: &CodaConfig, overrides: &Overrides) -> Result<SessionOrchestrator> {
    let client = LlmClient::new(llm_client_config(&config.llm()))
        .context("Failed to initialize LLM client")?;
    tracing::info!(providers = ?client.available_providers(), "LLM providers ready");

    Ok(SessionOrchestrator::new(
        Arc::new(client),
        open_store(config, overrides),
        Arc::new(load_tools(config, overrides)?),
        orchestrator_config(config)?,
    ))
}
