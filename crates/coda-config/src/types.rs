//! Configuration types mapping to the TOML schema.
//!
//! ```toml
//! [server]            # bind address, CORS origins
//! [llm]               # default model
//! [llm.openai]        # per-provider key and endpoint
//! [llm.anthropic]
//! [llm.gemini]
//! [agent]             # iteration bound, system prompt
//! [compaction]        # threshold, retained window, summary model
//! [tools]             # tools directory, per-call timeout
//! [storage]           # session store backend and data directory
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::secrets::{self, ResolvedSecret};

/// Model used when a request does not name one.
pub const DEFAULT_MODEL: &str = "gpt-4";

/// Default server bind address.
pub const DEFAULT_BIND: &str = "127.0.0.1:8080";

// ─────────────────────────────────────────────────────────────────────────────
// Top-level Config
// ─────────────────────────────────────────────────────────────────────────────

/// Root configuration structure.
///
/// All sections are optional so that partial configs (e.g., project-local
/// overrides) can be loaded and merged. Accessors return defaults for
/// missing sections.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodaConfig {
    pub server: Option<ServerConfig>,
    pub llm: Option<LlmConfig>,
    pub agent: Option<AgentConfig>,
    pub compaction: Option<CompactionConfig>,
    pub tools: Option<ToolsConfig>,
    pub storage: Option<StorageConfig>,
}

impl CodaConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a TOML string.
    pub fn from_toml(toml_str: &str) -> crate::Result<Self> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Merge another config on top of this one (other takes priority).
    ///
    /// Sections replace each other wholesale, except `[llm]` where each
    /// provider table is merged on its own.
    pub fn merge(&mut self, other: CodaConfig) {
        if other.server.is_some() {
            self.server = other.server;
        }
        match (&mut self.llm, other.llm) {
            (Some(base), Some(layer)) => base.merge(layer),
            (slot, Some(layer)) => *slot = Some(layer),
            (_, None) => {}
        }
        if other.agent.is_some() {
            self.agent = other.agent;
        }
        if other.compaction.is_some() {
            self.compaction = other.compaction;
        }
        if other.tools.is_some() {
            self.tools = other.tools;
        }
        if other.storage.is_some() {
            self.storage = other.storage;
        }
    }

    pub fn server(&self) -> ServerConfig {
        self.server.clone().unwrap_or_default()
    }

    pub fn llm(&self) -> LlmConfig {
        self.llm.clone().unwrap_or_default()
    }

    pub fn agent(&self) -> AgentConfig {
        self.agent.clone().unwrap_or_default()
    }

    pub fn compaction(&self) -> CompactionConfig {
        self.compaction.clone().unwrap_or_default()
    }

    pub fn tools(&self) -> ToolsConfig {
        self.tools.clone().unwrap_or_default()
    }

    pub fn storage(&self) -> StorageConfig {
        self.storage.clone().unwrap_or_default()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Server Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind: String,
    /// Allowed CORS origins. Empty allows none; `"*"` allows any.
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            cors_origins: Vec::new(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// LLM Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Supported LLM providers, as named in `[llm.<provider>]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    OpenAi,
    Anthropic,
    Gemini,
}

impl ProviderKind {
    /// Environment variable holding this provider's API key.
    pub fn env_var(&self) -> &'static str {
        match self {
            Self::OpenAi => "OPENAI_API_KEY",
            Self::Anthropic => "ANTHROPIC_API_KEY",
            Self::Gemini => "GOOGLE_API_KEY",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Gemini => "gemini",
        }
    }
}

/// LLM configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Model used when a request does not name one.
    pub default_model: Option<String>,
    pub openai: Option<ProviderConfig>,
    pub anthropic: Option<ProviderConfig>,
    pub gemini: Option<ProviderConfig>,
}

impl LlmConfig {
    fn merge(&mut self, other: LlmConfig) {
        if other.default_model.is_some() {
            self.default_model = other.default_model;
        }
        if other.openai.is_some() {
            self.openai = other.openai;
        }
        if other.anthropic.is_some() {
            self.anthropic = other.anthropic;
        }
        if other.gemini.is_some() {
            self.gemini = other.gemini;
        }
    }

    pub fn default_model(&self) -> &str {
        self.default_model.as_deref().unwrap_or(DEFAULT_MODEL)
    }

    pub fn provider(&self, kind: ProviderKind) -> Option<&ProviderConfig> {
        match kind {
            ProviderKind::OpenAi => self.openai.as_ref(),
            ProviderKind::Anthropic => self.anthropic.as_ref(),
            ProviderKind::Gemini => self.gemini.as_ref(),
        }
    }

    /// Resolve the API key for a provider: environment variable first, then
    /// the config file.
    pub fn api_key(&self, kind: ProviderKind) -> Option<ResolvedSecret> {
        let configured = self.provider(kind).and_then(|p| p.api_key.as_deref());
        secrets::resolve_api_key(kind.env_var(), configured)
    }

    /// Providers whose table carries a plaintext API key.
    pub fn plaintext_key_providers(&self) -> Vec<ProviderKind> {
        [ProviderKind::OpenAi, ProviderKind::Anthropic, ProviderKind::Gemini]
            .into_iter()
            .filter(|kind| {
                self.provider(*kind)
                    .is_some_and(|p| p.api_key.as_deref().is_some_and(|k| !k.is_empty()))
            })
            .collect()
    }
}

/// Per-provider settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// API key. Prefer the provider's environment variable.
    pub api_key: Option<String>,
    /// Custom API endpoint.
    pub base_url: Option<String>,
    /// Request timeout in seconds.
    pub timeout_secs: Option<u64>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Agent Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Agent loop configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Max model calls per turn.
    pub max_iterations: u32,
    /// System prompt override.
    pub system_prompt: Option<String>,
    /// File to read the system prompt from. Wins over `system_prompt`.
    pub system_prompt_file: Option<PathBuf>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            system_prompt: None,
            system_prompt_file: None,
        }
    }
}

/// Context compaction configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompactionConfig {
    /// Compact once the working history holds more than this many messages.
    pub threshold: usize,
    /// Messages kept verbatim after compaction.
    pub keep_recent: usize,
    /// Model that writes the summary.
    pub model: String,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            threshold: 20,
            keep_recent: 10,
            model: "gpt-4o".to_string(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tools and Storage
// ─────────────────────────────────────────────────────────────────────────────

/// Tool loading configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Directory with one OpenAPI tool definition per subdirectory.
    pub dir: PathBuf,
    /// Per-call timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("tools"),
            timeout_secs: 60,
        }
    }
}

/// Session store backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Append-only JSONL files under the data directory.
    #[default]
    Jsonl,
    /// In-process only; sessions are lost on exit.
    Memory,
}

/// Session storage configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Root directory for stored sessions. Defaults to the platform data
    /// directory.
    pub data_dir: Option<PathBuf>,
}

impl StorageConfig {
    /// The configured data directory, or `<data dir>/coda`.
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir
            .clone()
            .or_else(|| dirs::data_dir().map(|d| d.join("coda")))
            .unwrap_or_else(|| PathBuf::from(".coda"))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
