//! Provider selection and backend construction.
//!
//! The [`LlmClient`] owns one configured backend per provider and picks one
//! for each request from the model identifier:
//!
//! - model contains `claude` → Anthropic
//! - model contains `gemini` → Gemini
//! - anything else → OpenAI
//!
//! Matching is case-insensitive. A request can carry its own API key for the
//! selected provider, in which case a one-off backend is built for it.

use std::collections::HashMap;
use std::sync::Arc;

use crate::anthropic::{AnthropicBackend, AnthropicConfig};
use crate::backend::SharedBackend;
use crate::error::{LlmError, Result};
use crate::gemini::{GeminiBackend, GeminiConfig};
use crate::openai::{OpenAiBackend, OpenAiConfig};

// ─────────────────────────────────────────────────────────────────────────────
// Provider Enum
// ─────────────────────────────────────────────────────────────────────────────

/// Supported LLM providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    /// OpenAI Chat Completions (and compatible services)
    OpenAi,
    /// Anthropic Messages API
    Anthropic,
    /// Google Gemini
    Gemini,
}

impl Provider {
    /// Get the string name for this provider.
    pub fn name(&self) -> &'static str {
        match self {
            Provider::OpenAi => "openai",
            Provider::Anthropic => "anthropic",
            Provider::Gemini => "gemini",
        }
    }

    /// Select the provider serving `model`.
    pub fn for_model(model: &str) -> Self {
        let model = model.to_lowercase();
        if model.contains("claude") {
            Provider::Anthropic
        } else if model.contains("gemini") {
            Provider::Gemini
        } else {
            Provider::OpenAi
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Per-request API Keys
// ─────────────────────────────────────────────────────────────────────────────

/// API keys supplied with a single request, overriding configured keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApiKeys {
    pub openai: Option<String>,
    pub anthropic: Option<String>,
    pub google: Option<String>,
}

impl ApiKeys {
    /// The override for `provider`, if one was supplied and is non-empty.
    pub fn for_provider(&self, provider: Provider) -> Option<&str> {
        let key = match provider {
            Provider::OpenAi => &self.openai,
            Provider::Anthropic => &self.anthropic,
            Provider::Gemini => &self.google,
        };
        key.as_deref().filter(|k| !k.trim().is_empty())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Client Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Configuration for the LLM client.
///
/// Anthropic and Gemini backends are only available when a key is configured
/// here or supplied per request.
#[derive(Debug, Clone, Default)]
pub struct LlmClientConfig {
    pub openai: OpenAiConfig,
    pub anthropic: Option<AnthropicConfig>,
    pub gemini: Option<GeminiConfig>,
}

impl LlmClientConfig {
    /// Create a configuration with OpenAI defaults only.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configure the OpenAI backend.
    pub fn with_openai(mut self, config: OpenAiConfig) -> Self {
        self.openai = config;
        self
    }

    /// Configure the Anthropic backend.
    pub fn with_anthropic(mut self, config: AnthropicConfig) -> Self {
        self.anthropic = Some(config);
        self
    }

    /// Configure the Gemini backend.
    pub fn with_gemini(mut self, config: GeminiConfig) -> Self {
        self.gemini = Some(config);
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// LLM Client
// ─────────────────────────────────────────────────────────────────────────────

/// Routes model identifiers to provider backends.
pub struct LlmClient {
    config: LlmClientConfig,
    backends: HashMap<Provider, SharedBackend>,
    fixed: Option<SharedBackend>,
}

impl LlmClient {
    /// Build a client, constructing every configured backend up front.
    pub fn new(config: LlmClientConfig) -> Result<Self> {
        let mut backends: HashMap<Provider, SharedBackend> = HashMap::new();
        backends.insert(
            Provider::OpenAi,
            Arc::new(OpenAiBackend::new(config.openai.clone())?),
        );
        if let Some(ref anthropic) = config.anthropic {
            backends.insert(
                Provider::Anthropic,
                Arc::new(AnthropicBackend::new(anthropic.clone())?),
            );
        }
        if let Some(ref gemini) = config.gemini {
            backends.insert(
                Provider::Gemini,
                Arc::new(GeminiBackend::new(gemini.clone())?),
            );
        }

        tracing::debug!(
            providers = ?backends.keys().map(Provider::name).collect::<Vec<_>>(),
            "LLM client initialized"
        );

        Ok(Self {
            config,
            backends,
            fixed: None,
        })
    }

    /// A client that serves every model from one backend.
    ///
    /// Key overrides are ignored. Used for tests and single-provider setups.
    pub fn from_backend(backend: SharedBackend) -> Self {
        Self {
            config: LlmClientConfig::default(),
            backends: HashMap::new(),
            fixed: Some(backend),
        }
    }

    /// Providers with a configured backend.
    pub fn available_providers(&self) -> Vec<Provider> {
        let mut providers: Vec<_> = self.backends.keys().copied().collect();
        providers.sort_by_key(|p| p.name());
        providers
    }

    /// Resolve the backend for `model`, honoring a per-request key override.
    pub fn backend_for_model(&self, model: &str, keys: &ApiKeys) -> Result<SharedBackend> {
        if let Some(ref backend) = self.fixed {
            return Ok(Arc::clone(backend));
        }

        let provider = Provider::for_model(model);
        if let Some(key) = keys.for_provider(provider) {
            tracing::debug!(provider = %provider, model, "Using request-supplied API key");
            return self.build_with_key(provider, key);
        }

        self.backends.get(&provider).cloned().ok_or_else(|| {
            LlmError::Config(format!(
                "No API key configured for provider '{}' (model '{}')",
                provider, model
            ))
        })
    }

    fn build_with_key(&self, provider: Provider, key: &str) -> Result<SharedBackend> {
        let backend: SharedBackend = match provider {
            Provider::OpenAi => Arc::new(OpenAiBackend::new(
                self.config.openai.clone().with_api_key(key),
            )?),
            Provider::Anthropic => {
                let mut config = self
                    .config
                    .anthropic
                    .clone()
                    .unwrap_or_else(|| AnthropicConfig::new(""));
                config.api_key = key.to_string();
                Arc::new(AnthropicBackend::new(config)?)
            }
            Provider::Gemini => {
                let mut config = self
                    .config
                    .gemini
                    .clone()
                    .unwrap_or_else(|| GeminiConfig::new(""));
                config.api_key = key.to_string();
                Arc::new(GeminiBackend::new(config)?)
            }
        };
        Ok(backend)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{LlmBackend, MockBackend};

    #[test]
    fn test_provider_for_model() {
        assert_eq!(Provider::for_model("gpt-4"), Provider::OpenAi);
        assert_eq!(Provider::for_model("gpt-4o-mini"), Provider::OpenAi);
        assert_eq!(
            Provider::for_model("claude-3-opus-20240229"),
            Provider::Anthropic
        );
        assert_eq!(Provider::for_model("Claude-Sonnet"), Provider::Anthropic);
        assert_eq!(Provider::for_model("gemini-pro"), Provider::Gemini);
        assert_eq!(Provider::for_model("models/GEMINI-1.5"), Provider::Gemini);
        assert_eq!(Provider::for_model("llama3"), Provider::OpenAi);
        assert_eq!(Provider::for_model(""), Provider::OpenAi);
    }

    #[test]
    fn test_api_keys_for_provider() {
        let keys = ApiKeys {
            openai: Some("sk-1".to_string()),
            anthropic: Some("  ".to_string()),
            google: None,
        };
        assert_eq!(keys.for_provider(Provider::OpenAi), Some("sk-1"));
        assert_eq!(keys.for_provider(Provider::Anthropic), None);
        assert_eq!(keys.for_provider(Provider::Gemini), None);
    }

    #[test]
    fn test_backend_for_model_routes_by_provider() {
        let config = LlmClientConfig::new()
            .with_openai(OpenAiConfig::openai("sk"))
            .with_anthropic(AnthropicConfig::new("ak"));
        let client = LlmClient::new(config).unwrap();

        let backend = client
            .backend_for_model("claude-3-haiku", &ApiKeys::default())
            .unwrap();
        assert_eq!(backend.name(), "anthropic");

        let backend = client
            .backend_for_model("gpt-4", &ApiKeys::default())
            .unwrap();
        assert_eq!(backend.name(), "openai");
    }

    #[test]
    fn test_missing_provider_key_is_config_error() {
        let client = LlmClient::new(LlmClientConfig::new()).unwrap();
        let result = client.backend_for_model("gemini-pro", &ApiKeys::default());
        assert!(matches!(result, Err(LlmError::Config(_))));
    }

    #[test]
    fn test_request_key_enables_unconfigured_provider() {
        let client = LlmClient::new(LlmClientConfig::new()).unwrap();
        let keys = ApiKeys {
            google: Some("g-key".to_string()),
            ..ApiKeys::default()
        };
        let backend = client.backend_for_model("gemini-pro", &keys).unwrap();
        assert_eq!(backend.name(), "gemini");
    }

    #[test]
    fn test_from_backend_serves_every_model() {
        let client = LlmClient::from_backend(Arc::new(MockBackend::with_text("hi")));
        for model in ["gpt-4", "claude-3", "gemini-pro"] {
            let backend = client.backend_for_model(model, &ApiKeys::default()).unwrap();
            assert_eq!(backend.name(), "mock");
        }
        assert!(client.available_providers().is_empty());
    }

    #[test]
    fn test_available_providers() {
        let config = LlmClientConfig::new().with_gemini(GeminiConfig::new("g"));
        let client = LlmClient::new(config).unwrap();
        assert_eq!(
            client.available_providers(),
            vec![Provider::Gemini, Provider::OpenAi]
        );
    }
}
