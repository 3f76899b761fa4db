//! Configuration for Coda.
//!
//! TOML files are discovered from the user config directory and the working
//! directory, then merged with project-local values winning. API keys are
//! resolved from provider environment variables before falling back to the
//! config file.

pub mod discovery;
pub mod error;
pub mod secrets;
pub mod types;

pub use discovery::{
    ConfigSource, LoadedConfig, load_config, load_config_file, load_config_with_options,
    user_config_dir, user_config_path,
};
pub use error::{ConfigError, Result};
pub use secrets::{ResolvedSecret, SecretSource, resolve_api_key};
pub use types::{
    AgentConfig, CodaConfig, CompactionConfig, DEFAULT_BIND, DEFAULT_MODEL, LlmConfig,
    ProviderConfig, ProviderKind, ServerConfig, StorageBackend, StorageConfig, ToolsConfig,
};
