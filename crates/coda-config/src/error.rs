//! Failures while loading configuration files.

use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {}: {source}", path.display())]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The file exists but is not valid TOML for [`crate::CodaConfig`].
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}
