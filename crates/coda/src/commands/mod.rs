//! Subcommand implementations.

pub mod ask;
pub mod config;
pub mod runtime;
pub mod start;
pub mod tools;

use coda_config::LoadedConfig;

/// What every subcommand receives from `main`.
#[derive(Debug, Clone)]
pub struct Context {
    pub config: LoadedConfig,
    pub verbose: bool,
}
