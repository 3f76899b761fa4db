//! Tracing setup: a human-readable stderr layer plus a daily-rotated JSON file.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

const WORKSPACE_TARGETS: &[&str] = &[
    "coda",
    "coda_agent",
    "coda_config",
    "coda_llm",
    "coda_server",
    "coda_session",
];

/// `<crate>=<level>` for every workspace crate, then `rest` for everything else.
fn directives(level: &str, rest: &str) -> String {
    WORKSPACE_TARGETS
        .iter()
        .map(|target| format!("{target}={level}"))
        .chain(std::iter::once(rest.to_string()))
        .collect::<Vec<_>>()
        .join(",")
}

/// Install the global subscriber. `RUST_LOG` replaces the console filter when
/// set; the file always records workspace crates at trace.
///
/// Keep the returned guard alive for the life of the process or buffered file
/// output is lost.
pub fn init(verbose: bool, log_dir: &Path) -> WorkerGuard {
    let console = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new(directives("debug", "tower_http=debug,info"))
        } else {
            EnvFilter::new(directives("info", "warn"))
        }
    });

    let (file_writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(log_dir, "coda.log"));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(console),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(file_writer)
                .with_filter(EnvFilter::new(directives("trace", "info"))),
        )
        .init();

    guard
}
