//! Logging setup
//!
//! RUST_LOG wins when set. Otherwise core and CLI log at info, or debug
//! with `--verbose`. Logs go to stderr unless `log_file` is configured.

use std::fs::OpenOptions;
use std::path::Path;

use tracing::info;
use tracing_subscriber::EnvFilter;

fn default_directives(verbose: bool) -> String {
    let level = if verbose { "debug" } else { "info" };
    format!("inkbook_core={},inkbook_cli={}", level, level)
}

fn env_filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives(verbose)))
}

/// Install the global subscriber (ignored if one is already installed)
pub fn init(verbose: bool, log_file: Option<&Path>) {
    if let Some(path) = log_file {
        let file = match OpenOptions::new().create(true).append(true).open(path) {
            Ok(f) => f,
            Err(e) => {
                eprintln!("Warning: Could not open log file {:?}: {}", path, e);
                return init(verbose, None);
            }
        };

        let _ = tracing_subscriber::fmt()
            .with_env_filter(env_filter(verbose))
            .with_target(false)
            .with_ansi(false)
            .with_writer(file)
            .try_init();

        info!("Logging to {:?}", path);
        return;
    }

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter(verbose))
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
