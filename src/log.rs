//! Logging setup for conformd.
//!
//! Log levels:
//! - ERROR: Broken invariants (e.g. a task graph that is not acyclic)
//! - WARN: Task failures, lock timeouts, rollbacks
//! - INFO: Job lifecycle, meta-task expansion, plugin registration
//! - DEBUG: Dispatch decisions, lock grants and releases, commits
//! - TRACE: Dropped broadcast events
//!
//! Output goes to `~/.conformd/conformd.log`, truncated on startup. Debug
//! mode can be enabled with `--debug` flag or `CONFORMD_DEBUG=1` env var.
//! `RUST_LOG` directives are applied on top.

use std::fs::File;
use std::path::PathBuf;

use tracing::Level;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::Result;

/// True when `CONFORMD_DEBUG` is set to `1` or `true`.
pub fn debug_from_env() -> bool {
    std::env::var("CONFORMD_DEBUG")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

pub fn log_path() -> Result<PathBuf> {
    Ok(Config::conform_dir()?.join("conformd.log"))
}

/// Initialize logging at INFO level.
pub fn init() -> Result<()> {
    init_with_debug(false)
}

/// Initialize logging with explicit debug mode setting.
///
/// Calling this more than once keeps the first subscriber.
pub fn init_with_debug(debug: bool) -> Result<()> {
    let level = if debug || debug_from_env() {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let path = log_path()?;
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let log_file = File::create(&path)?;

    let installed = tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .try_init()
        .is_ok();

    if installed {
        tracing::info!(path = %path.display(), %level, "Logging initialized");
    }
    Ok(())
}
