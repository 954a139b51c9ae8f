//! Configuration management for colorout.
//!
//! This module defines the structure of the optional `colorout.toml` file and
//! provides functionality to load and parse it. Every field is optional;
//! command-line flags take precedence over anything set here.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Top-level configuration structure corresponding to `colorout.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Shell invocation used for every command (e.g. "bash -eo pipefail").
    pub shell: Option<String>,
    /// Cancel all other tasks when one fails.
    pub fail: Option<bool>,
    /// Cancel all other tasks when one cannot be started, even without `fail`.
    pub cancel_on_start_failure: Option<bool>,
    /// Exit non-zero when any task did not succeed.
    pub exit_code: Option<bool>,
    /// Print a line when a command exits successfully (default: true).
    pub announce_exit: Option<bool>,
    /// Milliseconds between SIGTERM and SIGKILL when cancelling a task.
    pub kill_grace_ms: Option<u64>,
    /// Log filter used when RUST_LOG is not set (e.g. "debug").
    pub log_level: Option<String>,
}

/// Loads and parses the configuration from a file path.
pub fn load_config(path: &Path) -> Result<Config> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let config: Config = toml::from_str(&raw)
        .with_context(|| format!("failed to parse config file {}", path.display()))?;
    Ok(config)
}
