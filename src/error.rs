//! Error types for a run and for individual tasks.

use std::io;

use thiserror::Error;

/// Failures that abort a whole run before any task starts.
#[derive(Error, Debug)]
pub enum RunError {
    #[error("too many commands: {count} given, only {max} colors available")]
    TooManyTasks { count: usize, max: usize },
}

/// Why a single task did not succeed.
///
/// The `Display` text is what ends up in the `command failed with ...` line.
#[derive(Error, Debug)]
pub enum ExecError {
    #[error("failed to start: {0}")]
    Spawn(#[source] io::Error),
    #[error("{}", exit_message(.code))]
    Exit { code: Option<i32> },
    #[error("cancelled")]
    Cancelled,
    #[error("{stream} stream error: {source}")]
    Output {
        stream: &'static str,
        source: io::Error,
    },
    #[error("wait failed: {0}")]
    Wait(#[source] io::Error),
}

fn exit_message(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit status {}", code),
        None => "terminated by signal".to_string(),
    }
}

impl ExecError {
    /// Failures that happened before the command ever ran.
    pub fn is_start_failure(&self) -> bool {
        matches!(self, ExecError::Spawn(_))
    }
}
