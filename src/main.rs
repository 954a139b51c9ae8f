//! colorout: run commands concurrently with colored, labeled output.
//!
//! This is the entry point of the application. It parses command-line arguments,
//! merges them with the optional config file, sets up logging and hands the
//! command list to the orchestrator.

mod cancel;
mod config;
mod error;
mod orchestrator;
mod output;
mod palette;
mod process;
mod runner;
mod sink;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::builder::styling::{AnsiColor, Effects, Style};
use clap::builder::Styles;
use clap::Parser;
use tracing::{debug, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::cancel::CancelSignal;
use crate::config::Config;
use crate::orchestrator::{Orchestrator, RunOptions};
use crate::palette::Palette;
use crate::runner::{ProcessRunner, Shell, ShutdownConfig};
use crate::sink::SharedSink;

const DEFAULT_CONFIG: &str = "colorout.toml";

/// Command-line interface definition.
#[derive(Debug, Parser)]
#[command(
    name = "colorout",
    version,
    about = "Run commands concurrently with colored, labeled output",
    styles = help_styles()
)]
struct Cli {
    /// Cancel all other commands as soon as one fails.
    #[arg(long)]
    fail: bool,
    /// Cancel all other commands when one cannot be started.
    #[arg(long)]
    cancel_on_start_failure: bool,
    /// Exit non-zero if any command failed or was cancelled.
    #[arg(long)]
    exit_code: bool,
    /// Do not print a line when a command exits successfully.
    #[arg(long)]
    quiet_exit: bool,
    /// Shell used to run each command (e.g. "bash -eo pipefail").
    #[arg(long)]
    shell: Option<String>,
    /// Time between SIGTERM and SIGKILL when cancelling (ms).
    #[arg(long)]
    kill_grace_ms: Option<u64>,
    /// Log filter when RUST_LOG is unset (e.g. "debug").
    #[arg(long)]
    log_level: Option<String>,
    /// Path to colorout.toml configuration file.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Ignore any colorout.toml in the current directory.
    #[arg(long)]
    no_config: bool,
    /// Commands to run, one task each.
    #[arg(required = true)]
    commands: Vec<String>,
}

/// Runtime configuration derived from CLI arguments and the config file.
#[derive(Debug, Clone)]
struct RunSettings {
    shell: Shell,
    options: RunOptions,
    exit_code: bool,
    kill_grace_ms: u64,
    log_level: String,
}

impl RunSettings {
    fn from_cli(cli: &Cli, config: Config) -> Result<Self> {
        const DEFAULT_KILL_GRACE_MS: u64 = 2_000;
        let shell = match cli.shell.as_deref().or(config.shell.as_deref()) {
            Some(spec) => Shell::parse(spec)?,
            None => Shell::default(),
        };
        let options = RunOptions {
            fail_fast: cli.fail || config.fail.unwrap_or(false),
            cancel_on_start_failure: cli.cancel_on_start_failure
                || config.cancel_on_start_failure.unwrap_or(false),
            announce_exit: !cli.quiet_exit && config.announce_exit.unwrap_or(true),
        };
        let exit_code = cli.exit_code || config.exit_code.unwrap_or(false);
        let kill_grace_ms = cli
            .kill_grace_ms
            .or(config.kill_grace_ms)
            .unwrap_or(DEFAULT_KILL_GRACE_MS);
        let log_level = cli
            .log_level
            .clone()
            .or(config.log_level)
            .unwrap_or_else(|| "warn".to_string());
        Ok(Self {
            shell,
            options,
            exit_code,
            kill_grace_ms,
            log_level,
        })
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let config = load_settings_config(&cli)?;
    let settings = RunSettings::from_cli(&cli, config)?;
    init_tracing(&settings.log_level)?;
    debug!(?settings, "resolved settings");

    let runner = ProcessRunner::new(
        settings.shell.clone(),
        ShutdownConfig::new(settings.kill_grace_ms),
    );
    let orchestrator = Orchestrator::new(
        Palette::standard(),
        runner,
        settings.options,
        SharedSink::new(std::io::stdout()),
        SharedSink::new(std::io::stderr()),
    );
    spawn_signal_listener(orchestrator.cancel_signal());

    let summary = orchestrator.run(cli.commands).await?;
    info!(
        tasks = summary.reports.len(),
        failed = summary.failed(),
        cancelled = summary.cancelled(),
        "run finished"
    );
    if settings.exit_code && !summary.all_succeeded() {
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

fn load_settings_config(cli: &Cli) -> Result<Config> {
    if cli.no_config {
        if cli.config.is_some() {
            bail!("--config and --no-config are mutually exclusive");
        }
        return Ok(Config::default());
    }
    let path = cli
        .config
        .clone()
        .or_else(default_config_path);
    match path {
        Some(path) => config::load_config(&path),
        None => Ok(Config::default()),
    }
}

fn default_config_path() -> Option<PathBuf> {
    let path = Path::new(DEFAULT_CONFIG);
    if path.exists() {
        Some(path.to_path_buf())
    } else {
        None
    }
}

fn init_tracing(level: &str) -> Result<()> {
    let filter = match std::env::var("RUST_LOG") {
        Ok(v) if !v.trim().is_empty() => EnvFilter::from_default_env(),
        _ => EnvFilter::try_new(level).with_context(|| format!("invalid log level {}", level))?,
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .init();
    Ok(())
}

// Ctrl-C and SIGTERM cancel the run, so children are torn down and output is
// flushed before we exit.
fn spawn_signal_listener(cancel: CancelSignal) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(signal) => signal,
                Err(_) => return,
            };
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("interrupted"),
                _ = sigterm.recv() => info!("terminated"),
            }
        }
        #[cfg(not(unix))]
        {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            info!("interrupted");
        }
        cancel.cancel();
    });
}

fn help_styles() -> Styles {
    Styles::styled()
        .header(
            Style::new()
                .fg_color(Some(AnsiColor::Cyan.into()))
                .effects(Effects::BOLD),
        )
        .usage(
            Style::new()
                .fg_color(Some(AnsiColor::Green.into()))
                .effects(Effects::BOLD),
        )
        .literal(Style::new().fg_color(Some(AnsiColor::Yellow.into())))
        .placeholder(Style::new().fg_color(Some(AnsiColor::Magenta.into())))
}
