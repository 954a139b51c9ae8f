//! Process execution.
//!
//! `ProcessRunner` runs one command through a shell, streams the child's stdout
//! and stderr into caller-provided writers as bytes arrive, and tears the child
//! down when the run's cancellation signal fires.

use std::io::{self, Write};
use std::process::Stdio;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::cancel::CancelSignal;
use crate::error::ExecError;
use crate::output::StreamKind;
use crate::sink::write_blocking;

const READ_BUFFER: usize = 8 * 1024;
const DRAIN_TIMEOUT: Duration = Duration::from_millis(250);

/// Shell used to interpret task commands, invoked as `<program> <args..> -c <command>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shell {
    program: String,
    args: Vec<String>,
}

impl Shell {
    /// Parses a shell invocation such as `bash` or `bash -eo pipefail`.
    pub fn parse(spec: &str) -> Result<Self> {
        let mut parts =
            shell_words::split(spec).with_context(|| format!("failed to parse shell {}", spec))?;
        if parts.is_empty() {
            bail!("empty shell");
        }
        let program = parts.remove(0);
        Ok(Self {
            program,
            args: parts,
        })
    }

    fn command(&self, command: &str) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).arg("-c").arg(command);
        cmd
    }
}

impl Default for Shell {
    fn default() -> Self {
        Self {
            program: "bash".to_string(),
            args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ShutdownConfig {
    grace_ms: u64,
}

impl ShutdownConfig {
    /// `grace_ms` is how long a child gets after SIGTERM before it is killed.
    pub fn new(grace_ms: u64) -> Self {
        Self { grace_ms }
    }

    fn grace(&self) -> Duration {
        Duration::from_millis(self.grace_ms)
    }
}

#[derive(Debug, Clone, Copy)]
enum ProcessSignal {
    Term,
    Kill,
}

/// Runs task commands as shell subprocesses.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    shell: Shell,
    shutdown: ShutdownConfig,
}

impl ProcessRunner {
    pub fn new(shell: Shell, shutdown: ShutdownConfig) -> Self {
        Self { shell, shutdown }
    }

    /// Runs `command` to completion.
    ///
    /// Stdout bytes go to `out` and stderr bytes to `err` while the child runs.
    /// If `cancel` fires first the child is terminated and `ExecError::Cancelled`
    /// is returned. A signal that is already set prevents the spawn entirely.
    pub async fn run<O, E>(
        &self,
        id: usize,
        command: &str,
        cancel: &CancelSignal,
        out: &mut O,
        err: &mut E,
    ) -> Result<(), ExecError>
    where
        O: Write + Send,
        E: Write + Send,
    {
        if cancel.is_cancelled() {
            debug!(task = id, "run already cancelled, not starting");
            return Err(ExecError::Cancelled);
        }

        let mut command = self.shell.command(command);
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        command.kill_on_drop(true);

        #[cfg(windows)]
        {
            const CREATE_NEW_PROCESS_GROUP: u32 = 0x00000200;
            command.creation_flags(CREATE_NEW_PROCESS_GROUP);
        }

        // Own process group, so termination reaches everything the shell forks.
        #[cfg(unix)]
        unsafe {
            command.pre_exec(|| {
                let _ = libc::setpgid(0, 0);
                Ok(())
            });
        }

        let mut child = command.spawn().map_err(ExecError::Spawn)?;
        let pid = child.id();
        debug!(task = id, pid, "spawned");

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let pumps = async {
            let (out_result, err_result) = tokio::join!(
                pump(stdout, out, StreamKind::Stdout),
                pump(stderr, err, StreamKind::Stderr),
            );
            out_result.and(err_result).map(|_| ())
        };
        tokio::pin!(pumps);

        // Output keeps flowing while the child runs and while it shuts down.
        let mut pumped = None;
        let mut cancelled = false;
        let mut killed = false;
        let mut kill_at = Instant::now();
        let status = loop {
            tokio::select! {
                status = child.wait() => break status.map_err(ExecError::Wait),
                result = &mut pumps, if pumped.is_none() => pumped = Some(result),
                _ = cancel.cancelled(), if !cancelled => {
                    cancelled = true;
                    kill_at = Instant::now() + self.shutdown.grace();
                    debug!(task = id, pid, "terminating");
                    if let Some(pid) = pid {
                        send_os_signal(pid, ProcessSignal::Term);
                    }
                }
                _ = tokio::time::sleep_until(kill_at), if cancelled && !killed => {
                    killed = true;
                    debug!(task = id, pid, "grace period over, killing");
                    if let Some(pid) = pid {
                        send_os_signal(pid, ProcessSignal::Kill);
                    }
                    if let Err(err) = child.start_kill() {
                        warn!(task = id, error = %err, "kill failed");
                    }
                }
            }
        };

        // Background jobs of the shell may hold the pipes open long after it
        // exited; read what is already there, then let go.
        let pumped = match pumped {
            Some(result) => result,
            None => match tokio::time::timeout(DRAIN_TIMEOUT, &mut pumps).await {
                Ok(result) => result,
                Err(_) => {
                    debug!(task = id, "output still open after exit, detaching");
                    Ok(())
                }
            },
        };

        let status = status?;
        debug!(task = id, code = status.code(), cancelled, "exited");
        if cancelled {
            return Err(ExecError::Cancelled);
        }
        pumped?;
        if status.success() {
            Ok(())
        } else {
            Err(ExecError::Exit {
                code: status.code(),
            })
        }
    }
}

async fn pump<R, W>(reader: Option<R>, sink: &mut W, stream: StreamKind) -> Result<u64, ExecError>
where
    R: AsyncRead + Unpin,
    W: Write,
{
    let Some(mut reader) = reader else {
        return Ok(0);
    };
    let stream_error = |source: io::Error| ExecError::Output {
        stream: stream.as_str(),
        source,
    };
    let mut buf = vec![0u8; READ_BUFFER];
    let mut total = 0u64;
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(stream_error(err)),
        };
        // Returning drops the reader, so a child still writing gets EPIPE.
        write_blocking(|| sink.write_all(&buf[..n])).map_err(stream_error)?;
        total += n as u64;
    }
    Ok(total)
}

#[cfg(unix)]
fn send_os_signal(pid: u32, signal: ProcessSignal) {
    unsafe {
        let sig = match signal {
            ProcessSignal::Term => libc::SIGTERM,
            ProcessSignal::Kill => libc::SIGKILL,
        };
        let pid = pid as i32;
        let _ = libc::kill(-pid, sig);
        let _ = libc::kill(pid, sig);
    }
}

// No process-group signals here; `start_kill` after the grace period does the work.
#[cfg(not(unix))]
fn send_os_signal(_pid: u32, _signal: ProcessSignal) {}
