//! Runs a list of commands concurrently.
//!
//! Each command becomes a task with its own index and color. Tasks run on the
//! tokio runtime in parallel; their stdout and stderr go through per-task
//! colorizers into two shared sinks. A failing task can cancel its siblings, and
//! `run` only returns once every task has finished.

use std::io::Write;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::cancel::CancelSignal;
use crate::error::{ExecError, RunError};
use crate::output::Colorizer;
use crate::palette::Palette;
use crate::process::{Task, TaskReport, TaskState};
use crate::runner::ProcessRunner;
use crate::sink::{write_blocking, SharedSink, Sink};

/// Failure handling policy for a run.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Any task failure cancels all other tasks.
    pub fail_fast: bool,
    /// A task that cannot be started cancels the others even without `fail_fast`.
    pub cancel_on_start_failure: bool,
    /// Print a success line when a command exits with status 0.
    pub announce_exit: bool,
}

impl RunOptions {
    fn cancels_siblings(&self, err: &ExecError) -> bool {
        match err {
            // a consequence of cancellation, not a cause
            ExecError::Cancelled => false,
            err if err.is_start_failure() => self.fail_fast || self.cancel_on_start_failure,
            _ => self.fail_fast,
        }
    }
}

/// Outcome of a whole run, one report per task in input order.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub reports: Vec<TaskReport>,
}

impl RunSummary {
    pub fn all_succeeded(&self) -> bool {
        self.reports
            .iter()
            .all(|report| report.state == TaskState::Succeeded)
    }

    pub fn failed(&self) -> usize {
        self.reports
            .iter()
            .filter(|report| matches!(report.state, TaskState::Failed { .. }))
            .count()
    }

    pub fn cancelled(&self) -> usize {
        self.reports
            .iter()
            .filter(|report| report.state == TaskState::Cancelled)
            .count()
    }
}

/// Coordinates the tasks of one run.
pub struct Orchestrator<O, E> {
    palette: Palette,
    runner: Arc<ProcessRunner>,
    options: RunOptions,
    stdout: SharedSink<O>,
    stderr: SharedSink<E>,
    cancel: CancelSignal,
}

impl<O, E> Orchestrator<O, E>
where
    O: Write + Send + 'static,
    E: Write + Send + 'static,
{
    pub fn new(
        palette: Palette,
        runner: ProcessRunner,
        options: RunOptions,
        stdout: SharedSink<O>,
        stderr: SharedSink<E>,
    ) -> Self {
        Self {
            palette,
            runner: Arc::new(runner),
            options,
            stdout,
            stderr,
            cancel: CancelSignal::new(),
        }
    }

    /// Handle to the run's cancellation signal, e.g. for Ctrl-C handling.
    pub fn cancel_signal(&self) -> CancelSignal {
        self.cancel.clone()
    }

    /// Assigns indices and colors, rejecting runs larger than the palette.
    pub fn plan(&self, commands: Vec<String>) -> Result<Vec<Task>, RunError> {
        let max = self.palette.len();
        if commands.len() > max {
            return Err(RunError::TooManyTasks {
                count: commands.len(),
                max,
            });
        }
        commands
            .into_iter()
            .enumerate()
            .map(|(index, command)| {
                let color = self.palette.get(index).ok_or(RunError::TooManyTasks {
                    count: index + 1,
                    max,
                })?;
                Ok(Task {
                    index,
                    command,
                    color,
                })
            })
            .collect()
    }

    /// Runs every command concurrently and waits for all of them.
    ///
    /// Nothing is started, and nothing is printed, if the command list does not
    /// fit the palette.
    pub async fn run(&self, commands: Vec<String>) -> Result<RunSummary, RunError> {
        let tasks = self.plan(commands)?;

        let mut handles = Vec::with_capacity(tasks.len());
        for task in tasks {
            let out = Colorizer::new(task.index, task.color, self.stdout.clone());
            let mut err = Colorizer::new(task.index, task.color, self.stderr.clone());
            let announced =
                write_blocking(|| err.write_line(&format!("Running: {}", task.command)));
            if let Err(e) = announced {
                warn!(task = task.index, error = %e, "failed to announce task");
            }
            let index = task.index;
            let command = task.command.clone();
            let handle = tokio::spawn(run_task(
                task,
                out,
                err,
                Arc::clone(&self.runner),
                self.cancel.clone(),
                self.options,
            ));
            handles.push((index, command, handle));
        }

        let mut reports = Vec::with_capacity(handles.len());
        for (index, command, handle) in handles {
            let report = match handle.await {
                Ok(report) => report,
                Err(join_err) => {
                    warn!(task = index, error = %join_err, "task aborted");
                    TaskReport {
                        index,
                        command,
                        state: TaskState::Failed {
                            error: join_err.to_string(),
                        },
                    }
                }
            };
            reports.push(report);
        }
        Ok(RunSummary { reports })
    }
}

async fn run_task<O, E>(
    task: Task,
    mut out: Colorizer<SharedSink<O>>,
    mut err: Colorizer<SharedSink<E>>,
    runner: Arc<ProcessRunner>,
    cancel: CancelSignal,
    options: RunOptions,
) -> TaskReport
where
    O: Write + Send,
    E: Write + Send,
{
    let mut state = TaskState::Pending;
    state.advance(TaskState::Running);
    debug!(task = task.index, color = %task.color, command = %task.command, "running");

    let result = runner
        .run(task.index, &task.command, &cancel, &mut out, &mut err)
        .await;

    // Flush unterminated tails before any diagnostic so they stay adjacent to
    // the output they belong to.
    let closed = write_blocking(|| [("stdout", out.close()), ("stderr", err.close())]);
    for (stream, closed) in closed {
        if let Err(e) = closed {
            warn!(task = task.index, stream, error = %e, "failed to flush output");
        }
    }

    let diagnostic = match &result {
        Ok(()) => options
            .announce_exit
            .then(|| "Command exited successfully".to_string()),
        Err(e) => Some(format!("command failed with {}", e)),
    };
    if let Some(line) = diagnostic {
        if let Err(e) = write_blocking(|| err.write_line(&line)) {
            warn!(task = task.index, error = %e, "failed to write status line");
        }
    }

    if let Err(e) = &result {
        if options.cancels_siblings(e) && cancel.cancel() {
            info!(task = task.index, error = %e, "cancelling remaining tasks");
        }
    }

    state.advance(TaskState::from_result(&result));
    debug!(task = task.index, state = ?state, "finished");
    TaskReport {
        index: task.index,
        command: task.command,
        state,
    }
}
