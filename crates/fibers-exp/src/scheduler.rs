use std::fmt;
use std::path::PathBuf;
use std::process::Command;

use fibers_core::errors::{ErrorInfo, FibersError};
use serde::{Deserialize, Serialize};

use crate::algorithm::Invocation;
use crate::builder::JobSpec;
use crate::config::SweepConfig;

/// Everything a batch scheduler needs to queue one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitRequest {
    /// Human readable job name.
    pub job_name: String,
    /// Queue or partition.
    pub queue: String,
    /// CPU cores.
    pub cpus: u32,
    /// Memory limit in megabytes.
    pub memory_mb: u64,
    /// Optional wall-clock limit.
    pub walltime: Option<String>,
    /// Shell command executed by the job.
    pub command: String,
    /// Working directory of the job.
    pub working_dir: PathBuf,
    /// File receiving the job's stdout.
    pub stdout: PathBuf,
    /// File receiving the job's stderr.
    pub stderr: PathBuf,
    /// Structured invocation behind `command`, for in-process backends.
    pub invocation: Invocation,
}

impl SubmitRequest {
    /// Builds the request for `job` using the sweep's resource request.
    pub fn for_job(config: &SweepConfig, job: &JobSpec, working_dir: PathBuf) -> Self {
        let invocation = Invocation::for_job(config, job);
        Self {
            job_name: job.job_name.clone(),
            queue: config.resources.queue.clone(),
            cpus: config.resources.cpus,
            memory_mb: config.resources.memory_mb,
            walltime: config.resources.walltime.clone(),
            command: invocation.shell_command(),
            working_dir,
            stdout: job.stdout.clone(),
            stderr: job.stderr.clone(),
            invocation,
        }
    }
}

/// Opaque reference to a submitted job.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct JobHandle {
    /// Scheduler backend that issued the id.
    pub scheduler: String,
    /// Scheduler-assigned job id.
    pub id: String,
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.scheduler, self.id)
    }
}

/// Scheduler-side view of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RemoteState {
    /// Waiting in the queue.
    Queued,
    /// Executing on a compute node.
    Running,
    /// Finished with a zero exit status.
    Done,
    /// Finished with a failure, or killed.
    Exited,
    /// The scheduler no longer knows about the job, or was not asked.
    Unknown,
}

impl RemoteState {
    /// True while the scheduler still expects the job to produce output.
    pub fn is_active(self) -> bool {
        matches!(self, RemoteState::Queued | RemoteState::Running)
    }

    /// True once the scheduler considers the job finished.
    pub fn is_terminal(self) -> bool {
        matches!(self, RemoteState::Done | RemoteState::Exited)
    }
}

/// Pluggable batch-scheduler backend.
///
/// Submission is fire-and-forget: `submit` returns as soon as the scheduler
/// has accepted the job.
pub trait Scheduler: Send + Sync {
    /// Short backend name recorded in job handles.
    fn name(&self) -> &str;

    /// Queues one job, returning its handle or a [`FibersError::Submission`].
    fn submit(&self, request: &SubmitRequest) -> Result<JobHandle, FibersError>;

    /// Queries the scheduler for the job's state.
    fn status(&self, _handle: &JobHandle) -> Result<RemoteState, FibersError> {
        Ok(RemoteState::Unknown)
    }

    /// Best-effort cancellation hook.
    fn cancel(&self, _handle: &JobHandle) -> Result<(), FibersError> {
        Ok(())
    }
}

/// Captured result of running an external command.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    /// Exit code, `None` when terminated by a signal.
    pub code: Option<i32>,
    /// Captured stdout.
    pub stdout: String,
    /// Captured stderr.
    pub stderr: String,
}

impl CommandOutput {
    /// True when the command exited with status zero.
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Seam over process execution so scheduler CLIs can be stubbed in tests.
pub trait CommandRunner: Send + Sync {
    /// Runs `program` with `args` and captures its output.
    fn run(&self, program: &str, args: &[String]) -> std::io::Result<CommandOutput>;
}

/// Runs commands with [`std::process::Command`].
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner;

impl CommandRunner for ProcessRunner {
    fn run(&self, program: &str, args: &[String]) -> std::io::Result<CommandOutput> {
        let output = Command::new(program).args(args).output()?;
        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Runs a scheduler CLI, mapping spawn failures and non-zero exits into `family`.
///
/// Submissions use [`FibersError::Submission`]; status queries and
/// cancellations use [`FibersError::Io`].
pub(crate) fn run_checked(
    runner: &dyn CommandRunner,
    family: fn(ErrorInfo) -> FibersError,
    code: &str,
    program: &str,
    args: &[String],
) -> Result<CommandOutput, FibersError> {
    let output = runner.run(program, args).map_err(|err| {
        family(
            ErrorInfo::new(format!("{code}_unreachable"), err.to_string())
                .with_context("program", program.to_string())
                .with_hint("is the scheduler client installed and on PATH?"),
        )
    })?;
    if !output.success() {
        let detail = if output.stderr.trim().is_empty() {
            output.stdout.trim().to_string()
        } else {
            output.stderr.trim().to_string()
        };
        return Err(family(
            ErrorInfo::new(format!("{code}_rejected"), detail)
                .with_context("program", program.to_string())
                .with_context(
                    "exit_code",
                    output.code.map_or_else(|| "signal".to_string(), |c| c.to_string()),
                ),
        ));
    }
    Ok(output)
}
