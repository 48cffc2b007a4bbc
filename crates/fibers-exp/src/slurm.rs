use std::sync::Arc;

use fibers_core::errors::{ErrorInfo, FibersError};
use tracing::debug;

use crate::scheduler::{
    run_checked, CommandRunner, JobHandle, ProcessRunner, RemoteState, Scheduler, SubmitRequest,
};

/// Slurm backend driving `sbatch`, `squeue` and `scancel`.
#[derive(Clone)]
pub struct SlurmScheduler {
    runner: Arc<dyn CommandRunner>,
}

impl SlurmScheduler {
    /// Backend using the real Slurm client binaries.
    pub fn new() -> Self {
        Self::with_runner(Arc::new(ProcessRunner))
    }

    /// Backend using a custom command runner.
    pub fn with_runner(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    /// Arguments passed to `sbatch` for the request.
    pub fn sbatch_args(request: &SubmitRequest) -> Vec<String> {
        let mut args = vec![
            "--parsable".to_string(),
            format!("--job-name={}", request.job_name),
            format!("--partition={}", request.queue),
            format!("--cpus-per-task={}", request.cpus),
            format!("--mem={}M", request.memory_mb),
        ];
        if let Some(walltime) = &request.walltime {
            args.push(format!("--time={walltime}"));
        }
        args.extend([
            format!("--chdir={}", request.working_dir.display()),
            format!("--output={}", request.stdout.display()),
            format!("--error={}", request.stderr.display()),
            format!("--wrap={}", request.command),
        ]);
        args
    }
}

impl Default for SlurmScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for SlurmScheduler {
    fn name(&self) -> &str {
        "slurm"
    }

    fn submit(&self, request: &SubmitRequest) -> Result<JobHandle, FibersError> {
        let args = Self::sbatch_args(request);
        let output = run_checked(
            self.runner.as_ref(),
            FibersError::Submission,
            "sbatch",
            "sbatch",
            &args,
        )?;
        let id = parse_sbatch_reply(&output.stdout).ok_or_else(|| {
            FibersError::Submission(
                ErrorInfo::new("sbatch_reply", "could not find a job id in the sbatch reply")
                    .with_context("stdout", output.stdout.trim().to_string())
                    .with_context("job", request.job_name.clone()),
            )
        })?;
        debug!(job = %request.job_name, id = %id, "sbatch accepted job");
        Ok(JobHandle {
            scheduler: self.name().to_string(),
            id,
        })
    }

    fn status(&self, handle: &JobHandle) -> Result<RemoteState, FibersError> {
        let args = vec![
            "-h".to_string(),
            "-o".to_string(),
            "%T".to_string(),
            "-j".to_string(),
            handle.id.clone(),
        ];
        let output = run_checked(
            self.runner.as_ref(),
            FibersError::Io,
            "squeue",
            "squeue",
            &args,
        )?;
        Ok(parse_squeue_state(&output.stdout))
    }

    fn cancel(&self, handle: &JobHandle) -> Result<(), FibersError> {
        run_checked(
            self.runner.as_ref(),
            FibersError::Io,
            "scancel",
            "scancel",
            &[handle.id.clone()],
        )?;
        Ok(())
    }
}

/// Extracts the job id from `sbatch --parsable` output (`1234` or `1234;cluster`).
pub fn parse_sbatch_reply(stdout: &str) -> Option<String> {
    let line = stdout.lines().map(str::trim).find(|line| !line.is_empty())?;
    let id = line.split(';').next()?.trim();
    (!id.is_empty() && id.chars().all(|c| c.is_ascii_digit())).then(|| id.to_string())
}

/// Maps the `squeue -o %T` column to a [`RemoteState`].
///
/// `squeue` forgets finished jobs, so an empty reply is `Unknown`.
pub fn parse_squeue_state(stdout: &str) -> RemoteState {
    match stdout.trim() {
        "PENDING" | "CONFIGURING" | "REQUEUED" | "SUSPENDED" => RemoteState::Queued,
        "RUNNING" | "COMPLETING" => RemoteState::Running,
        "COMPLETED" => RemoteState::Done,
        "FAILED" | "CANCELLED" | "TIMEOUT" | "OUT_OF_MEMORY" | "NODE_FAIL" | "PREEMPTED" => {
            RemoteState::Exited
        }
        _ => RemoteState::Unknown,
    }
}
