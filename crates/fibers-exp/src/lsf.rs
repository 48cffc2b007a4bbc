use std::sync::Arc;

use fibers_core::errors::{ErrorInfo, FibersError};
use tracing::debug;

use crate::scheduler::{
    run_checked, CommandRunner, JobHandle, ProcessRunner, RemoteState, Scheduler, SubmitRequest,
};

/// IBM Spectrum LSF backend driving `bsub`, `bjobs` and `bkill`.
#[derive(Clone)]
pub struct LsfScheduler {
    runner: Arc<dyn CommandRunner>,
}

impl LsfScheduler {
    /// Backend using the real LSF client binaries.
    pub fn new() -> Self {
        Self::with_runner(Arc::new(ProcessRunner))
    }

    /// Backend using a custom command runner.
    pub fn with_runner(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    /// Arguments passed to `bsub` for the request.
    pub fn bsub_args(request: &SubmitRequest) -> Vec<String> {
        let mut args = vec![
            "-J".to_string(),
            request.job_name.clone(),
            "-q".to_string(),
            request.queue.clone(),
            "-n".to_string(),
            request.cpus.to_string(),
            "-M".to_string(),
            format!("{}MB", request.memory_mb),
            "-R".to_string(),
            format!("rusage[mem={}MB] span[hosts=1]", request.memory_mb),
        ];
        if let Some(walltime) = &request.walltime {
            args.push("-W".to_string());
            args.push(walltime.clone());
        }
        args.extend([
            "-cwd".to_string(),
            request.working_dir.display().to_string(),
            "-o".to_string(),
            request.stdout.display().to_string(),
            "-e".to_string(),
            request.stderr.display().to_string(),
            request.command.clone(),
        ]);
        args
    }
}

impl Default for LsfScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for LsfScheduler {
    fn name(&self) -> &str {
        "lsf"
    }

    fn submit(&self, request: &SubmitRequest) -> Result<JobHandle, FibersError> {
        let args = Self::bsub_args(request);
        let output = run_checked(
            self.runner.as_ref(),
            FibersError::Submission,
            "bsub",
            "bsub",
            &args,
        )?;
        let id = parse_bsub_reply(&output.stdout).ok_or_else(|| {
            FibersError::Submission(
                ErrorInfo::new("bsub_reply", "could not find a job id in the bsub reply")
                    .with_context("stdout", output.stdout.trim().to_string())
                    .with_context("job", request.job_name.clone()),
            )
        })?;
        debug!(job = %request.job_name, id = %id, "bsub accepted job");
        Ok(JobHandle {
            scheduler: self.name().to_string(),
            id,
        })
    }

    fn status(&self, handle: &JobHandle) -> Result<RemoteState, FibersError> {
        let args = vec![
            "-noheader".to_string(),
            "-o".to_string(),
            "stat".to_string(),
            handle.id.clone(),
        ];
        let output = run_checked(
            self.runner.as_ref(),
            FibersError::Io,
            "bjobs",
            "bjobs",
            &args,
        )?;
        Ok(parse_bjobs_stat(&output.stdout))
    }

    fn cancel(&self, handle: &JobHandle) -> Result<(), FibersError> {
        run_checked(
            self.runner.as_ref(),
            FibersError::Io,
            "bkill",
            "bkill",
            &[handle.id.clone()],
        )?;
        Ok(())
    }
}

/// Extracts the job id from `Job <1234> is submitted to queue <normal>.`
pub fn parse_bsub_reply(stdout: &str) -> Option<String> {
    stdout.lines().find_map(|line| {
        let rest = line.trim().strip_prefix("Job <")?;
        let end = rest.find('>')?;
        let id = &rest[..end];
        (!id.is_empty() && id.chars().all(|c| c.is_ascii_digit())).then(|| id.to_string())
    })
}

/// Maps the `bjobs -o stat` column to a [`RemoteState`].
pub fn parse_bjobs_stat(stdout: &str) -> RemoteState {
    match stdout.trim() {
        "PEND" | "PSUSP" | "WAIT" => RemoteState::Queued,
        "RUN" | "USUSP" | "SSUSP" => RemoteState::Running,
        "DONE" => RemoteState::Done,
        "EXIT" | "ZOMBI" => RemoteState::Exited,
        _ => RemoteState::Unknown,
    }
}
