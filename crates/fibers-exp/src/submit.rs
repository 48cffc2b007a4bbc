use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use fibers_core::errors::{io_error, ErrorInfo, FibersError};
use fibers_core::serde::{read_json, write_json};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::builder::{JobKey, JobSpec};
use crate::manifest::SweepManifest;
use crate::scheduler::{JobHandle, Scheduler, SubmitRequest};
use crate::tracker::ResultValidator;

/// File name of the persisted submission ledger inside a sweep directory.
pub const LEDGER_FILE: &str = "submission.json";

/// Options governing sweep submission.
#[derive(Debug, Clone)]
pub struct SubmitOpts {
    /// Skip jobs whose output is already well-formed and keep still-active handles.
    pub resume: bool,
    /// Number of submissions issued in parallel.
    pub concurrency: usize,
}

impl Default for SubmitOpts {
    fn default() -> Self {
        Self {
            resume: false,
            concurrency: 4,
        }
    }
}

/// A job the scheduler accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmittedJob {
    /// Replicate key.
    pub key: JobKey,
    /// Handle returned by the scheduler.
    pub handle: JobHandle,
    /// True when the handle was carried over from an earlier submission.
    #[serde(default)]
    pub reused: bool,
}

/// A job the scheduler refused or could not be asked about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedSubmission {
    /// Replicate key.
    pub key: JobKey,
    /// Submission error reported by the backend.
    pub error: FibersError,
}

/// Outcome of submitting one sweep, persisted as `submission.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionLedger {
    /// Backend that handled the submission.
    pub scheduler: String,
    /// Accepted jobs, ordered by key.
    pub submitted: Vec<SubmittedJob>,
    /// Refused jobs, ordered by key.
    pub failed: Vec<FailedSubmission>,
    /// Jobs skipped because their output was already complete.
    #[serde(default)]
    pub skipped: Vec<JobKey>,
}

impl SubmissionLedger {
    /// Handle of a submitted job.
    pub fn handle(&self, key: &JobKey) -> Option<&JobHandle> {
        self.submitted
            .iter()
            .find(|job| &job.key == key)
            .map(|job| &job.handle)
    }

    /// Submission error of a refused job.
    pub fn failure(&self, key: &JobKey) -> Option<&FibersError> {
        self.failed
            .iter()
            .find(|job| &job.key == key)
            .map(|job| &job.error)
    }

    /// True when every job was either accepted or skipped.
    pub fn all_submitted(&self) -> bool {
        self.failed.is_empty()
    }

    /// Persists the ledger into `sweep_dir`.
    pub fn persist(&self, sweep_dir: &Path) -> Result<PathBuf, FibersError> {
        let path = sweep_dir.join(LEDGER_FILE);
        write_json(&path, self)?;
        Ok(path)
    }

    /// Loads the ledger stored in `sweep_dir`, if any.
    pub fn load(sweep_dir: &Path) -> Result<Option<Self>, FibersError> {
        let path = sweep_dir.join(LEDGER_FILE);
        if !path.exists() {
            return Ok(None);
        }
        read_json(&path).map(Some)
    }
}

enum Outcome {
    Submitted(JobHandle, bool),
    Failed(FibersError),
    Skipped,
}

/// Submits every job of the manifest to `scheduler`.
///
/// A refused job is recorded in the ledger and does not stop the remaining
/// submissions; only failures to prepare the sweep directory abort the call.
pub fn submit_sweep<V: ResultValidator>(
    scheduler: &dyn Scheduler,
    manifest: &SweepManifest,
    opts: &SubmitOpts,
    validator: &V,
    previous: Option<&SubmissionLedger>,
) -> Result<SubmissionLedger, FibersError> {
    let sweep_dir = manifest.sweep_dir();
    prepare_dirs(&sweep_dir, &manifest.jobs)?;
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(opts.concurrency.max(1))
        .build()
        .map_err(|err| FibersError::Io(ErrorInfo::new("thread_pool", err.to_string())))?;

    let outcomes: Vec<(JobKey, Outcome)> = pool.install(|| {
        manifest
            .jobs
            .par_iter()
            .map(|job| {
                let outcome =
                    submit_one(scheduler, manifest, job, &sweep_dir, opts, validator, previous);
                (job.key.clone(), outcome)
            })
            .collect()
    });

    let mut submitted = Vec::new();
    let mut failed = Vec::new();
    let mut skipped = Vec::new();
    for (key, outcome) in outcomes {
        match outcome {
            Outcome::Submitted(handle, reused) => submitted.push(SubmittedJob {
                key,
                handle,
                reused,
            }),
            Outcome::Failed(error) => {
                warn!(job = %key, error = %error, "submission failed");
                failed.push(FailedSubmission { key, error });
            }
            Outcome::Skipped => skipped.push(key),
        }
    }
    submitted.sort_by(|a, b| a.key.cmp(&b.key));
    failed.sort_by(|a, b| a.key.cmp(&b.key));
    skipped.sort();
    info!(
        sweep = %manifest.config.name,
        scheduler = scheduler.name(),
        submitted = submitted.len(),
        failed = failed.len(),
        skipped = skipped.len(),
        "sweep submission finished"
    );
    Ok(SubmissionLedger {
        scheduler: scheduler.name().to_string(),
        submitted,
        failed,
        skipped,
    })
}

fn submit_one<V: ResultValidator>(
    scheduler: &dyn Scheduler,
    manifest: &SweepManifest,
    job: &JobSpec,
    sweep_dir: &Path,
    opts: &SubmitOpts,
    validator: &V,
    previous: Option<&SubmissionLedger>,
) -> Outcome {
    if opts.resume {
        if job.output.exists() && validator.validate(&job.output).is_ok() {
            return Outcome::Skipped;
        }
        let prior = previous
            .filter(|ledger| ledger.scheduler == scheduler.name())
            .and_then(|ledger| ledger.handle(&job.key));
        if let Some(handle) = prior {
            match scheduler.status(handle) {
                Ok(state) if state.is_active() => {
                    return Outcome::Submitted(handle.clone(), true);
                }
                Ok(_) => {}
                Err(err) => warn!(job = %job.key, error = %err, "could not query prior handle"),
            }
        }
    }
    let _ = fs::remove_file(&job.staging);
    let request = SubmitRequest::for_job(&manifest.config, job, sweep_dir.to_path_buf());
    match scheduler.submit(&request) {
        Ok(handle) => Outcome::Submitted(handle, false),
        Err(err @ FibersError::Submission(_)) => Outcome::Failed(err),
        Err(other) => Outcome::Failed(FibersError::Submission(
            other.info().clone().with_context("job", job.key.to_string()),
        )),
    }
}

fn prepare_dirs(sweep_dir: &Path, jobs: &[JobSpec]) -> Result<(), FibersError> {
    let mut dirs = BTreeSet::new();
    dirs.insert(sweep_dir.to_path_buf());
    for job in jobs {
        for path in [&job.output, &job.stdout] {
            if let Some(parent) = path.parent() {
                dirs.insert(parent.to_path_buf());
            }
        }
    }
    for dir in &dirs {
        fs::create_dir_all(dir).map_err(|err| io_error("sweep_dir", dir, err))?;
    }
    Ok(())
}

/// Best-effort cancellation of every job in the ledger.
///
/// Returns the handles whose cancellation failed along with the error.
pub fn cancel_sweep(
    scheduler: &dyn Scheduler,
    ledger: &SubmissionLedger,
) -> Vec<(JobHandle, FibersError)> {
    let mut failures = Vec::new();
    for job in &ledger.submitted {
        if let Err(err) = scheduler.cancel(&job.handle) {
            warn!(job = %job.key, handle = %job.handle, error = %err, "cancel failed");
            failures.push((job.handle.clone(), err));
        }
    }
    failures
}
