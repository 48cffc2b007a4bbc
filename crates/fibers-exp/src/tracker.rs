use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use fibers_core::errors::{io_error, ErrorInfo, FibersError};
use fibers_core::serde::{read_json, write_json};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::builder::{JobKey, JobSpec};
use crate::scheduler::{RemoteState, Scheduler};
use crate::submit::SubmissionLedger;

/// File name of the persisted completion report inside a sweep directory.
pub const COMPLETION_FILE: &str = "completion.json";

/// Decides whether a result file is complete and well-formed.
///
/// A file that fails validation is treated as still being written until the
/// tracking deadline passes.
pub trait ResultValidator: Send + Sync {
    /// Parsed form of a valid result.
    type Output: Send;

    /// Parses and validates the file at `path`.
    fn validate(&self, path: &Path) -> Result<Self::Output, FibersError>;
}

/// Accepts any non-empty file; useful when no schema is known.
#[derive(Debug, Clone, Copy, Default)]
pub struct NonEmptyFile;

impl ResultValidator for NonEmptyFile {
    type Output = PathBuf;

    fn validate(&self, path: &Path) -> Result<PathBuf, FibersError> {
        let meta = fs::metadata(path).map_err(|err| io_error("result_stat", path, err))?;
        if meta.len() == 0 {
            return Err(FibersError::Schema(
                ErrorInfo::new("empty_result", "result file is empty")
                    .with_context("path", path.display().to_string()),
            ));
        }
        Ok(path.to_path_buf())
    }
}

/// State of one job as seen by the tracker.
#[derive(Debug, Clone, PartialEq)]
pub enum JobState<T> {
    /// No well-formed output yet.
    Pending,
    /// A well-formed output was parsed.
    Complete(T),
    /// The job will never produce a usable output.
    Failed(String),
}

enum Observation<T> {
    Missing,
    Writing,
    Malformed(FibersError),
    Valid(T),
}

fn inspect<V: ResultValidator>(job: &JobSpec, validator: &V) -> Observation<V::Output> {
    if job.output.exists() {
        return match validator.validate(&job.output) {
            Ok(parsed) => Observation::Valid(parsed),
            Err(err) => Observation::Malformed(err),
        };
    }
    if job.staging.exists() {
        Observation::Writing
    } else {
        Observation::Missing
    }
}

/// Observes a single job once, treating malformed output as not yet complete.
pub fn observe<V: ResultValidator>(job: &JobSpec, validator: &V) -> JobState<V::Output> {
    match inspect(job, validator) {
        Observation::Valid(parsed) => JobState::Complete(parsed),
        Observation::Missing | Observation::Writing | Observation::Malformed(_) => {
            JobState::Pending
        }
    }
}

/// Polling cadence and deadline.
#[derive(Debug, Clone)]
pub struct PollOpts {
    /// Delay before the second observation.
    pub initial_interval: Duration,
    /// Upper bound on the delay between observations.
    pub max_interval: Duration,
    /// Multiplier applied to the delay after each observation.
    pub backoff: f64,
    /// Total time budget; tracking always stops once it elapses.
    pub timeout: Duration,
}

impl Default for PollOpts {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(5),
            max_interval: Duration::from_secs(120),
            backoff: 2.0,
            timeout: Duration::from_secs(6 * 60 * 60),
        }
    }
}

impl PollOpts {
    fn next_interval(&self, current: Duration) -> Duration {
        let factor = if self.backoff.is_finite() && self.backoff >= 1.0 {
            self.backoff
        } else {
            1.0
        };
        current.mul_f64(factor).min(self.max_interval)
    }
}

/// A job that will not produce a usable result, with the reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedJob {
    /// Replicate key.
    pub key: JobKey,
    /// Why the job is considered failed.
    pub reason: String,
}

/// Partition of a sweep's jobs into complete, pending and failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionReport {
    /// Jobs with a well-formed output, ordered by key.
    pub complete: Vec<JobKey>,
    /// Jobs still expected to finish, ordered by key.
    pub pending: Vec<JobKey>,
    /// Jobs that will not produce a result, ordered by key.
    pub failed: Vec<FailedJob>,
    /// True when tracking stopped because the deadline passed.
    pub timed_out: bool,
    /// Number of observation rounds performed.
    pub polls: u32,
}

impl CompletionReport {
    /// True once every job is either complete or failed.
    pub fn is_settled(&self) -> bool {
        self.pending.is_empty()
    }

    /// Keys that are pending or failed, in key order.
    pub fn missing(&self) -> Vec<JobKey> {
        let mut missing: Vec<JobKey> = self
            .pending
            .iter()
            .cloned()
            .chain(self.failed.iter().map(|job| job.key.clone()))
            .collect();
        missing.sort();
        missing
    }

    /// The `Incomplete` error describing pending jobs, if any remain.
    ///
    /// Tracking itself never fails on timeout; callers that need a hard
    /// failure can surface this value.
    pub fn incomplete_error(&self) -> Option<FibersError> {
        if self.pending.is_empty() {
            return None;
        }
        let listed = self
            .pending
            .iter()
            .map(JobKey::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        Some(FibersError::Incomplete(
            ErrorInfo::new("jobs_pending", "jobs still pending at the deadline")
                .with_context("pending", self.pending.len().to_string())
                .with_context("complete", self.complete.len().to_string())
                .with_context("keys", listed)
                .with_hint("keep polling, or resubmit the sweep with --resume"),
        ))
    }

    /// Persists the report into `sweep_dir`.
    pub fn persist(&self, sweep_dir: &Path) -> Result<PathBuf, FibersError> {
        let path = sweep_dir.join(COMPLETION_FILE);
        write_json(&path, self)?;
        Ok(path)
    }

    /// Loads the report stored in `sweep_dir`.
    pub fn load(sweep_dir: &Path) -> Result<Self, FibersError> {
        read_json(&sweep_dir.join(COMPLETION_FILE))
    }
}

/// Outcome of tracking: the partition plus the parsed complete results.
#[derive(Debug)]
pub struct Tracked<T> {
    /// Partition of the jobs.
    pub report: CompletionReport,
    /// Parsed results of the complete jobs, keyed by job.
    pub results: BTreeMap<JobKey, T>,
}

/// Scheduler access used to classify jobs without output.
#[derive(Clone, Copy)]
pub struct SchedulerProbe<'a> {
    /// Backend that issued the handles.
    pub scheduler: &'a dyn Scheduler,
    /// Ledger holding the handles.
    pub ledger: &'a SubmissionLedger,
}

impl SchedulerProbe<'_> {
    fn state(&self, key: &JobKey) -> RemoteState {
        let Some(handle) = self.ledger.handle(key) else {
            return RemoteState::Unknown;
        };
        match self.scheduler.status(handle) {
            Ok(state) => state,
            Err(err) => {
                debug!(job = %key, error = %err, "status query failed");
                RemoteState::Unknown
            }
        }
    }
}

/// Takes one observation of every job without applying any deadline.
pub fn snapshot<V: ResultValidator>(
    jobs: &[JobSpec],
    ledger: Option<&SubmissionLedger>,
    validator: &V,
) -> Tracked<V::Output> {
    let mut tracked = Tracked {
        report: CompletionReport {
            complete: Vec::new(),
            pending: Vec::new(),
            failed: Vec::new(),
            timed_out: false,
            polls: 1,
        },
        results: BTreeMap::new(),
    };
    for job in jobs {
        if let Some(err) = ledger.and_then(|ledger| ledger.failure(&job.key)) {
            tracked.report.failed.push(FailedJob {
                key: job.key.clone(),
                reason: format!("not submitted: {err}"),
            });
            continue;
        }
        match observe(job, validator) {
            JobState::Complete(parsed) => {
                tracked.report.complete.push(job.key.clone());
                tracked.results.insert(job.key.clone(), parsed);
            }
            JobState::Pending => tracked.report.pending.push(job.key.clone()),
            JobState::Failed(reason) => tracked.report.failed.push(FailedJob {
                key: job.key.clone(),
                reason,
            }),
        }
    }
    sort_report(&mut tracked.report);
    tracked
}

/// Polls the expected outputs until every job is accounted for or the deadline passes.
///
/// Jobs recorded as failed submissions in `ledger` (or in the probe's ledger)
/// are failed immediately. When a scheduler probe is supplied, a job the scheduler reports as finished without a well-formed
/// output is failed without waiting for the deadline. At the deadline,
/// malformed outputs are failed; missing outputs stay pending only while the
/// scheduler still reports the job as queued or running.
pub fn poll<V: ResultValidator>(
    jobs: &[JobSpec],
    ledger: Option<&SubmissionLedger>,
    probe: Option<SchedulerProbe<'_>>,
    opts: &PollOpts,
    validator: &V,
) -> Tracked<V::Output> {
    let started = Instant::now();
    let deadline = started + opts.timeout;
    let mut interval = opts.initial_interval;
    let mut report = CompletionReport {
        complete: Vec::new(),
        pending: Vec::new(),
        failed: Vec::new(),
        timed_out: false,
        polls: 0,
    };
    let mut results = BTreeMap::new();

    let ledger = ledger.or(probe.map(|probe| probe.ledger));
    let mut outstanding: Vec<&JobSpec> = Vec::new();
    for job in jobs {
        match ledger.and_then(|ledger| ledger.failure(&job.key)) {
            Some(err) => report.failed.push(FailedJob {
                key: job.key.clone(),
                reason: format!("not submitted: {err}"),
            }),
            None => outstanding.push(job),
        }
    }

    loop {
        report.polls += 1;
        let mut still_open = Vec::with_capacity(outstanding.len());
        let mut last_seen = Vec::with_capacity(outstanding.len());
        for job in outstanding {
            let observation = inspect(job, validator);
            if let Observation::Valid(parsed) = observation {
                report.complete.push(job.key.clone());
                results.insert(job.key.clone(), parsed);
                continue;
            }
            if let Some(probe) = probe {
                let state = probe.state(&job.key);
                if state.is_terminal() {
                    report.failed.push(FailedJob {
                        key: job.key.clone(),
                        reason: finished_reason(state, &observation),
                    });
                    continue;
                }
            }
            still_open.push(job);
            last_seen.push(observation);
        }
        outstanding = still_open;

        debug!(
            round = report.polls,
            complete = report.complete.len(),
            failed = report.failed.len(),
            outstanding = outstanding.len(),
            "completion poll"
        );
        if outstanding.is_empty() {
            break;
        }

        let now = Instant::now();
        if now >= deadline {
            report.timed_out = true;
            for (job, observation) in outstanding.iter().zip(last_seen) {
                settle_at_deadline(&mut report, job, observation, probe);
            }
            warn!(
                pending = report.pending.len(),
                failed = report.failed.len(),
                "tracking deadline reached"
            );
            break;
        }
        thread::sleep(interval.min(deadline - now));
        interval = opts.next_interval(interval);
    }

    sort_report(&mut report);
    info!(
        complete = report.complete.len(),
        pending = report.pending.len(),
        failed = report.failed.len(),
        timed_out = report.timed_out,
        "tracking finished"
    );
    Tracked { report, results }
}

fn finished_reason<T>(state: RemoteState, observation: &Observation<T>) -> String {
    let verdict = match state {
        RemoteState::Done => "job finished",
        _ => "job exited",
    };
    match observation {
        Observation::Malformed(err) => format!("{verdict} with a malformed result: {err}"),
        Observation::Writing => format!("{verdict} leaving an unpublished staging file"),
        _ => format!("{verdict} without writing a result"),
    }
}

fn settle_at_deadline<T>(
    report: &mut CompletionReport,
    job: &JobSpec,
    observation: Observation<T>,
    probe: Option<SchedulerProbe<'_>>,
) {
    let key = job.key.clone();
    match observation {
        Observation::Malformed(err) => report.failed.push(FailedJob {
            key,
            reason: format!("result still malformed at the deadline: {err}"),
        }),
        Observation::Missing | Observation::Writing => {
            let active = probe.map_or(false, |probe| probe.state(&key).is_active());
            if active {
                report.pending.push(key);
            } else {
                report.failed.push(FailedJob {
                    key,
                    reason: "no result before the deadline".to_string(),
                });
            }
        }
        Observation::Valid(_) => report.complete.push(key),
    }
}

fn sort_report(report: &mut CompletionReport) {
    report.complete.sort();
    report.pending.sort();
    report.failed.sort_by(|a, b| a.key.cmp(&b.key));
}
