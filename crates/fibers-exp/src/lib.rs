#![deny(missing_docs)]
#![doc = "Sweep planning, batch submission and completion tracking for FIBERS replicate jobs."]

mod algorithm;
mod builder;
mod config;
mod local;
mod lsf;
mod manifest;
mod scheduler;
mod slurm;
mod submit;
mod tracker;

pub use algorithm::{publish, shell_quote, Algorithm, Invocation, ProcessAlgorithm};
pub use builder::{
    build_jobs, discover_variants, output_path, staging_path, DatasetVariant, JobKey, JobSpec,
    VariantId,
};
pub use config::{
    load_config, AlgorithmParams, DataSource, OutputLayout, ResourceRequest, ResultColumns,
    SweepConfig,
};
pub use local::LocalScheduler;
pub use lsf::{parse_bjobs_stat, parse_bsub_reply, LsfScheduler};
pub use manifest::{SweepManifest, CONFIG_FILE, MANIFEST_FILE};
pub use scheduler::{
    CommandOutput, CommandRunner, JobHandle, ProcessRunner, RemoteState, Scheduler, SubmitRequest,
};
pub use slurm::{parse_sbatch_reply, parse_squeue_state, SlurmScheduler};
pub use submit::{
    cancel_sweep, submit_sweep, FailedSubmission, SubmissionLedger, SubmitOpts, SubmittedJob,
    LEDGER_FILE,
};
pub use tracker::{
    observe, poll, snapshot, CompletionReport, FailedJob, JobState, NonEmptyFile, PollOpts,
    ResultValidator, SchedulerProbe, Tracked, COMPLETION_FILE,
};
