mod common;

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};

use fibers_core::FibersError;
use fibers_exp::{
    cancel_sweep, parse_bjobs_stat, parse_bsub_reply, parse_sbatch_reply, parse_squeue_state,
    submit_sweep, CommandOutput, CommandRunner, JobHandle, JobKey, LsfScheduler, NonEmptyFile, RemoteState,
    Scheduler, SlurmScheduler, SubmissionLedger, SubmitOpts, SubmitRequest, SweepManifest,
};

use common::sweep_config;

/// Replays canned replies and records every call.
#[derive(Default)]
struct ScriptedRunner {
    replies: Mutex<VecDeque<io::Result<CommandOutput>>>,
    calls: Mutex<Vec<(String, Vec<String>)>>,
}

impl ScriptedRunner {
    fn reply(self, code: i32, stdout: &str, stderr: &str) -> Self {
        self.replies.lock().expect("replies").push_back(Ok(CommandOutput {
            code: Some(code),
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
        }));
        self
    }

    fn unreachable(self) -> Self {
        self.replies
            .lock()
            .expect("replies")
            .push_back(Err(io::Error::new(io::ErrorKind::NotFound, "no such file")));
        self
    }

    fn calls(&self) -> Vec<(String, Vec<String>)> {
        self.calls.lock().expect("calls").clone()
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, program: &str, args: &[String]) -> io::Result<CommandOutput> {
        self.calls
            .lock()
            .expect("calls")
            .push((program.to_string(), args.to_vec()));
        self.replies
            .lock()
            .expect("replies")
            .pop_front()
            .unwrap_or_else(|| Ok(CommandOutput::default()))
    }
}

/// Rejects submissions whose job name ends with the given seed suffix.
struct PickyRunner {
    reject_suffix: &'static str,
    next_id: Mutex<u32>,
}

impl CommandRunner for PickyRunner {
    fn run(&self, _program: &str, args: &[String]) -> io::Result<CommandOutput> {
        let name = args.get(1).cloned().unwrap_or_default();
        if name.ends_with(self.reject_suffix) {
            return Ok(CommandOutput {
                code: Some(255),
                stdout: String::new(),
                stderr: "Queue does not exist".to_string(),
            });
        }
        let mut next = self.next_id.lock().expect("id");
        *next += 1;
        Ok(CommandOutput {
            code: Some(0),
            stdout: format!("Job <{}> is submitted to queue <normal>.\n", *next),
            stderr: String::new(),
        })
    }
}

fn first_request(temp: &std::path::Path) -> SubmitRequest {
    let config = sweep_config(temp, &["ma_0.5.csv"], 1);
    let manifest = SweepManifest::plan(&config).expect("plan");
    SubmitRequest::for_job(&config, &manifest.jobs[0], manifest.sweep_dir())
}

#[test]
fn bsub_reply_and_status_parsing() {
    assert_eq!(
        parse_bsub_reply("Job <48213> is submitted to queue <normal>.\n"),
        Some("48213".to_string())
    );
    assert_eq!(parse_bsub_reply("Request aborted by esub.\n"), None);
    assert_eq!(parse_bjobs_stat("PEND\n"), RemoteState::Queued);
    assert_eq!(parse_bjobs_stat("RUN"), RemoteState::Running);
    assert_eq!(parse_bjobs_stat("DONE"), RemoteState::Done);
    assert_eq!(parse_bjobs_stat("EXIT"), RemoteState::Exited);
    assert_eq!(parse_bjobs_stat(""), RemoteState::Unknown);
}

#[test]
fn sbatch_reply_and_status_parsing() {
    assert_eq!(parse_sbatch_reply("991\n"), Some("991".to_string()));
    assert_eq!(parse_sbatch_reply("991;cluster-a\n"), Some("991".to_string()));
    assert_eq!(parse_sbatch_reply("sbatch: error\n"), None);
    assert_eq!(parse_squeue_state("PENDING\n"), RemoteState::Queued);
    assert_eq!(parse_squeue_state("RUNNING"), RemoteState::Running);
    assert_eq!(parse_squeue_state("TIMEOUT"), RemoteState::Exited);
    assert_eq!(parse_squeue_state(""), RemoteState::Unknown);
}

#[test]
fn lsf_submission_carries_resources_and_command() {
    let temp = tempfile::tempdir().expect("tmp dir");
    let request = first_request(temp.path());
    let runner = Arc::new(
        ScriptedRunner::default().reply(0, "Job <7> is submitted to queue <normal>.\n", ""),
    );
    let scheduler = LsfScheduler::with_runner(runner.clone());
    let handle = scheduler.submit(&request).expect("submit");
    assert_eq!(handle.id, "7");
    assert_eq!(handle.scheduler, "lsf");

    let calls = runner.calls();
    assert_eq!(calls.len(), 1);
    let (program, args) = &calls[0];
    assert_eq!(program, "bsub");
    assert_eq!(&args[..4], ["-J", "ma_sweep.ma_0.5.s0", "-q", "normal"]);
    assert!(args.contains(&"8192MB".to_string()));
    assert!(args.contains(&"rusage[mem=8192MB] span[hosts=1]".to_string()));
    assert_eq!(args.last(), Some(&request.command));
    assert!(request.command.contains("--random-seed 0"));
}

#[test]
fn slurm_submission_uses_parsable_mode() {
    let temp = tempfile::tempdir().expect("tmp dir");
    let mut request = first_request(temp.path());
    request.walltime = Some("04:00:00".to_string());
    let runner = Arc::new(ScriptedRunner::default().reply(0, "4242\n", ""));
    let scheduler = SlurmScheduler::with_runner(runner.clone());
    let handle = scheduler.submit(&request).expect("submit");
    assert_eq!(handle.id, "4242");

    let (program, args) = &runner.calls()[0];
    assert_eq!(program, "sbatch");
    assert_eq!(args[0], "--parsable");
    assert!(args.contains(&"--partition=normal".to_string()));
    assert!(args.contains(&"--mem=8192M".to_string()));
    assert!(args.contains(&"--time=04:00:00".to_string()));
    assert_eq!(args.last(), Some(&format!("--wrap={}", request.command)));
}

#[test]
fn rejected_and_unreachable_clients_are_submission_errors() {
    let temp = tempfile::tempdir().expect("tmp dir");
    let request = first_request(temp.path());
    let runner = Arc::new(
        ScriptedRunner::default()
            .reply(255, "", "Bad queue name. Job not submitted.")
            .unreachable()
            .reply(0, "nothing useful", ""),
    );
    let scheduler = LsfScheduler::with_runner(runner);

    let rejected = scheduler.submit(&request).expect_err("rejected");
    assert!(matches!(rejected, FibersError::Submission(_)));
    assert_eq!(rejected.code(), "bsub_rejected");
    assert_eq!(rejected.info().context.get("exit_code").map(String::as_str), Some("255"));

    let unreachable = scheduler.submit(&request).expect_err("unreachable");
    assert_eq!(unreachable.code(), "bsub_unreachable");

    let garbled = scheduler.submit(&request).expect_err("garbled");
    assert_eq!(garbled.code(), "bsub_reply");
}

#[test]
fn failing_status_and_cancel_commands_are_io_errors() {
    let handle = JobHandle {
        scheduler: "slurm".to_string(),
        id: "4242".to_string(),
    };
    let runner = Arc::new(
        ScriptedRunner::default()
            .reply(1, "", "slurm_load_jobs error: Invalid job id specified")
            .unreachable()
            .reply(1, "", "scancel: error: Kill job error on job id 4242"),
    );
    let scheduler = SlurmScheduler::with_runner(runner.clone());

    let status = scheduler.status(&handle).expect_err("status");
    assert!(matches!(status, FibersError::Io(_)));
    assert_eq!(status.code(), "squeue_rejected");

    let unreachable = scheduler.status(&handle).expect_err("unreachable");
    assert!(matches!(unreachable, FibersError::Io(_)));
    assert_eq!(unreachable.code(), "squeue_unreachable");

    let cancel = scheduler.cancel(&handle).expect_err("cancel");
    assert!(matches!(cancel, FibersError::Io(_)));
    assert_eq!(cancel.code(), "scancel_rejected");
    let programs: Vec<String> = runner.calls().into_iter().map(|(program, _)| program).collect();
    assert_eq!(programs, vec!["squeue", "squeue", "scancel"]);
}

#[test]
fn failed_submissions_are_recorded_without_stopping_the_sweep() {
    let temp = tempfile::tempdir().expect("tmp dir");
    let config = sweep_config(temp.path(), &["ma_0.5.csv"], 3);
    let manifest = SweepManifest::plan(&config).expect("plan");
    let scheduler = LsfScheduler::with_runner(Arc::new(PickyRunner {
        reject_suffix: ".s1",
        next_id: Mutex::new(100),
    }));

    let ledger = submit_sweep(
        &scheduler,
        &manifest,
        &SubmitOpts::default(),
        &NonEmptyFile,
        None,
    )
    .expect("submit");
    assert!(!ledger.all_submitted());
    assert_eq!(ledger.submitted.len(), 2);
    assert_eq!(ledger.failed.len(), 1);
    assert_eq!(ledger.failed[0].key, JobKey::new("ma_0.5", 1));
    assert!(matches!(ledger.failed[0].error, FibersError::Submission(_)));
    assert!(ledger.handle(&JobKey::new("ma_0.5", 0)).is_some());
    assert!(manifest.sweep_dir().join("logs").is_dir());

    let path = ledger.persist(&manifest.sweep_dir()).expect("persist");
    assert!(path.ends_with("submission.json"));
    let reloaded = SubmissionLedger::load(&manifest.sweep_dir())
        .expect("load")
        .expect("ledger present");
    assert_eq!(reloaded, ledger);
}

#[test]
fn resume_skips_complete_outputs_and_keeps_active_handles() {
    let temp = tempfile::tempdir().expect("tmp dir");
    let config = sweep_config(temp.path(), &["ma_0.5.csv"], 3);
    let manifest = SweepManifest::plan(&config).expect("plan");
    let first = LsfScheduler::with_runner(Arc::new(PickyRunner {
        reject_suffix: "never",
        next_id: Mutex::new(0),
    }));
    let previous = submit_sweep(&first, &manifest, &SubmitOpts::default(), &NonEmptyFile, None)
        .expect("first submission");

    let done = &manifest.jobs[0];
    std::fs::write(&done.output, common::result_row("ma_0.5", 0, 1.0)).expect("result");
    let running_id = previous
        .handle(&manifest.jobs[1].key)
        .expect("handle")
        .id
        .clone();

    // seed 1 is still running, seed 2 has exited
    let scheduler = LsfScheduler::with_runner(Arc::new(StatusRunner { running_id }));
    let opts = SubmitOpts {
        resume: true,
        concurrency: 1,
    };
    let ledger = submit_sweep(&scheduler, &manifest, &opts, &NonEmptyFile, Some(&previous))
        .expect("resume");
    assert_eq!(ledger.skipped, vec![JobKey::new("ma_0.5", 0)]);
    let reused: Vec<_> = ledger.submitted.iter().filter(|job| job.reused).collect();
    assert_eq!(reused.len(), 1);
    assert_eq!(reused[0].key, JobKey::new("ma_0.5", 1));
    let fresh: Vec<_> = ledger.submitted.iter().filter(|job| !job.reused).collect();
    assert_eq!(fresh.len(), 1);
    assert_eq!(fresh[0].key, JobKey::new("ma_0.5", 2));
    assert_eq!(fresh[0].handle.id, "900");
}

/// Reports `RUN` for one job id, `EXIT` for every other, and accepts submissions.
struct StatusRunner {
    running_id: String,
}

impl CommandRunner for StatusRunner {
    fn run(&self, program: &str, args: &[String]) -> io::Result<CommandOutput> {
        let stdout = match program {
            "bjobs" if args.last() == Some(&self.running_id) => "RUN\n",
            "bjobs" => "EXIT\n",
            _ => "Job <900> is submitted to queue <normal>.\n",
        };
        Ok(CommandOutput {
            code: Some(0),
            stdout: stdout.to_string(),
            stderr: String::new(),
        })
    }
}

#[test]
fn cancel_reports_only_failing_handles() {
    let temp = tempfile::tempdir().expect("tmp dir");
    let config = sweep_config(temp.path(), &["ma_0.5.csv"], 2);
    let manifest = SweepManifest::plan(&config).expect("plan");
    let submitter = LsfScheduler::with_runner(Arc::new(PickyRunner {
        reject_suffix: "never",
        next_id: Mutex::new(0),
    }));
    let ledger = submit_sweep(&submitter, &manifest, &SubmitOpts::default(), &NonEmptyFile, None)
        .expect("submit");

    let runner = Arc::new(
        ScriptedRunner::default()
            .reply(0, "Job <1> is being terminated\n", "")
            .reply(255, "", "Job has already finished"),
    );
    let canceller = LsfScheduler::with_runner(runner.clone());
    let failures = cancel_sweep(&canceller, &ledger);
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].1.code(), "bkill_rejected");
    assert!(matches!(failures[0].1, FibersError::Io(_)));
    assert!(runner.calls().iter().all(|(program, _)| program == "bkill"));
}
