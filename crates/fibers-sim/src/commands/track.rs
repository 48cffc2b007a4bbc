use std::error::Error;
use std::path::PathBuf;
use std::time::Duration;

use clap::Args;
use fibers_agg::SchemaSpec;
use fibers_exp::{poll, PollOpts, SchedulerProbe, SubmissionLedger, SweepManifest};

use super::backend::remote;

#[derive(Args, Debug)]
pub struct TrackArgs {
    /// Sweep directory written by `plan` or `submit`.
    #[arg(long)]
    pub sweep: PathBuf,
    /// Seconds to wait before giving up on missing results.
    #[arg(long, default_value_t = 6 * 60 * 60)]
    pub timeout: u64,
    /// Initial seconds between observations.
    #[arg(long, default_value_t = 5)]
    pub interval: u64,
    /// Upper bound on the seconds between observations.
    #[arg(long = "max-interval", default_value_t = 120)]
    pub max_interval: u64,
}

pub fn run(args: &TrackArgs) -> Result<(), Box<dyn Error>> {
    let manifest = SweepManifest::load(&args.sweep)?;
    let ledger = SubmissionLedger::load(&args.sweep)?;
    let backend = ledger.as_ref().and_then(|ledger| remote(&ledger.scheduler));
    let probe = match (&backend, &ledger) {
        (Some(scheduler), Some(ledger)) => Some(SchedulerProbe {
            scheduler: scheduler.as_ref(),
            ledger,
        }),
        _ => None,
    };
    let opts = PollOpts {
        initial_interval: Duration::from_secs(args.interval),
        max_interval: Duration::from_secs(args.max_interval.max(args.interval)),
        timeout: Duration::from_secs(args.timeout),
        ..PollOpts::default()
    };
    let schema = SchemaSpec::from_columns(&manifest.config.schema);
    let tracked = poll(&manifest.jobs, ledger.as_ref(), probe, &opts, &schema);
    let report = tracked.report;
    report.persist(&args.sweep)?;

    println!(
        "complete {} pending {} failed {} after {} polls{}",
        report.complete.len(),
        report.pending.len(),
        report.failed.len(),
        report.polls,
        if report.timed_out { " (timed out)" } else { "" }
    );
    for failed in &report.failed {
        println!("failed {}: {}", failed.key, failed.reason);
    }
    for key in &report.pending {
        println!("pending {key}");
    }
    Ok(())
}
