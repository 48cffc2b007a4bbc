use std::error::Error;

use clap::Args;
use fibers_agg::SchemaSpec;
use fibers_exp::{submit_sweep, LocalScheduler, SubmissionLedger, SubmitOpts};
use tracing::info;

use super::backend::{remote, SchedulerArg};
use super::sweep::SweepArgs;

#[derive(Args, Debug)]
pub struct SubmitArgs {
    #[command(flatten)]
    pub sweep: SweepArgs,
    /// Batch scheduler receiving the jobs.
    #[arg(long, value_enum, default_value = "lsf")]
    pub scheduler: SchedulerArg,
    /// Skip jobs whose result is already well-formed.
    #[arg(long)]
    pub resume: bool,
    /// Submissions issued in parallel.
    #[arg(long, default_value_t = 4)]
    pub concurrency: usize,
}

pub fn run(args: &SubmitArgs) -> Result<(), Box<dyn Error>> {
    let manifest = args.sweep.manifest()?;
    manifest.persist()?;
    let sweep_dir = manifest.sweep_dir();
    let previous = if args.resume {
        SubmissionLedger::load(&sweep_dir)?
    } else {
        None
    };
    let opts = SubmitOpts {
        resume: args.resume,
        concurrency: args.concurrency.max(1),
    };
    let schema = SchemaSpec::from_columns(&manifest.config.schema);

    let ledger = match args.scheduler {
        SchedulerArg::Local => {
            let scheduler = LocalScheduler::new();
            let ledger = submit_sweep(&scheduler, &manifest, &opts, &schema, previous.as_ref())?;
            ledger.persist(&sweep_dir)?;
            info!(jobs = ledger.submitted.len(), "waiting for local jobs");
            scheduler.wait_all();
            ledger
        }
        SchedulerArg::Lsf | SchedulerArg::Slurm => {
            let scheduler = remote(args.scheduler.name()).ok_or("cluster backend unavailable")?;
            let ledger =
                submit_sweep(scheduler.as_ref(), &manifest, &opts, &schema, previous.as_ref())?;
            ledger.persist(&sweep_dir)?;
            ledger
        }
    };

    println!(
        "submitted {} skipped {} failed {} ({})",
        ledger.submitted.len(),
        ledger.skipped.len(),
        ledger.failed.len(),
        sweep_dir.display()
    );
    if !ledger.all_submitted() {
        for failure in &ledger.failed {
            eprintln!("{}: {}", failure.key, failure.error);
        }
        return Err(format!("{} submissions failed", ledger.failed.len()).into());
    }
    Ok(())
}
