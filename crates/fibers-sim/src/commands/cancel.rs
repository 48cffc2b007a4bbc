use std::error::Error;
use std::path::PathBuf;

use clap::Args;
use fibers_exp::{cancel_sweep, SubmissionLedger};

use super::backend::remote;

#[derive(Args, Debug)]
pub struct CancelArgs {
    /// Sweep directory holding `submission.json`.
    #[arg(long)]
    pub sweep: PathBuf,
}

pub fn run(args: &CancelArgs) -> Result<(), Box<dyn Error>> {
    let ledger = SubmissionLedger::load(&args.sweep)?
        .ok_or_else(|| format!("no submission ledger in {}", args.sweep.display()))?;
    let Some(scheduler) = remote(&ledger.scheduler) else {
        return Err(format!("jobs submitted via `{}` cannot be cancelled", ledger.scheduler).into());
    };
    let failures = cancel_sweep(scheduler.as_ref(), &ledger);
    println!(
        "cancelled {} of {} jobs",
        ledger.submitted.len() - failures.len(),
        ledger.submitted.len()
    );
    for (handle, err) in &failures {
        eprintln!("{handle}: {err}");
    }
    Ok(())
}
