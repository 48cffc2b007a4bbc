use std::error::Error;

use clap::Args;
use tracing::info;

use super::sweep::SweepArgs;

#[derive(Args, Debug)]
pub struct PlanArgs {
    #[command(flatten)]
    pub sweep: SweepArgs,
}

pub fn run(args: &PlanArgs) -> Result<(), Box<dyn Error>> {
    let manifest = args.sweep.manifest()?;
    let path = manifest.persist()?;
    info!(sweep = %manifest.config.name, jobs = manifest.jobs.len(), "sweep planned");
    println!("{} jobs planned in {}", manifest.jobs.len(), path.display());
    Ok(())
}
