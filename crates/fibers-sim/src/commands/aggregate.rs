use std::error::Error;
use std::path::PathBuf;

use clap::Args;
use fibers_agg::{
    aggregate_sweep, registry_append, write_summary, Registry, RegistryEntry, SchemaSpec,
};
use fibers_core::RunProvenance;
use fibers_exp::{snapshot, CompletionReport, SubmissionLedger, SweepManifest, COMPLETION_FILE};
use tracing::{info, warn};

#[derive(Args, Debug)]
pub struct AggregateArgs {
    /// Sweep directory to aggregate.
    #[arg(long)]
    pub sweep: PathBuf,
    /// Output directory for `summary.csv` and `summary.json`; defaults to the sweep directory.
    #[arg(long)]
    pub out: Option<PathBuf>,
    /// Registry file (`.csv`, `.sqlite` or `.db`) to append the sweep to.
    #[arg(long)]
    pub registry: Option<PathBuf>,
    /// Metric recorded in the registry; defaults to the first configured metric.
    #[arg(long)]
    pub metric: Option<String>,
}

pub fn run(args: &AggregateArgs) -> Result<(), Box<dyn Error>> {
    let manifest = SweepManifest::load(&args.sweep)?;
    let completion = if args.sweep.join(COMPLETION_FILE).exists() {
        CompletionReport::load(&args.sweep)?
    } else {
        info!(sweep = %args.sweep.display(), "no completion report, taking a snapshot");
        let ledger = SubmissionLedger::load(&args.sweep)?;
        let schema = SchemaSpec::from_columns(&manifest.config.schema);
        snapshot(&manifest.jobs, ledger.as_ref(), &schema).report
    };

    let summary = aggregate_sweep(&manifest, &completion)?;
    let provenance = RunProvenance::now(
        manifest.provenance.config_hash.clone(),
        "fibers-sim",
        env!("CARGO_PKG_VERSION"),
    );
    let out = args.out.clone().unwrap_or_else(|| args.sweep.clone());
    let csv_path = write_summary(&summary, &out, provenance.clone())?;
    println!(
        "{} of {} replicates merged into {}",
        summary.len(),
        summary.expected.len(),
        csv_path.display()
    );
    if let Some(err) = summary.incomplete_error() {
        warn!(missing = summary.missing.len(), "summary is partial");
        eprintln!("{err}");
    }

    if let Some(path) = &args.registry {
        let metric = match &args.metric {
            Some(metric) => metric.clone(),
            None => summary
                .schema
                .metrics
                .first()
                .cloned()
                .ok_or("sweep has no configured metric")?,
        };
        let registry = Registry::from_path(path);
        registry_append(&registry, &RegistryEntry::from_summary(&summary, &metric, &provenance)?)?;
        println!("registered {} in {}", summary.name, path.display());
    }
    Ok(())
}
