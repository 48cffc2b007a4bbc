use std::error::Error;

use clap::{Parser, Subcommand};
use commands::{
    aggregate::{self, AggregateArgs},
    cancel::{self, CancelArgs},
    compare::{self, CompareArgs},
    plan::{self, PlanArgs},
    submit::{self, SubmitArgs},
    track::{self, TrackArgs},
};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;

#[derive(Parser, Debug)]
#[command(name = "fibers-sim", about = "FIBERS replicate sweep orchestration CLI")]
struct Cli {
    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Expand a sweep configuration into its replicate jobs.
    Plan(PlanArgs),
    /// Plan a sweep and submit every job to a batch scheduler.
    Submit(SubmitArgs),
    /// Poll a submitted sweep until its jobs settle or the timeout passes.
    Track(TrackArgs),
    /// Cancel every job recorded for a sweep.
    Cancel(CancelArgs),
    /// Merge the completed replicate results of a sweep.
    Aggregate(AggregateArgs),
    /// Compare a metric across one or more aggregated sweeps.
    Compare(CompareArgs),
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    // RUST_LOG wins over --log-level.
    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| cli.log_level.clone());
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_filter)))
        .init();

    match cli.command {
        Command::Plan(args) => plan::run(&args),
        Command::Submit(args) => submit::run(&args),
        Command::Track(args) => track::run(&args),
        Command::Cancel(args) => cancel::run(&args),
        Command::Aggregate(args) => aggregate::run(&args),
        Command::Compare(args) => compare::run(&args),
    }
}
