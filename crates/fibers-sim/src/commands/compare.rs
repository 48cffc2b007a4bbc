use std::error::Error;
use std::path::{Path, PathBuf};

use clap::{Args, ValueEnum};
use fibers_agg::{compare, load_summary, write_comparison, GroupOutcome, Grouping, LabeledSummary};

use super::sweep::split_pair;

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum GroupBy {
    Sweep,
    Seed,
    VariantPrefix,
}

#[derive(Args, Debug)]
pub struct CompareArgs {
    /// Aggregated sweep as `label=dir`; repeatable, reported in the given order.
    #[arg(long = "summary", value_name = "LABEL=DIR", required = true)]
    pub summaries: Vec<String>,
    /// Metric column to compare.
    #[arg(long)]
    pub metric: String,
    /// How rows are grouped within each sweep.
    #[arg(long = "group-by", value_enum, default_value = "sweep")]
    pub group_by: GroupBy,
    /// Separator between variant prefix and suffix for `variant-prefix` grouping.
    #[arg(long, default_value = "_")]
    pub delimiter: String,
    /// Group that must be reported even when it has no rows; repeatable.
    #[arg(long = "expect-group", value_name = "GROUP")]
    pub expect_groups: Vec<String>,
    /// Output directory for the comparison artefacts.
    #[arg(long)]
    pub out: PathBuf,
}

pub fn run(args: &CompareArgs) -> Result<(), Box<dyn Error>> {
    let mut summaries = Vec::with_capacity(args.summaries.len());
    for raw in &args.summaries {
        let (label, dir) = split_pair(raw, "summary")?;
        summaries.push(LabeledSummary {
            label: label.to_string(),
            summary: load_summary(Path::new(dir))?,
        });
    }
    let grouping = match args.group_by {
        GroupBy::Sweep => Grouping::Sweep,
        GroupBy::Seed => Grouping::Seed,
        GroupBy::VariantPrefix => Grouping::VariantPrefix {
            delimiter: args.delimiter.clone(),
        },
    };
    let report = compare(&summaries, &args.metric, &grouping, &args.expect_groups)?;
    let path = write_comparison(&report, &args.out)?;

    for group in &report.groups {
        match &group.outcome {
            GroupOutcome::Stats(stats) => println!(
                "{}/{}: n={} mean={:.4} sd={} median={:.4}",
                group.sweep,
                group.group,
                stats.count,
                stats.mean,
                stats
                    .std_dev
                    .map_or_else(|| "-".to_string(), |sd| format!("{sd:.4}")),
                stats.median()
            ),
            GroupOutcome::NoData { error } => {
                println!("{}/{}: no data ({error})", group.sweep, group.group)
            }
        }
    }
    println!("comparison written to {}", path.display());
    Ok(())
}
