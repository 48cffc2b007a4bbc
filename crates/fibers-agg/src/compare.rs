use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use csv::WriterBuilder;
use fibers_core::errors::{ErrorInfo, FibersError};
use fibers_core::serde::{write_atomic, write_json};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::aggregate::SweepSummary;
use crate::result::parse_metric;
use crate::stat::{describe, Describe};

/// File name of the comparison report.
pub const COMPARISON_JSON: &str = "comparison.json";
/// File name of the per-group statistics table.
pub const COMPARISON_CSV: &str = "comparison.csv";
/// File name of the long-format raw value table.
pub const COMPARISON_VALUES_CSV: &str = "comparison_values.csv";

/// A sweep summary together with the label it is reported under.
#[derive(Debug, Clone)]
pub struct LabeledSummary {
    /// Label of the sweep in the report (e.g. `ma_0.5`).
    pub label: String,
    /// Merged results of the sweep.
    pub summary: SweepSummary,
}

/// How rows are partitioned into groups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "by", rename_all = "kebab-case")]
pub enum Grouping {
    /// One group per sweep.
    Sweep,
    /// One group per seed within each sweep (`seed_<n>`).
    Seed,
    /// One group per variant prefix within each sweep: the variant up to its
    /// last `delimiter`, or the whole variant when the delimiter is absent.
    VariantPrefix {
        /// Separator between the prefix and the per-variant suffix.
        delimiter: String,
    },
}

impl Grouping {
    fn group_of(&self, label: &str, seed: u64, variant: &str) -> String {
        match self {
            Grouping::Sweep => label.to_string(),
            Grouping::Seed => format!("seed_{seed}"),
            Grouping::VariantPrefix { delimiter } => {
                if delimiter.is_empty() {
                    return variant.to_string();
                }
                variant
                    .rsplit_once(delimiter.as_str())
                    .map_or(variant, |(prefix, _)| prefix)
                    .to_string()
            }
        }
    }
}

/// Outcome for one group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum GroupOutcome {
    /// Statistics over the group's non-NaN values.
    Stats(Describe),
    /// The group has nothing to describe.
    NoData {
        /// The `EmptyGroup` error raised for the group, with its sweep, group
        /// and NaN count in the context.
        error: FibersError,
    },
}

/// Statistics and raw values of one group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupReport {
    /// Label of the sweep the group belongs to.
    pub sweep: String,
    /// Group name; equals `sweep` when grouping by sweep.
    pub group: String,
    /// Every metric value in summary key order, NaN included.
    ///
    /// NaN is stored as `null` in JSON.
    #[serde(with = "nan_as_null")]
    pub values: Vec<f64>,
    /// Number of NaN entries in `values`.
    pub nan_count: usize,
    /// Statistics or the reason there are none.
    pub outcome: GroupOutcome,
}

/// Comparison of one metric across groups of one or more sweeps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonReport {
    /// Metric column compared.
    pub metric: String,
    /// Grouping applied.
    pub grouping: Grouping,
    /// Groups ordered by sweep (input order) then group name.
    pub groups: Vec<GroupReport>,
}

impl ComparisonReport {
    /// Looks up a group by sweep label and group name.
    pub fn group(&self, sweep: &str, group: &str) -> Option<&GroupReport> {
        self.groups
            .iter()
            .find(|report| report.sweep == sweep && report.group == group)
    }
}

/// Compares `metric` across the groups of every summary.
///
/// `expected_groups` names groups that must appear for each sweep even when
/// no row falls into them; such groups, and groups whose values are all NaN,
/// are reported as `NoData`. Grouping by sweep ignores it since every summary
/// is its own group. A metric missing from a summary's columns is a
/// `Schema` error.
pub fn compare(
    summaries: &[LabeledSummary],
    metric: &str,
    grouping: &Grouping,
    expected_groups: &[String],
) -> Result<ComparisonReport, FibersError> {
    let mut groups = Vec::new();
    for labeled in summaries {
        let summary = &labeled.summary;
        let column = summary.column_index(metric).ok_or_else(|| {
            FibersError::Schema(
                ErrorInfo::new("metric_missing", "summary has no such metric column")
                    .with_context("metric", metric.to_string())
                    .with_context("sweep", labeled.label.clone())
                    .with_context("columns", summary.columns.join(",")),
            )
        })?;

        let mut buckets: BTreeMap<String, (Vec<f64>, usize)> = BTreeMap::new();
        if matches!(grouping, Grouping::Sweep) {
            buckets.entry(labeled.label.clone()).or_default();
        } else {
            for name in expected_groups {
                buckets.entry(name.clone()).or_default();
            }
        }
        for row in &summary.rows {
            let cell = &row.cells[column];
            let value = parse_metric(cell).ok_or_else(|| {
                FibersError::Schema(
                    ErrorInfo::new("metric_cell", "metric cell is not numeric")
                        .with_context("metric", metric.to_string())
                        .with_context("key", row.key.to_string())
                        .with_context("value", cell.clone()),
                )
            })?;
            let name = grouping.group_of(&labeled.label, row.key.seed, row.key.variant.as_str());
            let (values, nan_count) = buckets.entry(name).or_default();
            if value.is_nan() {
                *nan_count += 1;
            }
            values.push(value);
        }

        for (group, (values, nan_count)) in buckets {
            let finite: Vec<f64> = values
                .iter()
                .copied()
                .filter(|value| !value.is_nan())
                .collect();
            let outcome = match describe(&finite) {
                Ok(stats) => GroupOutcome::Stats(stats),
                Err(FibersError::EmptyGroup(info)) => {
                    let hint = if nan_count > 0 {
                        "every value is NaN"
                    } else {
                        "no completed replicates; track or resubmit the sweep"
                    };
                    let error = FibersError::EmptyGroup(
                        info.with_context("sweep", labeled.label.clone())
                            .with_context("group", group.clone())
                            .with_context("nan_count", nan_count.to_string())
                            .with_hint(hint),
                    );
                    debug!(sweep = %labeled.label, group = %group, %error, "group has no data");
                    GroupOutcome::NoData { error }
                }
                Err(other) => return Err(other),
            };
            groups.push(GroupReport {
                sweep: labeled.label.clone(),
                group,
                values,
                nan_count,
                outcome,
            });
        }
    }
    Ok(ComparisonReport {
        metric: metric.to_string(),
        grouping: grouping.clone(),
        groups,
    })
}

/// Writes `comparison.json`, `comparison.csv` and `comparison_values.csv` into `dir`.
pub fn write_comparison(report: &ComparisonReport, dir: &Path) -> Result<PathBuf, FibersError> {
    let json_path = dir.join(COMPARISON_JSON);
    write_json(&json_path, report)?;

    let mut stats = WriterBuilder::new().from_writer(Vec::new());
    stats
        .write_record([
            "sweep", "group", "metric", "count", "nan_count", "mean", "std_dev", "median", "min",
            "max", "note",
        ])
        .map_err(|err| wrap_csv("comparison_write", err))?;
    for group in &report.groups {
        let mut record = vec![
            group.sweep.clone(),
            group.group.clone(),
            report.metric.clone(),
        ];
        match &group.outcome {
            GroupOutcome::Stats(describe) => record.extend([
                describe.count.to_string(),
                group.nan_count.to_string(),
                describe.mean.to_string(),
                describe.std_dev.map(|sd| sd.to_string()).unwrap_or_default(),
                describe.median().to_string(),
                describe.min.to_string(),
                describe.max.to_string(),
                String::new(),
            ]),
            GroupOutcome::NoData { error } => record.extend([
                "0".to_string(),
                group.nan_count.to_string(),
                String::new(),
                String::new(),
                String::new(),
                String::new(),
                String::new(),
                no_data_note(error),
            ]),
        }
        stats
            .write_record(&record)
            .map_err(|err| wrap_csv("comparison_write", err))?;
    }
    write_atomic(&dir.join(COMPARISON_CSV), &finish(stats)?)?;

    let mut values = WriterBuilder::new().from_writer(Vec::new());
    values
        .write_record(["sweep", "group", "value"])
        .map_err(|err| wrap_csv("comparison_values", err))?;
    for group in &report.groups {
        for value in &group.values {
            let value = value.to_string();
            values
                .write_record([group.sweep.as_str(), group.group.as_str(), value.as_str()])
                .map_err(|err| wrap_csv("comparison_values", err))?;
        }
    }
    write_atomic(&dir.join(COMPARISON_VALUES_CSV), &finish(values)?)?;
    Ok(json_path)
}

fn no_data_note(error: &FibersError) -> String {
    let info = error.info();
    info.hint.clone().unwrap_or_else(|| info.message.clone())
}

mod nan_as_null {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(values: &[f64], serializer: S) -> Result<S::Ok, S::Error> {
        values
            .iter()
            .map(|value| (!value.is_nan()).then_some(*value))
            .collect::<Vec<_>>()
            .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<f64>, D::Error> {
        let values = Vec::<Option<f64>>::deserialize(deserializer)?;
        Ok(values
            .into_iter()
            .map(|value| value.unwrap_or(f64::NAN))
            .collect())
    }
}

fn finish(writer: csv::Writer<Vec<u8>>) -> Result<Vec<u8>, FibersError> {
    writer
        .into_inner()
        .map_err(|err| wrap_csv("comparison_flush", err.into_error().into()))
}

fn wrap_csv(code: &str, err: csv::Error) -> FibersError {
    FibersError::Io(ErrorInfo::new(code, "comparison table failure").with_hint(err.to_string()))
}
