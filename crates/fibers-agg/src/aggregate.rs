use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use csv::{ReaderBuilder, WriterBuilder};
use fibers_core::errors::{ErrorInfo, FibersError};
use fibers_core::provenance::RunProvenance;
use fibers_core::serde::{read_json, write_atomic, write_json};
use fibers_exp::{CompletionReport, SweepManifest};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::result::{parse_result, ColumnIndex, ReplicateKey, ReplicateResult, ResultRow, SchemaSpec};

/// File name of the merged result table inside a sweep directory.
pub const SUMMARY_CSV: &str = "summary.csv";
/// File name of the summary metadata inside a sweep directory.
pub const SUMMARY_JSON: &str = "summary.json";

/// Merged result table of one sweep.
///
/// Rows are sorted by key and hold only completed replicates; keys that were
/// expected but never produced are listed in `missing` instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepSummary {
    /// Sweep name.
    pub name: String,
    /// Column schema used to key and validate rows.
    pub schema: SchemaSpec,
    /// Header shared by every merged result file.
    pub columns: Vec<String>,
    /// Merged rows, sorted by key.
    pub rows: Vec<ResultRow>,
    /// Keys the sweep was expected to produce, sorted.
    pub expected: Vec<ReplicateKey>,
    /// Expected keys without a row, sorted.
    pub missing: Vec<ReplicateKey>,
    /// Keys present in the results but absent from `expected`, sorted.
    #[serde(default)]
    pub unexpected: Vec<ReplicateKey>,
}

impl SweepSummary {
    /// Number of merged rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True when no replicate completed.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Position of `column` in the merged header.
    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|name| name == column)
    }

    /// The `Incomplete` error listing missing keys, if any expected key is absent.
    pub fn incomplete_error(&self) -> Option<FibersError> {
        if self.missing.is_empty() {
            return None;
        }
        let listed = self
            .missing
            .iter()
            .map(ReplicateKey::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        Some(FibersError::Incomplete(
            ErrorInfo::new("summary_partial", "summary is missing expected replicates")
                .with_context("sweep", self.name.clone())
                .with_context("rows", self.rows.len().to_string())
                .with_context("missing", listed)
                .with_hint("resubmit the sweep with --resume to rerun only the missing seeds"),
        ))
    }
}

/// Merges parsed results into a summary.
///
/// Every result must carry the same ordered header and no two rows may share
/// a key. The outcome does not depend on the order of `results`.
pub fn aggregate(
    name: &str,
    schema: &SchemaSpec,
    mut results: Vec<ReplicateResult>,
    expected: &[ReplicateKey],
) -> Result<SweepSummary, FibersError> {
    results.sort_by(|a, b| a.source.cmp(&b.source));

    let columns = match results.first() {
        Some(first) => first.header.clone(),
        None => schema.required_columns(),
    };
    if let Some(first) = results.first() {
        for result in &results[1..] {
            if result.header != columns {
                return Err(FibersError::Schema(
                    ErrorInfo::new("schema_mismatch", "result files disagree on their columns")
                        .with_context("reference", first.source.display().to_string())
                        .with_context("reference_header", columns.join(","))
                        .with_context("path", result.source.display().to_string())
                        .with_context("header", result.header.join(",")),
                ));
            }
        }
    }

    let mut merged: BTreeMap<ReplicateKey, (ResultRow, PathBuf)> = BTreeMap::new();
    for result in results {
        for row in result.rows {
            if let Some((_, first)) = merged.get(&row.key) {
                return Err(FibersError::DuplicateKey(
                    ErrorInfo::new("duplicate_replicate", "two result rows claim the same replicate")
                        .with_context("key", row.key.to_string())
                        .with_context("first", first.display().to_string())
                        .with_context("second", result.source.display().to_string()),
                ));
            }
            merged.insert(row.key.clone(), (row, result.source.clone()));
        }
    }

    let expected: BTreeSet<ReplicateKey> = expected.iter().cloned().collect();
    let missing = expected
        .iter()
        .filter(|key| !merged.contains_key(key))
        .cloned()
        .collect();
    let unexpected: Vec<ReplicateKey> = if expected.is_empty() {
        Vec::new()
    } else {
        merged
            .keys()
            .filter(|key| !expected.contains(key))
            .cloned()
            .collect()
    };
    if !unexpected.is_empty() {
        warn!(sweep = name, count = unexpected.len(), "result rows outside the planned replicates");
    }

    Ok(SweepSummary {
        name: name.to_string(),
        schema: schema.clone(),
        columns,
        rows: merged.into_values().map(|(row, _)| row).collect(),
        expected: expected.into_iter().collect(),
        missing,
        unexpected,
    })
}

/// Parses the completed outputs of a tracked sweep and merges them.
///
/// Only jobs listed as complete are read; pending and failed jobs end up in
/// the summary's `missing` list.
pub fn aggregate_sweep(
    manifest: &SweepManifest,
    completion: &CompletionReport,
) -> Result<SweepSummary, FibersError> {
    let schema = SchemaSpec::from_columns(&manifest.config.schema);
    let outputs = completion
        .complete
        .iter()
        .map(|key| {
            manifest.job(key).map(|job| job.output.clone()).ok_or_else(|| {
                FibersError::config("unknown_job", "completion report names a job outside the manifest")
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    let results = outputs
        .par_iter()
        .map(|path| parse_result(path, &schema))
        .collect::<Result<Vec<_>, _>>()?;
    let summary = aggregate(&manifest.config.name, &schema, results, &manifest.keys())?;
    info!(
        sweep = %summary.name,
        rows = summary.rows.len(),
        missing = summary.missing.len(),
        "sweep aggregated"
    );
    Ok(summary)
}

/// Metadata persisted next to the merged table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryMeta {
    /// Sweep name.
    pub name: String,
    /// Column schema used to key rows.
    pub schema: SchemaSpec,
    /// Merged header.
    pub columns: Vec<String>,
    /// Number of rows in the table.
    pub rows: usize,
    /// Planned keys.
    pub expected: Vec<ReplicateKey>,
    /// Planned keys without a row.
    pub missing: Vec<ReplicateKey>,
    /// Rows outside the plan.
    #[serde(default)]
    pub unexpected: Vec<ReplicateKey>,
    /// Provenance of the summary.
    pub provenance: RunProvenance,
}

/// Writes `summary.csv` and `summary.json` into `dir`.
pub fn write_summary(
    summary: &SweepSummary,
    dir: &Path,
    provenance: RunProvenance,
) -> Result<PathBuf, FibersError> {
    let mut writer = WriterBuilder::new().from_writer(Vec::new());
    writer
        .write_record(&summary.columns)
        .map_err(|err| wrap_csv("summary_write", err))?;
    for row in &summary.rows {
        writer
            .write_record(&row.cells)
            .map_err(|err| wrap_csv("summary_write", err))?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|err| wrap_csv("summary_flush", err.into_error().into()))?;
    let csv_path = dir.join(SUMMARY_CSV);
    write_atomic(&csv_path, &bytes)?;

    let meta = SummaryMeta {
        name: summary.name.clone(),
        schema: summary.schema.clone(),
        columns: summary.columns.clone(),
        rows: summary.rows.len(),
        expected: summary.expected.clone(),
        missing: summary.missing.clone(),
        unexpected: summary.unexpected.clone(),
        provenance,
    };
    write_json(&dir.join(SUMMARY_JSON), &meta)?;
    Ok(csv_path)
}

/// Reloads a summary written by [`write_summary`].
pub fn load_summary(dir: &Path) -> Result<SweepSummary, FibersError> {
    let meta: SummaryMeta = read_json(&dir.join(SUMMARY_JSON))?;
    let csv_path = dir.join(SUMMARY_CSV);
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .from_path(&csv_path)
        .map_err(|err| wrap_csv("summary_read", err))?;
    let header: Vec<String> = reader
        .headers()
        .map_err(|err| wrap_csv("summary_read", err))?
        .iter()
        .map(str::to_string)
        .collect();
    if header != meta.columns {
        return Err(FibersError::Schema(
            ErrorInfo::new("summary_header", "summary table disagrees with its metadata")
                .with_context("path", csv_path.display().to_string()),
        ));
    }
    let columns = ColumnIndex::resolve(&header, &meta.schema, &csv_path)?;
    let mut rows = Vec::with_capacity(meta.rows);
    for record in reader.records() {
        let record = record.map_err(|err| wrap_csv("summary_record", err))?;
        let line = record.position().map_or(0, |pos| pos.line());
        let cells = record.iter().map(str::to_string).collect();
        rows.push(columns.row(cells, &header, &csv_path, line)?);
    }
    if rows.len() != meta.rows {
        return Err(FibersError::Schema(
            ErrorInfo::new("summary_rows", "summary table row count disagrees with its metadata")
                .with_context("expected", meta.rows.to_string())
                .with_context("found", rows.len().to_string()),
        ));
    }
    Ok(SweepSummary {
        name: meta.name,
        schema: meta.schema,
        columns: meta.columns,
        rows,
        expected: meta.expected,
        missing: meta.missing,
        unexpected: meta.unexpected,
    })
}

fn wrap_csv(code: &str, err: csv::Error) -> FibersError {
    FibersError::Io(ErrorInfo::new(code, "summary table failure").with_hint(err.to_string()))
}
