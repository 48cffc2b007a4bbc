use std::fs;
use std::path::{Path, PathBuf};

use csv::ReaderBuilder;
use fibers_core::errors::{io_error, ErrorInfo, FibersError};
use fibers_exp::{JobKey, ResultColumns, ResultValidator, VariantId};
use serde::{Deserialize, Serialize};

/// Key of one result row: the dataset variant and the random seed.
pub type ReplicateKey = JobKey;

/// Columns every result file of a sweep must provide.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaSpec {
    /// Column holding the integer random seed.
    pub seed_column: String,
    /// Column holding the dataset filename.
    pub dataset_column: String,
    /// Numeric target metric columns.
    pub metrics: Vec<String>,
}

impl SchemaSpec {
    /// Schema matching the column expectations of a sweep configuration.
    pub fn from_columns(columns: &ResultColumns) -> Self {
        Self {
            seed_column: columns.seed.clone(),
            dataset_column: columns.dataset.clone(),
            metrics: columns.metrics.clone(),
        }
    }

    /// Every required column, key columns first.
    pub fn required_columns(&self) -> Vec<String> {
        let mut columns = vec![self.seed_column.clone(), self.dataset_column.clone()];
        columns.extend(self.metrics.iter().cloned());
        columns
    }
}

impl Default for SchemaSpec {
    fn default() -> Self {
        Self::from_columns(&ResultColumns::default())
    }
}

impl ResultValidator for SchemaSpec {
    type Output = ReplicateResult;

    fn validate(&self, path: &Path) -> Result<ReplicateResult, FibersError> {
        parse_result(path, self)
    }
}

/// One data row of a result file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultRow {
    /// Key derived from the seed and dataset cells.
    pub key: ReplicateKey,
    /// Raw cells in header order.
    pub cells: Vec<String>,
}

/// Parsed content of one well-formed result file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicateResult {
    /// File the result was read from.
    pub source: PathBuf,
    /// Header in file order.
    pub header: Vec<String>,
    /// Data rows in file order.
    pub rows: Vec<ResultRow>,
}

/// Column positions resolved against a concrete header.
#[derive(Debug, Clone)]
pub(crate) struct ColumnIndex {
    pub(crate) seed: usize,
    pub(crate) dataset: usize,
    pub(crate) metrics: Vec<usize>,
}

impl ColumnIndex {
    pub(crate) fn resolve(
        header: &[String],
        schema: &SchemaSpec,
        source: &Path,
    ) -> Result<Self, FibersError> {
        let find = |column: &str| {
            header.iter().position(|name| name == column).ok_or_else(|| {
                FibersError::Schema(
                    ErrorInfo::new("missing_column", "result file lacks a required column")
                        .with_context("column", column.to_string())
                        .with_context("path", source.display().to_string())
                        .with_context("header", header.join(",")),
                )
            })
        };
        Ok(Self {
            seed: find(&schema.seed_column)?,
            dataset: find(&schema.dataset_column)?,
            metrics: schema
                .metrics
                .iter()
                .map(|metric| find(metric))
                .collect::<Result<_, _>>()?,
        })
    }

    pub(crate) fn row(
        &self,
        cells: Vec<String>,
        header: &[String],
        source: &Path,
        line: u64,
    ) -> Result<ResultRow, FibersError> {
        let cell_error = |code: &str, message: &str, column: usize| {
            FibersError::Schema(
                ErrorInfo::new(code, message)
                    .with_context("path", source.display().to_string())
                    .with_context("line", line.to_string())
                    .with_context("column", header[column].clone())
                    .with_context("value", cells[column].clone()),
            )
        };
        let seed = cells[self.seed].trim().parse::<u64>().map_err(|_| {
            cell_error("seed_cell", "seed cell is not a non-negative integer", self.seed)
        })?;
        let dataset = cells[self.dataset].trim();
        if dataset.is_empty() {
            return Err(cell_error("dataset_cell", "dataset cell is empty", self.dataset));
        }
        for &column in &self.metrics {
            if parse_metric(&cells[column]).is_none() {
                return Err(cell_error(
                    "metric_cell",
                    "metric cell is neither a finite number nor NaN",
                    column,
                ));
            }
        }
        let variant = VariantId::from_dataset(Path::new(dataset));
        Ok(ResultRow {
            key: JobKey { variant, seed },
            cells,
        })
    }
}

/// Parses a metric cell, accepting finite numbers and NaN.
pub fn parse_metric(cell: &str) -> Option<f64> {
    let value = cell.trim().parse::<f64>().ok()?;
    (value.is_finite() || value.is_nan()).then_some(value)
}

/// Reads and validates one result file.
///
/// Fails with a `Schema` error when the file is empty, has ragged rows,
/// lacks a required column, has no data rows, or carries unparseable seed or
/// metric cells.
pub fn parse_result(path: &Path, schema: &SchemaSpec) -> Result<ReplicateResult, FibersError> {
    let bytes = fs::read(path).map_err(|err| io_error("result_read", path, err))?;
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Err(FibersError::Schema(
            ErrorInfo::new("empty_result", "result file is empty")
                .with_context("path", path.display().to_string()),
        ));
    }
    let csv_error = |err: csv::Error| {
        FibersError::Schema(
            ErrorInfo::new("result_csv", err.to_string())
                .with_context("path", path.display().to_string()),
        )
    };
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(false)
        .from_reader(bytes.as_slice());
    let header: Vec<String> = reader
        .headers()
        .map_err(csv_error)?
        .iter()
        .map(|name| name.trim().to_string())
        .collect();
    let columns = ColumnIndex::resolve(&header, schema, path)?;

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(csv_error)?;
        let line = record.position().map_or(0, |pos| pos.line());
        let cells = record.iter().map(str::to_string).collect();
        rows.push(columns.row(cells, &header, path, line)?);
    }
    if rows.is_empty() {
        return Err(FibersError::Schema(
            ErrorInfo::new("no_rows", "result file has a header but no data rows")
                .with_context("path", path.display().to_string()),
        ));
    }
    Ok(ReplicateResult {
        source: path.to_path_buf(),
        header,
        rows,
    })
}
