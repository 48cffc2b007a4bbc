use std::fs::{self, OpenOptions};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use csv::{ReaderBuilder, WriterBuilder};
use fibers_core::errors::{ErrorInfo, FibersError};
use fibers_core::provenance::RunProvenance;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

use crate::aggregate::SweepSummary;
use crate::result::parse_metric;
use crate::stat::describe;

/// Supported registry backends.
#[derive(Debug, Clone, PartialEq)]
pub enum Registry {
    /// Append-only CSV file.
    Csv(PathBuf),
    /// SQLite database with a `sweeps` table.
    Sqlite(PathBuf),
}

impl Registry {
    /// Picks the backend from the file extension (`.sqlite`/`.db` or CSV).
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("sqlite") | Some("db") => Registry::Sqlite(path),
            _ => Registry::Csv(path),
        }
    }
}

/// One aggregated sweep as recorded in the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryEntry {
    /// When the summary was produced.
    pub date: String,
    /// Sweep name.
    pub sweep: String,
    /// Hash of the sweep configuration.
    pub config_hash: String,
    /// Planned replicates.
    pub expected: usize,
    /// Merged rows.
    pub completed: usize,
    /// Planned replicates without a row.
    pub missing: usize,
    /// Metric the mean and spread refer to.
    pub metric: String,
    /// Mean of the metric, absent when no value is available.
    pub mean: Option<f64>,
    /// Sample standard deviation of the metric.
    pub std_dev: Option<f64>,
}

impl RegistryEntry {
    /// Summarizes `summary` for the registry.
    pub fn from_summary(
        summary: &SweepSummary,
        metric: &str,
        provenance: &RunProvenance,
    ) -> Result<Self, FibersError> {
        let column = summary.column_index(metric).ok_or_else(|| {
            FibersError::Schema(
                ErrorInfo::new("metric_missing", "summary has no such metric column")
                    .with_context("metric", metric.to_string())
                    .with_context("sweep", summary.name.clone()),
            )
        })?;
        let values: Vec<f64> = summary
            .rows
            .iter()
            .filter_map(|row| parse_metric(&row.cells[column]))
            .filter(|value| !value.is_nan())
            .collect();
        let (mean, std_dev) = match describe(&values) {
            Ok(stats) => (Some(stats.mean), stats.std_dev),
            Err(FibersError::EmptyGroup(_)) => (None, None),
            Err(other) => return Err(other),
        };
        Ok(Self {
            date: provenance.created_at.clone(),
            sweep: summary.name.clone(),
            config_hash: provenance.config_hash.clone(),
            expected: summary.expected.len(),
            completed: summary.rows.len(),
            missing: summary.missing.len(),
            metric: metric.to_string(),
            mean,
            std_dev,
        })
    }

    fn record(&self) -> Vec<String> {
        vec![
            self.date.clone(),
            self.sweep.clone(),
            self.config_hash.clone(),
            self.expected.to_string(),
            self.completed.to_string(),
            self.missing.to_string(),
            self.metric.clone(),
            optional(self.mean),
            optional(self.std_dev),
        ]
    }
}

fn optional(value: Option<f64>) -> String {
    value.map(|value| value.to_string()).unwrap_or_default()
}

/// Query descriptor for registry lookups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Query {
    /// Only rows of this sweep.
    #[serde(default)]
    pub sweep: Option<String>,
    /// Maximum number of rows.
    #[serde(default)]
    pub limit: Option<usize>,
}

/// Table representation returned from registry queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    /// Column names.
    pub columns: Vec<String>,
    /// Rows as strings, in column order.
    pub rows: Vec<Vec<String>>,
}

const COLUMNS: [&str; 9] = [
    "date",
    "sweep",
    "config_hash",
    "expected",
    "completed",
    "missing",
    "metric",
    "mean",
    "std_dev",
];

/// Appends `entry` to the registry backend.
pub fn registry_append(registry: &Registry, entry: &RegistryEntry) -> Result<(), FibersError> {
    match registry {
        Registry::Csv(path) => append_csv(path, entry),
        Registry::Sqlite(path) => append_sqlite(path, entry),
    }
}

/// Queries the registry, returning rows in insertion order.
pub fn registry_query(registry: &Registry, query: &Query) -> Result<Table, FibersError> {
    match registry {
        Registry::Csv(path) => query_csv(path, query),
        Registry::Sqlite(path) => query_sqlite(path, query),
    }
}

fn append_csv(path: &Path, entry: &RegistryEntry) -> Result<(), FibersError> {
    ensure_parent(path)?;
    let file_exists = path.exists();
    let file = OpenOptions::new()
        .append(true)
        .create(true)
        .open(path)
        .map_err(|err| {
            FibersError::Io(
                ErrorInfo::new("registry_open", "failed to open CSV registry")
                    .with_context("path", path.display().to_string())
                    .with_hint(err.to_string()),
            )
        })?;
    let mut writer = WriterBuilder::new()
        .has_headers(false)
        .from_writer(BufWriter::new(file));
    if !file_exists {
        writer
            .write_record(COLUMNS)
            .map_err(|err| wrap_csv("registry_write_header", err))?;
    }
    writer
        .write_record(entry.record())
        .map_err(|err| wrap_csv("registry_write_row", err))?;
    writer
        .flush()
        .map_err(|err| wrap_csv("registry_flush", err.into()))?;
    Ok(())
}

fn append_sqlite(path: &Path, entry: &RegistryEntry) -> Result<(), FibersError> {
    ensure_parent(path)?;
    let conn = open_sqlite(path)?;
    conn.execute_batch(
        r#"CREATE TABLE IF NOT EXISTS sweeps (
            date TEXT NOT NULL,
            sweep TEXT NOT NULL,
            config_hash TEXT NOT NULL,
            expected INTEGER NOT NULL,
            completed INTEGER NOT NULL,
            missing INTEGER NOT NULL,
            metric TEXT NOT NULL,
            mean REAL,
            std_dev REAL
        );"#,
    )
    .map_err(|err| sqlite_error("registry_sqlite_schema", "failed to ensure registry schema", err))?;
    conn.execute(
        r#"INSERT INTO sweeps (date, sweep, config_hash, expected, completed, missing, metric, mean, std_dev)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"#,
        params![
            &entry.date,
            &entry.sweep,
            &entry.config_hash,
            entry.expected as i64,
            entry.completed as i64,
            entry.missing as i64,
            &entry.metric,
            entry.mean,
            entry.std_dev,
        ],
    )
    .map_err(|err| sqlite_error("registry_sqlite_insert", "failed to append registry row", err))?;
    Ok(())
}

fn query_csv(path: &Path, query: &Query) -> Result<Table, FibersError> {
    if !path.exists() {
        return Ok(empty_table());
    }
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .map_err(|err| wrap_csv("registry_read", err))?;
    let mut rows = Vec::new();
    for result in reader.records() {
        let record = result.map_err(|err| wrap_csv("registry_record", err))?;
        if let Some(sweep) = &query.sweep {
            if record.get(1) != Some(sweep) {
                continue;
            }
        }
        rows.push(record.iter().map(str::to_string).collect::<Vec<_>>());
        if query.limit.map_or(false, |limit| rows.len() >= limit) {
            break;
        }
    }
    Ok(Table {
        columns: table_columns(),
        rows,
    })
}

fn query_sqlite(path: &Path, query: &Query) -> Result<Table, FibersError> {
    if !path.exists() {
        return Ok(empty_table());
    }
    let conn = open_sqlite(path)?;
    let mut sql = String::from(
        "SELECT date, sweep, config_hash, expected, completed, missing, metric, mean, std_dev \
         FROM sweeps",
    );
    if query.sweep.is_some() {
        sql.push_str(" WHERE sweep = ?1");
    }
    sql.push_str(" ORDER BY rowid");
    if let Some(limit) = query.limit {
        sql.push_str(&format!(" LIMIT {limit}"));
    }
    let mut stmt = conn
        .prepare(&sql)
        .map_err(|err| sqlite_error("registry_sqlite_prepare", "failed to prepare registry query", err))?;
    let mut rows_iter = match &query.sweep {
        Some(sweep) => stmt.query([sweep]),
        None => stmt.query([]),
    }
    .map_err(|err| sqlite_error("registry_sqlite_query", "failed to execute registry query", err))?;
    let mut rows = Vec::new();
    while let Some(row) = rows_iter
        .next()
        .map_err(|err| sqlite_error("registry_sqlite_row", "failed to fetch registry row", err))?
    {
        let text = |idx: usize| row.get::<_, String>(idx).map_err(column_error);
        let count = |idx: usize| {
            row.get::<_, i64>(idx)
                .map(|count| count.to_string())
                .map_err(column_error)
        };
        let real = |idx: usize| row.get::<_, Option<f64>>(idx).map(optional).map_err(column_error);
        rows.push(vec![
            text(0)?,
            text(1)?,
            text(2)?,
            count(3)?,
            count(4)?,
            count(5)?,
            text(6)?,
            real(7)?,
            real(8)?,
        ]);
    }
    Ok(Table {
        columns: table_columns(),
        rows,
    })
}

fn open_sqlite(path: &Path) -> Result<Connection, FibersError> {
    Connection::open(path).map_err(|err| {
        FibersError::Io(
            ErrorInfo::new("registry_sqlite_open", "failed to open sqlite registry")
                .with_context("path", path.display().to_string())
                .with_hint(err.to_string()),
        )
    })
}

fn column_error(err: rusqlite::Error) -> FibersError {
    sqlite_error("registry_sqlite_get", "failed to read column", err)
}

fn sqlite_error(code: &str, message: &str, err: rusqlite::Error) -> FibersError {
    FibersError::Io(ErrorInfo::new(code, message).with_hint(err.to_string()))
}

fn ensure_parent(path: &Path) -> Result<(), FibersError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|err| {
                FibersError::Io(
                    ErrorInfo::new("registry_create", "failed to create registry directory")
                        .with_context("path", parent.display().to_string())
                        .with_hint(err.to_string()),
                )
            })?;
        }
    }
    Ok(())
}

fn table_columns() -> Vec<String> {
    COLUMNS.iter().map(|column| column.to_string()).collect()
}

fn empty_table() -> Table {
    Table {
        columns: table_columns(),
        rows: Vec::new(),
    }
}

fn wrap_csv(code: &str, err: csv::Error) -> FibersError {
    FibersError::Io(ErrorInfo::new(code, "CSV registry failure").with_hint(err.to_string()))
}
