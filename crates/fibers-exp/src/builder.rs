use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};

use fibers_core::errors::{ErrorInfo, FibersError};
use globset::{Glob, GlobMatcher};
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::config::{DataSource, OutputLayout, SweepConfig};

/// Identifier of one dataset variant (the dataset file stem).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VariantId(String);

impl VariantId {
    /// Wraps a raw variant identifier.
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Derives the variant identifier from a dataset path or filename.
    ///
    /// A trailing `.gz` is stripped before the data extension, so
    /// `sim_a.csv.gz` and `sim_a.csv` both map to `sim_a`.
    pub fn from_dataset(path: &Path) -> Self {
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();
        let name = name.strip_suffix(".gz").unwrap_or(&name);
        let stem = match name.rfind('.') {
            Some(idx) if idx > 0 => &name[..idx],
            _ => name,
        };
        Self(stem.to_string())
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VariantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Key of one replicate: a dataset variant and a random seed.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct JobKey {
    /// Dataset variant the replicate runs on.
    pub variant: VariantId,
    /// Random seed of the replicate.
    pub seed: u64,
}

impl JobKey {
    /// Builds a key from its parts.
    pub fn new(variant: impl Into<String>, seed: u64) -> Self {
        Self {
            variant: VariantId::new(variant),
            seed,
        }
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/seed_{}", self.variant, self.seed)
    }
}

/// A dataset variant discovered in the sweep's data source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetVariant {
    /// Identifier derived from the file name.
    pub id: VariantId,
    /// Path of the dataset file.
    pub path: PathBuf,
}

/// One concrete unit of work: a replicate of the algorithm on one dataset with one seed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpec {
    /// Replicate key.
    pub key: JobKey,
    /// Scheduler-visible job name.
    pub job_name: String,
    /// Dataset the algorithm reads.
    pub dataset: PathBuf,
    /// Final result path; only ever created by an atomic rename.
    pub output: PathBuf,
    /// Path the algorithm writes to before the rename.
    pub staging: PathBuf,
    /// Scheduler stdout log.
    pub stdout: PathBuf,
    /// Scheduler stderr log.
    pub stderr: PathBuf,
}

/// Discovers the dataset variants provided by a data source.
///
/// A file source yields exactly one variant; a directory source yields every
/// direct child file matching the source pattern, sorted by path.
pub fn discover_variants(source: &DataSource) -> Result<Vec<DatasetVariant>, FibersError> {
    let root = &source.path;
    if !root.exists() {
        return Err(FibersError::Configuration(
            ErrorInfo::new("dataset_missing", "dataset source does not exist")
                .with_context("path", root.display().to_string()),
        ));
    }
    let mut files = Vec::new();
    if root.is_file() {
        files.push(root.clone());
    } else {
        let matcher = compile_pattern(&source.pattern)?;
        for entry in WalkDir::new(root).min_depth(1).max_depth(1).sort_by_file_name() {
            let entry = entry.map_err(|err| {
                FibersError::Io(
                    ErrorInfo::new("dataset_walk", err.to_string())
                        .with_context("path", root.display().to_string()),
                )
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            if matcher.is_match(entry.file_name()) {
                files.push(entry.into_path());
            }
        }
    }
    if files.is_empty() {
        return Err(FibersError::Configuration(
            ErrorInfo::new("no_datasets", "dataset source yields zero datasets")
                .with_context("path", root.display().to_string())
                .with_context("pattern", source.pattern.clone()),
        ));
    }

    let mut seen: BTreeMap<VariantId, PathBuf> = BTreeMap::new();
    let mut variants = Vec::with_capacity(files.len());
    for path in files {
        let id = VariantId::from_dataset(&path);
        if let Some(previous) = seen.insert(id.clone(), path.clone()) {
            return Err(FibersError::Configuration(
                ErrorInfo::new("variant_collision", "two datasets map to the same variant")
                    .with_context("variant", id.to_string())
                    .with_context("first", previous.display().to_string())
                    .with_context("second", path.display().to_string()),
            ));
        }
        variants.push(DatasetVariant { id, path });
    }
    Ok(variants)
}

fn compile_pattern(pattern: &str) -> Result<GlobMatcher, FibersError> {
    Glob::new(pattern)
        .map(|glob| glob.compile_matcher())
        .map_err(|err| {
            FibersError::Configuration(
                ErrorInfo::new("dataset_pattern", err.to_string())
                    .with_context("pattern", pattern.to_string()),
            )
        })
}

/// Expands a sweep configuration into its ordered job list.
///
/// Jobs are ordered by variant then seed, and there are exactly
/// `replicates × variants` of them. Every job path is absolute.
pub fn build_jobs(config: &SweepConfig) -> Result<Vec<JobSpec>, FibersError> {
    config.validate()?;
    let config = &config.absolutized()?;
    let variants = discover_variants(&config.data)?;
    let sweep_dir = config.sweep_dir();
    let mut jobs = Vec::with_capacity(variants.len() * config.replicates as usize);
    let mut outputs = BTreeSet::new();
    for variant in &variants {
        for seed in config.seeds() {
            let key = JobKey {
                variant: variant.id.clone(),
                seed,
            };
            let job = job_spec(config, &sweep_dir, variant, key);
            if !outputs.insert(job.output.clone()) {
                return Err(FibersError::Configuration(
                    ErrorInfo::new("output_collision", "two jobs resolve to the same output")
                        .with_context("output", job.output.display().to_string()),
                ));
            }
            jobs.push(job);
        }
    }
    Ok(jobs)
}

fn job_spec(config: &SweepConfig, sweep_dir: &Path, variant: &DatasetVariant, key: JobKey) -> JobSpec {
    let output = output_path(sweep_dir, config.layout, &key);
    let log_stem = format!("{}__seed_{}", key.variant, key.seed);
    let logs = sweep_dir.join("logs");
    JobSpec {
        job_name: format!("{}.{}.s{}", config.name, key.variant, key.seed),
        dataset: variant.path.clone(),
        staging: staging_path(&output),
        stdout: logs.join(format!("{log_stem}.out")),
        stderr: logs.join(format!("{log_stem}.err")),
        output,
        key,
    }
}

/// Result path for a replicate under the given layout.
pub fn output_path(sweep_dir: &Path, layout: OutputLayout, key: &JobKey) -> PathBuf {
    let results = sweep_dir.join("results");
    match layout {
        OutputLayout::PerVariant => results
            .join(key.variant.as_str())
            .join(format!("seed_{}.csv", key.seed)),
        OutputLayout::Flat => results.join(format!("{}__seed_{}.csv", key.variant, key.seed)),
    }
}

/// Staging path the algorithm writes to before the result is renamed into place.
pub fn staging_path(output: &Path) -> PathBuf {
    let mut staging = output.as_os_str().to_owned();
    staging.push(".partial");
    PathBuf::from(staging)
}
