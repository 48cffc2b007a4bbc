use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use fibers_core::errors::{io_error, ErrorInfo, FibersError};
use fibers_core::hash::stable_hash_string;
use fibers_core::serde::{from_yaml_slice, to_yaml_string};
use serde::{Deserialize, Serialize};

/// Layout describing how per-replicate result files are placed on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum OutputLayout {
    /// Each dataset variant owns a directory of `seed_<n>.csv` files.
    #[default]
    PerVariant,
    /// All results live in one directory as `<variant>__seed_<n>.csv`.
    Flat,
}

/// Where the synthetic datasets for a sweep come from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSource {
    /// A single dataset file or a directory of dataset variants.
    pub path: PathBuf,
    /// Glob applied to file names when `path` is a directory.
    #[serde(default = "DataSource::default_pattern")]
    pub pattern: String,
}

impl DataSource {
    /// Default file-name glob for dataset discovery.
    pub fn default_pattern() -> String {
        "*.{csv,tsv,txt,csv.gz,tsv.gz,txt.gz}".to_string()
    }

    /// Dataset source rooted at `path` with the default pattern.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            pattern: Self::default_pattern(),
        }
    }
}

/// Resources requested from the batch scheduler for every job in the sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRequest {
    /// Queue (LSF) or partition (Slurm) name.
    pub queue: String,
    /// CPU cores per job.
    #[serde(default = "ResourceRequest::default_cpus")]
    pub cpus: u32,
    /// Memory limit per job in megabytes.
    #[serde(default = "ResourceRequest::default_memory_mb")]
    pub memory_mb: u64,
    /// Optional wall-clock limit, passed through verbatim (`HH:MM`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub walltime: Option<String>,
}

impl ResourceRequest {
    const fn default_cpus() -> u32 {
        1
    }

    const fn default_memory_mb() -> u64 {
        4096
    }
}

/// Hyperparameters forwarded to the rule-discovery algorithm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlgorithmParams {
    /// Column holding the survival outcome (duration).
    pub outcome_label: String,
    /// Column holding the event/censoring indicator.
    pub censor_label: String,
    /// Minority-class abundance threshold in `[0, 1]`.
    pub minority_abundance: f64,
    /// Discretization parameter (e.g. number of bins).
    pub discretization: u32,
    /// Fitness function selector.
    #[serde(default = "AlgorithmParams::default_fitness")]
    pub fitness: String,
    /// Optional survival time cutoff.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_cutoff: Option<f64>,
    /// Optional class-label filter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_label: Option<String>,
    /// Additional `--key value` flags, emitted in key order.
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

impl AlgorithmParams {
    fn default_fitness() -> String {
        "log_rank".to_string()
    }
}

/// Column expectations for the result files produced by each replicate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultColumns {
    /// Column holding the replicate's random seed.
    #[serde(default = "ResultColumns::default_seed")]
    pub seed: String,
    /// Column holding the dataset filename the replicate ran on.
    #[serde(default = "ResultColumns::default_dataset")]
    pub dataset: String,
    /// Numeric target metrics that must be present.
    #[serde(default = "ResultColumns::default_metrics")]
    pub metrics: Vec<String>,
}

impl ResultColumns {
    fn default_seed() -> String {
        "random_seed".to_string()
    }

    fn default_dataset() -> String {
        "dataset_filename".to_string()
    }

    fn default_metrics() -> Vec<String> {
        vec!["adjusted_hr".to_string()]
    }
}

impl Default for ResultColumns {
    fn default() -> Self {
        Self {
            seed: Self::default_seed(),
            dataset: Self::default_dataset(),
            metrics: Self::default_metrics(),
        }
    }
}

/// Immutable description of one sweep: datasets, replicates, resources and parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepConfig {
    /// Output name; also the sweep directory under `output_root`.
    pub name: String,
    /// Dataset source for the sweep.
    pub data: DataSource,
    /// Root directory under which the sweep directory is created.
    #[serde(default = "SweepConfig::default_output_root")]
    pub output_root: PathBuf,
    /// Number of replicate seeds per dataset variant.
    pub replicates: u32,
    /// First seed; seeds run from `seed_start` to `seed_start + replicates - 1`.
    #[serde(default)]
    pub seed_start: u64,
    /// Scheduler resource request applied to every job.
    pub resources: ResourceRequest,
    /// Program argv prefix used to launch the algorithm.
    pub algorithm: Vec<String>,
    /// Algorithm hyperparameters.
    pub params: AlgorithmParams,
    /// Output file layout.
    #[serde(default)]
    pub layout: OutputLayout,
    /// Result-file column expectations.
    #[serde(default)]
    pub schema: ResultColumns,
}

impl SweepConfig {
    fn default_output_root() -> PathBuf {
        PathBuf::from("runs")
    }

    /// Seeds covered by the sweep, in ascending order.
    pub fn seeds(&self) -> impl Iterator<Item = u64> + '_ {
        (0..u64::from(self.replicates)).map(move |offset| self.seed_start + offset)
    }

    /// Directory holding every artefact of this sweep.
    pub fn sweep_dir(&self) -> PathBuf {
        self.output_root.join(&self.name)
    }

    /// Deterministic hash of the configuration contents.
    pub fn config_hash(&self) -> Result<String, FibersError> {
        stable_hash_string(self)
    }

    /// Produces a YAML representation of the configuration.
    pub fn to_yaml_string(&self) -> Result<String, FibersError> {
        to_yaml_string(self)
    }

    /// Copy of the configuration with dataset and output roots made absolute.
    ///
    /// Scheduler jobs run in the sweep directory, so every path they receive
    /// must be independent of the submitting process's working directory.
    pub fn absolutized(&self) -> Result<SweepConfig, FibersError> {
        let mut config = self.clone();
        if config.data.path.is_relative() || config.output_root.is_relative() {
            let cwd = std::env::current_dir()
                .map_err(|err| io_error("current_dir", Path::new("."), err))?;
            if config.data.path.is_relative() {
                config.data.path = cwd.join(&config.data.path);
            }
            if config.output_root.is_relative() {
                config.output_root = cwd.join(&config.output_root);
            }
        }
        Ok(config)
    }

    /// Rejects configurations that cannot describe a runnable sweep.
    pub fn validate(&self) -> Result<(), FibersError> {
        if self.replicates == 0 {
            return Err(invalid(
                ErrorInfo::new("replicates", "replicate count must be positive")
                    .with_context("replicates", self.replicates.to_string()),
            ));
        }
        if self.name.trim().is_empty() {
            return Err(invalid(ErrorInfo::new("name", "sweep name must not be empty")));
        }
        if self.name.contains(['/', '\\']) || self.name == "." || self.name == ".." {
            return Err(invalid(
                ErrorInfo::new("name", "sweep name must be a single path component")
                    .with_context("name", self.name.clone()),
            ));
        }
        if self.resources.queue.trim().is_empty() {
            return Err(invalid(ErrorInfo::new("queue", "scheduler queue must not be empty")));
        }
        if self.resources.cpus == 0 {
            return Err(invalid(ErrorInfo::new("cpus", "cpu request must be positive")));
        }
        if self.resources.memory_mb == 0 {
            return Err(invalid(ErrorInfo::new("memory", "memory request must be positive")));
        }
        if self
            .algorithm
            .first()
            .map_or(true, |program| program.trim().is_empty())
        {
            return Err(invalid(
                ErrorInfo::new("algorithm", "algorithm program must be provided")
                    .with_hint("set `algorithm: [python, run_fibers.py]` or similar"),
            ));
        }
        let abundance = self.params.minority_abundance;
        if !(0.0..=1.0).contains(&abundance) {
            return Err(invalid(
                ErrorInfo::new("minority_abundance", "minority abundance must lie in [0, 1]")
                    .with_context("value", abundance.to_string()),
            ));
        }
        if self.schema.metrics.is_empty() {
            return Err(invalid(ErrorInfo::new(
                "schema",
                "at least one target metric is required",
            )));
        }
        if self
            .seed_start
            .checked_add(u64::from(self.replicates))
            .is_none()
        {
            return Err(invalid(ErrorInfo::new("seed_start", "seed range overflows u64")));
        }
        Ok(())
    }
}

fn invalid(info: ErrorInfo) -> FibersError {
    FibersError::Configuration(info)
}

/// Loads and validates a sweep configuration from a YAML file.
///
/// Relative dataset and output paths are resolved against the file's directory.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<SweepConfig, FibersError> {
    let config_path = path.as_ref();
    let bytes = fs::read(config_path).map_err(|err| io_error("config_read", config_path, err))?;
    let mut config: SweepConfig = from_yaml_slice(&bytes).map_err(|err| match err {
        FibersError::Serde(info) => FibersError::Configuration(
            info.with_context("path", config_path.display().to_string()),
        ),
        other => other,
    })?;
    let base_dir = config_path.parent().unwrap_or_else(|| Path::new("."));
    if config.data.path.is_relative() {
        config.data.path = base_dir.join(&config.data.path);
    }
    if config.output_root.is_relative() {
        config.output_root = base_dir.join(&config.output_root);
    }
    config.validate()?;
    Ok(config)
}
