use std::path::{Path, PathBuf};

use fibers_core::errors::{io_error, ErrorInfo, FibersError};
use fibers_core::provenance::RunProvenance;
use fibers_core::serde::{read_json, write_atomic, write_json};
use serde::{Deserialize, Serialize};

use crate::builder::{build_jobs, JobKey, JobSpec};
use crate::config::SweepConfig;

/// File name of the persisted job list inside a sweep directory.
pub const MANIFEST_FILE: &str = "jobs.json";
/// File name of the configuration snapshot inside a sweep directory.
pub const CONFIG_FILE: &str = "sweep.yaml";

/// Persisted plan of a sweep: its configuration and the derived jobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepManifest {
    /// Configuration the jobs were derived from.
    pub config: SweepConfig,
    /// Jobs ordered by variant then seed.
    pub jobs: Vec<JobSpec>,
    /// Provenance of the plan.
    pub provenance: RunProvenance,
}

impl SweepManifest {
    /// Derives the manifest for `config` without touching the filesystem beyond discovery.
    pub fn plan(config: &SweepConfig) -> Result<Self, FibersError> {
        let config = config.absolutized()?;
        let jobs = build_jobs(&config)?;
        let provenance =
            RunProvenance::now(config.config_hash()?, "fibers-exp", env!("CARGO_PKG_VERSION"));
        Ok(Self {
            config,
            jobs,
            provenance,
        })
    }

    /// Directory holding the sweep's artefacts.
    pub fn sweep_dir(&self) -> PathBuf {
        self.config.sweep_dir()
    }

    /// Keys of every job in plan order.
    pub fn keys(&self) -> Vec<JobKey> {
        self.jobs.iter().map(|job| job.key.clone()).collect()
    }

    /// Looks up a job by key.
    pub fn job(&self, key: &JobKey) -> Option<&JobSpec> {
        self.jobs.iter().find(|job| &job.key == key)
    }

    /// Writes `jobs.json` and `sweep.yaml` into the sweep directory.
    ///
    /// An existing manifest from a different configuration is refused so that
    /// two sweeps never share result paths.
    pub fn persist(&self) -> Result<PathBuf, FibersError> {
        let dir = self.sweep_dir();
        let path = dir.join(MANIFEST_FILE);
        if path.exists() {
            let existing = SweepManifest::load(&dir)?;
            if existing.provenance.config_hash != self.provenance.config_hash {
                return Err(FibersError::Configuration(
                    ErrorInfo::new(
                        "sweep_dir_taken",
                        "sweep directory already holds a different configuration",
                    )
                    .with_context("dir", dir.display().to_string())
                    .with_hint("choose a new sweep name or remove the old directory"),
                ));
            }
        }
        write_json(&path, self)?;
        let yaml = self.config.to_yaml_string()?;
        write_atomic(&dir.join(CONFIG_FILE), yaml.as_bytes())?;
        Ok(path)
    }

    /// Loads the manifest stored in `sweep_dir`.
    pub fn load(sweep_dir: &Path) -> Result<Self, FibersError> {
        let path = sweep_dir.join(MANIFEST_FILE);
        if !path.exists() {
            return Err(io_error("manifest_missing", &path, "sweep manifest not found"));
        }
        read_json(&path)
    }
}
