use std::collections::BTreeMap;
use std::path::PathBuf;

use clap::{Args, ValueEnum};
use fibers_core::errors::{ErrorInfo, FibersError};
use fibers_exp::{
    load_config, AlgorithmParams, DataSource, OutputLayout, ResourceRequest, ResultColumns,
    SweepConfig, SweepManifest,
};

/// Sweep definition given as a YAML file, as flags, or both (flags win).
#[derive(Args, Debug, Clone)]
pub struct SweepArgs {
    /// YAML sweep configuration.
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Dataset file or directory of dataset variants.
    #[arg(long)]
    pub data: Option<PathBuf>,
    /// File-name glob used when `--data` is a directory.
    #[arg(long)]
    pub pattern: Option<String>,
    /// Sweep name; also the sweep directory name.
    #[arg(long)]
    pub name: Option<String>,
    /// Root directory for sweep directories.
    #[arg(long = "output-root")]
    pub output_root: Option<PathBuf>,
    /// Replicate seeds per dataset variant.
    #[arg(long)]
    pub replicates: Option<u32>,
    /// First seed of the range.
    #[arg(long = "seed-start")]
    pub seed_start: Option<u64>,
    /// Scheduler queue or partition.
    #[arg(long)]
    pub queue: Option<String>,
    /// CPU cores per job.
    #[arg(long)]
    pub cpus: Option<u32>,
    /// Memory per job in megabytes.
    #[arg(long)]
    pub memory: Option<u64>,
    /// Wall-clock limit passed to the scheduler.
    #[arg(long)]
    pub walltime: Option<String>,
    /// Algorithm program and leading arguments, whitespace separated.
    #[arg(long)]
    pub program: Option<String>,
    /// Algorithm parameter as `key=value`; repeatable.
    #[arg(long = "param", value_name = "KEY=VALUE")]
    pub params: Vec<String>,
    /// Result file layout.
    #[arg(long, value_enum)]
    pub layout: Option<LayoutArg>,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum LayoutArg {
    PerVariant,
    Flat,
}

impl From<LayoutArg> for OutputLayout {
    fn from(value: LayoutArg) -> Self {
        match value {
            LayoutArg::PerVariant => OutputLayout::PerVariant,
            LayoutArg::Flat => OutputLayout::Flat,
        }
    }
}

impl SweepArgs {
    /// Resolves the configuration: the file if given, then every flag on top.
    pub fn resolve(&self) -> Result<SweepConfig, FibersError> {
        let mut config = match &self.config {
            Some(path) => load_config(path)?,
            None => self.flag_config()?,
        };
        if let Some(data) = &self.data {
            config.data.path = data.clone();
        }
        if let Some(pattern) = &self.pattern {
            config.data.pattern = pattern.clone();
        }
        if let Some(name) = &self.name {
            config.name = name.clone();
        }
        if let Some(root) = &self.output_root {
            config.output_root = root.clone();
        }
        if let Some(replicates) = self.replicates {
            config.replicates = replicates;
        }
        if let Some(seed_start) = self.seed_start {
            config.seed_start = seed_start;
        }
        if let Some(queue) = &self.queue {
            config.resources.queue = queue.clone();
        }
        if let Some(cpus) = self.cpus {
            config.resources.cpus = cpus;
        }
        if let Some(memory) = self.memory {
            config.resources.memory_mb = memory;
        }
        if let Some(walltime) = &self.walltime {
            config.resources.walltime = Some(walltime.clone());
        }
        if let Some(program) = &self.program {
            config.algorithm = program.split_whitespace().map(str::to_string).collect();
        }
        if let Some(layout) = self.layout {
            config.layout = layout.into();
        }
        for raw in &self.params {
            let (key, value) = split_pair(raw, "param")?;
            apply_param(&mut config.params, key, value)?;
        }
        config.validate()?;
        Ok(config)
    }

    fn flag_config(&self) -> Result<SweepConfig, FibersError> {
        let data = self.data.clone().ok_or_else(|| missing_flag("--data"))?;
        let name = self.name.clone().ok_or_else(|| missing_flag("--name"))?;
        let replicates = self.replicates.ok_or_else(|| missing_flag("--replicates"))?;
        let queue = self.queue.clone().ok_or_else(|| missing_flag("--queue"))?;
        if self.program.is_none() {
            return Err(missing_flag("--program"));
        }
        Ok(SweepConfig {
            name,
            data: DataSource::new(data),
            output_root: PathBuf::from("runs"),
            replicates,
            seed_start: 0,
            resources: ResourceRequest {
                queue,
                cpus: 1,
                memory_mb: 4096,
                walltime: None,
            },
            algorithm: Vec::new(),
            params: AlgorithmParams {
                outcome_label: "Duration".to_string(),
                censor_label: "Censoring".to_string(),
                minority_abundance: 0.0,
                discretization: 10,
                fitness: "log_rank".to_string(),
                time_cutoff: None,
                class_label: None,
                extra: BTreeMap::new(),
            },
            layout: OutputLayout::default(),
            schema: ResultColumns::default(),
        })
    }

    /// Resolves the configuration and derives its manifest.
    pub fn manifest(&self) -> Result<SweepManifest, FibersError> {
        SweepManifest::plan(&self.resolve()?)
    }
}

fn apply_param(params: &mut AlgorithmParams, key: &str, value: &str) -> Result<(), FibersError> {
    let bad_value = || {
        FibersError::Configuration(
            ErrorInfo::new("param_value", "parameter value has the wrong type")
                .with_context("param", key.to_string())
                .with_context("value", value.to_string()),
        )
    };
    match key {
        "outcome_label" => params.outcome_label = value.to_string(),
        "censor_label" => params.censor_label = value.to_string(),
        "minority_abundance" => {
            params.minority_abundance = value.parse().map_err(|_| bad_value())?;
        }
        "discretization" => params.discretization = value.parse().map_err(|_| bad_value())?,
        "fitness" => params.fitness = value.to_string(),
        "time_cutoff" => params.time_cutoff = Some(value.parse().map_err(|_| bad_value())?),
        "class_label" => params.class_label = Some(value.to_string()),
        _ => {
            params.extra.insert(key.to_string(), value.to_string());
        }
    }
    Ok(())
}

/// Splits a `key=value` flag value.
pub fn split_pair<'a>(raw: &'a str, flag: &str) -> Result<(&'a str, &'a str), FibersError> {
    raw.split_once('=')
        .filter(|(key, _)| !key.trim().is_empty())
        .map(|(key, value)| (key.trim(), value.trim()))
        .ok_or_else(|| {
            FibersError::Configuration(
                ErrorInfo::new("flag_pair", "expected KEY=VALUE")
                    .with_context("flag", flag.to_string())
                    .with_context("value", raw.to_string()),
            )
        })
}

fn missing_flag(flag: &str) -> FibersError {
    FibersError::Configuration(
        ErrorInfo::new("missing_flag", "flag is required without --config")
            .with_context("flag", flag.to_string()),
    )
}
