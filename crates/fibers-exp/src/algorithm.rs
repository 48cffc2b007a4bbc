use std::fs;
use std::path::PathBuf;
use std::process::Command;

use fibers_core::errors::{io_error, ErrorInfo, FibersError};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::builder::JobSpec;
use crate::config::SweepConfig;

/// Fully resolved command line for one replicate of the rule-discovery algorithm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invocation {
    /// Program and arguments, ready for `execvp`.
    pub argv: Vec<String>,
    /// Where the algorithm is told to write its result.
    pub staging: PathBuf,
    /// Where the result must end up once the run succeeds.
    pub output: PathBuf,
}

impl Invocation {
    /// Builds the invocation for `job` under `config`.
    pub fn for_job(config: &SweepConfig, job: &JobSpec) -> Self {
        let params = &config.params;
        let mut argv = config.algorithm.clone();
        push_flag(&mut argv, "dataset", job.dataset.display().to_string());
        push_flag(&mut argv, "outcome-label", params.outcome_label.clone());
        push_flag(&mut argv, "censor-label", params.censor_label.clone());
        push_flag(&mut argv, "minority-abundance", params.minority_abundance.to_string());
        push_flag(&mut argv, "discretization", params.discretization.to_string());
        push_flag(&mut argv, "fitness", params.fitness.clone());
        if let Some(cutoff) = params.time_cutoff {
            push_flag(&mut argv, "time-cutoff", cutoff.to_string());
        }
        if let Some(label) = &params.class_label {
            push_flag(&mut argv, "class-label", label.clone());
        }
        for (key, value) in &params.extra {
            push_flag(&mut argv, key, value.clone());
        }
        push_flag(&mut argv, "random-seed", job.key.seed.to_string());
        push_flag(&mut argv, "output", job.staging.display().to_string());
        Self {
            argv,
            staging: job.staging.clone(),
            output: job.output.clone(),
        }
    }

    /// Shell command that runs the algorithm and publishes its result atomically.
    ///
    /// The result only appears at [`Invocation::output`] after the algorithm
    /// exits successfully, via `mv` within the same directory.
    pub fn shell_command(&self) -> String {
        let run = self
            .argv
            .iter()
            .map(|arg| shell_quote(arg))
            .collect::<Vec<_>>()
            .join(" ");
        format!(
            "mkdir -p {dir} && {run} && mv -f {staging} {output}",
            dir = shell_quote(&parent_display(&self.output)),
            staging = shell_quote(&self.staging.display().to_string()),
            output = shell_quote(&self.output.display().to_string()),
        )
    }
}

fn push_flag(argv: &mut Vec<String>, name: &str, value: String) {
    argv.push(format!("--{name}"));
    argv.push(value);
}

fn parent_display(path: &std::path::Path) -> String {
    path.parent()
        .map(|parent| parent.display().to_string())
        .filter(|parent| !parent.is_empty())
        .unwrap_or_else(|| ".".to_string())
}

/// Quotes `arg` for POSIX `sh`, leaving plain words untouched.
pub fn shell_quote(arg: &str) -> String {
    let plain = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,+@%".contains(c));
    if plain {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

/// Capability that runs the rule-discovery algorithm for one invocation.
///
/// Implementations return the path of the published result file.
pub trait Algorithm: Send + Sync {
    /// Runs the invocation to completion.
    fn run(&self, invocation: &Invocation) -> Result<PathBuf, FibersError>;
}

/// Runs the algorithm as a child process and publishes its result by rename.
#[derive(Debug, Clone, Default)]
pub struct ProcessAlgorithm;

impl Algorithm for ProcessAlgorithm {
    fn run(&self, invocation: &Invocation) -> Result<PathBuf, FibersError> {
        let (program, args) = invocation.argv.split_first().ok_or_else(|| {
            FibersError::config("algorithm", "algorithm invocation has an empty argv")
        })?;
        if let Some(parent) = invocation.output.parent() {
            fs::create_dir_all(parent).map_err(|err| io_error("result_dir", parent, err))?;
        }
        debug!(program = %program, output = %invocation.output.display(), "running algorithm");
        let status = Command::new(program)
            .args(args)
            .status()
            .map_err(|err| {
                FibersError::Io(
                    ErrorInfo::new("algorithm_spawn", err.to_string())
                        .with_context("program", program.clone()),
                )
            })?;
        if !status.success() {
            let _ = fs::remove_file(&invocation.staging);
            return Err(FibersError::Io(
                ErrorInfo::new("algorithm_exit", format!("algorithm exited with {status}"))
                    .with_context("output", invocation.output.display().to_string()),
            ));
        }
        publish(invocation)
    }
}

/// Renames the staging file of a finished invocation onto its output path.
pub fn publish(invocation: &Invocation) -> Result<PathBuf, FibersError> {
    if !invocation.staging.exists() {
        return Err(FibersError::Io(
            ErrorInfo::new("algorithm_no_output", "algorithm did not write its staging file")
                .with_context("staging", invocation.staging.display().to_string()),
        ));
    }
    fs::rename(&invocation.staging, &invocation.output)
        .map_err(|err| io_error("result_publish", &invocation.output, err))?;
    Ok(invocation.output.clone())
}
