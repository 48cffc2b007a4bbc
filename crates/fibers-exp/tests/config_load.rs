use std::fs;

use fibers_core::FibersError;
use fibers_exp::{load_config, OutputLayout};

const SWEEP_YAML: &str = r#"
name: ma_sweep
data:
  path: data
replicates: 30
resources:
  queue: normal
algorithm: [python, run_fibers.py]
params:
  outcome_label: Duration
  censor_label: Censoring
  minority_abundance: 0.1
  discretization: 10
"#;

#[test]
fn relative_paths_resolve_against_the_config_file() {
    let temp = tempfile::tempdir().expect("tmp dir");
    let path = temp.path().join("sweep.yaml");
    fs::write(&path, SWEEP_YAML).expect("write config");
    let config = load_config(&path).expect("load");
    assert_eq!(config.data.path, temp.path().join("data"));
    assert_eq!(config.output_root, temp.path().join("runs"));
    assert_eq!(config.sweep_dir(), temp.path().join("runs").join("ma_sweep"));
}

#[test]
fn omitted_fields_take_their_defaults() {
    let temp = tempfile::tempdir().expect("tmp dir");
    let path = temp.path().join("sweep.yaml");
    fs::write(&path, SWEEP_YAML).expect("write config");
    let config = load_config(&path).expect("load");
    assert_eq!(config.seed_start, 0);
    assert_eq!(config.seeds().count(), 30);
    assert_eq!(config.resources.cpus, 1);
    assert_eq!(config.resources.memory_mb, 4096);
    assert_eq!(config.params.fitness, "log_rank");
    assert_eq!(config.layout, OutputLayout::PerVariant);
    assert_eq!(config.schema.seed, "random_seed");
    assert_eq!(config.schema.metrics, vec!["adjusted_hr".to_string()]);
}

#[test]
fn malformed_yaml_is_a_configuration_error() {
    let temp = tempfile::tempdir().expect("tmp dir");
    let path = temp.path().join("sweep.yaml");
    fs::write(&path, "name: [unterminated").expect("write config");
    let err = load_config(&path).expect_err("malformed");
    assert!(matches!(err, FibersError::Configuration(_)));
    assert!(err.info().context.contains_key("path"));
}

#[test]
fn out_of_range_parameters_are_rejected() {
    let temp = tempfile::tempdir().expect("tmp dir");
    let path = temp.path().join("sweep.yaml");
    fs::write(&path, SWEEP_YAML.replace("0.1", "1.5")).expect("write config");
    let err = load_config(&path).expect_err("abundance");
    assert_eq!(err.code(), "minority_abundance");

    fs::write(&path, SWEEP_YAML.replace("replicates: 30", "replicates: 0")).expect("write config");
    let err = load_config(&path).expect_err("replicates");
    assert_eq!(err.code(), "replicates");

    fs::write(&path, SWEEP_YAML.replace("name: ma_sweep", "name: a/b")).expect("write config");
    let err = load_config(&path).expect_err("name");
    assert_eq!(err.code(), "name");
}

#[test]
fn config_hash_tracks_content() {
    let temp = tempfile::tempdir().expect("tmp dir");
    let path = temp.path().join("sweep.yaml");
    fs::write(&path, SWEEP_YAML).expect("write config");
    let config = load_config(&path).expect("load");
    let again = load_config(&path).expect("load again");
    assert_eq!(config.config_hash().expect("hash"), again.config_hash().expect("hash"));

    let mut changed = config.clone();
    changed.replicates += 1;
    assert_ne!(config.config_hash().expect("hash"), changed.config_hash().expect("hash"));
}
