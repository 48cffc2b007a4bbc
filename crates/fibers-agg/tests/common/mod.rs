#![allow(dead_code)]

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use fibers_agg::{parse_result, ReplicateResult, SchemaSpec};
use fibers_exp::{
    AlgorithmParams, DataSource, OutputLayout, ResourceRequest, ResultColumns, SweepConfig,
};

pub const HEADER: &str = "random_seed,dataset_filename,adjusted_hr,rule_count";

pub fn sweep_config(root: &Path, name: &str, variants: &[&str], replicates: u32) -> SweepConfig {
    let data = root.join("data").join(name);
    fs::create_dir_all(&data).expect("data dir");
    for variant in variants {
        fs::write(data.join(format!("{variant}.csv")), "time,event\n1,1\n").expect("dataset");
    }
    SweepConfig {
        name: name.to_string(),
        data: DataSource::new(data),
        output_root: root.join("runs"),
        replicates,
        seed_start: 0,
        resources: ResourceRequest {
            queue: "normal".to_string(),
            cpus: 1,
            memory_mb: 2048,
            walltime: None,
        },
        algorithm: vec!["fibers".to_string()],
        params: AlgorithmParams {
            outcome_label: "Duration".to_string(),
            censor_label: "Censoring".to_string(),
            minority_abundance: 0.5,
            discretization: 10,
            fitness: "log_rank".to_string(),
            time_cutoff: None,
            class_label: None,
            extra: BTreeMap::new(),
        },
        layout: OutputLayout::PerVariant,
        schema: ResultColumns::default(),
    }
}

pub fn result_csv(variant: &str, seed: u64, hr: f64) -> String {
    format!("{HEADER}\n{seed},{variant}.csv,{hr},4\n")
}

pub fn write_result(path: &Path, variant: &str, seed: u64, hr: f64) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("result dir");
    }
    fs::write(path, result_csv(variant, seed, hr)).expect("result");
}

pub fn parsed(dir: &Path, variant: &str, seed: u64, hr: f64) -> ReplicateResult {
    let path: PathBuf = dir.join(format!("{variant}__seed_{seed}.csv"));
    write_result(&path, variant, seed, hr);
    parse_result(&path, &SchemaSpec::default()).expect("parse")
}

pub fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-9,
        "expected {expected}, got {actual}"
    );
}
