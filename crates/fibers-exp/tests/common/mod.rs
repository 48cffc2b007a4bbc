#![allow(dead_code)]

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use fibers_exp::{
    AlgorithmParams, DataSource, OutputLayout, ResourceRequest, ResultColumns, SweepConfig,
};

pub fn write_datasets(dir: &Path, names: &[&str]) {
    fs::create_dir_all(dir).expect("data dir");
    for name in names {
        fs::write(dir.join(name), "time,event,f1\n1.0,1,0\n").expect("dataset");
    }
}

pub fn sweep_config(root: &Path, datasets: &[&str], replicates: u32) -> SweepConfig {
    let data = root.join("data");
    write_datasets(&data, datasets);
    SweepConfig {
        name: "ma_sweep".to_string(),
        data: DataSource::new(data),
        output_root: root.join("runs"),
        replicates,
        seed_start: 0,
        resources: ResourceRequest {
            queue: "normal".to_string(),
            cpus: 2,
            memory_mb: 8192,
            walltime: None,
        },
        algorithm: vec!["python".to_string(), "run_fibers.py".to_string()],
        params: AlgorithmParams {
            outcome_label: "Duration".to_string(),
            censor_label: "Censoring".to_string(),
            minority_abundance: 0.1,
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

pub fn result_row(variant: &str, seed: u64, value: f64) -> String {
    format!("random_seed,dataset_filename,adjusted_hr\n{seed},{variant}.csv,{value}\n")
}
