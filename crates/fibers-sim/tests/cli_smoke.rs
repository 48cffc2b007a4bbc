use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use fibers_exp::{SweepManifest, COMPLETION_FILE, MANIFEST_FILE};

fn fibers_sim(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_fibers-sim"))
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .expect("run fibers-sim")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

fn path(path: &Path) -> &str {
    path.to_str().expect("utf-8 path")
}

#[test]
fn plan_track_aggregate_compare() {
    let temp = tempfile::tempdir().expect("tmp dir");
    let data = temp.path().join("sim.csv");
    fs::write(&data, "Duration,Censoring\n1,1\n").expect("dataset");
    let root = temp.path().join("runs");

    let planned = fibers_sim(&[
        "plan",
        "--data",
        path(&data),
        "--name",
        "ma_0.5",
        "--output-root",
        path(&root),
        "--replicates",
        "2",
        "--queue",
        "normal",
        "--program",
        "python run_fibers.py",
        "--param",
        "minority_abundance=0.5",
    ]);
    assert!(planned.status.success(), "{}", String::from_utf8_lossy(&planned.stderr));
    assert!(stdout(&planned).starts_with("2 jobs planned"));

    let sweep = root.join("ma_0.5");
    assert!(sweep.join(MANIFEST_FILE).exists());
    let manifest = SweepManifest::load(&sweep).expect("manifest");
    assert_eq!(manifest.config.params.minority_abundance, 0.5);
    let first = &manifest.jobs[0].output;
    fs::create_dir_all(first.parent().expect("result dir")).expect("result dir");
    fs::write(
        first,
        "random_seed,dataset_filename,adjusted_hr\n0,sim.csv,1.25\n",
    )
    .expect("result");

    let tracked = fibers_sim(&[
        "track",
        "--sweep",
        path(&sweep),
        "--timeout",
        "0",
        "--interval",
        "0",
    ]);
    assert!(tracked.status.success());
    assert!(stdout(&tracked).starts_with("complete 1 pending 0 failed 1"));
    assert!(sweep.join(COMPLETION_FILE).exists());

    let aggregated = fibers_sim(&["aggregate", "--sweep", path(&sweep)]);
    assert!(aggregated.status.success());
    assert!(stdout(&aggregated).starts_with("1 of 2 replicates merged"));

    let out = temp.path().join("comparison");
    let summary = format!("ma_0.5={}", path(&sweep));
    let compared = fibers_sim(&[
        "compare",
        "--summary",
        &summary,
        "--metric",
        "adjusted_hr",
        "--out",
        path(&out),
    ]);
    assert!(compared.status.success());
    assert!(stdout(&compared).contains("ma_0.5/ma_0.5: n=1 mean=1.2500 sd=-"));
    assert!(out.join("comparison.csv").exists());
}

#[test]
fn plan_without_config_requires_core_flags() {
    let output = fibers_sim(&["plan", "--name", "x"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("missing_flag"));
}
