mod common;

use fibers_agg::{
    aggregate, compare, describe, write_comparison, ComparisonReport, GroupOutcome, Grouping,
    LabeledSummary, SchemaSpec, SweepSummary, COMPARISON_CSV, COMPARISON_JSON,
    COMPARISON_VALUES_CSV,
};
use fibers_core::{read_json, FibersError};
use fibers_exp::JobKey;

use common::{assert_close, parsed};

fn sweep(dir: &std::path::Path, variants: &[&str], values: &[f64]) -> SweepSummary {
    let mut results = Vec::new();
    for variant in variants {
        for (seed, value) in values.iter().enumerate() {
            results.push(parsed(dir, variant, seed as u64, *value));
        }
    }
    aggregate("sweep", &SchemaSpec::default(), results, &[]).expect("aggregate")
}

fn stats(outcome: &GroupOutcome) -> &fibers_agg::Describe {
    match outcome {
        GroupOutcome::Stats(stats) => stats,
        GroupOutcome::NoData { error } => panic!("unexpected empty group: {error}"),
    }
}

#[test]
fn two_configurations_are_compared_independently() {
    let temp = tempfile::tempdir().expect("tmp dir");
    let high = [1.1, 0.9, 1.3, 0.7, 1.0];
    let low = [2.0, 2.5, 1.5, 3.0, 1.0];
    let summaries = vec![
        LabeledSummary {
            label: "ma_0.5".to_string(),
            summary: sweep(&temp.path().join("high"), &["sim"], &high),
        },
        LabeledSummary {
            label: "ma_0.1".to_string(),
            summary: sweep(&temp.path().join("low"), &["sim"], &low),
        },
    ];
    let report = compare(&summaries, "adjusted_hr", &Grouping::Sweep, &[]).expect("compare");
    assert_eq!(report.groups.len(), 2);
    assert_eq!(report.groups[0].sweep, "ma_0.5");
    assert_eq!(report.groups[1].sweep, "ma_0.1");

    let first = report.group("ma_0.5", "ma_0.5").expect("ma_0.5");
    assert_eq!(first.values, high.to_vec());
    assert_eq!(stats(&first.outcome).count, 5);
    assert_close(stats(&first.outcome).mean, 1.0);

    let second = report.group("ma_0.1", "ma_0.1").expect("ma_0.1");
    assert_eq!(second.values, low.to_vec());
    assert_close(stats(&second.outcome).mean, 2.0);
    assert_close(stats(&second.outcome).std_dev.expect("sd"), 0.625f64.sqrt());
    assert_close(stats(&second.outcome).median(), 2.0);
}

#[test]
fn empty_groups_report_no_data_instead_of_zero() {
    let err = describe(&[]).expect_err("empty");
    assert!(matches!(err, FibersError::EmptyGroup(_)));

    let temp = tempfile::tempdir().expect("tmp dir");
    let summaries = vec![
        LabeledSummary {
            label: "full".to_string(),
            summary: sweep(temp.path(), &["sim"], &[1.0, 2.0]),
        },
        LabeledSummary {
            label: "empty".to_string(),
            summary: aggregate(
                "empty",
                &SchemaSpec::default(),
                Vec::new(),
                &[JobKey::new("sim", 0)],
            )
            .expect("empty summary"),
        },
    ];
    let report = compare(&summaries, "adjusted_hr", &Grouping::Sweep, &[]).expect("compare");
    let empty = report.group("empty", "empty").expect("empty group");
    let GroupOutcome::NoData { error } = &empty.outcome else {
        panic!("expected no data for the empty sweep");
    };
    assert!(matches!(error, FibersError::EmptyGroup(_)));
    assert_eq!(error.code(), "empty_sample");
    assert_eq!(error.info().context.get("sweep").map(String::as_str), Some("empty"));
    assert_eq!(error.info().context.get("nan_count").map(String::as_str), Some("0"));
    assert!(empty.values.is_empty());
    assert_close(stats(&report.group("full", "full").expect("full").outcome).mean, 1.5);
}

#[test]
fn expected_seed_groups_without_rows_are_reported() {
    let temp = tempfile::tempdir().expect("tmp dir");
    let summary = sweep(temp.path(), &["imp_1", "imp_2"], &[0.5, 1.5]);
    let expected = vec!["seed_0".to_string(), "seed_1".to_string(), "seed_2".to_string()];
    let report = compare(
        &[LabeledSummary {
            label: "ma_0.5".to_string(),
            summary,
        }],
        "adjusted_hr",
        &Grouping::Seed,
        &expected,
    )
    .expect("compare");
    let names: Vec<&str> = report.groups.iter().map(|group| group.group.as_str()).collect();
    assert_eq!(names, vec!["seed_0", "seed_1", "seed_2"]);
    assert_eq!(report.groups[0].values, vec![0.5, 0.5]);
    assert_eq!(stats(&report.groups[1].outcome).count, 2);
    assert!(matches!(report.groups[2].outcome, GroupOutcome::NoData { .. }));
}

#[test]
fn variant_prefix_groups_pool_imputations() {
    let temp = tempfile::tempdir().expect("tmp dir");
    let summary = sweep(temp.path(), &["cohort_a_imp1", "cohort_a_imp2", "cohort_b"], &[1.0, 3.0]);
    let report = compare(
        &[LabeledSummary {
            label: "ma_0.5".to_string(),
            summary,
        }],
        "adjusted_hr",
        &Grouping::VariantPrefix {
            delimiter: "_imp".to_string(),
        },
        &[],
    )
    .expect("compare");
    let pooled = report.group("ma_0.5", "cohort_a").expect("cohort_a");
    assert_eq!(pooled.values.len(), 4);
    assert_close(stats(&pooled.outcome).mean, 2.0);
    let single = report.group("ma_0.5", "cohort_b").expect("cohort_b");
    assert_eq!(single.values, vec![1.0, 3.0]);
}

#[test]
fn nan_values_are_counted_but_not_described() {
    let temp = tempfile::tempdir().expect("tmp dir");
    let summary = sweep(temp.path(), &["sim"], &[f64::NAN, 2.0, f64::NAN]);
    let report = compare(
        &[LabeledSummary {
            label: "s".to_string(),
            summary,
        }],
        "adjusted_hr",
        &Grouping::Sweep,
        &[],
    )
    .expect("compare");
    let group = report.group("s", "s").expect("group");
    assert_eq!(group.nan_count, 2);
    assert_eq!(group.values.len(), 3);
    assert!(group.values[0].is_nan());
    assert_eq!(group.values[1], 2.0);
    assert!(group.values[2].is_nan());
    assert_eq!(stats(&group.outcome).count, 1);
    assert_eq!(stats(&group.outcome).std_dev, None);
}

#[test]
fn all_nan_group_keeps_its_values_and_the_empty_group_error() {
    let temp = tempfile::tempdir().expect("tmp dir");
    let summary = sweep(temp.path(), &["sim"], &[f64::NAN, f64::NAN]);
    let report = compare(
        &[LabeledSummary {
            label: "s".to_string(),
            summary,
        }],
        "adjusted_hr",
        &Grouping::Sweep,
        &[],
    )
    .expect("compare");
    let group = report.group("s", "s").expect("group");
    assert_eq!(group.values.len(), 2);
    assert!(group.values.iter().all(|value| value.is_nan()));
    let GroupOutcome::NoData { error } = &group.outcome else {
        panic!("expected no data for an all-NaN group");
    };
    assert!(matches!(error, FibersError::EmptyGroup(_)));
    assert_eq!(error.info().context.get("nan_count").map(String::as_str), Some("2"));
    assert_eq!(error.info().hint.as_deref(), Some("every value is NaN"));

    let out = temp.path().join("comparison");
    write_comparison(&report, &out).expect("write");
    let reloaded: ComparisonReport = read_json(&out.join(COMPARISON_JSON)).expect("json");
    assert_eq!(reloaded.groups[0].values.len(), 2);
    assert!(reloaded.groups[0].values.iter().all(|value| value.is_nan()));
    assert_eq!(reloaded.groups[0].outcome, group.outcome);

    let values = std::fs::read_to_string(out.join(COMPARISON_VALUES_CSV)).expect("values");
    assert_eq!(values.lines().filter(|line| line.ends_with(",NaN")).count(), 2);
}

#[test]
fn unknown_metric_is_a_schema_error() {
    let temp = tempfile::tempdir().expect("tmp dir");
    let summaries = vec![LabeledSummary {
        label: "s".to_string(),
        summary: sweep(temp.path(), &["sim"], &[1.0]),
    }];
    let err = compare(&summaries, "c_index", &Grouping::Sweep, &[]).expect_err("metric");
    assert!(matches!(err, FibersError::Schema(_)));
    assert_eq!(err.code(), "metric_missing");
}

#[test]
fn comparison_artefacts_are_written() {
    let temp = tempfile::tempdir().expect("tmp dir");
    let summaries = vec![
        LabeledSummary {
            label: "ma_0.5".to_string(),
            summary: sweep(&temp.path().join("a"), &["sim"], &[1.0, 2.0]),
        },
        LabeledSummary {
            label: "ma_0.1".to_string(),
            summary: aggregate("ma_0.1", &SchemaSpec::default(), Vec::new(), &[]).expect("empty"),
        },
    ];
    let report = compare(&summaries, "adjusted_hr", &Grouping::Sweep, &[]).expect("compare");
    let out = temp.path().join("comparison");
    write_comparison(&report, &out).expect("write");

    let reloaded: ComparisonReport = read_json(&out.join(COMPARISON_JSON)).expect("json");
    assert_eq!(reloaded.metric, "adjusted_hr");
    assert_eq!(reloaded.grouping, Grouping::Sweep);
    assert_eq!(reloaded.groups.len(), 2);
    assert_eq!(reloaded.groups[0].values, vec![1.0, 2.0]);
    assert_eq!(reloaded.groups[1].outcome, report.groups[1].outcome);

    let table = std::fs::read_to_string(out.join(COMPARISON_CSV)).expect("csv");
    let lines: Vec<&str> = table.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].starts_with("sweep,group,metric,count"));
    assert!(lines[1].starts_with("ma_0.5,ma_0.5,adjusted_hr,2,0,1.5,"));
    assert!(lines[2].contains("no completed replicates"));

    let values = std::fs::read_to_string(out.join(COMPARISON_VALUES_CSV)).expect("values");
    assert_eq!(values.lines().count(), 3);
}
