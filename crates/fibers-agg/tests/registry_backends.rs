mod common;

use fibers_agg::{
    aggregate, registry_append, registry_query, Query, Registry, RegistryEntry, SchemaSpec,
};
use fibers_core::RunProvenance;
use fibers_exp::JobKey;
use tempfile::tempdir;

use common::parsed;

fn entry(dir: &std::path::Path, name: &str, values: &[f64], planned: u64) -> RegistryEntry {
    let results = values
        .iter()
        .enumerate()
        .map(|(seed, value)| parsed(dir, "sim", seed as u64, *value))
        .collect();
    let expected: Vec<JobKey> = (0..planned).map(|seed| JobKey::new("sim", seed)).collect();
    let summary = aggregate(name, &SchemaSpec::default(), results, &expected).expect("aggregate");
    let provenance = RunProvenance {
        config_hash: format!("{name}-hash"),
        created_at: "2026-01-01T00:00:00+00:00".to_string(),
        ..RunProvenance::default()
    };
    RegistryEntry::from_summary(&summary, "adjusted_hr", &provenance).expect("entry")
}

fn exercise(registry: &Registry, dir: &std::path::Path) {
    let first = entry(&dir.join("a"), "ma_0.5", &[1.0, 3.0], 3);
    let second = entry(&dir.join("b"), "ma_0.1", &[], 2);
    registry_append(registry, &first).expect("append first");
    registry_append(registry, &second).expect("append second");

    let table = registry_query(registry, &Query::default()).expect("query");
    let sd = 2f64.sqrt().to_string();
    assert_eq!(table.columns.len(), 9);
    assert_eq!(table.rows.len(), 2);
    assert_eq!(
        table.rows[0],
        vec![
            "2026-01-01T00:00:00+00:00",
            "ma_0.5",
            "ma_0.5-hash",
            "3",
            "2",
            "1",
            "adjusted_hr",
            "2",
            sd.as_str(),
        ]
    );
    assert_eq!(table.rows[1][7], "");

    let filtered = registry_query(
        registry,
        &Query {
            sweep: Some("ma_0.1".to_string()),
            limit: None,
        },
    )
    .expect("filtered");
    assert_eq!(filtered.rows.len(), 1);
    assert_eq!(filtered.rows[0][1], "ma_0.1");

    let limited = registry_query(
        registry,
        &Query {
            sweep: None,
            limit: Some(1),
        },
    )
    .expect("limited");
    assert_eq!(limited.rows.len(), 1);
}

#[test]
fn csv_registry_appends_and_filters() {
    let dir = tempdir().expect("tmp dir");
    let registry = Registry::from_path(dir.path().join("registry").join("sweeps.csv"));
    assert!(matches!(registry, Registry::Csv(_)));
    exercise(&registry, dir.path());
}

#[test]
fn sqlite_registry_appends_and_filters() {
    let dir = tempdir().expect("tmp dir");
    let registry = Registry::from_path(dir.path().join("sweeps.sqlite"));
    assert!(matches!(registry, Registry::Sqlite(_)));
    exercise(&registry, dir.path());
}

#[test]
fn missing_registry_queries_as_empty() {
    let dir = tempdir().expect("tmp dir");
    let table = registry_query(&Registry::from_path(dir.path().join("none.db")), &Query::default())
        .expect("query");
    assert!(table.rows.is_empty());
}
