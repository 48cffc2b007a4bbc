#![deny(missing_docs)]
#![doc = "Result parsing, sweep aggregation and cross-sweep comparison for FIBERS replicates."]

/// Merging of per-replicate results into sweep summaries.
pub mod aggregate;
/// Cross-sweep grouping and comparison reports.
pub mod compare;
/// Append-only registry of aggregated sweeps.
pub mod registry;
/// Result-file schema and parsing.
pub mod result;
/// Descriptive statistics.
pub mod stat;

pub use aggregate::{
    aggregate, aggregate_sweep, load_summary, write_summary, SummaryMeta, SweepSummary,
    SUMMARY_CSV, SUMMARY_JSON,
};
pub use compare::{
    compare, write_comparison, ComparisonReport, GroupOutcome, GroupReport, Grouping,
    LabeledSummary, COMPARISON_CSV, COMPARISON_JSON, COMPARISON_VALUES_CSV,
};
pub use registry::{registry_append, registry_query, Query, Registry, RegistryEntry, Table};
pub use result::{parse_metric, parse_result, ReplicateKey, ReplicateResult, ResultRow, SchemaSpec};
pub use stat::{describe, percentile, Describe, Quantiles};
