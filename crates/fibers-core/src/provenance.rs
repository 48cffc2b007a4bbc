//! Provenance descriptors attached to persisted sweep artefacts.

use std::collections::BTreeMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Provenance information attached to manifests, summaries and reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RunProvenance {
    /// Hash of the sweep configuration that produced the artefact.
    pub config_hash: String,
    /// ISO-8601 timestamp recording when the artefact was generated.
    pub created_at: String,
    /// Version map for the crates involved in producing the artefact.
    pub tool_versions: BTreeMap<String, String>,
}

impl RunProvenance {
    /// Stamps a provenance record for `config_hash` produced by `tool` at `version`.
    pub fn now(config_hash: impl Into<String>, tool: &str, version: &str) -> Self {
        let mut tool_versions = BTreeMap::new();
        tool_versions.insert(tool.to_string(), version.to_string());
        Self {
            config_hash: config_hash.into(),
            created_at: Utc::now().to_rfc3339(),
            tool_versions,
        }
    }
}
