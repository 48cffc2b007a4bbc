#![deny(missing_docs)]
#![doc = "Shared error taxonomy, canonical serde helpers and provenance records for FIBERS sweeps."]

/// Error taxonomy shared by every stage of the pipeline.
pub mod errors;
/// Canonical hashing helpers.
pub mod hash;
/// Provenance records for persisted artefacts.
pub mod provenance;
/// Canonical JSON and YAML serde helpers.
pub mod serde;

pub use errors::{io_error, ErrorInfo, FibersError};
pub use hash::stable_hash_string;
pub use provenance::RunProvenance;
pub use serde::{
    from_json_slice, from_yaml_slice, read_json, to_canonical_json_bytes, to_yaml_string,
    write_atomic, write_json,
};
