//! Canonical JSON and YAML helpers for persisted sweep artefacts.

use std::collections::BTreeMap;
use std::fs;
use std::iter::FromIterator;
use std::path::Path;

use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};

use crate::errors::{io_error, ErrorInfo, FibersError};

fn serde_error(code: &str, err: impl ToString) -> FibersError {
    FibersError::Serde(ErrorInfo::new(code, err.to_string()))
}

fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let ordered = map
                .into_iter()
                .map(|(key, value)| (key, canonicalize(value)))
                .collect::<BTreeMap<_, _>>();
            Value::Object(Map::from_iter(ordered))
        }
        Value::Array(values) => {
            let canonical_values = values.into_iter().map(canonicalize).collect();
            Value::Array(canonical_values)
        }
        other => other,
    }
}

/// Serializes a value into canonical JSON bytes with deterministic key ordering.
pub fn to_canonical_json_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, FibersError> {
    let value = serde_json::to_value(value).map_err(|err| serde_error("json_serialize", err))?;
    let canonical = canonicalize(value);
    let mut bytes = Vec::new();
    serde_json::to_writer_pretty(&mut bytes, &canonical)
        .map_err(|err| serde_error("json_write", err))?;
    Ok(bytes)
}

/// Deserializes a value from JSON bytes.
pub fn from_json_slice<T: DeserializeOwned>(data: &[u8]) -> Result<T, FibersError> {
    serde_json::from_slice(data).map_err(|err| serde_error("json_deserialize", err))
}

/// Serializes a value into deterministic YAML.
pub fn to_yaml_string<T: Serialize>(value: &T) -> Result<String, FibersError> {
    serde_yaml::to_string(value).map_err(|err| serde_error("yaml_serialize", err))
}

/// Deserializes a YAML payload into the requested type.
pub fn from_yaml_slice<T: DeserializeOwned>(data: &[u8]) -> Result<T, FibersError> {
    serde_yaml::from_slice(data).map_err(|err| serde_error("yaml_deserialize", err))
}

/// Writes canonical JSON to `path`, creating parent directories as needed.
///
/// The payload lands in a sibling `.tmp` file first and is renamed into place,
/// so readers never observe a half-written artefact.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), FibersError> {
    let bytes = to_canonical_json_bytes(value)?;
    write_atomic(path, &bytes)
}

/// Reads and deserializes a JSON artefact from disk.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, FibersError> {
    let bytes = fs::read(path).map_err(|err| io_error("json_read", path, err))?;
    from_json_slice(&bytes).map_err(|err| match err {
        FibersError::Serde(info) => {
            FibersError::Serde(info.with_context("path", path.display().to_string()))
        }
        other => other,
    })
}

/// Writes `bytes` to `path` through a temporary sibling and a rename.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), FibersError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|err| io_error("create_dir", parent, err))?;
        }
    }
    let mut staging = path.as_os_str().to_owned();
    staging.push(".tmp");
    let staging = Path::new(&staging);
    fs::write(staging, bytes).map_err(|err| io_error("staging_write", staging, err))?;
    fs::rename(staging, path).map_err(|err| io_error("staging_rename", path, err))
}
