//! Structured error types shared across the FIBERS sweep crates.

use std::collections::BTreeMap;
use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Structured payload attached to every [`FibersError`] variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Stable machine readable error code.
    pub code: String,
    /// Human readable diagnostic message.
    pub message: String,
    /// Contextual key value pairs (paths, seeds, job ids, etc.).
    #[serde(default)]
    pub context: BTreeMap<String, String>,
    /// Optional hint that may help the caller resolve the issue.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl ErrorInfo {
    /// Creates a new error payload with the provided code and message.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            context: BTreeMap::new(),
            hint: None,
        }
    }

    /// Adds a context entry to the payload.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Sets a human readable hint for remediation.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

/// Canonical error type for sweep orchestration and aggregation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(tag = "family", content = "detail")]
pub enum FibersError {
    /// Invalid sweep parameters or an empty dataset source.
    #[error("configuration error: {0}")]
    Configuration(ErrorInfo),
    /// The scheduler rejected a job or could not be reached.
    #[error("submission error: {0}")]
    Submission(ErrorInfo),
    /// The tracking deadline passed with jobs still pending.
    #[error("incomplete sweep: {0}")]
    Incomplete(ErrorInfo),
    /// A result file is missing required columns or disagrees with its siblings.
    #[error("schema error: {0}")]
    Schema(ErrorInfo),
    /// Two completed results claim the same seed and variant.
    #[error("duplicate key: {0}")]
    DuplicateKey(ErrorInfo),
    /// An aggregate was requested over zero data points.
    #[error("empty group: {0}")]
    EmptyGroup(ErrorInfo),
    /// Filesystem and process I/O failures.
    #[error("io error: {0}")]
    Io(ErrorInfo),
    /// Serialization failures for persisted artefacts.
    #[error("serde error: {0}")]
    Serde(ErrorInfo),
}

impl Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code: {})", self.message, self.code)?;
        if !self.context.is_empty() {
            write!(f, " | context: [")?;
            for (idx, (key, value)) in self.context.iter().enumerate() {
                if idx > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{key}={value}")?;
            }
            write!(f, "]")?;
        }
        if let Some(hint) = &self.hint {
            write!(f, " | hint: {hint}")?;
        }
        Ok(())
    }
}

impl FibersError {
    /// Returns a reference to the payload describing the error.
    pub fn info(&self) -> &ErrorInfo {
        match self {
            FibersError::Configuration(info)
            | FibersError::Submission(info)
            | FibersError::Incomplete(info)
            | FibersError::Schema(info)
            | FibersError::DuplicateKey(info)
            | FibersError::EmptyGroup(info)
            | FibersError::Io(info)
            | FibersError::Serde(info) => info,
        }
    }

    /// Stable machine readable code of the underlying payload.
    pub fn code(&self) -> &str {
        &self.info().code
    }

    /// Shorthand for a configuration error with the given code and message.
    pub fn config(code: &str, message: impl Into<String>) -> Self {
        FibersError::Configuration(ErrorInfo::new(code, message))
    }

    /// Shorthand for a schema error with the given code and message.
    pub fn schema(code: &str, message: impl Into<String>) -> Self {
        FibersError::Schema(ErrorInfo::new(code, message))
    }
}

/// Wraps an I/O failure on a path into an [`FibersError::Io`].
pub fn io_error(code: &str, path: &std::path::Path, err: impl ToString) -> FibersError {
    FibersError::Io(
        ErrorInfo::new(code, err.to_string()).with_context("path", path.display().to_string()),
    )
}
