//! The core error taxonomy shared across all pflow crates.
//!
//! Each variant corresponds to one kind in the spec's error taxonomy
//! (validation / template / node execution / batch item / planner /
//! registry / security policy). Kinds, not Rust types — callers match on
//! the variant, not on a separate type per subsystem.

use std::path::PathBuf;
use thiserror::Error;

use crate::value::WorkflowValue;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// IR structural or semantic problem found before/during compilation.
    #[error("validation error at {location}: {reason}")]
    Validation { location: String, reason: String },

    /// Unresolved template variable or a type mismatch in nested lookup.
    #[error("template error at {path}: {reason}")]
    Template { path: String, reason: String },

    /// A node's `exec` raised past its retry budget and `exec_fallback`
    /// did not recover.
    #[error("node {node_id} execution failed: {source}")]
    NodeExecution {
        node_id: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A single batch item failed (recorded, not necessarily terminal).
    #[error("batch item {index} ({item:?}) failed: {reason}")]
    BatchItem {
        index: usize,
        item: WorkflowValue,
        reason: String,
    },

    /// An LLM call failed or returned a malformed structured response.
    #[error("planner node {node} failed: {reason}")]
    Planner { node: String, reason: String },

    /// Registry save failure. Load failures are never surfaced as errors
    /// (an empty registry plus a warning is returned instead).
    #[error("registry error: {reason}")]
    Registry { reason: String },

    /// A path fell outside an explicitly allow-listed directory.
    #[error("security policy refused path: {}", .0.display())]
    SecurityPolicy(PathBuf),
}

impl Error {
    pub fn validation(location: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            location: location.into(),
            reason: reason.into(),
        }
    }

    pub fn template(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Template {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn node_execution(
        node_id: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::NodeExecution {
            node_id: node_id.into(),
            source: Box::new(source),
        }
    }

    pub fn planner(node: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Planner {
            node: node.into(),
            reason: reason.into(),
        }
    }

    pub fn registry(reason: impl Into<String>) -> Self {
        Self::Registry {
            reason: reason.into(),
        }
    }

    /// Whether the executor should treat this as retryable `exec` failure.
    /// Every `exec` error is retryable in this core (§4.1); the distinction
    /// between terminal and retried lives in attempt-counting, not here.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::NodeExecution { .. } | Error::BatchItem { .. })
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Registry {
            reason: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Registry {
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_display() {
        let err = Error::validation("nodes[0].type", "unknown node type 'foo'");
        assert!(err.to_string().contains("nodes[0].type"));
        assert!(err.to_string().contains("unknown node type"));
    }

    #[test]
    fn template_error_display() {
        let err = Error::template("a.b.c", "missing key 'c'");
        assert_eq!(err.to_string(), "template error at a.b.c: missing key 'c'");
    }

    #[test]
    fn node_execution_wraps_source() {
        let io_err = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        let err = Error::node_execution("write-file", io_err);
        assert!(err.to_string().contains("write-file"));
        assert!(err.to_string().contains("disk full"));
    }
}
