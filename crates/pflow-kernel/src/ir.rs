//! The workflow intermediate representation (§3.1).
//!
//! Produced by external parsers (the IR's authorable textual surface is out
//! of scope, §1); this module only defines the in-memory shape and the
//! structural invariants that are checkable without a registry.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::value::WorkflowValue;

pub const SUPPORTED_IR_VERSION: &str = "0.1.0";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowIr {
    pub ir_version: String,
    pub nodes: Vec<NodeSpec>,
    #[serde(default)]
    pub edges: Vec<EdgeSpec>,
    #[serde(default)]
    pub inputs: IndexMap<String, InputSpec>,
    #[serde(default)]
    pub outputs: IndexMap<String, OutputSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSpec {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default = "WorkflowValue::map")]
    pub params: WorkflowValue,
    #[serde(default)]
    pub batch: Option<BatchSpec>,
    #[serde(default)]
    pub purpose: Option<String>,
    /// Raw (pre-coercion) retry attempt count for this node's `exec` phase
    /// (§4.1). May arrive as a string from a human-authored IR; see
    /// `pflow_runtime::coerce`.
    #[serde(default)]
    pub max_retries: Option<WorkflowValue>,
    /// Raw (pre-coercion) seconds to sleep between `exec` attempts (§4.1).
    #[serde(default)]
    pub wait: Option<WorkflowValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeSpec {
    pub from: String,
    pub to: String,
    #[serde(default = "default_action")]
    pub action: String,
}

fn default_action() -> String {
    "default".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputSpec {
    #[serde(rename = "type", default)]
    pub input_type: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<WorkflowValue>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub stdin: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputSpec {
    pub source: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "type", default)]
    pub output_type: Option<String>,
}

/// `batch` field on a node (§3.4). Raw, pre-coercion values — a
/// human-authored IR may put booleans/integers here as strings; see
/// `pflow_runtime::wrappers::batch::BatchConfig::coerce` for the
/// string-coercion rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSpec {
    pub items: WorkflowValue,
    #[serde(default = "default_as")]
    pub r#as: String,
    #[serde(default)]
    pub parallel: WorkflowValue,
    #[serde(default)]
    pub max_concurrent: Option<WorkflowValue>,
    #[serde(default)]
    pub max_retries: Option<WorkflowValue>,
    #[serde(default)]
    pub retry_wait: Option<WorkflowValue>,
    #[serde(default)]
    pub error_handling: Option<String>,
}

fn default_as() -> String {
    "item".to_string()
}

fn is_valid_identifier(s: &str) -> bool {
    if s.is_empty() || s.starts_with('-') || s.ends_with('-') || s.contains("--") {
        return false;
    }
    s.chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
}

impl WorkflowIr {
    /// Structural validation: version, identifier shapes, unique ids, and
    /// edge-endpoint existence. Semantic validation (registry resolution,
    /// template resolvability) lives in `pflow_runtime::compiler`, which
    /// needs the registry this crate deliberately does not depend on.
    pub fn validate_structure(&self) -> Result<()> {
        if self.ir_version != SUPPORTED_IR_VERSION {
            return Err(Error::validation(
                "ir_version",
                format!(
                    "unsupported ir_version '{}', expected '{}'",
                    self.ir_version, SUPPORTED_IR_VERSION
                ),
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for (i, node) in self.nodes.iter().enumerate() {
            if !is_valid_identifier(&node.id) {
                return Err(Error::validation(
                    format!("nodes[{i}].id"),
                    format!("'{}' is not a valid identifier", node.id),
                ));
            }
            if !seen.insert(node.id.clone()) {
                return Err(Error::validation(
                    format!("nodes[{i}].id"),
                    format!("duplicate node id '{}'", node.id),
                ));
            }
        }

        for (name, _) in &self.inputs {
            if !is_valid_identifier(name) {
                return Err(Error::validation(
                    format!("inputs.{name}"),
                    format!("'{name}' is not a valid identifier"),
                ));
            }
        }

        for (i, edge) in self.edges.iter().enumerate() {
            if !seen.contains(&edge.from) {
                return Err(Error::validation(
                    format!("edges[{i}].from"),
                    format!("unknown node id '{}'", edge.from),
                ));
            }
            if !seen.contains(&edge.to) {
                return Err(Error::validation(
                    format!("edges[{i}].to"),
                    format!("unknown node id '{}'", edge.to),
                ));
            }
        }

        Ok(())
    }

    pub fn node_index(&self, id: &str) -> Option<usize> {
        self.nodes.iter().position(|n| n.id == id)
    }

    pub fn node(&self, id: &str) -> Option<&NodeSpec> {
        self.nodes.iter().find(|n| n.id == id)
    }
}
