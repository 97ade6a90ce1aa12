//! The shared store's value type.
//!
//! Trimmed of `Bytes` and opaque-`Json` variants (no use for them here: the
//! IR only ever needs JSON-shaped data) and built on `IndexMap` rather than
//! `HashMap` so namespace iteration order is stable for the registry's
//! byte-for-byte round-trip property.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WorkflowValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<WorkflowValue>),
    Map(IndexMap<String, WorkflowValue>),
}

impl Default for WorkflowValue {
    fn default() -> Self {
        WorkflowValue::Null
    }
}

impl WorkflowValue {
    pub fn map() -> Self {
        WorkflowValue::Map(IndexMap::new())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, WorkflowValue::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            WorkflowValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            WorkflowValue::Int(i) => Some(*i),
            WorkflowValue::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            WorkflowValue::Float(f) => Some(*f),
            WorkflowValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            WorkflowValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&Vec<WorkflowValue>> {
        match self {
            WorkflowValue::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_list_mut(&mut self) -> Option<&mut Vec<WorkflowValue>> {
        match self {
            WorkflowValue::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&IndexMap<String, WorkflowValue>> {
        match self {
            WorkflowValue::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_map_mut(&mut self) -> Option<&mut IndexMap<String, WorkflowValue>> {
        match self {
            WorkflowValue::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Truthiness of a namespace's `error` key, per §4.3/§4.2: only a
    /// *truthy* error key counts, not merely its presence.
    pub fn is_truthy(&self) -> bool {
        match self {
            WorkflowValue::Null => false,
            WorkflowValue::Bool(b) => *b,
            WorkflowValue::Int(i) => *i != 0,
            WorkflowValue::Float(f) => *f != 0.0,
            WorkflowValue::String(s) => !s.is_empty(),
            WorkflowValue::List(l) => !l.is_empty(),
            WorkflowValue::Map(m) => !m.is_empty(),
        }
    }

    /// A namespace write: non-map values are wrapped as `{"value": v}`, and
    /// an absent/null write becomes `{}` (§3.3, §4.1's namespace wrapper).
    pub fn into_namespace(self) -> WorkflowValue {
        match self {
            WorkflowValue::Null => WorkflowValue::map(),
            WorkflowValue::Map(m) => WorkflowValue::Map(m),
            other => {
                let mut m = IndexMap::new();
                m.insert("value".to_string(), other);
                WorkflowValue::Map(m)
            }
        }
    }

    pub fn to_display_string(&self) -> String {
        match self {
            WorkflowValue::Null => String::new(),
            WorkflowValue::Bool(b) => b.to_string(),
            WorkflowValue::Int(i) => i.to_string(),
            WorkflowValue::Float(f) => f.to_string(),
            WorkflowValue::String(s) => s.clone(),
            WorkflowValue::List(_) | WorkflowValue::Map(_) => {
                serde_json::to_string(self).unwrap_or_default()
            }
        }
    }
}

impl From<bool> for WorkflowValue {
    fn from(v: bool) -> Self {
        WorkflowValue::Bool(v)
    }
}

impl From<i64> for WorkflowValue {
    fn from(v: i64) -> Self {
        WorkflowValue::Int(v)
    }
}

impl From<f64> for WorkflowValue {
    fn from(v: f64) -> Self {
        WorkflowValue::Float(v)
    }
}

impl From<String> for WorkflowValue {
    fn from(v: String) -> Self {
        WorkflowValue::String(v)
    }
}

impl From<&str> for WorkflowValue {
    fn from(v: &str) -> Self {
        WorkflowValue::String(v.to_string())
    }
}

impl From<Vec<WorkflowValue>> for WorkflowValue {
    fn from(v: Vec<WorkflowValue>) -> Self {
        WorkflowValue::List(v)
    }
}

impl From<IndexMap<String, WorkflowValue>> for WorkflowValue {
    fn from(v: IndexMap<String, WorkflowValue>) -> Self {
        WorkflowValue::Map(v)
    }
}

impl From<serde_json::Value> for WorkflowValue {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => WorkflowValue::Null,
            serde_json::Value::Bool(b) => WorkflowValue::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    WorkflowValue::Int(i)
                } else {
                    WorkflowValue::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_json::Value::String(s) => WorkflowValue::String(s),
            serde_json::Value::Array(a) => {
                WorkflowValue::List(a.into_iter().map(WorkflowValue::from).collect())
            }
            serde_json::Value::Object(o) => WorkflowValue::Map(
                o.into_iter()
                    .map(|(k, v)| (k, WorkflowValue::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<WorkflowValue> for serde_json::Value {
    fn from(v: WorkflowValue) -> Self {
        match v {
            WorkflowValue::Null => serde_json::Value::Null,
            WorkflowValue::Bool(b) => serde_json::Value::Bool(b),
            WorkflowValue::Int(i) => serde_json::Value::Number(i.into()),
            WorkflowValue::Float(f) => serde_json::Number::from_f64(f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            WorkflowValue::String(s) => serde_json::Value::String(s),
            WorkflowValue::List(l) => {
                serde_json::Value::Array(l.into_iter().map(Into::into).collect())
            }
            WorkflowValue::Map(m) => serde_json::Value::Object(
                m.into_iter().map(|(k, v)| (k, v.into())).collect(),
            ),
        }
    }
}
