//! Shared string-coercion rules for IR config fields that may arrive as
//! strings from a human-authored IR (§4.3's "Config coercion"). Used by both
//! the batch wrapper and the per-node retry config on the executor, so a
//! node's `max_retries`/`wait` and a batch's `max_retries`/`retry_wait`
//! follow one consistent parse-or-default-with-warning rule.

use pflow_kernel::value::WorkflowValue;
use tracing::warn;

pub fn coerce_bool(field: &str, raw: &WorkflowValue, default: bool) -> bool {
    match raw {
        WorkflowValue::Bool(b) => *b,
        WorkflowValue::Null => default,
        WorkflowValue::String(s) => match s.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => true,
            "false" | "0" | "no" | "" => false,
            other => {
                warn!(field, input = other, default, "invalid boolean config, using default");
                default
            }
        },
        WorkflowValue::Int(i) => *i != 0,
        other => {
            warn!(field, input = %other.to_display_string(), default, "invalid boolean config, using default");
            default
        }
    }
}

pub fn coerce_usize(field: &str, raw: Option<&WorkflowValue>, default: usize) -> usize {
    match raw {
        None | Some(WorkflowValue::Null) => default,
        Some(WorkflowValue::Int(i)) if *i > 0 => *i as usize,
        Some(WorkflowValue::Float(f)) if *f > 0.0 => *f as usize,
        Some(WorkflowValue::String(s)) => match s.trim().parse::<usize>() {
            Ok(v) if v > 0 => v,
            _ => {
                warn!(field, input = %s, default, "invalid integer config, using default");
                default
            }
        },
        Some(other) => {
            warn!(field, input = %other.to_display_string(), default, "invalid integer config, using default");
            default
        }
    }
}

pub fn coerce_f64(field: &str, raw: Option<&WorkflowValue>, default: f64) -> f64 {
    match raw {
        None | Some(WorkflowValue::Null) => default,
        Some(WorkflowValue::Int(i)) if *i >= 0 => *i as f64,
        Some(WorkflowValue::Float(f)) if *f >= 0.0 => *f,
        Some(WorkflowValue::String(s)) => match s.trim().parse::<f64>() {
            Ok(v) if v >= 0.0 => v,
            _ => {
                warn!(field, input = %s, default, "invalid numeric config, using default");
                default
            }
        },
        Some(other) => {
            warn!(field, input = %other.to_display_string(), default, "invalid numeric config, using default");
            default
        }
    }
}
