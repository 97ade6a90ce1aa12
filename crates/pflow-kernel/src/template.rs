//! The `${a.b[i].c}` template resolver (C1).
//!
//! Pure and stateless: every function here takes the store snapshot it
//! needs to resolve against as a plain argument and does no I/O, following
//! a pattern of small pure-function modules rather than a struct with
//! internal state.

use std::collections::HashSet;

use indexmap::IndexMap;

use crate::error::{Error, Result};
use crate::value::WorkflowValue;

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Key(String),
    Index(usize),
}

fn parse_path(path: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    for dotted in path.split('.') {
        let mut rest = dotted;
        // Split off any number of trailing `[n]` index suffixes.
        let mut indices = Vec::new();
        while let Some(open) = rest.rfind('[') {
            if let Some(close) = rest[open..].find(']') {
                let idx_str = &rest[open + 1..open + close];
                if let Ok(idx) = idx_str.parse::<usize>() {
                    indices.push(idx);
                    rest = &rest[..open];
                    continue;
                }
            }
            break;
        }
        if !rest.is_empty() {
            segments.push(Segment::Key(rest.to_string()));
        }
        indices.reverse();
        for idx in indices {
            segments.push(Segment::Index(idx));
        }
    }
    segments
}

/// Finds every `${...}` occurrence in `s` and returns the raw path inside
/// the braces. An unclosed `${` is a parse error.
pub fn extract_variables(s: &str) -> Result<HashSet<String>> {
    let mut vars = HashSet::new();
    let mut rest = s;
    while let Some(open) = rest.find("${") {
        let after_open = &rest[open + 2..];
        match after_open.find('}') {
            Some(rel_end) => {
                vars.insert(after_open[..rel_end].to_string());
                rest = &after_open[rel_end + 1..];
            }
            None => {
                return Err(Error::template(
                    &rest[open..],
                    "unclosed '${' template expression",
                ));
            }
        }
    }
    Ok(vars)
}

/// Walks `path`'s dot segments and `[i]` indices through `shared`, returning
/// the typed value found. Missing keys/indices raise a `Template` error
/// naming the path.
pub fn resolve_value(path: &str, shared: &IndexMap<String, WorkflowValue>) -> Result<WorkflowValue> {
    let segments = parse_path(path);
    let Some(first) = segments.first() else {
        return Err(Error::template(path, "empty template path"));
    };
    let Segment::Key(root_key) = first else {
        return Err(Error::template(path, "path must start with a name"));
    };
    let mut current = shared
        .get(root_key)
        .cloned()
        .ok_or_else(|| Error::template(path, format!("unknown variable '{root_key}'")))?;

    for segment in &segments[1..] {
        current = match segment {
            Segment::Key(key) => match &current {
                WorkflowValue::Map(m) => m.get(key).cloned().ok_or_else(|| {
                    Error::template(path, format!("missing key '{key}'"))
                })?,
                other => {
                    return Err(Error::template(
                        path,
                        format!("cannot index key '{key}' into non-map value {other:?}"),
                    ));
                }
            },
            Segment::Index(idx) => match &current {
                WorkflowValue::List(l) => l.get(*idx).cloned().ok_or_else(|| {
                    Error::template(path, format!("index {idx} out of bounds"))
                })?,
                other => {
                    return Err(Error::template(
                        path,
                        format!("cannot index [{idx}] into non-list value {other:?}"),
                    ));
                }
            },
        };
    }
    Ok(current)
}

/// Substitutes every `${...}` occurrence in `s`, coercing each resolved
/// value to a string.
pub fn resolve_string(s: &str, shared: &IndexMap<String, WorkflowValue>) -> Result<String> {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(open) = rest.find("${") {
        out.push_str(&rest[..open]);
        let after_open = &rest[open + 2..];
        match after_open.find('}') {
            Some(rel_end) => {
                let path = &after_open[..rel_end];
                let value = resolve_value(path, shared)?;
                out.push_str(&value.to_display_string());
                rest = &after_open[rel_end + 1..];
            }
            None => {
                return Err(Error::template(
                    &rest[open..],
                    "unclosed '${' template expression",
                ));
            }
        }
    }
    out.push_str(rest);
    Ok(out)
}

fn is_whole_template(s: &str) -> Option<&str> {
    let s = s.trim();
    if s.starts_with("${") && s.ends_with('}') && s.matches("${").count() == 1 {
        Some(&s[2..s.len() - 1])
    } else {
        None
    }
}

/// Walks `value`; a string that is exactly one `${path}` returns the typed
/// resolved value, preserving its type. Strings with embedded templates (or
/// no templates at all) resolve in place. Maps and lists recurse,
/// preserving structure.
pub fn resolve_nested(
    value: &WorkflowValue,
    shared: &IndexMap<String, WorkflowValue>,
) -> Result<WorkflowValue> {
    match value {
        WorkflowValue::String(s) => {
            if let Some(path) = is_whole_template(s) {
                resolve_value(path, shared)
            } else if s.contains("${") {
                Ok(WorkflowValue::String(resolve_string(s, shared)?))
            } else {
                Ok(value.clone())
            }
        }
        WorkflowValue::List(items) => {
            let resolved = items
                .iter()
                .map(|v| resolve_nested(v, shared))
                .collect::<Result<Vec<_>>>()?;
            Ok(WorkflowValue::List(resolved))
        }
        WorkflowValue::Map(m) => {
            let mut out = IndexMap::with_capacity(m.len());
            for (k, v) in m {
                out.insert(k.clone(), resolve_nested(v, shared)?);
            }
            Ok(WorkflowValue::Map(out))
        }
        other => Ok(other.clone()),
    }
}
