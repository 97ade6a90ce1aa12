//! The node registry (C2): content-addressed node metadata, loaded by the
//! compiler and refreshed by an external scanner.

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Result;
use crate::fs_atomic;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Core,
    User,
    Mcp,
    Virtual,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamSpec {
    pub key: String,
    #[serde(rename = "type")]
    pub param_type: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub default: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortSpec {
    pub key: String,
    #[serde(rename = "type")]
    pub port_type: String,
    #[serde(default)]
    pub structure: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeInterface {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub inputs: Vec<PortSpec>,
    #[serde(default)]
    pub outputs: Vec<PortSpec>,
    #[serde(default)]
    pub params: Vec<ParamSpec>,
    #[serde(default = "default_actions")]
    pub actions: Vec<String>,
}

fn default_actions() -> Vec<String> {
    vec!["default".to_string()]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeMetadata {
    pub module: String,
    pub class: String,
    pub file_path: String,
    pub kind: NodeKind,
    #[serde(default)]
    pub interface: NodeInterface,
}

/// One entry the scanner reports; carries its own `name` alongside the
/// metadata, mirroring the original scanner's shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerEntry {
    pub name: String,
    #[serde(flatten)]
    pub metadata: NodeMetadata,
}

#[derive(Debug, Default, Clone)]
pub struct Registry {
    entries: IndexMap<String, NodeMetadata>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, node_type: &str) -> Option<&NodeMetadata> {
        self.entries.get(node_type)
    }

    pub fn contains(&self, node_type: &str) -> bool {
        self.entries.contains_key(node_type)
    }

    pub fn insert(&mut self, node_type: impl Into<String>, metadata: NodeMetadata) {
        self.entries.insert(node_type.into(), metadata);
    }

    /// Missing or empty file yields the empty registry; malformed JSON
    /// yields the empty registry plus a warning — never an `Err`, so the
    /// scanner can always recover by re-running.
    pub fn load(path: &Path) -> Self {
        let bytes = match std::fs::read(path) {
            Ok(b) if !b.is_empty() => b,
            Ok(_) => return Self::default(),
            Err(_) => return Self::default(),
        };
        match serde_json::from_slice::<IndexMap<String, NodeMetadata>>(&bytes) {
            Ok(entries) => Self { entries },
            Err(e) => {
                warn!(path = %path.display(), error = %e, "registry file is corrupt, starting empty");
                Self::default()
            }
        }
    }

    /// Serialises with stable key ordering (sorted) and 2-space indent;
    /// writes are atomic via temp-then-rename.
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut sorted: Vec<(&String, &NodeMetadata)> = self.entries.iter().collect();
        sorted.sort_by(|a, b| a.0.cmp(b.0));
        let ordered: IndexMap<&String, &NodeMetadata> = sorted.into_iter().collect();
        let json = serde_json::to_vec_pretty(&ordered)?;
        fs_atomic::write_atomic(path, &json)
    }

    /// Merge in scanner-reported entries; duplicates resolve last-wins with
    /// a warning, entries missing `name` are dropped with a warning (the
    /// flatten/rename in `ScannerEntry` means a missing name simply fails
    /// to deserialize upstream — callers filter those out before calling
    /// this, this function only handles in-band duplicates).
    pub fn update_from_scanner(&mut self, scanned: Vec<ScannerEntry>) -> Vec<String> {
        let mut warnings = Vec::new();
        for entry in scanned {
            if entry.name.is_empty() {
                warnings.push("scanner entry missing 'name', dropped".to_string());
                continue;
            }
            if self.entries.contains_key(&entry.name) {
                warnings.push(format!("duplicate node type '{}', last-wins", entry.name));
            }
            self.entries.insert(entry.name, entry.metadata);
        }
        warnings
    }

    /// Returns the subset mapping for the requested types; ignores unknown
    /// keys and tolerates non-string items in the input by skipping them
    /// (callers passing `&[String]`/`&[&str]` never hit that path — it is
    /// relevant only when the input comes from a loosely typed source).
    pub fn get_metadata(&self, types: &[impl AsRef<str>]) -> IndexMap<String, NodeMetadata> {
        types
            .iter()
            .filter_map(|t| {
                let t = t.as_ref();
                self.entries.get(t).map(|m| (t.to_string(), m.clone()))
            })
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &NodeMetadata)> {
        self.entries.iter()
    }
}

/// Default user-scoped location for the registry file.
pub fn default_registry_path() -> PathBuf {
    dirs_home().join(".pflow").join("registry.json")
}

fn dirs_home() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_metadata() -> NodeMetadata {
        NodeMetadata {
            module: "pflow.nodes.http".to_string(),
            class: "HttpNode".to_string(),
            file_path: "nodes/http.rs".to_string(),
            kind: NodeKind::Core,
            interface: NodeInterface::default(),
        }
    }

    #[test]
    fn load_missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing.json");
        let reg = Registry::load(&path);
        assert!(reg.is_empty());
    }

    #[test]
    fn load_corrupt_file_is_empty_with_warning() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("registry.json");
        std::fs::write(&path, b"{not json").unwrap();
        let reg = Registry::load(&path);
        assert!(reg.is_empty());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("registry.json");
        let mut reg = Registry::new();
        reg.insert("http", sample_metadata());
        reg.save(&path).unwrap();

        let loaded = Registry::load(&path);
        assert_eq!(loaded.len(), 1);
        assert!(loaded.contains("http"));
    }

    #[test]
    fn save_is_byte_stable_given_same_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("registry.json");
        let mut reg = Registry::new();
        reg.insert("b-node", sample_metadata());
        reg.insert("a-node", sample_metadata());
        reg.save(&path).unwrap();
        let first = std::fs::read(&path).unwrap();
        reg.save(&path).unwrap();
        let second = std::fs::read(&path).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn scanner_last_wins_with_warning() {
        let mut reg = Registry::new();
        reg.insert("http", sample_metadata());
        let mut updated = sample_metadata();
        updated.class = "HttpNodeV2".to_string();
        let warnings = reg.update_from_scanner(vec![ScannerEntry {
            name: "http".to_string(),
            metadata: updated,
        }]);
        assert_eq!(warnings.len(), 1);
        assert_eq!(reg.get("http").unwrap().class, "HttpNodeV2");
    }

    #[test]
    fn scanner_drops_entries_missing_name() {
        let mut reg = Registry::new();
        let warnings = reg.update_from_scanner(vec![ScannerEntry {
            name: String::new(),
            metadata: sample_metadata(),
        }]);
        assert_eq!(warnings.len(), 1);
        assert!(reg.is_empty());
    }

    #[test]
    fn get_metadata_skips_unknown_keys() {
        let mut reg = Registry::new();
        reg.insert("http", sample_metadata());
        let subset = reg.get_metadata(&["http", "does-not-exist"]);
        assert_eq!(subset.len(), 1);
        assert!(subset.contains_key("http"));
    }
}
