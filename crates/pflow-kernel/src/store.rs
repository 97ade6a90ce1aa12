//! The shared store: the process-local state threaded through one
//! workflow run.
//!
//! Follows a per-field `Arc<RwLock<_>>` shape, but collapsed to one map
//! plus one dedicated slot for `__llm_calls__` — the one piece of state
//! that must stay a shared reference across a batch's shallow-copied
//! per-item contexts rather than being cloned away.

use std::sync::Arc;

use indexmap::IndexMap;
use tokio::sync::{Mutex, RwLock};

use crate::value::WorkflowValue;

pub const LLM_CALLS_KEY: &str = "__llm_calls__";

#[derive(Clone)]
pub struct SharedStore {
    data: Arc<RwLock<IndexMap<String, WorkflowValue>>>,
    llm_calls: Arc<Mutex<Vec<WorkflowValue>>>,
}

impl Default for SharedStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedStore {
    pub fn new() -> Self {
        Self {
            data: Arc::new(RwLock::new(IndexMap::new())),
            llm_calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub async fn get(&self, key: &str) -> Option<WorkflowValue> {
        self.data.read().await.get(key).cloned()
    }

    pub async fn set(&self, key: impl Into<String>, value: WorkflowValue) {
        self.data.write().await.insert(key.into(), value);
    }

    pub async fn remove(&self, key: &str) -> Option<WorkflowValue> {
        self.data.write().await.shift_remove(key)
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.data.read().await.contains_key(key)
    }

    /// A pure, synchronous snapshot of the store's current state, suitable
    /// for the (pure, stateless) template resolver. Includes a materialised
    /// `__llm_calls__` list so templates may reference call counts/costs.
    pub async fn snapshot(&self) -> IndexMap<String, WorkflowValue> {
        let mut snap = self.data.read().await.clone();
        let calls = self.llm_calls.lock().await.clone();
        snap.insert(LLM_CALLS_KEY.to_string(), WorkflowValue::List(calls));
        snap
    }

    /// Writes a node's `post` output under `shared[node_id]`, wrapping a
    /// non-map value as `{"value": v}` per §3.3.
    pub async fn set_namespace(&self, node_id: &str, output: WorkflowValue) {
        self.set(node_id, output.into_namespace()).await;
    }

    pub async fn append_llm_call(&self, entry: WorkflowValue) {
        self.llm_calls.lock().await.push(entry);
    }

    pub async fn llm_calls(&self) -> Vec<WorkflowValue> {
        self.llm_calls.lock().await.clone()
    }

    /// A shallow copy for an isolated batch-item context (§4.3): each
    /// `WorkflowValue` leaf is deep-cloned into a fresh map, but the
    /// `__llm_calls__` collaborator is shared by reference so all items'
    /// usage entries land in the same outer list.
    pub async fn shallow_copy(&self) -> SharedStore {
        let cloned = self.data.read().await.clone();
        SharedStore {
            data: Arc::new(RwLock::new(cloned)),
            llm_calls: self.llm_calls.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_and_get_round_trip() {
        let store = SharedStore::new();
        store.set("x", WorkflowValue::Int(5)).await;
        assert_eq!(store.get("x").await.unwrap().as_i64(), Some(5));
    }

    #[tokio::test]
    async fn namespace_wraps_non_map() {
        let store = SharedStore::new();
        store.set_namespace("node1", WorkflowValue::Int(5)).await;
        let ns = store.get("node1").await.unwrap();
        assert_eq!(ns.as_map().unwrap().get("value").unwrap().as_i64(), Some(5));
    }

    #[tokio::test]
    async fn shallow_copy_isolates_data_but_shares_llm_calls() {
        let store = SharedStore::new();
        store.set("x", WorkflowValue::Int(1)).await;
        let copy = store.shallow_copy().await;

        copy.set("x", WorkflowValue::Int(2)).await;
        assert_eq!(store.get("x").await.unwrap().as_i64(), Some(1));
        assert_eq!(copy.get("x").await.unwrap().as_i64(), Some(2));

        copy.append_llm_call(WorkflowValue::String("call".into())).await;
        assert_eq!(store.llm_calls().await.len(), 1);
    }

    #[tokio::test]
    async fn snapshot_includes_llm_calls() {
        let store = SharedStore::new();
        store.append_llm_call(WorkflowValue::Int(1)).await;
        let snap = store.snapshot().await;
        assert_eq!(snap.get(LLM_CALLS_KEY).unwrap().as_list().unwrap().len(), 1);
    }
}
