//! Small collaborators shared across planner nodes: the saved-workflow
//! loader seam, `__llm_calls__` bookkeeping, and the deterministic
//! metadata-name fallback.

use indexmap::IndexMap;
use pflow_kernel::ir::WorkflowIr;
use pflow_kernel::store::SharedStore;
use pflow_kernel::value::WorkflowValue;

use crate::llm::LlmUsage;

/// Where saved workflows live, abstracted so the planner core never touches
/// a filesystem path directly (that belongs to the CLI/host surface, out of
/// scope here). A host implements this over its own workflow library.
pub trait WorkflowLoader: Send + Sync {
    fn exists(&self, name: &str) -> bool;
    fn load(&self, name: &str) -> Option<WorkflowIr>;
    /// Names surfaced to `WorkflowDiscovery`'s prompt-building step.
    fn list_names(&self) -> Vec<String>;
}

/// An in-memory loader useful for tests and for hosts that keep their
/// workflow library resident.
#[derive(Default)]
pub struct InMemoryWorkflowLoader {
    workflows: IndexMap<String, WorkflowIr>,
}

impl InMemoryWorkflowLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, ir: WorkflowIr) {
        self.workflows.insert(name.into(), ir);
    }
}

impl WorkflowLoader for InMemoryWorkflowLoader {
    fn exists(&self, name: &str) -> bool {
        self.workflows.contains_key(name)
    }

    fn load(&self, name: &str) -> Option<WorkflowIr> {
        self.workflows.get(name).cloned()
    }

    fn list_names(&self) -> Vec<String> {
        self.workflows.keys().cloned().collect()
    }
}

/// Appends one `__llm_calls__` entry per planner LLM call, in the same
/// shape the batch engine's items contribute (§4.3, §4.6): `{node_id, model,
/// duration_ms, input_tokens, output_tokens, total_tokens, is_planner:
/// true}` — so a host can total cost across both collaborators with one
/// pass over the list.
pub async fn record_llm_call(
    shared: &SharedStore,
    node_id: &str,
    model: &str,
    duration_ms: u64,
    usage: &LlmUsage,
) {
    let mut entry = IndexMap::new();
    entry.insert("node_id".to_string(), WorkflowValue::String(node_id.to_string()));
    entry.insert("model".to_string(), WorkflowValue::String(model.to_string()));
    entry.insert("duration_ms".to_string(), WorkflowValue::Int(duration_ms as i64));
    entry.insert("input_tokens".to_string(), WorkflowValue::Int(usage.input_tokens as i64));
    entry.insert("output_tokens".to_string(), WorkflowValue::Int(usage.output_tokens as i64));
    entry.insert("total_tokens".to_string(), WorkflowValue::Int(usage.total_tokens() as i64));
    entry.insert("is_planner".to_string(), WorkflowValue::Bool(true));
    shared.append_llm_call(WorkflowValue::Map(entry)).await;
}

/// The non-essential metadata fallback used when `MetadataGeneration`'s LLM
/// call fails (§4.6): a readable name derived from the request text, and
/// empty lists for everything else.
pub fn deterministic_metadata_fallback(user_input: &str) -> WorkflowValue {
    let slug: String = user_input
        .split_whitespace()
        .take(6)
        .collect::<Vec<_>>()
        .join("-")
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c.to_ascii_lowercase() } else { '-' })
        .collect();
    let name = if slug.is_empty() {
        "generated-workflow".to_string()
    } else {
        slug
    };

    let mut m = IndexMap::new();
    m.insert("suggested_name".to_string(), WorkflowValue::String(name));
    m.insert("description".to_string(), WorkflowValue::String(String::new()));
    m.insert("search_keywords".to_string(), WorkflowValue::List(vec![]));
    m.insert("capabilities".to_string(), WorkflowValue::List(vec![]));
    m.insert("typical_use_cases".to_string(), WorkflowValue::List(vec![]));
    WorkflowValue::Map(m)
}
