//! `ComponentBrowsing` (Path B only, §4.6): one LLM call returning an
//! over-inclusive superset of node types and saved-workflow names relevant
//! to the request, from which a narrower planning context is built for the
//! rest of Path B (never the full registry again after this point).

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use indexmap::IndexMap;
use pflow_kernel::error::{Error, Result};
use pflow_kernel::node::NodeImpl;
use pflow_kernel::registry::Registry;
use pflow_kernel::store::SharedStore;
use pflow_kernel::value::WorkflowValue;

use crate::llm::{LlmUsage, StructuredLlm};
use crate::support::record_llm_call;

pub struct ComponentBrowsingNode {
    pub llm: Arc<dyn StructuredLlm>,
    pub registry: Arc<Registry>,
    pub model: String,
    pub temperature: f32,
}

fn browsing_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "required": ["node_types", "saved_workflow_names"],
        "properties": {
            "node_types": {"type": "array", "items": {"type": "string"}},
            "saved_workflow_names": {"type": "array", "items": {"type": "string"}}
        }
    })
}

#[async_trait]
impl NodeImpl for ComponentBrowsingNode {
    fn node_type(&self) -> &str {
        "planner.component_browsing"
    }

    async fn prep(&self, shared: &SharedStore, _params: &WorkflowValue) -> Result<WorkflowValue> {
        let user_input = shared
            .get("user_input")
            .await
            .and_then(|v| v.as_str().map(str::to_string))
            .ok_or_else(|| Error::planner("browsing", "missing required 'user_input'"))?;
        Ok(WorkflowValue::String(user_input))
    }

    async fn exec(&self, prep_result: &WorkflowValue) -> Result<WorkflowValue> {
        let user_input = prep_result.as_str().unwrap_or_default();
        let all_types: Vec<String> = self.registry.iter().map(|(k, _)| k.clone()).collect();
        let prompt = format!(
            "A user asked: \"{user_input}\".\nAvailable node types: [{}].\n\
             Return every node type and saved workflow name that could plausibly be relevant. \
             Bias toward over-inclusion.",
            all_types.join(", ")
        );

        let started = Instant::now();
        let response = self
            .llm
            .complete(&prompt, &browsing_schema(), &self.model, self.temperature)
            .await?;
        let duration_ms = started.elapsed().as_millis() as u64;

        let node_types = response
            .get("node_types")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();
        let saved_names = response
            .get("saved_workflow_names")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        let mut out = IndexMap::new();
        out.insert(
            "node_types".to_string(),
            WorkflowValue::from(serde_json::Value::Array(node_types)),
        );
        out.insert(
            "saved_workflow_names".to_string(),
            WorkflowValue::from(serde_json::Value::Array(saved_names)),
        );
        out.insert("duration_ms".to_string(), WorkflowValue::Int(duration_ms as i64));
        Ok(WorkflowValue::Map(out))
    }

    async fn post(
        &self,
        shared: &SharedStore,
        _prep_result: &WorkflowValue,
        exec_result: &WorkflowValue,
    ) -> Result<String> {
        let m = exec_result.as_map().ok_or_else(|| {
            Error::planner("browsing", "exec result was not a mapping")
        })?;
        let duration_ms = m.get("duration_ms").and_then(|v| v.as_i64()).unwrap_or(0) as u64;
        record_llm_call(shared, "component_browsing", &self.model, duration_ms, &LlmUsage::default()).await;

        let mut browsed = m.clone();
        browsed.shift_remove("duration_ms");
        shared.set("browsed_components", WorkflowValue::Map(browsed)).await;
        Ok("default".to_string())
    }

    async fn exec_fallback(
        &self,
        _prep_result: &WorkflowValue,
        _last_error: &Error,
    ) -> Result<WorkflowValue> {
        let mut out = IndexMap::new();
        out.insert("node_types".to_string(), WorkflowValue::List(vec![]));
        out.insert("saved_workflow_names".to_string(), WorkflowValue::List(vec![]));
        out.insert("duration_ms".to_string(), WorkflowValue::Int(0));
        Ok(WorkflowValue::Map(out))
    }
}
