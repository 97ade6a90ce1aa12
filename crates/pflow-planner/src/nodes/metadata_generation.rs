//! `MetadataGeneration` (Path B only, §4.6): one LLM call producing the
//! searchable metadata a generated workflow is saved under (name, prose
//! description, keywords, capabilities, use cases), plus the declared
//! input/output names lifted straight from the workflow IR (no LLM needed
//! for those). Runs only after the validator accepts a generated workflow
//! and always routes on to `ParameterMapping`, the flow's actual
//! convergence/terminal point (§4.6) — Path A skips this node entirely.
//!
//! Never fails the flow: a failed LLM call falls back to
//! `deterministic_metadata_fallback`, which still produces a usable (if
//! plain) name so the workflow can be saved.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use indexmap::IndexMap;
use pflow_kernel::error::{Error, Result};
use pflow_kernel::ir::WorkflowIr;
use pflow_kernel::node::NodeImpl;
use pflow_kernel::store::SharedStore;
use pflow_kernel::value::WorkflowValue;

use crate::llm::{LlmUsage, StructuredLlm};
use crate::support::{deterministic_metadata_fallback, record_llm_call};

pub struct MetadataGenerationNode {
    pub llm: Arc<dyn StructuredLlm>,
    pub model: String,
    pub temperature: f32,
}

fn metadata_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "required": ["suggested_name", "description", "search_keywords", "capabilities", "typical_use_cases"],
        "properties": {
            "suggested_name": {"type": "string"},
            "description": {"type": "string"},
            "search_keywords": {"type": "array", "items": {"type": "string"}},
            "capabilities": {"type": "array", "items": {"type": "string"}},
            "typical_use_cases": {"type": "array", "items": {"type": "string"}}
        }
    })
}

fn declared_ports(workflow: &WorkflowValue) -> (Vec<String>, Vec<String>) {
    let json: serde_json::Value = workflow.clone().into();
    match serde_json::from_value::<WorkflowIr>(json) {
        Ok(ir) => (
            ir.inputs.keys().cloned().collect(),
            ir.outputs.keys().cloned().collect(),
        ),
        Err(_) => (Vec::new(), Vec::new()),
    }
}

#[async_trait]
impl NodeImpl for MetadataGenerationNode {
    fn node_type(&self) -> &str {
        "planner.metadata_generation"
    }

    async fn prep(&self, shared: &SharedStore, _params: &WorkflowValue) -> Result<WorkflowValue> {
        let user_input = shared
            .get("user_input")
            .await
            .and_then(|v| v.as_str().map(str::to_string))
            .ok_or_else(|| Error::planner("metadata_generation", "missing required 'user_input'"))?;

        let workflow = match shared.get("found_workflow").await {
            Some(w) if w.as_map().is_some_and(|m| !m.is_empty()) => w,
            _ => shared.get("generated_workflow").await.unwrap_or(WorkflowValue::map()),
        };

        let mut m = IndexMap::new();
        m.insert("user_input".to_string(), WorkflowValue::String(user_input));
        m.insert("workflow".to_string(), workflow);
        Ok(WorkflowValue::Map(m))
    }

    async fn exec(&self, prep_result: &WorkflowValue) -> Result<WorkflowValue> {
        let m = prep_result
            .as_map()
            .ok_or_else(|| Error::planner("metadata_generation", "prep result was not a mapping"))?;
        let user_input = m.get("user_input").and_then(|v| v.as_str()).unwrap_or_default();
        let workflow = m.get("workflow").cloned().unwrap_or(WorkflowValue::map());
        let (declared_inputs, declared_outputs) = declared_ports(&workflow);

        let prompt = format!(
            "A user asked: \"{user_input}\".\nThe resulting workflow declares inputs \
             [{}] and outputs [{}].\nWrite a short, searchable name, a description, \
             keywords, capabilities, and typical use cases for this workflow.",
            declared_inputs.join(", "),
            declared_outputs.join(", ")
        );

        let started = Instant::now();
        let response = self
            .llm
            .complete(&prompt, &metadata_schema(), &self.model, self.temperature)
            .await?;
        let duration_ms = started.elapsed().as_millis() as u64;

        let mut out = IndexMap::new();
        out.insert(
            "suggested_name".to_string(),
            WorkflowValue::from(response.get("suggested_name").cloned().unwrap_or_default()),
        );
        out.insert(
            "description".to_string(),
            WorkflowValue::from(response.get("description").cloned().unwrap_or_default()),
        );
        out.insert(
            "search_keywords".to_string(),
            WorkflowValue::from(response.get("search_keywords").cloned().unwrap_or(serde_json::json!([]))),
        );
        out.insert(
            "capabilities".to_string(),
            WorkflowValue::from(response.get("capabilities").cloned().unwrap_or(serde_json::json!([]))),
        );
        out.insert(
            "typical_use_cases".to_string(),
            WorkflowValue::from(response.get("typical_use_cases").cloned().unwrap_or(serde_json::json!([]))),
        );
        out.insert(
            "declared_inputs".to_string(),
            WorkflowValue::List(declared_inputs.into_iter().map(WorkflowValue::String).collect()),
        );
        out.insert(
            "declared_outputs".to_string(),
            WorkflowValue::List(declared_outputs.into_iter().map(WorkflowValue::String).collect()),
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
        let m = exec_result
            .as_map()
            .ok_or_else(|| Error::planner("metadata_generation", "exec result was not a mapping"))?;
        let duration_ms = m.get("duration_ms").and_then(|v| v.as_i64()).unwrap_or(0) as u64;
        record_llm_call(shared, "metadata_generation", &self.model, duration_ms, &LlmUsage::default()).await;

        let mut metadata = m.clone();
        metadata.shift_remove("duration_ms");
        shared.set("workflow_metadata", WorkflowValue::Map(metadata)).await;
        Ok("default".to_string())
    }

    async fn exec_fallback(
        &self,
        prep_result: &WorkflowValue,
        _last_error: &Error,
    ) -> Result<WorkflowValue> {
        let user_input = prep_result
            .as_map()
            .and_then(|m| m.get("user_input"))
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        let workflow = prep_result
            .as_map()
            .and_then(|m| m.get("workflow"))
            .cloned()
            .unwrap_or(WorkflowValue::map());
        let (declared_inputs, declared_outputs) = declared_ports(&workflow);

        let mut out = deterministic_metadata_fallback(user_input)
            .as_map()
            .cloned()
            .unwrap_or_default();
        out.insert(
            "declared_inputs".to_string(),
            WorkflowValue::List(declared_inputs.into_iter().map(WorkflowValue::String).collect()),
        );
        out.insert(
            "declared_outputs".to_string(),
            WorkflowValue::List(declared_outputs.into_iter().map(WorkflowValue::String).collect()),
        );
        out.insert("duration_ms".to_string(), WorkflowValue::Int(0));
        Ok(WorkflowValue::Map(out))
    }
}
