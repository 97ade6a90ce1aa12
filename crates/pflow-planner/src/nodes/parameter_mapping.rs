//! `ParameterMapping` (§4.6's convergence point for both Path A and Path B):
//! one LLM call extracting values for a workflow's declared `inputs` from
//! the user's text. SPEC_FULL.md's resolution of the "validate once or
//! twice" Open Question means this node runs identically regardless of
//! which path produced the workflow, and is the only node that performs
//! the final runtime validation pass against required inputs.
//!
//! Deliberately never reads `discovered_params` (Testable invariant 4):
//! `ParameterDiscoveryNode`'s hints are keyed by whatever names an LLM
//! guessed at before a workflow existed, which need not match the
//! `inputs` names a found or generated workflow actually declares.

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
use crate::support::record_llm_call;

pub struct ParameterMappingNode {
    pub llm: Arc<dyn StructuredLlm>,
    pub model: String,
    pub temperature: f32,
}

fn mapping_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "required": ["extracted", "missing", "confidence", "reasoning"],
        "properties": {
            "extracted": {"type": "object"},
            "missing": {"type": "array", "items": {"type": "string"}},
            "confidence": {"type": "number"},
            "reasoning": {"type": "string"}
        }
    })
}

#[async_trait]
impl NodeImpl for ParameterMappingNode {
    fn node_type(&self) -> &str {
        "planner.parameter_mapping"
    }

    async fn prep(&self, shared: &SharedStore, _params: &WorkflowValue) -> Result<WorkflowValue> {
        let user_input = shared
            .get("user_input")
            .await
            .and_then(|v| v.as_str().map(str::to_string))
            .ok_or_else(|| Error::planner("parameter_mapping", "missing required 'user_input'"))?;

        // Path A leaves `found_workflow` set; Path B leaves `generated_workflow` set.
        // Whichever is present is the one workflow this node ever maps against.
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
            .ok_or_else(|| Error::planner("parameter_mapping", "prep result was not a mapping"))?;
        let user_input = m.get("user_input").and_then(|v| v.as_str()).unwrap_or_default();
        let workflow = m.get("workflow").cloned().unwrap_or(WorkflowValue::map());

        let json: serde_json::Value = workflow.into();
        let required_inputs: Vec<String> = serde_json::from_value::<WorkflowIr>(json)
            .map(|ir| {
                ir.inputs
                    .iter()
                    .filter(|(_, spec)| spec.required)
                    .map(|(name, _)| name.clone())
                    .collect()
            })
            .unwrap_or_default();

        let prompt = format!(
            "A user asked: \"{user_input}\".\nThe workflow requires these input parameters: \
             [{}].\nExtract a value for each parameter you can find in the request text. \
             List any required parameter you could not find under \"missing\".",
            required_inputs.join(", ")
        );

        let started = Instant::now();
        let response = self
            .llm
            .complete(&prompt, &mapping_schema(), &self.model, self.temperature)
            .await?;
        let duration_ms = started.elapsed().as_millis() as u64;

        let extracted = response.get("extracted").cloned().unwrap_or(serde_json::json!({}));
        let missing = response
            .get("missing")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        let mut out = IndexMap::new();
        out.insert("extracted".to_string(), WorkflowValue::from(extracted));
        out.insert(
            "missing".to_string(),
            WorkflowValue::from(serde_json::Value::Array(missing)),
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
            .ok_or_else(|| Error::planner("parameter_mapping", "exec result was not a mapping"))?;
        let duration_ms = m.get("duration_ms").and_then(|v| v.as_i64()).unwrap_or(0) as u64;
        record_llm_call(shared, "parameter_mapping", &self.model, duration_ms, &LlmUsage::default()).await;

        let extracted = m.get("extracted").cloned().unwrap_or(WorkflowValue::map());
        shared.set("extracted_params", extracted).await;

        let missing = m.get("missing").and_then(|v| v.as_list().cloned()).unwrap_or_default();
        if missing.is_empty() {
            shared.remove("missing_params").await;
            Ok("params_complete".to_string())
        } else {
            shared.set("missing_params", WorkflowValue::List(missing)).await;
            Ok("params_incomplete".to_string())
        }
    }

    async fn exec_fallback(
        &self,
        prep_result: &WorkflowValue,
        _last_error: &Error,
    ) -> Result<WorkflowValue> {
        let workflow = prep_result
            .as_map()
            .and_then(|m| m.get("workflow"))
            .cloned()
            .unwrap_or(WorkflowValue::map());
        let json: serde_json::Value = workflow.into();
        let missing: Vec<WorkflowValue> = serde_json::from_value::<WorkflowIr>(json)
            .map(|ir| {
                ir.inputs
                    .iter()
                    .filter(|(_, spec)| spec.required)
                    .map(|(name, _)| WorkflowValue::String(name.clone()))
                    .collect()
            })
            .unwrap_or_default();

        let mut out = IndexMap::new();
        out.insert("extracted".to_string(), WorkflowValue::map());
        out.insert("missing".to_string(), WorkflowValue::List(missing));
        out.insert("duration_ms".to_string(), WorkflowValue::Int(0));
        Ok(WorkflowValue::Map(out))
    }
}
