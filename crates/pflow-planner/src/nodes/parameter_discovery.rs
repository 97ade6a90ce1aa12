//! `ParameterDiscovery` (Path B only, §4.6): extracts candidate parameter
//! **hints** from the user's text and any stdin metadata. These are hints
//! only — `ParameterMapping` (§4.6's convergence point) never reads them,
//! since a generated workflow's input names may not match what was hinted
//! here (Testable invariant 4, "independent mapping").

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use indexmap::IndexMap;
use pflow_kernel::error::{Error, Result};
use pflow_kernel::node::NodeImpl;
use pflow_kernel::store::SharedStore;
use pflow_kernel::value::WorkflowValue;

use crate::llm::{LlmUsage, StructuredLlm};
use crate::support::record_llm_call;

pub struct ParameterDiscoveryNode {
    pub llm: Arc<dyn StructuredLlm>,
    pub model: String,
    pub temperature: f32,
}

fn hints_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "required": ["hints"],
        "properties": {
            "hints": {
                "type": "object",
                "additionalProperties": {
                    "type": "object",
                    "required": ["value", "confidence", "source"],
                    "properties": {
                        "value": {},
                        "confidence": {"type": "number"},
                        "source": {"type": "string"}
                    }
                }
            }
        }
    })
}

#[async_trait]
impl NodeImpl for ParameterDiscoveryNode {
    fn node_type(&self) -> &str {
        "planner.parameter_discovery"
    }

    async fn prep(&self, shared: &SharedStore, _params: &WorkflowValue) -> Result<WorkflowValue> {
        let user_input = shared
            .get("user_input")
            .await
            .and_then(|v| v.as_str().map(str::to_string))
            .ok_or_else(|| Error::planner("parameter_discovery", "missing required 'user_input'"))?;
        let stdin = shared.get("stdin").await.and_then(|v| v.as_str().map(str::to_string));

        let mut m = IndexMap::new();
        m.insert("user_input".to_string(), WorkflowValue::String(user_input));
        m.insert(
            "stdin".to_string(),
            stdin.map(WorkflowValue::String).unwrap_or(WorkflowValue::Null),
        );
        Ok(WorkflowValue::Map(m))
    }

    async fn exec(&self, prep_result: &WorkflowValue) -> Result<WorkflowValue> {
        let m = prep_result.as_map().ok_or_else(|| {
            Error::planner("parameter_discovery", "prep result was not a mapping")
        })?;
        let user_input = m.get("user_input").and_then(|v| v.as_str()).unwrap_or_default();
        let stdin = m.get("stdin").and_then(|v| v.as_str());

        let prompt = match stdin {
            Some(s) => format!(
                "A user asked: \"{user_input}\".\nPiped stdin data (truncated): \"{}\".\n\
                 Extract candidate parameter values this request might supply, each with a \
                 confidence and a short source note (e.g. \"mentioned in user text\").",
                &s[..s.len().min(500)]
            ),
            None => format!(
                "A user asked: \"{user_input}\".\n\
                 Extract candidate parameter values this request might supply, each with a \
                 confidence and a short source note."
            ),
        };

        let started = Instant::now();
        let response = self
            .llm
            .complete(&prompt, &hints_schema(), &self.model, self.temperature)
            .await?;
        let duration_ms = started.elapsed().as_millis() as u64;

        let hints = response.get("hints").cloned().unwrap_or(serde_json::json!({}));

        let mut out = IndexMap::new();
        out.insert("hints".to_string(), WorkflowValue::from(hints));
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
            Error::planner("parameter_discovery", "exec result was not a mapping")
        })?;
        let duration_ms = m.get("duration_ms").and_then(|v| v.as_i64()).unwrap_or(0) as u64;
        record_llm_call(shared, "parameter_discovery", &self.model, duration_ms, &LlmUsage::default()).await;

        let hints = m.get("hints").cloned().unwrap_or(WorkflowValue::map());
        shared.set("discovered_params", hints).await;
        Ok("default".to_string())
    }

    async fn exec_fallback(
        &self,
        _prep_result: &WorkflowValue,
        _last_error: &Error,
    ) -> Result<WorkflowValue> {
        let mut out = IndexMap::new();
        out.insert("hints".to_string(), WorkflowValue::map());
        out.insert("duration_ms".to_string(), WorkflowValue::Int(0));
        Ok(WorkflowValue::Map(out))
    }
}
