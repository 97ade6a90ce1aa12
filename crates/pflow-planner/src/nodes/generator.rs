//! `WorkflowGenerator` (Path B only, §4.6): one LLM call requesting a
//! complete IR whose `inputs` block matches every `${…}` used in node
//! params, forbidding hardcoded discovered values, requiring linear edges.
//! On retry, the prompt is prepended with the top 3 validation errors from
//! the previous attempt. Attempts are capped at 3 — `Validator` (not this
//! node) decides `retry` vs `failed` against that cap; this node's own job
//! is only to increment `generation_attempts` and produce one candidate IR
//! per call.

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

pub struct WorkflowGeneratorNode {
    pub llm: Arc<dyn StructuredLlm>,
    pub registry: Arc<Registry>,
    pub model: String,
    pub temperature: f32,
}

fn generator_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "required": ["ir_version", "nodes", "edges", "inputs"],
        "properties": {
            "ir_version": {"type": "string"},
            "nodes": {"type": "array"},
            "edges": {"type": "array"},
            "inputs": {"type": "object"},
            "outputs": {"type": "object"}
        }
    })
}

#[async_trait]
impl NodeImpl for WorkflowGeneratorNode {
    fn node_type(&self) -> &str {
        "planner.workflow_generator"
    }

    async fn prep(&self, shared: &SharedStore, _params: &WorkflowValue) -> Result<WorkflowValue> {
        let user_input = shared
            .get("user_input")
            .await
            .and_then(|v| v.as_str().map(str::to_string))
            .ok_or_else(|| Error::planner("generator", "missing required 'user_input'"))?;
        let browsed = shared.get("browsed_components").await.unwrap_or(WorkflowValue::map());
        let discovered = shared.get("discovered_params").await.unwrap_or(WorkflowValue::map());
        let validation_errors = shared
            .get("validation_errors")
            .await
            .and_then(|v| v.as_list().cloned())
            .unwrap_or_default();
        let generation_attempts = shared
            .get("generation_attempts")
            .await
            .and_then(|v| v.as_i64())
            .unwrap_or(0);

        let mut m = IndexMap::new();
        m.insert("user_input".to_string(), WorkflowValue::String(user_input));
        m.insert("browsed_components".to_string(), browsed);
        m.insert("discovered_params".to_string(), discovered);
        m.insert("validation_errors".to_string(), WorkflowValue::List(validation_errors));
        m.insert("generation_attempts".to_string(), WorkflowValue::Int(generation_attempts));
        Ok(WorkflowValue::Map(m))
    }

    async fn exec(&self, prep_result: &WorkflowValue) -> Result<WorkflowValue> {
        let m = prep_result
            .as_map()
            .ok_or_else(|| Error::planner("generator", "prep result was not a mapping"))?;
        let user_input = m.get("user_input").and_then(|v| v.as_str()).unwrap_or_default();
        let browsed_types = m
            .get("browsed_components")
            .and_then(|v| v.as_map())
            .and_then(|b| b.get("node_types"))
            .and_then(|v| v.as_list())
            .map(|l| l.iter().filter_map(|v| v.as_str()).collect::<Vec<_>>())
            .unwrap_or_default();
        let planning_context = if browsed_types.is_empty() {
            self.registry.iter().map(|(k, _)| k.clone()).collect::<Vec<_>>().join(", ")
        } else {
            browsed_types.join(", ")
        };

        let errors = m
            .get("validation_errors")
            .and_then(|v| v.as_list())
            .map(|l| l.iter().map(|v| v.to_display_string()).collect::<Vec<_>>())
            .unwrap_or_default();

        let mut prompt = String::new();
        if !errors.is_empty() {
            prompt.push_str("The previous attempt failed validation with these errors:\n");
            for e in errors.iter().take(3) {
                prompt.push_str("- ");
                prompt.push_str(e);
                prompt.push('\n');
            }
            prompt.push('\n');
        }
        prompt.push_str(&format!(
            "Generate a complete workflow IR for: \"{user_input}\".\n\
             Available node types: [{planning_context}].\n\
             Every value that depends on user input MUST be a `${{...}}` template \
             referencing a declared `inputs` entry — never hardcode a discovered value. \
             Use only linear edges (each node has at most one outgoing edge, action \"default\")."
        ));

        let started = Instant::now();
        let response = self
            .llm
            .complete(&prompt, &generator_schema(), &self.model, self.temperature)
            .await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let workflow = response?;

        let mut out = IndexMap::new();
        out.insert("workflow".to_string(), WorkflowValue::from(workflow));
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
            .ok_or_else(|| Error::planner("generator", "exec result was not a mapping"))?;
        let duration_ms = m.get("duration_ms").and_then(|v| v.as_i64()).unwrap_or(0) as u64;
        record_llm_call(shared, "generator", &self.model, duration_ms, &LlmUsage::default()).await;

        let workflow = m.get("workflow").cloned().unwrap_or(WorkflowValue::map());
        shared.set("generated_workflow", workflow).await;

        let attempts = shared
            .get("generation_attempts")
            .await
            .and_then(|v| v.as_i64())
            .unwrap_or(0);
        shared.set("generation_attempts", WorkflowValue::Int(attempts + 1)).await;

        Ok("default".to_string())
    }

    async fn exec_fallback(
        &self,
        _prep_result: &WorkflowValue,
        last_error: &Error,
    ) -> Result<WorkflowValue> {
        let mut ir = IndexMap::new();
        ir.insert(
            "ir_version".to_string(),
            WorkflowValue::String(pflow_kernel::ir::SUPPORTED_IR_VERSION.to_string()),
        );
        ir.insert("nodes".to_string(), WorkflowValue::List(vec![]));
        ir.insert("edges".to_string(), WorkflowValue::List(vec![]));
        ir.insert("inputs".to_string(), WorkflowValue::map());
        ir.insert("_error".to_string(), WorkflowValue::String(last_error.to_string()));

        let mut out = IndexMap::new();
        out.insert("workflow".to_string(), WorkflowValue::Map(ir));
        out.insert("duration_ms".to_string(), WorkflowValue::Int(0));
        Ok(WorkflowValue::Map(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait as att;

    struct StubLlm(serde_json::Value);

    #[att]
    impl StructuredLlm for StubLlm {
        async fn complete(
            &self,
            _prompt: &str,
            _schema: &serde_json::Value,
            _model: &str,
            _temperature: f32,
        ) -> Result<serde_json::Value> {
            Ok(self.0.clone())
        }
    }

    fn sample_workflow() -> serde_json::Value {
        serde_json::json!({
            "ir_version": "0.1.0",
            "nodes": [{"id": "n1", "type": "echo", "params": {"x": "${user_text}"}}],
            "edges": [],
            "inputs": {"user_text": {"type": "string", "required": true}}
        })
    }

    #[tokio::test]
    async fn increments_generation_attempts_each_call() {
        let shared = SharedStore::new();
        shared.set("user_input", WorkflowValue::String("hi".into())).await;
        let node = WorkflowGeneratorNode {
            llm: Arc::new(StubLlm(sample_workflow())),
            registry: Arc::new(Registry::new()),
            model: "test-model".to_string(),
            temperature: 0.0,
        };

        let prep = node.prep(&shared, &WorkflowValue::Null).await.unwrap();
        let exec = node.exec(&prep).await.unwrap();
        node.post(&shared, &prep, &exec).await.unwrap();
        assert_eq!(shared.get("generation_attempts").await.unwrap().as_i64(), Some(1));

        let prep2 = node.prep(&shared, &WorkflowValue::Null).await.unwrap();
        let exec2 = node.exec(&prep2).await.unwrap();
        node.post(&shared, &prep2, &exec2).await.unwrap();
        assert_eq!(shared.get("generation_attempts").await.unwrap().as_i64(), Some(2));
    }

    #[tokio::test]
    async fn fallback_workflow_is_well_formed_for_post() {
        let shared = SharedStore::new();
        let node = WorkflowGeneratorNode {
            llm: Arc::new(StubLlm(sample_workflow())),
            registry: Arc::new(Registry::new()),
            model: "test-model".to_string(),
            temperature: 0.0,
        };
        let err = Error::planner("generator", "llm down");
        let fallback = node.exec_fallback(&WorkflowValue::Null, &err).await.unwrap();
        let action = node.post(&shared, &WorkflowValue::Null, &fallback).await.unwrap();
        assert_eq!(action, "default");
        let stored = shared.get("generated_workflow").await.unwrap();
        assert_eq!(stored.as_map().unwrap().get("nodes").unwrap().as_list().unwrap().len(), 0);
    }
}
