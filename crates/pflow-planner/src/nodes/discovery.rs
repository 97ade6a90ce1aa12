//! `WorkflowDiscovery` (§4.6): one LLM call deciding whether an existing
//! saved workflow already answers the user's request.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use indexmap::IndexMap;
use pflow_kernel::error::{Error, Result};
use pflow_kernel::node::NodeImpl;
use pflow_kernel::registry::Registry;
use pflow_kernel::store::SharedStore;
use pflow_kernel::value::WorkflowValue;
use tracing::warn;

use crate::llm::{LlmUsage, StructuredLlm};
use crate::support::{record_llm_call, WorkflowLoader};

pub struct WorkflowDiscoveryNode {
    pub llm: Arc<dyn StructuredLlm>,
    pub loader: Arc<dyn WorkflowLoader>,
    pub registry: Arc<Registry>,
    pub model: String,
    pub temperature: f32,
}

fn discovery_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "required": ["found", "workflow_name", "confidence", "reasoning"],
        "properties": {
            "found": {"type": "boolean"},
            "workflow_name": {"type": "string"},
            "confidence": {"type": "number"},
            "reasoning": {"type": "string"}
        }
    })
}

#[async_trait]
impl NodeImpl for WorkflowDiscoveryNode {
    fn node_type(&self) -> &str {
        "planner.workflow_discovery"
    }

    async fn prep(&self, shared: &SharedStore, _params: &WorkflowValue) -> Result<WorkflowValue> {
        let user_input = shared
            .get("user_input")
            .await
            .and_then(|v| v.as_str().map(str::to_string))
            .ok_or_else(|| Error::planner("discovery", "missing required 'user_input'"))?;

        let saved_names = self.loader.list_names();
        let node_types: Vec<String> = self.registry.iter().map(|(k, _)| k.clone()).collect();

        let mut m = IndexMap::new();
        m.insert("user_input".to_string(), WorkflowValue::String(user_input));
        m.insert(
            "saved_workflow_names".to_string(),
            WorkflowValue::List(saved_names.into_iter().map(WorkflowValue::String).collect()),
        );
        m.insert(
            "node_types".to_string(),
            WorkflowValue::List(node_types.into_iter().map(WorkflowValue::String).collect()),
        );
        Ok(WorkflowValue::Map(m))
    }

    async fn exec(&self, prep_result: &WorkflowValue) -> Result<WorkflowValue> {
        let m = prep_result.as_map().ok_or_else(|| {
            Error::planner("discovery", "prep result was not a mapping")
        })?;
        let user_input = m.get("user_input").and_then(|v| v.as_str()).unwrap_or_default();
        let saved_names = m
            .get("saved_workflow_names")
            .and_then(|v| v.as_list())
            .map(|l| l.iter().filter_map(|v| v.as_str()).collect::<Vec<_>>().join(", "))
            .unwrap_or_default();

        let prompt = format!(
            "A user asked: \"{user_input}\".\nSaved workflows available: [{saved_names}].\n\
             Decide whether one of the saved workflows already satisfies the request."
        );

        let started = Instant::now();
        let response = self
            .llm
            .complete(&prompt, &discovery_schema(), &self.model, self.temperature)
            .await?;
        let duration_ms = started.elapsed().as_millis() as u64;

        let found = response
            .get("found")
            .and_then(|v| v.as_bool())
            .ok_or_else(|| Error::planner("discovery", "response missing boolean 'found'"))?;
        let workflow_name = response
            .get("workflow_name")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::planner("discovery", "response missing 'workflow_name'"))?
            .to_string();
        let confidence = response.get("confidence").and_then(|v| v.as_f64()).unwrap_or(0.0);
        let reasoning = response
            .get("reasoning")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        let mut out = IndexMap::new();
        out.insert("found".to_string(), WorkflowValue::Bool(found));
        out.insert("workflow_name".to_string(), WorkflowValue::String(workflow_name));
        out.insert("confidence".to_string(), WorkflowValue::Float(confidence));
        out.insert("reasoning".to_string(), WorkflowValue::String(reasoning));
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
            Error::planner("discovery", "exec result was not a mapping")
        })?;
        let duration_ms = m.get("duration_ms").and_then(|v| v.as_i64()).unwrap_or(0) as u64;
        record_llm_call(shared, "workflow_discovery", &self.model, duration_ms, &LlmUsage::default()).await;

        let mut discovery_result = m.clone();
        discovery_result.shift_remove("duration_ms");
        shared
            .set("discovery_result", WorkflowValue::Map(discovery_result))
            .await;

        let found = m.get("found").and_then(|v| v.as_bool()).unwrap_or(false);
        let workflow_name = m.get("workflow_name").and_then(|v| v.as_str()).unwrap_or_default();

        if found && self.loader.exists(workflow_name) {
            if let Some(ir) = self.loader.load(workflow_name) {
                let ir_value = serde_json::to_value(&ir).map_err(Error::from)?;
                shared.set("found_workflow", WorkflowValue::from(ir_value)).await;
            }
            return Ok("found_existing".to_string());
        }

        if found && !self.loader.exists(workflow_name) {
            warn!(workflow_name, "planner named a non-existent saved workflow");
        }
        Ok("not_found".to_string())
    }

    async fn exec_fallback(
        &self,
        _prep_result: &WorkflowValue,
        _last_error: &Error,
    ) -> Result<WorkflowValue> {
        let mut out = IndexMap::new();
        out.insert("found".to_string(), WorkflowValue::Bool(false));
        out.insert("workflow_name".to_string(), WorkflowValue::String(String::new()));
        out.insert("confidence".to_string(), WorkflowValue::Float(0.0));
        out.insert("reasoning".to_string(), WorkflowValue::String("llm call failed".to_string()));
        out.insert("duration_ms".to_string(), WorkflowValue::Int(0));
        Ok(WorkflowValue::Map(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::support::InMemoryWorkflowLoader;
    use pflow_kernel::ir::WorkflowIr;

    struct StubLlm(serde_json::Value);

    #[async_trait]
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

    fn sample_ir() -> WorkflowIr {
        serde_json::from_value(serde_json::json!({
            "ir_version": "0.1.0",
            "nodes": [{"id": "n1", "type": "echo", "params": {}}],
            "edges": []
        }))
        .unwrap()
    }

    fn node(response: serde_json::Value, loader: Arc<dyn WorkflowLoader>) -> WorkflowDiscoveryNode {
        WorkflowDiscoveryNode {
            llm: Arc::new(StubLlm(response)),
            loader,
            registry: Arc::new(Registry::new()),
            model: "test-model".to_string(),
            temperature: 0.0,
        }
    }

    #[tokio::test]
    async fn found_existing_workflow_is_loaded_and_routes_found_existing() {
        let shared = SharedStore::new();
        shared.set("user_input", WorkflowValue::String("convert data.csv to json".into())).await;
        let mut loader = InMemoryWorkflowLoader::new();
        loader.insert("csv-to-json", sample_ir());
        let n = node(
            serde_json::json!({
                "found": true,
                "workflow_name": "csv-to-json",
                "confidence": 0.9,
                "reasoning": "exact match"
            }),
            Arc::new(loader),
        );

        let prep = n.prep(&shared, &WorkflowValue::Null).await.unwrap();
        let exec = n.exec(&prep).await.unwrap();
        let action = n.post(&shared, &prep, &exec).await.unwrap();
        assert_eq!(action, "found_existing");
        assert!(shared.get("found_workflow").await.is_some());
    }

    #[tokio::test]
    async fn named_workflow_missing_from_disk_routes_not_found() {
        let shared = SharedStore::new();
        shared.set("user_input", WorkflowValue::String("do something odd".into())).await;
        let loader = InMemoryWorkflowLoader::new();
        let n = node(
            serde_json::json!({
                "found": true,
                "workflow_name": "ghost-workflow",
                "confidence": 0.5,
                "reasoning": "hallucinated"
            }),
            Arc::new(loader),
        );

        let prep = n.prep(&shared, &WorkflowValue::Null).await.unwrap();
        let exec = n.exec(&prep).await.unwrap();
        let action = n.post(&shared, &prep, &exec).await.unwrap();
        assert_eq!(action, "not_found");
        assert!(shared.get("found_workflow").await.is_none());
    }

    #[tokio::test]
    async fn not_found_routes_not_found_and_stores_discovery_result() {
        let shared = SharedStore::new();
        shared.set("user_input", WorkflowValue::String("do something new".into())).await;
        let n = node(
            serde_json::json!({
                "found": false,
                "workflow_name": "",
                "confidence": 0.1,
                "reasoning": "nothing matches"
            }),
            Arc::new(InMemoryWorkflowLoader::new()),
        );

        let prep = n.prep(&shared, &WorkflowValue::Null).await.unwrap();
        let exec = n.exec(&prep).await.unwrap();
        let action = n.post(&shared, &prep, &exec).await.unwrap();
        assert_eq!(action, "not_found");
        let stored = shared.get("discovery_result").await.unwrap();
        assert_eq!(stored.as_map().unwrap().get("found").unwrap().as_bool(), Some(false));
        assert!(stored.as_map().unwrap().get("duration_ms").is_none());
    }

    #[tokio::test]
    async fn missing_user_input_fails_prep() {
        let shared = SharedStore::new();
        let n = node(serde_json::json!({}), Arc::new(InMemoryWorkflowLoader::new()));
        assert!(n.prep(&shared, &WorkflowValue::Null).await.is_err());
    }

    #[tokio::test]
    async fn exec_fallback_is_well_formed_for_post() {
        let shared = SharedStore::new();
        let n = node(serde_json::json!({}), Arc::new(InMemoryWorkflowLoader::new()));
        let err = Error::planner("discovery", "llm down");
        let fallback = n.exec_fallback(&WorkflowValue::Null, &err).await.unwrap();
        let action = n.post(&shared, &WorkflowValue::Null, &fallback).await.unwrap();
        assert_eq!(action, "not_found");
    }
}
