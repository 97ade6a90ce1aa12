//! `Validator` (Path B only, §4.6): checks the generator's candidate IR
//! structurally, against the registry's known node types, and against the
//! template-resolvability rule the compiler itself enforces — without
//! requiring a bound `FactoryRegistry` (this runs before any node would be
//! instantiated). Errors from all three passes are collected, not
//! short-circuited, so the retry prompt can address everything at once.
//!
//! Routing is capped at 3 generation attempts (`generation_attempts`, bumped
//! by `WorkflowGenerator`): valid -> `metadata_generation`, invalid with
//! attempts < 3 -> `retry` (back to the generator), invalid at attempt 3 ->
//! `failed`.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use pflow_kernel::error::{Error, Result};
use pflow_kernel::ir::WorkflowIr;
use pflow_kernel::node::NodeImpl;
use pflow_kernel::registry::Registry;
use pflow_kernel::store::SharedStore;
use pflow_kernel::template::extract_variables;
use pflow_kernel::value::WorkflowValue;

const MAX_GENERATION_ATTEMPTS: i64 = 3;

pub struct ValidatorNode {
    pub registry: Arc<Registry>,
}

fn collect_template_errors(
    node_id: &str,
    value: &WorkflowValue,
    known_roots: &HashSet<&str>,
    errors: &mut Vec<String>,
) {
    match value {
        WorkflowValue::String(s) => match extract_variables(s) {
            Ok(vars) => {
                for var in vars {
                    let root = var.split(['.', '[']).next().unwrap_or(&var).to_string();
                    if !known_roots.contains(root.as_str()) {
                        errors.push(format!(
                            "Template: node '{node_id}' references unresolved variable '${{{var}}}'"
                        ));
                    }
                }
            }
            Err(e) => errors.push(format!("Template: node '{node_id}': {e}")),
        },
        WorkflowValue::List(items) => {
            for item in items {
                collect_template_errors(node_id, item, known_roots, errors);
            }
        }
        WorkflowValue::Map(m) => {
            for v in m.values() {
                collect_template_errors(node_id, v, known_roots, errors);
            }
        }
        _ => {}
    }
}

fn validate(ir: &WorkflowIr, registry: &Registry) -> Vec<String> {
    let mut errors = Vec::new();

    if let Err(e) = ir.validate_structure() {
        errors.push(format!("Structure: {e}"));
    }

    for (i, node) in ir.nodes.iter().enumerate() {
        if !registry.contains(&node.node_type) {
            errors.push(format!(
                "Unknown node type: '{}' (nodes[{i}])",
                node.node_type
            ));
        }
    }

    let mut known_roots: HashSet<&str> = ir.inputs.keys().map(String::as_str).collect();
    known_roots.insert(pflow_kernel::store::LLM_CALLS_KEY);
    for node in &ir.nodes {
        collect_template_errors(&node.id, &node.params, &known_roots, &mut errors);
        if let Some(batch) = &node.batch {
            collect_template_errors(&node.id, &batch.items, &known_roots, &mut errors);
        }
        known_roots.insert(node.id.as_str());
    }

    let used_inputs: HashSet<String> = ir
        .nodes
        .iter()
        .flat_map(|n| {
            let mut vars = Vec::new();
            collect_used_vars(&n.params, &mut vars);
            vars
        })
        .collect();
    for name in ir.inputs.keys() {
        if !used_inputs.contains(name) {
            errors.push(format!("Unused input: '{name}' is declared but never referenced"));
        }
    }

    errors
}

fn collect_used_vars(value: &WorkflowValue, out: &mut Vec<String>) {
    match value {
        WorkflowValue::String(s) => {
            if let Ok(vars) = extract_variables(s) {
                for var in vars {
                    if let Some(root) = var.split(['.', '[']).next() {
                        out.push(root.to_string());
                    }
                }
            }
        }
        WorkflowValue::List(items) => {
            for item in items {
                collect_used_vars(item, out);
            }
        }
        WorkflowValue::Map(m) => {
            for v in m.values() {
                collect_used_vars(v, out);
            }
        }
        _ => {}
    }
}

#[async_trait]
impl NodeImpl for ValidatorNode {
    fn node_type(&self) -> &str {
        "planner.validator"
    }

    async fn prep(&self, shared: &SharedStore, _params: &WorkflowValue) -> Result<WorkflowValue> {
        let workflow = shared
            .get("generated_workflow")
            .await
            .ok_or_else(|| Error::planner("validator", "missing 'generated_workflow'"))?;
        let attempts = shared
            .get("generation_attempts")
            .await
            .and_then(|v| v.as_i64())
            .unwrap_or(1);

        let mut m = IndexMap::new();
        m.insert("workflow".to_string(), workflow);
        m.insert("generation_attempts".to_string(), WorkflowValue::Int(attempts));
        Ok(WorkflowValue::Map(m))
    }

    async fn exec(&self, prep_result: &WorkflowValue) -> Result<WorkflowValue> {
        let m = prep_result
            .as_map()
            .ok_or_else(|| Error::planner("validator", "prep result was not a mapping"))?;
        let workflow = m.get("workflow").cloned().unwrap_or(WorkflowValue::map());
        let attempts = m.get("generation_attempts").and_then(|v| v.as_i64()).unwrap_or(1);

        let json: serde_json::Value = workflow.clone().into();
        let errors = match serde_json::from_value::<WorkflowIr>(json) {
            Ok(ir) => validate(&ir, &self.registry),
            Err(e) => vec![format!("Structure: {e}")],
        };

        let mut out = IndexMap::new();
        out.insert(
            "errors".to_string(),
            WorkflowValue::List(errors.into_iter().map(WorkflowValue::String).collect()),
        );
        out.insert("generation_attempts".to_string(), WorkflowValue::Int(attempts));
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
            .ok_or_else(|| Error::planner("validator", "exec result was not a mapping"))?;
        let errors = m.get("errors").and_then(|v| v.as_list().cloned()).unwrap_or_default();
        let attempts = m.get("generation_attempts").and_then(|v| v.as_i64()).unwrap_or(1);

        if errors.is_empty() {
            shared.remove("validation_errors").await;
            shared.set("workflow_metadata", WorkflowValue::map()).await;
            return Ok("valid".to_string());
        }

        shared.set("validation_errors", WorkflowValue::List(errors)).await;

        if attempts >= MAX_GENERATION_ATTEMPTS {
            Ok("failed".to_string())
        } else {
            Ok("retry".to_string())
        }
    }

    async fn exec_fallback(
        &self,
        _prep_result: &WorkflowValue,
        last_error: &Error,
    ) -> Result<WorkflowValue> {
        let mut out = IndexMap::new();
        out.insert(
            "errors".to_string(),
            WorkflowValue::List(vec![WorkflowValue::String(format!(
                "Critical validation failure: {last_error}"
            ))]),
        );
        out.insert("generation_attempts".to_string(), WorkflowValue::Int(MAX_GENERATION_ATTEMPTS));
        Ok(WorkflowValue::Map(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pflow_kernel::registry::{NodeInterface, NodeKind, NodeMetadata};

    fn registry_with_echo() -> Registry {
        let mut r = Registry::new();
        r.insert(
            "echo".to_string(),
            NodeMetadata {
                module: "test".to_string(),
                class: "Echo".to_string(),
                file_path: "nodes/echo.rs".to_string(),
                kind: NodeKind::Core,
                interface: NodeInterface::default(),
            },
        );
        r
    }

    fn valid_workflow() -> WorkflowValue {
        WorkflowValue::from(serde_json::json!({
            "ir_version": "0.1.0",
            "nodes": [{"id": "n1", "type": "echo", "params": {"x": "${user_text}"}}],
            "edges": [],
            "inputs": {"user_text": {"type": "string", "required": true}}
        }))
    }

    #[tokio::test]
    async fn valid_workflow_routes_to_metadata_generation() {
        let shared = SharedStore::new();
        shared.set("generated_workflow", valid_workflow()).await;
        shared.set("generation_attempts", WorkflowValue::Int(1)).await;
        let node = ValidatorNode { registry: Arc::new(registry_with_echo()) };

        let prep = node.prep(&shared, &WorkflowValue::Null).await.unwrap();
        let exec = node.exec(&prep).await.unwrap();
        let action = node.post(&shared, &prep, &exec).await.unwrap();
        assert_eq!(action, "valid");
        assert!(exec.as_map().unwrap().get("errors").unwrap().as_list().unwrap().is_empty());
        assert!(shared.get("workflow_metadata").await.unwrap().as_map().unwrap().is_empty());
    }

    #[tokio::test]
    async fn invalid_workflow_under_cap_retries() {
        let shared = SharedStore::new();
        shared
            .set(
                "generated_workflow",
                WorkflowValue::from(serde_json::json!({"ir_version": "9.9.9", "nodes": []})),
            )
            .await;
        shared.set("generation_attempts", WorkflowValue::Int(1)).await;
        let node = ValidatorNode { registry: Arc::new(registry_with_echo()) };

        let prep = node.prep(&shared, &WorkflowValue::Null).await.unwrap();
        let exec = node.exec(&prep).await.unwrap();
        let action = node.post(&shared, &prep, &exec).await.unwrap();
        assert_eq!(action, "retry");
        let stored = shared.get("validation_errors").await.unwrap();
        assert!(stored.as_list().unwrap()[0].as_str().unwrap().starts_with("Structure:"));
    }

    #[tokio::test]
    async fn invalid_workflow_at_cap_fails() {
        let shared = SharedStore::new();
        shared
            .set(
                "generated_workflow",
                WorkflowValue::from(serde_json::json!({"ir_version": "9.9.9", "nodes": []})),
            )
            .await;
        shared.set("generation_attempts", WorkflowValue::Int(3)).await;
        let node = ValidatorNode { registry: Arc::new(registry_with_echo()) };

        let prep = node.prep(&shared, &WorkflowValue::Null).await.unwrap();
        let exec = node.exec(&prep).await.unwrap();
        let action = node.post(&shared, &prep, &exec).await.unwrap();
        assert_eq!(action, "failed");
    }

    #[tokio::test]
    async fn unknown_node_type_is_reported() {
        let shared = SharedStore::new();
        shared
            .set(
                "generated_workflow",
                WorkflowValue::from(serde_json::json!({
                    "ir_version": "0.1.0",
                    "nodes": [{"id": "n1", "type": "unknown-node", "params": {}}],
                    "edges": []
                })),
            )
            .await;
        shared.set("generation_attempts", WorkflowValue::Int(1)).await;
        let node = ValidatorNode { registry: Arc::new(registry_with_echo()) };

        let prep = node.prep(&shared, &WorkflowValue::Null).await.unwrap();
        let exec = node.exec(&prep).await.unwrap();
        let errors = exec.as_map().unwrap().get("errors").unwrap().as_list().unwrap();
        assert!(errors.iter().any(|e| e.as_str().unwrap().contains("Unknown node type: 'unknown-node'")));
    }
}
