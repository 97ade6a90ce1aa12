//! The DAG executor. Walks a `CompiledGraph` iteratively, in an explicit
//! loop rather than recursively, to avoid recursive `Future` size blow-up
//! in async Rust — invoking each node's wrapper chain in order and
//! following the returned action string to the next node.

use std::time::Instant;

use pflow_kernel::error::{Error, Result};
use pflow_kernel::store::SharedStore;
use pflow_kernel::value::WorkflowValue;
use tracing::debug;

use crate::compiler::CompiledGraph;
use crate::retry::retry_with_policy;

#[derive(Debug, Clone)]
pub struct NodeExecutionRecord {
    pub node_id: String,
    pub action: String,
    pub duration_ms: u64,
    pub attempts: usize,
}

#[derive(Debug, Clone)]
pub struct ExecutionRecord {
    pub node_records: Vec<NodeExecutionRecord>,
    pub final_action: Option<String>,
    /// Which planner branch ran, when this execution is a planner flow
    /// (§4.6's Path A / Path B observability requirement). `None` for an
    /// ordinary (non-planner) workflow run.
    pub planner_path: Option<String>,
}

pub struct Executor;

impl Executor {
    pub async fn execute(graph: &CompiledGraph, shared: &SharedStore) -> Result<ExecutionRecord> {
        let mut node_records = Vec::new();
        let mut current_id = graph.entry.clone();
        let mut final_action = None;

        loop {
            let Some(compiled) = graph.node(&current_id) else {
                return Err(Error::validation(
                    "executor",
                    format!("node '{current_id}' referenced by an edge does not exist"),
                ));
            };

            let started = Instant::now();
            let prep = compiled.wrapped.prep(shared, &WorkflowValue::Null).await?;

            let mut attempts = 0usize;
            let exec_result = match retry_with_policy(&compiled.retry_config, |e| e.is_retryable(), |attempt| {
                attempts = attempt + 1;
                compiled.wrapped.exec(&prep)
            })
            .await
            {
                Ok(v) => v,
                Err(e) => compiled.wrapped.exec_fallback(&prep, &e).await?,
            };

            let action = compiled.wrapped.post(shared, &prep, &exec_result).await?;
            let duration_ms = started.elapsed().as_millis() as u64;

            debug!(
                node_id = %compiled.id,
                action = %action,
                duration_ms,
                "node complete"
            );

            node_records.push(NodeExecutionRecord {
                node_id: compiled.id.clone(),
                action: action.clone(),
                duration_ms,
                attempts,
            });

            match compiled.edges.get(&action) {
                Some(next_id) => current_id = next_id.clone(),
                None => {
                    final_action = Some(action);
                    break;
                }
            }
        }

        Ok(ExecutionRecord {
            node_records,
            final_action,
            planner_path: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::{CompiledNode, FactoryRegistry};
    use crate::retry::{RetryConfig, RetryPolicy};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Arc;

    struct EchoThenStop;

    #[async_trait]
    impl pflow_kernel::node::NodeImpl for EchoThenStop {
        fn node_type(&self) -> &str {
            "echo"
        }
        async fn prep(
            &self,
            _shared: &SharedStore,
            _params: &WorkflowValue,
        ) -> Result<WorkflowValue> {
            Ok(WorkflowValue::Null)
        }
        async fn exec(&self, _prep_result: &WorkflowValue) -> Result<WorkflowValue> {
            Ok(WorkflowValue::Int(1))
        }
        async fn post(
            &self,
            shared: &SharedStore,
            _prep_result: &WorkflowValue,
            exec_result: &WorkflowValue,
        ) -> Result<String> {
            shared.set_namespace("n1", exec_result.clone()).await;
            Ok("default".to_string())
        }
    }

    fn single_node_graph() -> CompiledGraph {
        CompiledGraph {
            nodes: vec![CompiledNode {
                id: "n1".to_string(),
                node_type: "echo".to_string(),
                wrapped: Arc::new(EchoThenStop),
                edges: HashMap::new(),
                retry_config: RetryConfig {
                    max_attempts: 1,
                    policy: RetryPolicy::Fixed { delay_ms: 0 },
                },
            }],
            entry: "n1".to_string(),
        }
    }

    #[tokio::test]
    async fn terminates_when_action_has_no_successor() {
        let shared = SharedStore::new();
        let graph = single_node_graph();
        let record = Executor::execute(&graph, &shared).await.unwrap();
        assert_eq!(record.node_records.len(), 1);
        assert_eq!(record.final_action.as_deref(), Some("default"));
        assert_eq!(shared.get("n1").await.unwrap().as_map().unwrap().get("value").unwrap().as_i64(), Some(1));
    }

    #[tokio::test]
    async fn unknown_successor_node_id_is_an_error() {
        let shared = SharedStore::new();
        let mut graph = single_node_graph();
        graph
            .nodes
            .first_mut()
            .unwrap()
            .edges
            .insert("default".to_string(), "does-not-exist".to_string());
        let err = Executor::execute(&graph, &shared).await.unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[test]
    fn factory_registry_type_alias_is_usable() {
        let _f: FactoryRegistry = HashMap::new();
    }
}
