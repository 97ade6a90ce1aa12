//! `PlannerFlow` (§4.6): the fixed seven-node state machine wired as its own
//! tiny `CompiledGraph`, run through C4's `Executor` rather than a second,
//! hand-rolled traversal loop. Planner nodes write plain top-level shared
//! keys (`user_input`, `generated_workflow`, ...) rather than going through
//! the namespace/template wrappers a compiled user workflow's nodes get —
//! there is no IR node id to namespace under, and every planner node already
//! resolves its own inputs from the shared store directly.
//!
//! Routing (entry: `workflow_discovery`):
//! ```text
//! workflow_discovery --found_existing--> parameter_mapping   (Path A: skips metadata_generation)
//! workflow_discovery --not_found-------> component_browsing  (Path B)
//! component_browsing --default---------> parameter_discovery
//! parameter_discovery --default--------> workflow_generator
//! workflow_generator --default---------> validator
//! validator --valid---------------------> metadata_generation
//! validator --retry---------------------> workflow_generator
//! validator --failed--------------------> (terminal)
//! metadata_generation --default---------> parameter_mapping
//! parameter_mapping --params_complete---> (terminal: run workflow)
//! parameter_mapping --params_incomplete-> (terminal: ask user)
//! ```
//!
//! `parameter_mapping` is the convergence point (§4.6): Path A reaches it
//! directly from discovery, Path B reaches it via
//! `validator -> metadata_generation -> parameter_mapping`. Only Path B
//! runs metadata generation — it hangs off the validator, which Path A
//! never visits.

use std::collections::HashMap;
use std::sync::Arc;

use pflow_kernel::error::Result;
use pflow_kernel::node::NodeImpl;
use pflow_kernel::registry::Registry;
use pflow_kernel::store::SharedStore;
use pflow_runtime::compiler::{CompiledGraph, CompiledNode};
use pflow_runtime::executor::{Executor, ExecutionRecord};
use pflow_runtime::retry::RetryConfig;

use crate::llm::StructuredLlm;
use crate::nodes::{
    ComponentBrowsingNode, MetadataGenerationNode, ParameterDiscoveryNode, ParameterMappingNode,
    ValidatorNode, WorkflowDiscoveryNode, WorkflowGeneratorNode,
};
use crate::support::WorkflowLoader;

const DISCOVERY: &str = "workflow_discovery";
const BROWSING: &str = "component_browsing";
const PARAM_DISCOVERY: &str = "parameter_discovery";
const GENERATOR: &str = "workflow_generator";
const VALIDATOR: &str = "validator";
const PARAM_MAPPING: &str = "parameter_mapping";
const METADATA: &str = "metadata_generation";

pub struct PlannerFlow {
    graph: CompiledGraph,
}

/// Every planner node shares one model/temperature pair and one retry
/// budget; a host wanting per-node overrides builds `PlannerFlow` fields
/// directly rather than going through this constructor.
pub struct PlannerConfig {
    pub llm: Arc<dyn StructuredLlm>,
    pub loader: Arc<dyn WorkflowLoader>,
    pub registry: Arc<Registry>,
    pub model: String,
    pub temperature: f32,
}

impl PlannerFlow {
    pub fn new(config: PlannerConfig) -> Self {
        let no_retry = RetryConfig::fixed(1, 0.0);

        let discovery = CompiledNode {
            id: DISCOVERY.to_string(),
            node_type: "planner.workflow_discovery".to_string(),
            wrapped: Arc::new(WorkflowDiscoveryNode {
                llm: config.llm.clone(),
                loader: config.loader.clone(),
                registry: config.registry.clone(),
                model: config.model.clone(),
                temperature: config.temperature,
            }),
            edges: HashMap::from([
                ("found_existing".to_string(), PARAM_MAPPING.to_string()),
                ("not_found".to_string(), BROWSING.to_string()),
            ]),
            retry_config: no_retry.clone(),
        };

        let browsing = CompiledNode {
            id: BROWSING.to_string(),
            node_type: "planner.component_browsing".to_string(),
            wrapped: Arc::new(ComponentBrowsingNode {
                llm: config.llm.clone(),
                registry: config.registry.clone(),
                model: config.model.clone(),
                temperature: config.temperature,
            }),
            edges: HashMap::from([("default".to_string(), PARAM_DISCOVERY.to_string())]),
            retry_config: no_retry.clone(),
        };

        let parameter_discovery = CompiledNode {
            id: PARAM_DISCOVERY.to_string(),
            node_type: "planner.parameter_discovery".to_string(),
            wrapped: Arc::new(ParameterDiscoveryNode {
                llm: config.llm.clone(),
                model: config.model.clone(),
                temperature: config.temperature,
            }),
            edges: HashMap::from([("default".to_string(), GENERATOR.to_string())]),
            retry_config: no_retry.clone(),
        };

        let generator = CompiledNode {
            id: GENERATOR.to_string(),
            node_type: "planner.workflow_generator".to_string(),
            wrapped: Arc::new(WorkflowGeneratorNode {
                llm: config.llm.clone(),
                registry: config.registry.clone(),
                model: config.model.clone(),
                temperature: config.temperature,
            }),
            edges: HashMap::from([("default".to_string(), VALIDATOR.to_string())]),
            retry_config: no_retry.clone(),
        };

        let validator = CompiledNode {
            id: VALIDATOR.to_string(),
            node_type: "planner.validator".to_string(),
            wrapped: Arc::new(ValidatorNode {
                registry: config.registry.clone(),
            }),
            edges: HashMap::from([
                ("valid".to_string(), METADATA.to_string()),
                ("retry".to_string(), GENERATOR.to_string()),
            ]),
            retry_config: no_retry.clone(),
        };

        let metadata_generation = CompiledNode {
            id: METADATA.to_string(),
            node_type: "planner.metadata_generation".to_string(),
            wrapped: Arc::new(MetadataGenerationNode {
                llm: config.llm.clone(),
                model: config.model,
                temperature: config.temperature,
            }),
            edges: HashMap::from([("default".to_string(), PARAM_MAPPING.to_string())]),
            retry_config: no_retry.clone(),
        };

        // Terminal gate (§4.6's convergence point): `params_complete` /
        // `params_incomplete` both have no successor here — the host reads
        // the action off `ExecutionRecord::final_action` to decide whether
        // to run the workflow or ask the user for the missing params.
        let parameter_mapping = CompiledNode {
            id: PARAM_MAPPING.to_string(),
            node_type: "planner.parameter_mapping".to_string(),
            wrapped: Arc::new(ParameterMappingNode {
                llm: config.llm.clone(),
                model: config.model.clone(),
                temperature: config.temperature,
            }),
            edges: HashMap::new(),
            retry_config: no_retry,
        };

        let graph = CompiledGraph {
            nodes: vec![
                discovery,
                browsing,
                parameter_discovery,
                generator,
                validator,
                metadata_generation,
                parameter_mapping,
            ],
            entry: DISCOVERY.to_string(),
        };

        Self { graph }
    }

    /// Runs the full planner state machine to completion and tags the
    /// resulting `ExecutionRecord` with which path it took (§4.6): Path B
    /// ran `component_browsing`, Path A (an existing workflow found
    /// immediately) never does.
    pub async fn run(&self, shared: &SharedStore) -> Result<ExecutionRecord> {
        let mut record = Executor::execute(&self.graph, shared).await?;
        let took_path_b = record.node_records.iter().any(|r| r.node_id == BROWSING);
        record.planner_path = Some(if took_path_b { "B".to_string() } else { "A".to_string() });
        Ok(record)
    }
}
