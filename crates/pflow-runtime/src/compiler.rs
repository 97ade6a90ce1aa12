//! The compiler (C4, §4.2): schema validation, registry resolution,
//! semantic validation, instantiation, and linking, in that order.
//!
//! Follows a workflow-graph build step where structural checks are folded
//! into one pass before any node is constructed, with dynamic dispatch
//! replaced by a registered factory table: `FactoryRegistry` stands in for
//! by-name dynamic import, and doubles as the "user-node file-path
//! fallback" such a system otherwise needs — a Rust program has no
//! runtime equivalent of importing an arbitrary file by path, so a user
//! node is simply one more entry an embedder registers in the same table
//! core nodes use, rather than a second resolution mechanism.

use std::collections::HashMap;
use std::sync::Arc;

use pflow_kernel::error::{Error, Result};
use pflow_kernel::ir::{NodeSpec, WorkflowIr};
use pflow_kernel::node::NodeImpl;
use pflow_kernel::registry::Registry;
use pflow_kernel::template::extract_variables;
use pflow_kernel::value::WorkflowValue;

use crate::coerce::{coerce_f64, coerce_usize};
use crate::retry::{RetryConfig, RetryPolicy};
use crate::wrappers::batch::BatchConfig;
use crate::wrappers::{BatchWrapper, NamespaceWrapper, TemplateParamWrapper};

/// Constructs a fresh node implementation for a registered type. One
/// instance is created per compiled node (and, for a batch node's inner
/// chain, that single instance is shared across workers via `Arc` clone —
/// no per-worker construction, §4.3).
pub trait NodeFactory: Send + Sync {
    fn create(&self) -> Arc<dyn NodeImpl>;
}

impl<F> NodeFactory for F
where
    F: Fn() -> Arc<dyn NodeImpl> + Send + Sync,
{
    fn create(&self) -> Arc<dyn NodeImpl> {
        (self)()
    }
}

pub type FactoryRegistry = HashMap<String, Arc<dyn NodeFactory>>;

pub struct CompiledNode {
    pub id: String,
    pub node_type: String,
    pub wrapped: Arc<dyn NodeImpl>,
    pub edges: HashMap<String, String>,
    /// The node's own `exec` retry budget (§4.1: `max_retries`/`wait`, default
    /// a single attempt with no wait). Batch nodes still carry this (it is
    /// simply unused — their own per-item retry budget lives in
    /// `BatchConfig` instead, §4.3).
    pub retry_config: RetryConfig,
}

pub struct CompiledGraph {
    pub nodes: Vec<CompiledNode>,
    pub entry: String,
}

impl CompiledGraph {
    pub fn node(&self, id: &str) -> Option<&CompiledNode> {
        self.nodes.iter().find(|n| n.id == id)
    }
}

pub struct Compiler;

impl Compiler {
    pub fn compile(
        ir: &WorkflowIr,
        registry: &Registry,
        factories: &FactoryRegistry,
    ) -> Result<CompiledGraph> {
        ir.validate_structure()?;
        Self::resolve_types(ir, registry, factories)?;
        Self::validate_semantics(ir, registry)?;

        let mut nodes = Vec::with_capacity(ir.nodes.len());
        for node in &ir.nodes {
            nodes.push(Self::instantiate(node, factories)?);
        }
        Self::link(ir, &mut nodes)?;

        let entry = ir
            .nodes
            .first()
            .map(|n| n.id.clone())
            .ok_or_else(|| Error::validation("nodes", "workflow has no nodes"))?;

        Ok(CompiledGraph { nodes, entry })
    }

    fn resolve_types(ir: &WorkflowIr, registry: &Registry, factories: &FactoryRegistry) -> Result<()> {
        for (i, node) in ir.nodes.iter().enumerate() {
            let known_to_registry = registry.contains(&node.node_type);
            let known_to_factories = factories.contains_key(&node.node_type);
            if !known_to_registry && !known_to_factories {
                return Err(Error::validation(
                    format!("nodes[{i}].type"),
                    format!("unknown node type '{}'", node.node_type),
                ));
            }
            if !known_to_factories {
                return Err(Error::validation(
                    format!("nodes[{i}].type"),
                    format!(
                        "node type '{}' is registered but has no factory bound",
                        node.node_type
                    ),
                ));
            }
        }
        Ok(())
    }

    /// Collects every `${path}` reference under a node's params (and, if
    /// present, its batch spec's `items`), and checks that each path's root
    /// segment resolves to a declared input, an earlier node's id, or the
    /// reserved `__llm_calls__` aggregator. This is the compile-time half of
    /// the "resolvable to an input or an earlier node's output" rule (§4.2);
    /// the runtime half is `TemplateParamWrapper`'s `prep`-time resolution
    /// against the live shared store, which also catches keys this pass
    /// cannot see into (nested output shapes are only checked by the
    /// registry's declared output ports when available, not enforced here).
    fn validate_semantics(ir: &WorkflowIr, registry: &Registry) -> Result<()> {
        let mut known_roots: std::collections::HashSet<&str> =
            ir.inputs.keys().map(String::as_str).collect();
        known_roots.insert(pflow_kernel::store::LLM_CALLS_KEY);

        for (i, node) in ir.nodes.iter().enumerate() {
            let mut vars = std::collections::HashSet::new();
            collect_template_vars(&node.params, &mut vars)?;
            if let Some(batch) = &node.batch {
                collect_template_vars(&batch.items, &mut vars)?;
            }

            for var in &vars {
                let root = var.split(['.', '[']).next().unwrap_or(var);
                if !known_roots.contains(root) {
                    return Err(Error::validation(
                        format!("nodes[{i}].params"),
                        format!("template variable '{var}' does not resolve to any input or earlier node output"),
                    ));
                }
            }

            known_roots.insert(node.id.as_str());
        }

        for (name, output) in &ir.outputs {
            let root = output.source.split(['.', '[']).next().unwrap_or(&output.source);
            let cleaned = root.trim_start_matches("${");
            if !known_roots.contains(cleaned) {
                return Err(Error::validation(
                    format!("outputs.{name}.source"),
                    format!("output source '{}' does not resolve to any known node or input", output.source),
                ));
            }
        }

        let _ = registry;
        Ok(())
    }

    fn instantiate(node: &NodeSpec, factories: &FactoryRegistry) -> Result<CompiledNode> {
        let factory = factories.get(&node.node_type).ok_or_else(|| {
            Error::validation(
                format!("nodes.{}.type", node.id),
                format!("no factory registered for node type '{}'", node.node_type),
            )
        })?;

        let actual = factory.create();

        let max_retries = coerce_usize("max_retries", node.max_retries.as_ref(), 1);
        let wait_secs = coerce_f64("wait", node.wait.as_ref(), 0.0);
        let retry_config = RetryConfig {
            max_attempts: max_retries.max(1),
            policy: RetryPolicy::Fixed {
                delay_ms: (wait_secs * 1000.0) as u64,
            },
        };

        if let Some(batch_spec) = &node.batch {
            let config = BatchConfig::coerce(batch_spec);
            // The batch's inner chain gets its own template-aware + namespace
            // wrapping, built from the node's own raw params (which reference
            // `${item}` / the batch alias) — the batch wrapper then replaces
            // the outer template/namespace layer entirely (§4.3).
            let inner_chain: Arc<dyn NodeImpl> = Arc::new(TemplateParamWrapper::new(
                node.params.clone(),
                Arc::new(NamespaceWrapper::new(node.id.clone(), actual)),
            ));
            let batch_wrapper = BatchWrapper::new(
                node.id.clone(),
                batch_spec.items.clone(),
                config,
                inner_chain,
            );
            return Ok(CompiledNode {
                id: node.id.clone(),
                node_type: node.node_type.clone(),
                wrapped: Arc::new(batch_wrapper),
                edges: HashMap::new(),
                retry_config,
            });
        }

        let namespaced: Arc<dyn NodeImpl> = Arc::new(NamespaceWrapper::new(node.id.clone(), actual));
        let wrapped: Arc<dyn NodeImpl> =
            Arc::new(TemplateParamWrapper::new(node.params.clone(), namespaced));

        Ok(CompiledNode {
            id: node.id.clone(),
            node_type: node.node_type.clone(),
            wrapped,
            edges: HashMap::new(),
            retry_config,
        })
    }

    fn link(ir: &WorkflowIr, nodes: &mut [CompiledNode]) -> Result<()> {
        for edge in &ir.edges {
            let compiled = nodes
                .iter_mut()
                .find(|n| n.id == edge.from)
                .ok_or_else(|| {
                    Error::validation("edges", format!("unknown source node '{}'", edge.from))
                })?;
            compiled.edges.insert(edge.action.clone(), edge.to.clone());
        }
        Ok(())
    }
}

fn collect_template_vars(
    value: &WorkflowValue,
    out: &mut std::collections::HashSet<String>,
) -> Result<()> {
    match value {
        WorkflowValue::String(s) => {
            out.extend(extract_variables(s)?);
        }
        WorkflowValue::List(items) => {
            for item in items {
                collect_template_vars(item, out)?;
            }
        }
        WorkflowValue::Map(m) => {
            for v in m.values() {
                collect_template_vars(v, out)?;
            }
        }
        _ => {}
    }
    Ok(())
}
