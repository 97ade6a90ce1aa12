//! The natural-language planner (§4.6): turns a user's request into either
//! a reused saved workflow (Path A) or a freshly generated, validated one
//! (Path B), converging on one parameter-mapping and metadata-generation
//! tail regardless of which path produced the workflow.
//!
//! Built as seven `NodeImpl`s compiled into the same `CompiledGraph`/
//! `Executor` machinery C4 uses for an ordinary workflow — the planner is
//! itself just a workflow whose nodes happen to call an LLM.

pub mod flow;
pub mod llm;
pub mod nodes;
pub mod support;

pub use flow::{PlannerConfig, PlannerFlow};
pub use llm::{LlmUsage, StructuredLlm};
pub use support::{deterministic_metadata_fallback, record_llm_call, InMemoryWorkflowLoader, WorkflowLoader};
