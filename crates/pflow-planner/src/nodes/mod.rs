//! The seven planner nodes (§4.6), wired into a `CompiledGraph` by `flow.rs`.

pub mod browsing;
pub mod discovery;
pub mod generator;
pub mod metadata_generation;
pub mod parameter_discovery;
pub mod parameter_mapping;
pub mod validator;

pub use browsing::ComponentBrowsingNode;
pub use discovery::WorkflowDiscoveryNode;
pub use generator::WorkflowGeneratorNode;
pub use metadata_generation::MetadataGenerationNode;
pub use parameter_discovery::ParameterDiscoveryNode;
pub use parameter_mapping::ParameterMappingNode;
pub use validator::ValidatorNode;
