//! `pflow-kernel` — the IR types, the shared-store and `WorkflowValue`
//! types, the template resolver, the node registry, and the node lifecycle
//! trait (without the wrapper plumbing that applies it). No owned
//! execution loop lives here; that is `pflow-runtime`.

pub mod error;
pub mod fs_atomic;
pub mod ir;
pub mod node;
pub mod registry;
pub mod settings;
pub mod store;
pub mod template;
pub mod value;

pub use error::{Error, Result};
pub use ir::{BatchSpec, EdgeSpec, InputSpec, NodeSpec, OutputSpec, WorkflowIr, SUPPORTED_IR_VERSION};
pub use node::NodeImpl;
pub use registry::{NodeInterface, NodeKind, NodeMetadata, ParamSpec, PortSpec, Registry, ScannerEntry};
pub use store::SharedStore;
pub use value::WorkflowValue;
