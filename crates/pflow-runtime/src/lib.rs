//! `pflow-runtime` — the compile-time wrappers (C3's template/namespace/batch
//! trio), the compiler and iterative DAG executor (C4), and the batch
//! sub-engine (C5). Depends on `pflow-kernel` for the IR, value, store,
//! template, and node-contract types.

pub mod coerce;
pub mod compiler;
pub mod executor;
pub mod retry;
pub mod wrappers;

pub use compiler::{CompiledGraph, CompiledNode, Compiler, FactoryRegistry, NodeFactory};
pub use executor::{ExecutionRecord, Executor, NodeExecutionRecord};
pub use retry::{RetryConfig, RetryPolicy};
