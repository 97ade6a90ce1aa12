//! The namespaced wrapper (§4.1): after the inner node returns from `post`,
//! writes the inner's `exec_result` under `shared[node_id]`, wrapping a
//! non-map result as `{"value": v}` and an absent/null result as `{}`.

use std::sync::Arc;

use async_trait::async_trait;
use pflow_kernel::error::{Error, Result};
use pflow_kernel::node::NodeImpl;
use pflow_kernel::store::SharedStore;
use pflow_kernel::value::WorkflowValue;

pub struct NamespaceWrapper {
    node_id: String,
    inner: Arc<dyn NodeImpl>,
}

impl NamespaceWrapper {
    pub fn new(node_id: impl Into<String>, inner: Arc<dyn NodeImpl>) -> Self {
        Self {
            node_id: node_id.into(),
            inner,
        }
    }
}

#[async_trait]
impl NodeImpl for NamespaceWrapper {
    fn node_type(&self) -> &str {
        self.inner.node_type()
    }

    async fn prep(&self, shared: &SharedStore, params: &WorkflowValue) -> Result<WorkflowValue> {
        self.inner.prep(shared, params).await
    }

    async fn exec(&self, prep_result: &WorkflowValue) -> Result<WorkflowValue> {
        self.inner.exec(prep_result).await
    }

    async fn post(
        &self,
        shared: &SharedStore,
        prep_result: &WorkflowValue,
        exec_result: &WorkflowValue,
    ) -> Result<String> {
        shared.set_namespace(&self.node_id, exec_result.clone()).await;
        self.inner.post(shared, prep_result, exec_result).await
    }

    async fn exec_fallback(
        &self,
        prep_result: &WorkflowValue,
        last_error: &Error,
    ) -> Result<WorkflowValue> {
        self.inner.exec_fallback(prep_result, last_error).await
    }
}
