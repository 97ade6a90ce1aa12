//! The template-aware param wrapper.
//!
//! Follows a decorator style built on trait objects instead of
//! `Arc<dyn Fn(...)>` closures: the wrapper computes an **immutable param
//! snapshot once per `_run`** rather than mutating the inner node's stored
//! params, which is what lets the batch engine's parallel workers share an
//! `Arc` clone of the inner chain instead of deep-copying it.

use std::sync::Arc;

use async_trait::async_trait;
use pflow_kernel::error::{Error, Result};
use pflow_kernel::node::NodeImpl;
use pflow_kernel::store::SharedStore;
use pflow_kernel::template::resolve_nested;
use pflow_kernel::value::WorkflowValue;

pub struct TemplateParamWrapper {
    raw_params: WorkflowValue,
    inner: Arc<dyn NodeImpl>,
}

impl TemplateParamWrapper {
    pub fn new(raw_params: WorkflowValue, inner: Arc<dyn NodeImpl>) -> Self {
        Self { raw_params, inner }
    }
}

#[async_trait]
impl NodeImpl for TemplateParamWrapper {
    fn node_type(&self) -> &str {
        self.inner.node_type()
    }

    async fn prep(&self, shared: &SharedStore, _params: &WorkflowValue) -> Result<WorkflowValue> {
        let snapshot = shared.snapshot().await;
        let resolved = resolve_nested(&self.raw_params, &snapshot)?;
        self.inner.prep(shared, &resolved).await
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

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;

    struct CapturingNode {
        captured: std::sync::Mutex<Option<WorkflowValue>>,
    }

    #[async_trait]
    impl NodeImpl for CapturingNode {
        fn node_type(&self) -> &str {
            "capture"
        }
        async fn prep(&self, _shared: &SharedStore, params: &WorkflowValue) -> Result<WorkflowValue> {
            *self.captured.lock().unwrap() = Some(params.clone());
            Ok(params.clone())
        }
        async fn exec(&self, prep_result: &WorkflowValue) -> Result<WorkflowValue> {
            Ok(prep_result.clone())
        }
        async fn post(
            &self,
            _shared: &SharedStore,
            _prep_result: &WorkflowValue,
            _exec_result: &WorkflowValue,
        ) -> Result<String> {
            Ok("default".to_string())
        }
    }

    #[tokio::test]
    async fn resolves_whole_value_template_with_type_preserved() {
        let shared = SharedStore::new();
        let mut rd = IndexMap::new();
        rd.insert("content".to_string(), WorkflowValue::String("hello".into()));
        shared.set("rd", WorkflowValue::Map(rd)).await;

        let inner = Arc::new(CapturingNode {
            captured: std::sync::Mutex::new(None),
        });
        let wrapper = TemplateParamWrapper::new(WorkflowValue::String("${rd}".into()), inner.clone());

        wrapper.prep(&shared, &WorkflowValue::Null).await.unwrap();
        let captured = inner.captured.lock().unwrap().clone().unwrap();
        assert!(captured.as_map().is_some());
    }

    #[tokio::test]
    async fn re_resolves_on_every_call_for_changing_store() {
        let shared = SharedStore::new();
        shared.set("item", WorkflowValue::Int(1)).await;

        let inner = Arc::new(CapturingNode {
            captured: std::sync::Mutex::new(None),
        });
        let wrapper = TemplateParamWrapper::new(WorkflowValue::String("${item}".into()), inner.clone());

        wrapper.prep(&shared, &WorkflowValue::Null).await.unwrap();
        assert_eq!(
            inner.captured.lock().unwrap().clone().unwrap().as_i64(),
            Some(1)
        );

        shared.set("item", WorkflowValue::Int(2)).await;
        wrapper.prep(&shared, &WorkflowValue::Null).await.unwrap();
        assert_eq!(
            inner.captured.lock().unwrap().clone().unwrap().as_i64(),
            Some(2)
        );
    }
}
