//! The node lifecycle contract: `prep` / `exec` / `post`, plus the
//! `exec_fallback` escape hatch. Follows a conventional `#[async_trait]`
//! shape for the lifecycle methods and a default-method style for
//! `exec_fallback`.
//!
//! This crate defines the trait and data only — no owned execution loop.
//! The wrappers that apply this contract at compile time (template-aware
//! param resolution, namespacing, batch fan-out) and the retry loop that
//! drives `exec` live in `pflow-runtime`, which depends on this crate.

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::store::SharedStore;
use crate::value::WorkflowValue;

#[async_trait]
pub trait NodeImpl: Send + Sync {
    /// The registry key this implementation answers to.
    fn node_type(&self) -> &str;

    /// Validate params + shared inputs and compute a pure inputs record.
    /// Failures here are immediate and not retried.
    async fn prep(&self, shared: &SharedStore, params: &WorkflowValue) -> Result<WorkflowValue>;

    /// The work, possibly with side effects. Transient failures raise and
    /// are retried up to the node's `max_retries`.
    async fn exec(&self, prep_result: &WorkflowValue) -> Result<WorkflowValue>;

    /// Write outputs into the shared store and return the action string
    /// used for edge routing. Failures here are not retried.
    async fn post(
        &self,
        shared: &SharedStore,
        prep_result: &WorkflowValue,
        exec_result: &WorkflowValue,
    ) -> Result<String>;

    /// Called when every `exec` attempt has failed. Its return value is
    /// treated as `exec_result`, so `post` still runs and the workflow may
    /// continue. Raising here makes the failure terminal.
    ///
    /// The default is terminal: most nodes have no meaningful fallback
    /// value. Planner nodes (§4.6) override this to return a neutral
    /// payload instead, so `post` can always route safely.
    async fn exec_fallback(
        &self,
        _prep_result: &WorkflowValue,
        last_error: &Error,
    ) -> Result<WorkflowValue> {
        Err(Error::node_execution(
            self.node_type().to_string(),
            std::io::Error::other(last_error.to_string()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct EchoNode {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl NodeImpl for EchoNode {
        fn node_type(&self) -> &str {
            "echo"
        }

        async fn prep(&self, _shared: &SharedStore, params: &WorkflowValue) -> Result<WorkflowValue> {
            Ok(params.clone())
        }

        async fn exec(&self, prep_result: &WorkflowValue) -> Result<WorkflowValue> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(prep_result.clone())
        }

        async fn post(
            &self,
            shared: &SharedStore,
            _prep_result: &WorkflowValue,
            exec_result: &WorkflowValue,
        ) -> Result<String> {
            shared.set_namespace("echo", exec_result.clone()).await;
            Ok("default".to_string())
        }
    }

    #[tokio::test]
    async fn default_exec_fallback_is_terminal() {
        let node = EchoNode {
            calls: Arc::new(AtomicUsize::new(0)),
        };
        let err = Error::validation("x", "boom");
        let result = node.exec_fallback(&WorkflowValue::Null, &err).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn lifecycle_runs_in_order() {
        let shared = SharedStore::new();
        let node = EchoNode {
            calls: Arc::new(AtomicUsize::new(0)),
        };
        let params = WorkflowValue::String("hi".into());
        let prep = node.prep(&shared, &params).await.unwrap();
        let exec = node.exec(&prep).await.unwrap();
        let action = node.post(&shared, &prep, &exec).await.unwrap();
        assert_eq!(action, "default");
        assert_eq!(node.calls.load(Ordering::SeqCst), 1);
        let ns = shared.get("echo").await.unwrap();
        assert_eq!(ns.as_map().unwrap().get("value").unwrap().as_str(), Some("hi"));
    }
}
