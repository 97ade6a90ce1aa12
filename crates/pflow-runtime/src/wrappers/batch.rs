//! The batch fan-out wrapper.
//!
//! Follows the usual three-phase `prep`/`exec`/`post` split for fan-out
//! over an items array. Because `TemplateParamWrapper` resolves params
//! fresh on every call instead of mutating the inner node in place, the
//! parallel collector clones the inner chain's `Arc` per worker rather than
//! deep-copying node objects — there's no mutable shared state to race on.
//!
//! `exec` never returns `Err` itself, even under `fail_fast`: it stops
//! dispatching further items on the first failure but always returns an
//! aggregated payload. `post` is the single place that inspects that payload
//! and decides whether to re-raise, which keeps the raise logic in one
//! phase instead of splitting it across both.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use indexmap::IndexMap;
use pflow_kernel::error::{Error, Result};
use pflow_kernel::ir::BatchSpec;
use pflow_kernel::node::NodeImpl;
use pflow_kernel::store::SharedStore;
use pflow_kernel::value::WorkflowValue;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::coerce::{coerce_bool, coerce_f64, coerce_usize};
use crate::retry::{retry_with_policy, RetryConfig, RetryPolicy};

const MAX_ITEMS_JSON_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorHandling {
    FailFast,
    Continue,
}

#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub alias: String,
    pub parallel: bool,
    pub max_concurrent: usize,
    pub max_retries: usize,
    pub retry_wait_secs: f64,
    pub error_handling: ErrorHandling,
}

impl BatchConfig {
    pub fn coerce(spec: &BatchSpec) -> Self {
        let parallel = coerce_bool("parallel", &spec.parallel, false);
        let max_concurrent = coerce_usize("max_concurrent", spec.max_concurrent.as_ref(), 10);
        let max_retries = coerce_usize("max_retries", spec.max_retries.as_ref(), 1);
        let retry_wait_secs = coerce_f64("retry_wait", spec.retry_wait.as_ref(), 0.0);
        let error_handling = match spec.error_handling.as_deref() {
            Some("continue") => ErrorHandling::Continue,
            Some("fail_fast") | None => ErrorHandling::FailFast,
            Some(other) => {
                warn!(
                    field = "error_handling",
                    input = other,
                    default = "fail_fast",
                    "invalid error_handling batch config, using default"
                );
                ErrorHandling::FailFast
            }
        };

        Self {
            alias: spec.r#as.clone(),
            parallel,
            max_concurrent,
            max_retries,
            retry_wait_secs,
            error_handling,
        }
    }

    fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_retries.max(1),
            policy: RetryPolicy::Fixed {
                delay_ms: (self.retry_wait_secs * 1000.0) as u64,
            },
        }
    }
}

struct ItemOutcome {
    index: usize,
    result: Option<WorkflowValue>,
    error_message: Option<String>,
    duration_ms: u64,
    source_error: Option<Error>,
}

pub struct BatchWrapper {
    node_id: String,
    raw_items: WorkflowValue,
    config: BatchConfig,
    inner_chain: Arc<dyn NodeImpl>,
    /// The outer shared store, captured by `prep` and consumed by `exec`
    /// (§3.3, §4.3: per-item contexts are shallow copies of the *outer*
    /// store, not a bare fresh one, so an item's template expressions can
    /// still reach earlier nodes' outputs). `NodeImpl::exec` only receives
    /// `prep_result`, so this slot is the seam that carries the store across
    /// the two calls the executor always makes back-to-back for one `_run`.
    context_slot: tokio::sync::Mutex<Option<SharedStore>>,
}

impl BatchWrapper {
    pub fn new(
        node_id: impl Into<String>,
        raw_items: WorkflowValue,
        config: BatchConfig,
        inner_chain: Arc<dyn NodeImpl>,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            raw_items,
            config,
            inner_chain,
            context_slot: tokio::sync::Mutex::new(None),
        }
    }

    fn resolve_items(&self, resolved: WorkflowValue) -> Result<Vec<WorkflowValue>> {
        let candidate = match resolved {
            WorkflowValue::String(s) => {
                let trimmed = s.trim_start();
                if trimmed.starts_with('[') && s.len() <= MAX_ITEMS_JSON_BYTES {
                    match serde_json::from_str::<serde_json::Value>(&s) {
                        Ok(json) => WorkflowValue::from(json),
                        Err(_) => WorkflowValue::String(s),
                    }
                } else {
                    WorkflowValue::String(s)
                }
            }
            other => other,
        };

        match candidate {
            WorkflowValue::List(items) => Ok(items),
            _ => Err(Error::validation(
                format!("nodes.{}.batch.items", self.node_id),
                "batch.items must resolve to a sequence",
            )),
        }
    }

    /// Runs the inner chain once for a single item against an isolated
    /// context, per §4.3's per-attempt recipe: a shallow copy of the outer
    /// store (so earlier nodes' outputs stay template-reachable) with the
    /// alias bound to this item and this node's own namespace reset to `{}`.
    /// Not itself retried; the caller wraps this in `retry_with_policy`.
    async fn run_once(
        &self,
        outer: &SharedStore,
        item: &WorkflowValue,
        index: usize,
    ) -> std::result::Result<WorkflowValue, Error> {
        let context = outer.shallow_copy().await;
        context.set(self.config.alias.clone(), item.clone()).await;
        context.set(self.node_id.clone(), WorkflowValue::map()).await;

        let prep = self.inner_chain.prep(&context, &WorkflowValue::Null).await?;
        let exec_result = match self.inner_chain.exec(&prep).await {
            Ok(v) => v,
            Err(e) => self.inner_chain.exec_fallback(&prep, &e).await?,
        };
        self.inner_chain.post(&context, &prep, &exec_result).await?;

        let ns = context
            .get(&self.node_id)
            .await
            .unwrap_or_else(WorkflowValue::map)
            .into_namespace();

        record_item_llm_usage(&context, &self.node_id, index, &ns).await;

        if ns
            .as_map()
            .and_then(|m| m.get("error"))
            .map(|e| e.is_truthy())
            .unwrap_or(false)
        {
            let msg = ns
                .as_map()
                .and_then(|m| m.get("error"))
                .map(|e| e.to_display_string())
                .unwrap_or_default();
            return Err(Error::BatchItem {
                index,
                item: item.clone(),
                reason: msg,
            });
        }

        Ok(ns)
    }

    async fn run_with_retry(&self, outer: &SharedStore, item: &WorkflowValue, index: usize) -> ItemOutcome {
        let started = Instant::now();
        let retry_config = self.config.retry_config();
        let result = retry_with_policy(
            &retry_config,
            |_| true,
            |_attempt| self.run_once(outer, item, index),
        )
        .await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(ns) => ItemOutcome {
                index,
                result: Some(ns),
                error_message: None,
                duration_ms,
                source_error: None,
            },
            Err(e) => ItemOutcome {
                index,
                result: None,
                error_message: Some(e.to_string()),
                duration_ms,
                source_error: Some(e),
            },
        }
    }

    async fn dispatch_sequential(&self, outer: &SharedStore, items: &[WorkflowValue]) -> Vec<ItemOutcome> {
        let mut outcomes = Vec::with_capacity(items.len());
        for (index, item) in items.iter().enumerate() {
            let outcome = self.run_with_retry(outer, item, index).await;
            debug!(
                node_id = %self.node_id,
                batch_current = index + 1,
                batch_total = items.len(),
                batch_success = outcome.error_message.is_none(),
                "batch item complete"
            );
            let failed = outcome.error_message.is_some();
            outcomes.push(outcome);
            if failed && self.config.error_handling == ErrorHandling::FailFast {
                break;
            }
        }
        outcomes
    }

    async fn dispatch_parallel(&self, outer: &SharedStore, items: Vec<WorkflowValue>) -> Vec<ItemOutcome> {
        let total = items.len();
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent.max(1)));
        let abort = Arc::new(AtomicBool::new(false));
        let fail_fast = self.config.error_handling == ErrorHandling::FailFast;
        let node_id = self.node_id.clone();

        let mut join_set: JoinSet<ItemOutcome> = JoinSet::new();
        for (index, item) in items.into_iter().enumerate() {
            let semaphore = semaphore.clone();
            let abort = abort.clone();
            let outer = outer.clone();
            let this = Arc::new(BatchWrapper {
                node_id: self.node_id.clone(),
                raw_items: WorkflowValue::Null,
                config: self.config.clone(),
                inner_chain: self.inner_chain.clone(),
                context_slot: tokio::sync::Mutex::new(None),
            });

            join_set.spawn(async move {
                let permit = semaphore.acquire_owned().await.expect("semaphore not closed");
                if fail_fast && abort.load(Ordering::SeqCst) {
                    drop(permit);
                    return ItemOutcome {
                        index,
                        result: None,
                        error_message: Some("cancelled: prior batch item failed under fail_fast".to_string()),
                        duration_ms: 0,
                        source_error: None,
                    };
                }
                let outcome = this.run_with_retry(&outer, &item, index).await;
                drop(permit);
                if fail_fast && outcome.error_message.is_some() {
                    abort.store(true, Ordering::SeqCst);
                }
                outcome
            });
        }

        let mut slots: Vec<Option<ItemOutcome>> = (0..total).map(|_| None).collect();
        let mut completed = 0usize;
        while let Some(joined) = join_set.join_next().await {
            if let Ok(outcome) = joined {
                completed += 1;
                debug!(
                    node_id = %node_id,
                    batch_current = completed,
                    batch_total = total,
                    batch_success = outcome.error_message.is_none(),
                    "batch item complete"
                );
                let idx = outcome.index;
                slots[idx] = Some(outcome);
            }
        }

        slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.unwrap_or(ItemOutcome {
                    index,
                    result: None,
                    error_message: Some("cancelled: prior batch item failed under fail_fast".to_string()),
                    duration_ms: 0,
                    source_error: None,
                })
            })
            .collect()
    }
}

/// Looks for an `llm_usage` entry at the item context's root or inside the
/// item's own namespace (§4.3), and if found appends a stamped copy to
/// `__llm_calls__` — stamped with `batch_item_index` and the batch's
/// `node_id` so a host can total cost across items with one pass over the
/// list (§5: "any totalling over this list is commutative").
async fn record_item_llm_usage(context: &SharedStore, node_id: &str, index: usize, ns: &WorkflowValue) {
    let usage = match context.get("llm_usage").await {
        Some(WorkflowValue::Map(m)) => Some(m),
        _ => match ns.as_map().and_then(|m| m.get("llm_usage")) {
            Some(WorkflowValue::Map(m)) => Some(m.clone()),
            _ => None,
        },
    };
    let Some(mut usage) = usage else { return };
    usage.insert("node_id".to_string(), WorkflowValue::String(node_id.to_string()));
    usage.insert("batch_item_index".to_string(), WorkflowValue::Int(index as i64));
    context.append_llm_call(WorkflowValue::Map(usage)).await;
}

#[async_trait]
impl NodeImpl for BatchWrapper {
    fn node_type(&self) -> &str {
        self.inner_chain.node_type()
    }

    async fn prep(&self, shared: &SharedStore, _params: &WorkflowValue) -> Result<WorkflowValue> {
        // `SharedStore` always carries a `__llm_calls__` collaborator (a
        // dedicated field, not a lazily-created map entry), so there is
        // nothing to initialise here beyond what `SharedStore::new` already
        // guarantees — unlike the original, which had to seed the list on
        // first use.
        let snapshot = shared.snapshot().await;
        let resolved = pflow_kernel::template::resolve_nested(&self.raw_items, &snapshot)?;
        let items = self.resolve_items(resolved)?;
        *self.context_slot.lock().await = Some(shared.clone());
        Ok(WorkflowValue::List(items))
    }

    async fn exec(&self, prep_result: &WorkflowValue) -> Result<WorkflowValue> {
        let items = prep_result.as_list().cloned().unwrap_or_default();
        let outer = self
            .context_slot
            .lock()
            .await
            .take()
            .ok_or_else(|| Error::validation(format!("nodes.{}.batch", self.node_id), "exec called before prep"))?;
        let started = Instant::now();

        let outcomes = if self.config.parallel {
            self.dispatch_parallel(&outer, items.clone()).await
        } else {
            self.dispatch_sequential(&outer, &items).await
        };

        let total_ms = started.elapsed().as_millis() as u64;
        let n = items.len();

        let mut results: Vec<WorkflowValue> = (0..n).map(|_| WorkflowValue::Null).collect();
        let mut errors: Vec<WorkflowValue> = Vec::new();
        let mut success_count = 0usize;
        let mut durations: Vec<u64> = Vec::new();
        let mut first_failure: Option<(usize, WorkflowValue, String)> = None;

        for outcome in &outcomes {
            durations.push(outcome.duration_ms);
            if let Some(ref msg) = outcome.error_message {
                if first_failure.is_none() {
                    first_failure = Some((outcome.index, items[outcome.index].clone(), msg.clone()));
                }
                let mut err_entry = IndexMap::new();
                err_entry.insert("index".to_string(), WorkflowValue::Int(outcome.index as i64));
                err_entry.insert("item".to_string(), items[outcome.index].clone());
                err_entry.insert("error".to_string(), WorkflowValue::String(msg.clone()));
                errors.push(WorkflowValue::Map(err_entry));
            } else {
                success_count += 1;
                if let Some(ref r) = outcome.result {
                    results[outcome.index] = r.clone();
                }
            }
        }

        let error_count = errors.len();
        let avg = if durations.is_empty() {
            0.0
        } else {
            durations.iter().sum::<u64>() as f64 / durations.len() as f64
        };
        let min = durations.iter().min().copied().unwrap_or(0);
        let max = durations.iter().max().copied().unwrap_or(0);

        let mut timing = IndexMap::new();
        timing.insert("total_items_ms".to_string(), WorkflowValue::Int(total_ms as i64));
        timing.insert("avg_item_ms".to_string(), WorkflowValue::Float(avg));
        timing.insert("min_item_ms".to_string(), WorkflowValue::Int(min as i64));
        timing.insert("max_item_ms".to_string(), WorkflowValue::Int(max as i64));

        let mut batch_metadata = IndexMap::new();
        batch_metadata.insert("parallel".to_string(), WorkflowValue::Bool(self.config.parallel));
        batch_metadata.insert(
            "max_concurrent".to_string(),
            WorkflowValue::Int(self.config.max_concurrent as i64),
        );
        batch_metadata.insert(
            "max_retries".to_string(),
            WorkflowValue::Int(self.config.max_retries as i64),
        );
        batch_metadata.insert(
            "retry_wait".to_string(),
            WorkflowValue::Float(self.config.retry_wait_secs),
        );
        batch_metadata.insert(
            "execution_mode".to_string(),
            WorkflowValue::String(if self.config.parallel { "parallel" } else { "sequential" }.to_string()),
        );
        batch_metadata.insert("timing".to_string(), WorkflowValue::Map(timing));

        let mut payload = IndexMap::new();
        payload.insert("results".to_string(), WorkflowValue::List(results));
        payload.insert("count".to_string(), WorkflowValue::Int(n as i64));
        payload.insert("success_count".to_string(), WorkflowValue::Int(success_count as i64));
        payload.insert("error_count".to_string(), WorkflowValue::Int(error_count as i64));
        payload.insert(
            "errors".to_string(),
            if errors.is_empty() {
                WorkflowValue::Null
            } else {
                WorkflowValue::List(errors)
            },
        );
        payload.insert("batch_metadata".to_string(), WorkflowValue::Map(batch_metadata));

        if self.config.error_handling == ErrorHandling::FailFast {
            if let Some((index, item, reason)) = first_failure {
                payload.insert(
                    "__first_failure__".to_string(),
                    WorkflowValue::Map({
                        let mut m = IndexMap::new();
                        m.insert("index".to_string(), WorkflowValue::Int(index as i64));
                        m.insert("item".to_string(), item);
                        m.insert("reason".to_string(), WorkflowValue::String(reason));
                        m
                    }),
                );
            }
        }

        Ok(WorkflowValue::Map(payload))
    }

    async fn post(
        &self,
        shared: &SharedStore,
        _prep_result: &WorkflowValue,
        exec_result: &WorkflowValue,
    ) -> Result<String> {
        let map = exec_result.as_map().cloned().unwrap_or_default();
        let fail_fast_failure = map.get("__first_failure__").cloned();

        let mut clean = map;
        clean.shift_remove("__first_failure__");
        shared.set_namespace(&self.node_id, WorkflowValue::Map(clean)).await;

        if self.config.error_handling == ErrorHandling::FailFast {
            if let Some(failure) = fail_fast_failure {
                let index = failure
                    .as_map()
                    .and_then(|m| m.get("index"))
                    .and_then(|v| v.as_i64())
                    .unwrap_or(0) as usize;
                let item = failure
                    .as_map()
                    .and_then(|m| m.get("item"))
                    .cloned()
                    .unwrap_or(WorkflowValue::Null);
                let reason = failure
                    .as_map()
                    .and_then(|m| m.get("reason"))
                    .map(|v| v.to_display_string())
                    .unwrap_or_default();
                return Err(Error::BatchItem { index, item, reason });
            }
        }

        Ok("default".to_string())
    }

    async fn exec_fallback(
        &self,
        _prep_result: &WorkflowValue,
        last_error: &Error,
    ) -> Result<WorkflowValue> {
        Err(Error::node_execution(
            self.node_id.clone(),
            std::io::Error::other(last_error.to_string()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    struct DoublingNode;

    #[async_trait]
    impl NodeImpl for DoublingNode {
        fn node_type(&self) -> &str {
            "doubling"
        }
        async fn prep(&self, shared: &SharedStore, _params: &WorkflowValue) -> Result<WorkflowValue> {
            Ok(shared.get("item").await.unwrap_or(WorkflowValue::Null))
        }
        async fn exec(&self, prep_result: &WorkflowValue) -> Result<WorkflowValue> {
            let n = prep_result.as_i64().unwrap_or(0);
            Ok(WorkflowValue::Int(n * 2))
        }
        async fn post(
            &self,
            shared: &SharedStore,
            _prep_result: &WorkflowValue,
            exec_result: &WorkflowValue,
        ) -> Result<String> {
            shared.set("node1", exec_result.clone().into_namespace()).await;
            Ok("default".to_string())
        }
    }

    struct FailingOnNode {
        fail_value: i64,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl NodeImpl for FailingOnNode {
        fn node_type(&self) -> &str {
            "failing"
        }
        async fn prep(&self, shared: &SharedStore, _params: &WorkflowValue) -> Result<WorkflowValue> {
            Ok(shared.get("item").await.unwrap_or(WorkflowValue::Null))
        }
        async fn exec(&self, prep_result: &WorkflowValue) -> Result<WorkflowValue> {
            self.calls.fetch_add(1, AtomicOrdering::SeqCst);
            let n = prep_result.as_i64().unwrap_or(0);
            if n == self.fail_value {
                let mut m = IndexMap::new();
                m.insert("error".to_string(), WorkflowValue::String("boom".to_string()));
                return Ok(WorkflowValue::Map(m));
            }
            Ok(WorkflowValue::Int(n))
        }
        async fn post(
            &self,
            shared: &SharedStore,
            _prep_result: &WorkflowValue,
            exec_result: &WorkflowValue,
        ) -> Result<String> {
            shared.set("node1", exec_result.clone().into_namespace()).await;
            Ok("default".to_string())
        }
    }

    fn base_spec(items: WorkflowValue) -> BatchSpec {
        BatchSpec {
            items,
            r#as: "item".to_string(),
            parallel: WorkflowValue::Bool(false),
            max_concurrent: None,
            max_retries: None,
            retry_wait: None,
            error_handling: None,
        }
    }

    #[tokio::test]
    async fn sequential_success_preserves_order() {
        let shared = SharedStore::new();
        let items = WorkflowValue::List(vec![
            WorkflowValue::Int(1),
            WorkflowValue::Int(2),
            WorkflowValue::Int(3),
        ]);
        let spec = base_spec(items.clone());
        let config = BatchConfig::coerce(&spec);
        let wrapper = BatchWrapper::new("node1", items, config, Arc::new(DoublingNode));

        let prep = wrapper.prep(&shared, &WorkflowValue::Null).await.unwrap();
        let exec = wrapper.exec(&prep).await.unwrap();
        wrapper.post(&shared, &prep, &exec).await.unwrap();

        let ns = shared.get("node1").await.unwrap();
        let results = ns.as_map().unwrap().get("results").unwrap().as_list().unwrap();
        assert_eq!(results[0].as_map().unwrap().get("value").unwrap().as_i64(), Some(2));
        assert_eq!(results[1].as_map().unwrap().get("value").unwrap().as_i64(), Some(4));
        assert_eq!(results[2].as_map().unwrap().get("value").unwrap().as_i64(), Some(6));
        assert_eq!(ns.as_map().unwrap().get("success_count").unwrap().as_i64(), Some(3));
    }

    #[tokio::test]
    async fn fail_fast_reraises_original_error_sequential() {
        let shared = SharedStore::new();
        let items = WorkflowValue::List(vec![
            WorkflowValue::Int(1),
            WorkflowValue::Int(2),
            WorkflowValue::Int(3),
        ]);
        let spec = base_spec(items.clone());
        let config = BatchConfig::coerce(&spec);
        let inner = Arc::new(FailingOnNode {
            fail_value: 2,
            calls: Arc::new(AtomicUsize::new(0)),
        });
        let wrapper = BatchWrapper::new("node1", items, config, inner);

        let prep = wrapper.prep(&shared, &WorkflowValue::Null).await.unwrap();
        let exec = wrapper.exec(&prep).await.unwrap();
        let result = wrapper.post(&shared, &prep, &exec).await;
        assert!(matches!(result, Err(Error::BatchItem { index: 1, .. })));
    }

    #[tokio::test]
    async fn continue_mode_collects_all_errors() {
        let shared = SharedStore::new();
        let items = WorkflowValue::List(vec![
            WorkflowValue::Int(1),
            WorkflowValue::Int(2),
            WorkflowValue::Int(2),
        ]);
        let mut spec = base_spec(items.clone());
        spec.error_handling = Some("continue".to_string());
        let config = BatchConfig::coerce(&spec);
        let inner = Arc::new(FailingOnNode {
            fail_value: 2,
            calls: Arc::new(AtomicUsize::new(0)),
        });
        let wrapper = BatchWrapper::new("node1", items, config, inner);

        let prep = wrapper.prep(&shared, &WorkflowValue::Null).await.unwrap();
        let exec = wrapper.exec(&prep).await.unwrap();
        wrapper.post(&shared, &prep, &exec).await.unwrap();

        let ns = shared.get("node1").await.unwrap();
        assert_eq!(ns.as_map().unwrap().get("success_count").unwrap().as_i64(), Some(1));
        assert_eq!(ns.as_map().unwrap().get("error_count").unwrap().as_i64(), Some(2));
    }

    #[tokio::test]
    async fn parallel_preserves_input_order() {
        let shared = SharedStore::new();
        let items = WorkflowValue::List(vec![
            WorkflowValue::Int(1),
            WorkflowValue::Int(2),
            WorkflowValue::Int(3),
            WorkflowValue::Int(4),
            WorkflowValue::Int(5),
        ]);
        let mut spec = base_spec(items.clone());
        spec.parallel = WorkflowValue::Bool(true);
        spec.max_concurrent = Some(WorkflowValue::Int(3));
        let config = BatchConfig::coerce(&spec);
        let wrapper = BatchWrapper::new("node1", items, config, Arc::new(DoublingNode));

        let prep = wrapper.prep(&shared, &WorkflowValue::Null).await.unwrap();
        let exec = wrapper.exec(&prep).await.unwrap();
        wrapper.post(&shared, &prep, &exec).await.unwrap();

        let ns = shared.get("node1").await.unwrap();
        let results = ns.as_map().unwrap().get("results").unwrap().as_list().unwrap();
        let values: Vec<i64> = results
            .iter()
            .map(|r| r.as_map().unwrap().get("value").unwrap().as_i64().unwrap())
            .collect();
        assert_eq!(values, vec![2, 4, 6, 8, 10]);
    }

    #[tokio::test]
    async fn auto_parses_json_string_items() {
        let shared = SharedStore::new();
        shared
            .set("source", WorkflowValue::String("[1, 2, 3]".to_string()))
            .await;
        let raw_items = WorkflowValue::String("${source}".to_string());
        let spec = base_spec(WorkflowValue::Null);
        let config = BatchConfig::coerce(&spec);
        let wrapper = BatchWrapper::new("node1", raw_items, config, Arc::new(DoublingNode));

        let prep = wrapper.prep(&shared, &WorkflowValue::Null).await.unwrap();
        assert_eq!(prep.as_list().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn non_sequence_items_is_a_typed_error() {
        let shared = SharedStore::new();
        let spec = base_spec(WorkflowValue::Null);
        let config = BatchConfig::coerce(&spec);
        let wrapper = BatchWrapper::new(
            "node1",
            WorkflowValue::String("not a list".to_string()),
            config,
            Arc::new(DoublingNode),
        );
        let err = wrapper.prep(&shared, &WorkflowValue::Null).await.unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[test]
    fn string_bool_coercion_with_warning_default() {
        let spec = BatchSpec {
            items: WorkflowValue::Null,
            r#as: "item".to_string(),
            parallel: WorkflowValue::String("true".to_string()),
            max_concurrent: None,
            max_retries: None,
            retry_wait: None,
            error_handling: None,
        };
        let config = BatchConfig::coerce(&spec);
        assert!(config.parallel);

        let mut spec2 = spec;
        spec2.parallel = WorkflowValue::String("not-a-bool".to_string());
        let config2 = BatchConfig::coerce(&spec2);
        assert!(!config2.parallel);
    }

    struct PrefixingNode;

    #[async_trait]
    impl NodeImpl for PrefixingNode {
        fn node_type(&self) -> &str {
            "prefixing"
        }
        async fn prep(&self, shared: &SharedStore, _params: &WorkflowValue) -> Result<WorkflowValue> {
            let prefix = shared
                .get("earlier_node")
                .await
                .and_then(|v| v.as_map().and_then(|m| m.get("prefix").cloned()))
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default();
            let item = shared.get("item").await.and_then(|v| v.as_str().map(str::to_string)).unwrap_or_default();
            Ok(WorkflowValue::String(format!("{prefix}{item}")))
        }
        async fn exec(&self, prep_result: &WorkflowValue) -> Result<WorkflowValue> {
            Ok(prep_result.clone())
        }
        async fn post(
            &self,
            shared: &SharedStore,
            _prep_result: &WorkflowValue,
            exec_result: &WorkflowValue,
        ) -> Result<String> {
            shared.set("node1", exec_result.clone().into_namespace()).await;
            Ok("default".to_string())
        }
    }

    #[tokio::test]
    async fn item_context_sees_earlier_shared_store_state() {
        let shared = SharedStore::new();
        let mut earlier = IndexMap::new();
        earlier.insert("prefix".to_string(), WorkflowValue::String("item-".to_string()));
        shared.set("earlier_node", WorkflowValue::Map(earlier)).await;

        let items = WorkflowValue::List(vec![
            WorkflowValue::String("a".to_string()),
            WorkflowValue::String("b".to_string()),
        ]);
        let spec = base_spec(items.clone());
        let config = BatchConfig::coerce(&spec);
        let wrapper = BatchWrapper::new("node1", items, config, Arc::new(PrefixingNode));

        let prep = wrapper.prep(&shared, &WorkflowValue::Null).await.unwrap();
        let exec = wrapper.exec(&prep).await.unwrap();
        wrapper.post(&shared, &prep, &exec).await.unwrap();

        let ns = shared.get("node1").await.unwrap();
        let results = ns.as_map().unwrap().get("results").unwrap().as_list().unwrap();
        assert_eq!(results[0].as_map().unwrap().get("value").unwrap().as_str(), Some("item-a"));
        assert_eq!(results[1].as_map().unwrap().get("value").unwrap().as_str(), Some("item-b"));
    }

    struct UsageReportingNode;

    #[async_trait]
    impl NodeImpl for UsageReportingNode {
        fn node_type(&self) -> &str {
            "usage-reporting"
        }
        async fn prep(&self, shared: &SharedStore, _params: &WorkflowValue) -> Result<WorkflowValue> {
            Ok(shared.get("item").await.unwrap_or(WorkflowValue::Null))
        }
        async fn exec(&self, prep_result: &WorkflowValue) -> Result<WorkflowValue> {
            Ok(prep_result.clone())
        }
        async fn post(
            &self,
            shared: &SharedStore,
            _prep_result: &WorkflowValue,
            exec_result: &WorkflowValue,
        ) -> Result<String> {
            shared.set("node1", exec_result.clone().into_namespace()).await;
            let mut usage = IndexMap::new();
            usage.insert("input_tokens".to_string(), WorkflowValue::Int(10));
            usage.insert("output_tokens".to_string(), WorkflowValue::Int(5));
            shared.set("llm_usage", WorkflowValue::Map(usage)).await;
            Ok("default".to_string())
        }
    }

    #[tokio::test]
    async fn per_item_llm_usage_is_stamped_and_aggregated() {
        let shared = SharedStore::new();
        let items = WorkflowValue::List(vec![WorkflowValue::Int(1), WorkflowValue::Int(2)]);
        let spec = base_spec(items.clone());
        let config = BatchConfig::coerce(&spec);
        let wrapper = BatchWrapper::new("node1", items, config, Arc::new(UsageReportingNode));

        let prep = wrapper.prep(&shared, &WorkflowValue::Null).await.unwrap();
        let exec = wrapper.exec(&prep).await.unwrap();
        wrapper.post(&shared, &prep, &exec).await.unwrap();

        let calls = shared.llm_calls().await;
        assert_eq!(calls.len(), 2);
        let indices: Vec<i64> = calls
            .iter()
            .map(|c| c.as_map().unwrap().get("batch_item_index").unwrap().as_i64().unwrap())
            .collect();
        assert_eq!(indices, vec![0, 1]);
        assert_eq!(calls[0].as_map().unwrap().get("node_id").unwrap().as_str(), Some("node1"));
    }
}
