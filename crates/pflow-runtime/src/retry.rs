//! Retry policies for node `exec` attempts and batch items.
//!
//! The policy shape and jitter math follow a conventional retry-policy
//! module; the helper is generalized to accept a per-call `is_retryable`
//! predicate (every `exec` error is retryable here, but batch items reuse
//! the identical type). Attempt counts are always a local variable in the
//! calling loop, never a field stored on a node instance.

use std::future::Future;
use std::time::Duration;

use pflow_kernel::error::{Error, Result};

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RetryPolicy {
    /// Same delay every attempt.
    Fixed { delay_ms: u64 },
    /// Delay increases linearly: `base_ms * attempt`.
    Linear { base_ms: u64 },
    /// Exponential backoff capped at `max_ms`, with optional jitter
    /// (deterministic ±12.5% alternation; no `rand` dependency pulled in
    /// for this core).
    ExponentialBackoff { base_ms: u64, max_ms: u64, jitter: bool },
}

impl RetryPolicy {
    pub fn delay_for(&self, attempt: usize) -> Duration {
        let ms = match self {
            RetryPolicy::Fixed { delay_ms } => *delay_ms,
            RetryPolicy::Linear { base_ms } => base_ms.saturating_mul((attempt + 1) as u64),
            RetryPolicy::ExponentialBackoff { base_ms, max_ms, jitter } => {
                let exp = 1u64
                    .checked_shl(attempt as u32)
                    .and_then(|s| base_ms.checked_mul(s))
                    .unwrap_or(*max_ms);
                let capped = exp.min(*max_ms);
                if *jitter {
                    let eighth = capped / 8;
                    if attempt % 2 == 0 {
                        capped.saturating_add(eighth)
                    } else {
                        capped.saturating_sub(eighth)
                    }
                    .min(*max_ms)
                } else {
                    capped
                }
            }
        };
        Duration::from_millis(ms)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::Fixed { delay_ms: 0 }
    }
}

/// A fixed-delay policy with `wait` seconds between attempts and
/// `max_retries` total attempts — the shape §4.1 and §3.4 describe
/// directly (`max_retries=1` means a single attempt, no retry).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RetryConfig {
    pub max_attempts: usize,
    pub policy: RetryPolicy,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            policy: RetryPolicy::default(),
        }
    }
}

impl RetryConfig {
    pub fn fixed(max_attempts: usize, wait_seconds: f64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            policy: RetryPolicy::Fixed {
                delay_ms: (wait_seconds * 1000.0).max(0.0) as u64,
            },
        }
    }
}

/// Retries `f` up to `config.max_attempts` times, sleeping
/// `config.policy.delay_for(attempt)` between attempts (never after the
/// last). Returns the last error if every attempt is exhausted.
pub async fn retry_with_policy<F, Fut, T>(
    config: &RetryConfig,
    is_retryable: impl Fn(&Error) -> bool,
    mut f: F,
) -> Result<T>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut last_err = None;

    for attempt in 0..max_attempts {
        if attempt > 0 {
            tokio::time::sleep(config.policy.delay_for(attempt - 1)).await;
        }
        match f(attempt).await {
            Ok(v) => return Ok(v),
            Err(e) => {
                if !is_retryable(&e) {
                    return Err(e);
                }
                last_err = Some(e);
            }
        }
    }

    Err(last_err.unwrap_or_else(|| Error::validation("retry", "no attempts made")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn fixed_policy_delay() {
        let p = RetryPolicy::Fixed { delay_ms: 500 };
        assert_eq!(p.delay_for(0), Duration::from_millis(500));
        assert_eq!(p.delay_for(5), Duration::from_millis(500));
    }

    #[test]
    fn linear_policy_delay() {
        let p = RetryPolicy::Linear { base_ms: 200 };
        assert_eq!(p.delay_for(0), Duration::from_millis(200));
        assert_eq!(p.delay_for(2), Duration::from_millis(600));
    }

    #[test]
    fn exponential_policy_delay() {
        let p = RetryPolicy::ExponentialBackoff {
            base_ms: 100,
            max_ms: 800,
            jitter: false,
        };
        assert_eq!(p.delay_for(0), Duration::from_millis(100));
        assert_eq!(p.delay_for(1), Duration::from_millis(200));
        assert_eq!(p.delay_for(3), Duration::from_millis(800));
    }

    #[test]
    fn jitter_never_exceeds_cap() {
        let p = RetryPolicy::ExponentialBackoff {
            base_ms: 500,
            max_ms: 1_000,
            jitter: true,
        };
        for attempt in 0..10 {
            assert!(p.delay_for(attempt).as_millis() <= 1_000);
        }
    }

    #[tokio::test]
    async fn retry_helper_succeeds_on_second_attempt() {
        let call_count = Arc::new(AtomicUsize::new(0));
        let cc = call_count.clone();
        let config = RetryConfig {
            max_attempts: 3,
            policy: RetryPolicy::Fixed { delay_ms: 0 },
        };

        let result = retry_with_policy(&config, |e| e.is_retryable(), |_attempt| {
            let cc = cc.clone();
            async move {
                let n = cc.fetch_add(1, Ordering::SeqCst);
                if n == 0 {
                    Err(Error::node_execution("n", std::io::Error::other("busy")))
                } else {
                    Ok(42u32)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(call_count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn retry_helper_exhausts_attempts() {
        let call_count = Arc::new(AtomicUsize::new(0));
        let cc = call_count.clone();
        let config = RetryConfig {
            max_attempts: 3,
            policy: RetryPolicy::Fixed { delay_ms: 0 },
        };

        let result: Result<u32> = retry_with_policy(&config, |e| e.is_retryable(), |_attempt| {
            let cc = cc.clone();
            async move {
                cc.fetch_add(1, Ordering::SeqCst);
                Err(Error::node_execution("n", std::io::Error::other("down")))
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(call_count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn max_retries_one_means_single_attempt() {
        let call_count = Arc::new(AtomicUsize::new(0));
        let cc = call_count.clone();
        let config = RetryConfig::fixed(1, 0.0);

        let _: Result<u32> = retry_with_policy(&config, |e| e.is_retryable(), |_attempt| {
            let cc = cc.clone();
            async move {
                cc.fetch_add(1, Ordering::SeqCst);
                Err(Error::node_execution("n", std::io::Error::other("down")))
            }
        })
        .await;

        assert_eq!(call_count.load(Ordering::SeqCst), 1);
    }
}
