use crate::core::{CoordinatorError, Result};
use serde::{Deserialize, Serialize};
use std::future::Future;
use tokio::time::{Duration, sleep};
use tracing::{debug, warn};

/// Configuration for retry behavior on transient failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the second attempt, in milliseconds.
    pub initial_backoff_ms: u64,
    /// Upper bound for any single delay, in milliseconds.
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 5_000,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_backoff_ms: u64) -> Self {
        Self {
            max_attempts,
            initial_backoff_ms,
            ..Self::default()
        }
    }

    /// No delay between attempts. Used by tests and local runs.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
        }
    }

    /// Delay after the failed attempt number `attempt` (1-based).
    pub fn backoff_ms(&self, attempt: u32) -> u64 {
        let base = self.initial_backoff_ms;
        let max = self.max_backoff_ms.max(base);
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        base.saturating_mul(factor).min(max)
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.max_attempts == 0 {
            return Err("retry.max_attempts must be at least 1".to_string());
        }
        Ok(())
    }

    /// Runs `operation` until it succeeds, fails with a non-transient error,
    /// or runs out of attempts. The last error is returned unchanged.
    pub async fn run<T, F, Fut>(&self, operation_name: &str, mut operation: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match operation(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(operation = operation_name, attempt, "succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) if err.is_transient() && attempt < max_attempts => {
                    let delay = self.backoff_ms(attempt);
                    warn!(
                        operation = operation_name,
                        attempt,
                        max_attempts,
                        delay_ms = delay,
                        error = %err,
                        "transient failure, retrying"
                    );
                    if delay > 0 {
                        sleep(Duration::from_millis(delay)).await;
                    }
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Bounds a whole retry-wrapped call.
pub(crate) async fn with_timeout<T>(
    operation_name: &str,
    timeout: Option<Duration>,
    call: impl Future<Output = Result<T>>,
) -> Result<T> {
    match timeout {
        Some(limit) => tokio::time::timeout(limit, call)
            .await
            .map_err(|_| CoordinatorError::Timeout(operation_name.to_string()))?,
        None => call.await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn unavailable() -> CoordinatorError {
        CoordinatorError::RegionUnavailable {
            region: "us-east".into(),
            reason: "connection reset".into(),
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_backoff_ms: 100,
            max_backoff_ms: 350,
        };
        assert_eq!(policy.backoff_ms(1), 100);
        assert_eq!(policy.backoff_ms(2), 200);
        assert_eq!(policy.backoff_ms(3), 350);
        assert_eq!(RetryPolicy::immediate(3).backoff_ms(4), 0);
    }

    #[tokio::test]
    async fn test_succeeds_on_second_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result = RetryPolicy::immediate(3)
            .run("create", move |attempt| {
                counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 2 { Err(unavailable()) } else { Ok(attempt) }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_exhausted_attempts_return_last_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<()> = RetryPolicy::immediate(3)
            .run("create", move |attempt| {
                counter.fetch_add(1, Ordering::SeqCst);
                async move { Err(CoordinatorError::NoRegionsAvailable(format!("attempt {attempt}"))) }
            })
            .await;
        match result {
            Err(CoordinatorError::NoRegionsAvailable(msg)) => assert_eq!(msg, "attempt 3"),
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_transient_error_aborts_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<()> = RetryPolicy::immediate(3)
            .run("update", move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(CoordinatorError::StoreOperationFailed {
                        region: "us-west".into(),
                        message: "duplicate key".into(),
                    })
                }
            })
            .await;
        assert!(matches!(result, Err(CoordinatorError::StoreOperationFailed { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timeout_bounds_whole_call() {
        let result: Result<()> = with_timeout(
            "delete",
            Some(Duration::from_millis(50)),
            RetryPolicy::new(10, 1_000).run("delete", |_| async { Err(unavailable()) }),
        )
        .await;
        assert!(matches!(result, Err(CoordinatorError::Timeout(op)) if op == "delete"));
    }
}
