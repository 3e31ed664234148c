//! Bounded retry of coordination calls

use std::future::Future;

use tracing::warn;
use zlock_common::{CoordinationError, CoordinationResult, LockError, Result};

use crate::cancel::CancelSignal;
use crate::config::RetryPolicy;

/// Runs coordination calls under a [`RetryPolicy`].
///
/// Only `Unavailable` is retried. Exhausting the attempts yields
/// `CoordinationUnavailable`; other failures are converted immediately.
/// Backoff sleeps end early with `Cancelled` when the signal fires.
#[derive(Debug, Clone)]
pub(crate) struct Retrier {
    policy: RetryPolicy,
    cancel: CancelSignal,
}

impl Retrier {
    pub(crate) fn new(policy: RetryPolicy, cancel: CancelSignal) -> Self {
        Self { policy, cancel }
    }

    /// Same policy, but ignoring cancellation. Used for cleanup that must run
    /// after an acquisition was cancelled.
    pub(crate) fn detached(&self) -> Self {
        Self {
            policy: self.policy.clone(),
            cancel: CancelSignal::new(),
        }
    }

    pub(crate) fn cancel_signal(&self) -> &CancelSignal {
        &self.cancel
    }

    pub(crate) async fn run<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = CoordinationResult<T>>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match call().await {
                Ok(value) => return Ok(value),
                Err(CoordinationError::Unavailable(message)) if attempt < max_attempts => {
                    let delay = self.policy.backoff(attempt);
                    warn!(
                        operation,
                        attempt,
                        max_attempts,
                        ?delay,
                        "coordination service unavailable ({}), retrying",
                        message
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.cancel.cancelled() => return Err(LockError::Cancelled),
                    }
                }
                Err(CoordinationError::Unavailable(message)) => {
                    return Err(LockError::CoordinationUnavailable {
                        attempts: attempt,
                        message,
                    });
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn quick_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff_ms: 1,
            max_backoff_ms: 5,
        }
    }

    #[tokio::test]
    async fn test_retries_transient_failures() {
        let retrier = Retrier::new(quick_policy(3), CancelSignal::new());
        let calls = AtomicU32::new(0);
        let counter = &calls;

        let value = retrier
            .run("exists", move || async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(CoordinationError::Unavailable("down".to_string()))
                } else {
                    Ok(true)
                }
            })
            .await
            .unwrap();

        assert!(value);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_budget_exhaustion() {
        let retrier = Retrier::new(quick_policy(2), CancelSignal::new());
        let calls = AtomicU32::new(0);
        let counter = &calls;

        let err = retrier
            .run("get_children", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(CoordinationError::Unavailable("down".to_string()))
            })
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            LockError::CoordinationUnavailable { attempts: 2, .. }
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_structural_errors_are_not_retried() {
        let retrier = Retrier::new(quick_policy(5), CancelSignal::new());
        let calls = AtomicU32::new(0);
        let counter = &calls;

        let err = retrier
            .run("delete", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(CoordinationError::NoSuchNode("/locks/lock-1".to_string()))
            })
            .await
            .unwrap_err();

        assert!(matches!(err, LockError::NoSuchNode(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancel_interrupts_backoff() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_backoff_ms: 60_000,
            max_backoff_ms: 60_000,
        };
        let cancel = CancelSignal::new();
        let retrier = Retrier::new(policy, cancel.clone());
        cancel.cancel();

        let err = retrier
            .run("exists", || async {
                Err::<(), _>(CoordinationError::Unavailable("down".to_string()))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, LockError::Cancelled));

        // a detached retrier ignores the cancelled signal
        assert!(!retrier.detached().cancel_signal().is_cancelled());
    }
}
