//! Critical section execution and release

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::runtime::Handle;
use tokio::time::Instant;
use tracing::{info, warn};
use zlock_common::Result;

use crate::metrics;
use crate::registrar::{Candidate, CandidateRegistrar};

/// Ownership of a registered candidate.
///
/// Returned to callers only once the candidate holds the lock. Dropping an
/// unreleased guard deletes the candidate in the background on the current
/// tokio runtime; without a runtime the session's ephemeral binding is the
/// only cleanup left.
pub struct LockGuard {
    candidate: Candidate,
    registrar: Arc<CandidateRegistrar>,
    root: String,
    acquired_at: Option<Instant>,
    released: bool,
}

impl LockGuard {
    /// Guard a freshly registered candidate that does not hold the lock yet
    pub(crate) fn pending(
        candidate: Candidate,
        registrar: Arc<CandidateRegistrar>,
        root: &str,
    ) -> Self {
        Self {
            candidate,
            registrar,
            root: root.to_string(),
            acquired_at: None,
            released: false,
        }
    }

    pub(crate) fn mark_acquired(&mut self) {
        self.acquired_at = Some(Instant::now());
    }

    pub fn candidate(&self) -> &Candidate {
        &self.candidate
    }

    pub fn host_id(&self) -> &str {
        &self.candidate.host_id
    }

    pub fn is_acquired(&self) -> bool {
        self.acquired_at.is_some()
    }

    /// How long the lock has been held
    pub fn held_for(&self) -> Duration {
        self.acquired_at
            .map(|at| at.elapsed())
            .unwrap_or_default()
    }

    /// Delete the candidate, releasing the lock to the next waiter
    pub async fn release(mut self) -> Result<()> {
        self.released = true;
        let result = self.registrar.deregister(&self.candidate).await;
        if self.acquired_at.is_some() {
            let held = self.held_for();
            metrics::record_release(&self.root, held, result.is_ok());
            match &result {
                Ok(()) => info!(
                    host_id = %self.candidate.host_id,
                    candidate = %self.candidate.node_path,
                    ?held,
                    "lock released"
                ),
                Err(e) => warn!(
                    host_id = %self.candidate.host_id,
                    candidate = %self.candidate.node_path,
                    "failed to release lock: {}",
                    e
                ),
            }
        }
        result
    }
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard")
            .field("candidate", &self.candidate)
            .field("root", &self.root)
            .field("acquired", &self.is_acquired())
            .field("released", &self.released)
            .finish()
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let candidate = self.candidate.clone();
        let Ok(handle) = Handle::try_current() else {
            warn!(
                candidate = %candidate.node_path,
                "no runtime to release lock candidate, leaving it to session expiry"
            );
            return;
        };

        let registrar = self.registrar.clone();
        let root = self.root.clone();
        let held = self.acquired_at.map(|at| at.elapsed());
        handle.spawn(async move {
            let result = registrar.deregister(&candidate).await;
            if let Some(held) = held {
                metrics::record_release(&root, held, result.is_ok());
            }
            if let Err(e) = result {
                warn!(candidate = %candidate.node_path, "background release failed: {}", e);
            }
        });
    }
}

/// Runs protected work while the lock is held and always releases afterwards
pub struct CriticalSectionRunner;

impl CriticalSectionRunner {
    /// Run `work` to completion, then delete the candidate.
    ///
    /// The candidate is deleted on every exit path. A panic inside `work` is
    /// resumed after the release. If the returned future is dropped mid-work,
    /// the guard's `Drop` releases in the background.
    pub async fn run_exclusive<F, Fut, T>(guard: LockGuard, work: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let outcome = AssertUnwindSafe(async move { work().await })
            .catch_unwind()
            .await;
        let released = guard.release().await;

        match outcome {
            Ok(value) => released.map(|()| value),
            Err(panic) => {
                if let Err(e) = released {
                    warn!("release after panicking work failed: {}", e);
                }
                std::panic::resume_unwind(panic)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelSignal;
    use crate::config::RetryPolicy;
    use crate::retry::Retrier;
    use zlock_common::LockError;
    use zlock_coordination::{
        CoordinationClient, CreateMode, MemoryCoordinationService, SessionId,
    };

    async fn acquired_guard(service: &MemoryCoordinationService) -> LockGuard {
        acquired_guard_with_session(service).await.0
    }

    async fn acquired_guard_with_session(
        service: &MemoryCoordinationService,
    ) -> (LockGuard, SessionId) {
        let client: Arc<dyn CoordinationClient> = Arc::new(service.connect());
        let session = client.session_id();
        client
            .create("/locks", b"root node", CreateMode::Persistent)
            .await
            .unwrap();
        let registrar = Arc::new(CandidateRegistrar::new(
            client,
            "/locks",
            "lock-",
            Retrier::new(RetryPolicy::default(), CancelSignal::new()),
        ));
        let candidate = registrar.register("host-a").await.unwrap();
        let mut guard = LockGuard::pending(candidate, registrar, "/locks");
        guard.mark_acquired();
        (guard, session)
    }

    #[tokio::test]
    async fn test_run_exclusive_returns_output_and_releases() {
        let service = MemoryCoordinationService::new();
        let guard = acquired_guard(&service).await;
        assert!(guard.is_acquired());
        assert_eq!(service.children_of("/locks").len(), 1);

        let value = CriticalSectionRunner::run_exclusive(guard, || async { 42 })
            .await
            .unwrap();

        assert_eq!(value, 42);
        assert!(service.children_of("/locks").is_empty());
    }

    #[tokio::test]
    async fn test_failed_work_still_releases() {
        let service = MemoryCoordinationService::new();
        let guard = acquired_guard(&service).await;

        let outcome = CriticalSectionRunner::run_exclusive(guard, || async {
            Err::<(), _>("work failed")
        })
        .await
        .unwrap();

        assert_eq!(outcome, Err("work failed"));
        assert!(service.children_of("/locks").is_empty());
    }

    #[tokio::test]
    async fn test_panicking_work_releases_then_resumes_panic() {
        let service = MemoryCoordinationService::new();
        let guard = acquired_guard(&service).await;

        let run = CriticalSectionRunner::run_exclusive::<_, _, ()>(guard, || async {
            panic!("boom");
        });
        let result = AssertUnwindSafe(run).catch_unwind().await;

        assert!(result.is_err());
        assert!(service.children_of("/locks").is_empty());
    }

    #[tokio::test]
    async fn test_dropped_guard_releases_in_background() {
        let service = MemoryCoordinationService::new();
        let guard = acquired_guard(&service).await;

        drop(guard);
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(service.children_of("/locks").is_empty());
    }

    #[tokio::test]
    async fn test_release_after_session_expiry_is_surfaced() {
        let service = MemoryCoordinationService::new();
        let (guard, session) = acquired_guard_with_session(&service).await;

        // the candidate vanishes with its session; deleting through a dead session fails
        assert!(service.expire_session(session));
        let err = guard.release().await.unwrap_err();
        assert!(matches!(err, LockError::SessionExpired(_)));
        assert!(service.children_of("/locks").is_empty());
    }
}
