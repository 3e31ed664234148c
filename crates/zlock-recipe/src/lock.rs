//! Distributed lock facade

use std::future::Future;
use std::sync::Arc;

use tracing::{debug, warn};
use zlock_common::{LockError, Result};
use zlock_coordination::CoordinationClient;

use crate::cancel::CancelSignal;
use crate::config::LockConfig;
use crate::metrics;
use crate::rank::{RankResolver, RankedEntry};
use crate::registrar::CandidateRegistrar;
use crate::retry::Retrier;
use crate::root::RootNodeManager;
use crate::runner::{CriticalSectionRunner, LockGuard};
use crate::wait::{WaitBudget, WaitCoordinator};

/// Mutual exclusion across hosts sharing one coordination service.
///
/// Each host builds its own `SequentialLock` over its own session. An
/// acquisition ensures the root exists, registers one candidate, waits until
/// that candidate is the minimum, and hands back a [`LockGuard`]. Every
/// abandoned acquisition deletes its candidate.
pub struct SequentialLock {
    host_id: String,
    config: LockConfig,
    cancel: CancelSignal,
    root: RootNodeManager,
    registrar: Arc<CandidateRegistrar>,
    resolver: Arc<RankResolver>,
    waiter: WaitCoordinator,
}

impl SequentialLock {
    pub fn new(
        client: Arc<dyn CoordinationClient>,
        host_id: &str,
        config: LockConfig,
    ) -> Result<Self> {
        Self::with_cancel(client, host_id, config, CancelSignal::new())
    }

    /// Build a lock whose acquisitions abort when `cancel` fires
    pub fn with_cancel(
        client: Arc<dyn CoordinationClient>,
        host_id: &str,
        config: LockConfig,
        cancel: CancelSignal,
    ) -> Result<Self> {
        config.validate()?;
        if host_id.is_empty() {
            return Err(LockError::InvalidConfig(
                "host id must not be empty".to_string(),
            ));
        }

        let retrier = Retrier::new(config.retry.clone(), cancel.clone());
        let root = RootNodeManager::new(
            client.clone(),
            &config.root_path,
            &config.root_payload,
            retrier.clone(),
        );
        let registrar = Arc::new(CandidateRegistrar::new(
            client.clone(),
            &config.root_path,
            &config.candidate_prefix,
            retrier.clone(),
        ));
        let resolver = Arc::new(RankResolver::new(
            client.clone(),
            &config.root_path,
            &config.candidate_prefix,
            retrier.clone(),
        ));
        let waiter = WaitCoordinator::new(client, resolver.clone(), &config, retrier);

        Ok(Self {
            host_id: host_id.to_string(),
            config,
            cancel,
            root,
            registrar,
            resolver,
            waiter,
        })
    }

    pub fn host_id(&self) -> &str {
        &self.host_id
    }

    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    pub fn cancel_signal(&self) -> &CancelSignal {
        &self.cancel
    }

    /// Abort in-flight and future acquisitions of this lock
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Block until the lock is held, within the configured budget
    pub async fn acquire(&self) -> Result<LockGuard> {
        self.acquire_within(&WaitBudget::from_config(&self.config))
            .await
    }

    /// Take the lock only if no other candidate is ahead
    pub async fn try_acquire(&self) -> Result<Option<LockGuard>> {
        match self.acquire_within(&WaitBudget::immediate()).await {
            Ok(guard) => Ok(Some(guard)),
            Err(LockError::NotAcquired { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn acquire_within(&self, budget: &WaitBudget) -> Result<LockGuard> {
        let root_path = self.config.root_path.as_str();
        if self.cancel.is_cancelled() {
            metrics::record_acquire_failure(root_path, failure_reason(&LockError::Cancelled));
            return Err(LockError::Cancelled);
        }

        if let Err(e) = self.root.ensure_root().await {
            metrics::record_acquire_failure(root_path, failure_reason(&e));
            return Err(e);
        }
        let candidate = match self.registrar.register(&self.host_id).await {
            Ok(candidate) => candidate,
            Err(e) => {
                metrics::record_acquire_failure(root_path, failure_reason(&e));
                return Err(e);
            }
        };

        // from here on the guard owns the candidate, even if this future is dropped
        let mut guard = LockGuard::pending(candidate, self.registrar.clone(), root_path);
        match self.waiter.wait_until_first(guard.candidate(), budget).await {
            Ok(handle) => {
                guard.mark_acquired();
                metrics::record_acquired(root_path, handle.waited);
                Ok(guard)
            }
            Err(e) => {
                metrics::record_acquire_failure(root_path, failure_reason(&e));
                debug!(host_id = %self.host_id, "abandoning acquisition: {}", e);
                if let Err(cleanup) = guard.release().await {
                    warn!(
                        host_id = %self.host_id,
                        "failed to delete abandoned candidate: {}",
                        cleanup
                    );
                }
                Err(e)
            }
        }
    }

    /// Acquire, run `work` exclusively, release; returns the output of `work`
    pub async fn run_exclusive<F, Fut, T>(&self, work: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let guard = self.acquire().await?;
        CriticalSectionRunner::run_exclusive(guard, work).await
    }

    /// The candidate currently holding the lock, if any
    pub async fn current_holder(&self) -> Result<Option<RankedEntry>> {
        self.resolver.current_holder().await
    }

    /// Whether a different host holds the lock right now
    pub async fn is_held_by_other(&self) -> Result<bool> {
        Ok(self
            .current_holder()
            .await?
            .is_some_and(|holder| holder.host_id != self.host_id))
    }
}

fn failure_reason(error: &LockError) -> &'static str {
    match error {
        LockError::CoordinationUnavailable { .. } => "unavailable",
        LockError::SessionExpired(_) => "session_expired",
        LockError::ProtocolViolation(_) => "protocol_violation",
        LockError::NodeExists(_) | LockError::NoSuchNode(_) => "conflict",
        LockError::NotAcquired { .. } => "budget_exhausted",
        LockError::Cancelled => "cancelled",
        LockError::InvalidConfig(_) => "invalid_config",
    }
}
