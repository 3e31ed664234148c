//! Lock configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};
use zlock_common::{
    DEFAULT_CANDIDATE_PREFIX, DEFAULT_ROOT_PATH, DEFAULT_ROOT_PAYLOAD, LockError, Result, path,
};

/// Bounded retry for transient coordination failures
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts per call, including the first
    pub max_attempts: u32,
    /// Backoff before the second attempt in milliseconds
    pub initial_backoff_ms: u64,
    /// Upper bound for the doubling backoff in milliseconds
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 2000,
        }
    }
}

impl RetryPolicy {
    /// A single attempt, no retries
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Delay after the given failed attempt (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(20);
        let delay = self.initial_backoff_ms.saturating_mul(1u64 << shift);
        Duration::from_millis(delay.min(self.max_backoff_ms))
    }
}

/// Settings for one named lock
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Persistent node all candidates are registered under
    pub root_path: String,
    /// Name prefix of candidate nodes, followed by the sequence suffix
    pub candidate_prefix: String,
    /// Payload written to the root node when it is first created
    pub root_payload: String,
    /// Fallback re-resolve interval when no notification arrives
    pub poll_interval_ms: u64,
    /// Cap for the doubling fallback interval
    pub max_poll_interval_ms: u64,
    /// Elapsed-time budget for one acquisition (None = unbounded)
    pub acquire_timeout_ms: Option<u64>,
    /// Wait-cycle budget for one acquisition (None = unbounded)
    pub max_wait_cycles: Option<u32>,
    pub retry: RetryPolicy,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            root_path: DEFAULT_ROOT_PATH.to_string(),
            candidate_prefix: DEFAULT_CANDIDATE_PREFIX.to_string(),
            root_payload: DEFAULT_ROOT_PAYLOAD.to_string(),
            poll_interval_ms: 2000,
            max_poll_interval_ms: 10000,
            acquire_timeout_ms: None,
            max_wait_cycles: None,
            retry: RetryPolicy::default(),
        }
    }
}

impl LockConfig {
    /// Create a config for the lock rooted at `root_path`
    pub fn new(root_path: &str) -> Self {
        Self {
            root_path: root_path.to_string(),
            ..Default::default()
        }
    }

    pub fn with_candidate_prefix(mut self, prefix: &str) -> Self {
        self.candidate_prefix = prefix.to_string();
        self
    }

    pub fn with_poll_interval(mut self, initial_ms: u64, max_ms: u64) -> Self {
        self.poll_interval_ms = initial_ms;
        self.max_poll_interval_ms = max_ms;
        self
    }

    pub fn with_acquire_timeout(mut self, timeout_ms: u64) -> Self {
        self.acquire_timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_max_wait_cycles(mut self, cycles: u32) -> Self {
        self.max_wait_cycles = Some(cycles);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Path passed to sequential creation, e.g. `/locks/lock-`
    pub fn candidate_base(&self) -> String {
        path::join(&self.root_path, &self.candidate_prefix)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn max_poll_interval(&self) -> Duration {
        Duration::from_millis(self.max_poll_interval_ms)
    }

    pub fn acquire_timeout(&self) -> Option<Duration> {
        self.acquire_timeout_ms.map(Duration::from_millis)
    }

    pub fn validate(&self) -> Result<()> {
        path::validate(&self.root_path).map_err(LockError::InvalidConfig)?;
        if self.root_path == "/" {
            return Err(LockError::InvalidConfig(
                "lock root cannot be the tree root".to_string(),
            ));
        }
        if self.candidate_prefix.is_empty() || self.candidate_prefix.contains('/') {
            return Err(LockError::InvalidConfig(format!(
                "candidate prefix '{}' must be non-empty and contain no '/'",
                self.candidate_prefix
            )));
        }
        if self.poll_interval_ms == 0 {
            return Err(LockError::InvalidConfig(
                "poll interval must be greater than zero".to_string(),
            ));
        }
        if self.max_poll_interval_ms < self.poll_interval_ms {
            return Err(LockError::InvalidConfig(format!(
                "max poll interval {}ms is below poll interval {}ms",
                self.max_poll_interval_ms, self.poll_interval_ms
            )));
        }
        if self.retry.max_attempts == 0 {
            return Err(LockError::InvalidConfig(
                "retry policy needs at least one attempt".to_string(),
            ));
        }
        Ok(())
    }
}
