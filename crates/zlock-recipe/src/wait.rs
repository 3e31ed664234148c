//! Wait loop between registration and ownership

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info};
use zlock_common::{LockError, Result};
use zlock_coordination::{CoordinationClient, WatchedEvent};

use crate::config::LockConfig;
use crate::metrics;
use crate::rank::{RankResolver, RankedView};
use crate::registrar::Candidate;
use crate::retry::Retrier;

/// Where an acquisition currently stands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitState {
    /// Candidate exists, rank not yet checked
    Registered,
    /// Behind `holder`, watching its node
    Waiting { holder: String },
    /// Woken by a notification or the fallback timer; rank must be re-read
    Notified,
    /// First in rank
    Acquired,
}

impl fmt::Display for WaitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WaitState::Registered => write!(f, "registered"),
            WaitState::Waiting { holder } => write!(f, "waiting on {}", holder),
            WaitState::Notified => write!(f, "notified"),
            WaitState::Acquired => write!(f, "acquired"),
        }
    }
}

/// Limits on how long one acquisition may wait
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WaitBudget {
    /// Elapsed-time limit, `None` for unbounded
    pub timeout: Option<Duration>,
    /// Wait-cycle limit, `None` for unbounded
    pub max_cycles: Option<u32>,
}

impl WaitBudget {
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Give up as soon as another candidate is ahead
    pub fn immediate() -> Self {
        Self {
            timeout: Some(Duration::ZERO),
            max_cycles: Some(0),
        }
    }

    pub fn from_config(config: &LockConfig) -> Self {
        Self {
            timeout: config.acquire_timeout(),
            max_cycles: config.max_wait_cycles,
        }
    }

    fn exhausted(&self, cycles: u32, elapsed: Duration) -> bool {
        self.max_cycles.is_some_and(|max| cycles >= max)
            || self.timeout.is_some_and(|timeout| elapsed >= timeout)
    }

    fn remaining(&self, elapsed: Duration) -> Option<Duration> {
        self.timeout.map(|timeout| timeout.saturating_sub(elapsed))
    }
}

/// Proof that a candidate was first in rank when last resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockHandle {
    pub candidate: Candidate,
    /// Wait cycles spent behind other holders
    pub cycles: u32,
    /// Time from the first rank check to ownership
    pub waited: Duration,
}

enum Wake {
    Notified(WatchedEvent),
    Fallback,
    Closed,
}

/// Blocks a registered candidate until it becomes the minimum.
///
/// The watch on the current holder is the primary wake-up; a doubling poll
/// interval covers notifications the service coalesces or loses. Every
/// wake-up re-reads the full ranking.
pub struct WaitCoordinator {
    client: Arc<dyn CoordinationClient>,
    resolver: Arc<RankResolver>,
    root_path: String,
    poll_interval: Duration,
    max_poll_interval: Duration,
    retrier: Retrier,
}

impl WaitCoordinator {
    pub(crate) fn new(
        client: Arc<dyn CoordinationClient>,
        resolver: Arc<RankResolver>,
        config: &LockConfig,
        retrier: Retrier,
    ) -> Self {
        Self {
            client,
            resolver,
            root_path: config.root_path.clone(),
            poll_interval: config.poll_interval(),
            max_poll_interval: config.max_poll_interval(),
            retrier,
        }
    }

    pub async fn wait_until_first(
        &self,
        candidate: &Candidate,
        budget: &WaitBudget,
    ) -> Result<LockHandle> {
        let started = Instant::now();
        let cancel = self.retrier.cancel_signal();
        let mut cycles = 0u32;
        let mut poll = self.poll_interval;
        let mut state = WaitState::Registered;

        loop {
            if cancel.is_cancelled() {
                debug!(candidate = %candidate.node_path, %state, "acquisition cancelled");
                return Err(LockError::Cancelled);
            }

            let view = self.resolver.resolve_rank().await?;
            let rank = view.rank_of(candidate)?;
            if rank == 0 {
                self.transition(candidate, &mut state, WaitState::Acquired);
                let waited = started.elapsed();
                info!(
                    host_id = %candidate.host_id,
                    candidate = %candidate.node_path,
                    cycles,
                    ?waited,
                    "lock acquired"
                );
                return Ok(LockHandle {
                    candidate: candidate.clone(),
                    cycles,
                    waited,
                });
            }

            let elapsed = started.elapsed();
            if budget.exhausted(cycles, elapsed) {
                debug!(candidate = %candidate.node_path, rank, cycles, "wait budget exhausted");
                return Err(LockError::NotAcquired {
                    root: self.root_path.clone(),
                    cycles,
                    elapsed,
                });
            }

            let holder = holder_ahead(&view, candidate)?;
            self.transition(
                candidate,
                &mut state,
                WaitState::Waiting {
                    holder: holder.clone(),
                },
            );
            debug!(candidate = %candidate.node_path, rank, holder = %holder, "waiting behind holder");

            let client = &self.client;
            let target = holder.as_str();
            let watch = self
                .retrier
                .run("watch_node", move || client.watch_node(target))
                .await?;

            let nap = budget
                .remaining(elapsed)
                .map_or(poll, |remaining| poll.min(remaining));
            let wake = tokio::select! {
                event = watch => match event {
                    Ok(event) => Wake::Notified(event),
                    Err(_) => Wake::Closed,
                },
                _ = tokio::time::sleep(nap) => Wake::Fallback,
                _ = cancel.cancelled() => return Err(LockError::Cancelled),
            };

            cycles += 1;
            match wake {
                Wake::Notified(event) => {
                    debug!(candidate = %candidate.node_path, event = %event.kind, path = %event.path, "holder changed");
                    metrics::record_wait_cycle(&self.root_path, false);
                    poll = self.poll_interval;
                }
                Wake::Fallback => {
                    debug!(candidate = %candidate.node_path, cycle = cycles, ?nap, "no notification, re-resolving");
                    metrics::record_wait_cycle(&self.root_path, true);
                    poll = (poll * 2).min(self.max_poll_interval);
                }
                Wake::Closed => {
                    // the watch is gone; wait out the interval instead of spinning
                    debug!(candidate = %candidate.node_path, "watch closed without an event");
                    tokio::select! {
                        _ = tokio::time::sleep(nap) => {}
                        _ = cancel.cancelled() => return Err(LockError::Cancelled),
                    }
                    metrics::record_wait_cycle(&self.root_path, true);
                }
            }
            self.transition(candidate, &mut state, WaitState::Notified);
            self.transition(candidate, &mut state, WaitState::Registered);
        }
    }

    fn transition(&self, candidate: &Candidate, state: &mut WaitState, next: WaitState) {
        debug!(candidate = %candidate.node_path, from = %state, to = %next, "wait state");
        *state = next;
    }
}

/// The node a waiting candidate watches. A ranked view behind the candidate
/// always has a holder, so an empty one is a broken invariant.
fn holder_ahead(view: &RankedView, candidate: &Candidate) -> Result<String> {
    view.holder()
        .map(|h| h.node_path.clone())
        .ok_or_else(|| {
            LockError::ProtocolViolation(format!(
                "'{}' is behind an empty ranking under '{}'",
                candidate.node_path,
                view.root_path()
            ))
        })
}
