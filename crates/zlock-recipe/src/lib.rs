//! zlock Recipe - Distributed mutual exclusion over a coordination service
//!
//! Every host registers an ephemeral sequential candidate under a persistent
//! lock root; the candidate with the lowest sequence number holds the lock.
//!
//! This crate provides:
//! - `RootNodeManager`, `CandidateRegistrar`, `RankResolver`: the tree operations
//! - `WaitCoordinator`: watch-driven waiting with a polling fallback
//! - `CriticalSectionRunner` and `LockGuard`: release on every exit path
//! - `SequentialLock`: the facade wiring them together

pub mod cancel;
pub mod config;
pub mod lock;
pub mod metrics;
pub mod rank;
pub mod registrar;
mod retry;
pub mod root;
pub mod runner;
pub mod wait;

pub use cancel::CancelSignal;
pub use config::{LockConfig, RetryPolicy};
pub use lock::SequentialLock;
pub use rank::{RankResolver, RankedEntry, RankedView};
pub use registrar::{Candidate, CandidateRegistrar};
pub use root::RootNodeManager;
pub use runner::{CriticalSectionRunner, LockGuard};
pub use wait::{LockHandle, WaitBudget, WaitCoordinator, WaitState};
pub use zlock_common::{LockError, Result};
