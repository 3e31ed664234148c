//! zlock Coordination - Client contract for a hierarchical coordination service
//!
//! This crate provides:
//! - `CoordinationClient`: the session-bound operations the lock recipe consumes
//! - Node creation modes and one-shot watch events
//! - `MemoryCoordinationService`: a linearizable in-process tree with sessions,
//!   ephemeral and sequential nodes, watches, and fault injection

pub mod client;
pub mod memory;
pub mod model;

pub use client::CoordinationClient;
pub use memory::{FaultInjector, MemoryCoordinationService, MemorySession};
pub use model::{CreateMode, EventType, SessionId, WatchReceiver, WatchedEvent};
