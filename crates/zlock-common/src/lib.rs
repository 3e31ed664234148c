//! zlock Common - Shared types and utilities
//!
//! This crate provides the foundational types used across all zlock components:
//! - Error types for the coordination client and the lock protocol
//! - Node path helpers and sequence suffix parsing
//! - Common constants

pub mod error;
pub mod path;

// Re-exports for convenience
pub use error::{CoordinationError, CoordinationResult, LockError, Result};

/// Default namespace node under which candidates are registered
pub const DEFAULT_ROOT_PATH: &str = "/locks";

/// Default name prefix of candidate nodes
pub const DEFAULT_CANDIDATE_PREFIX: &str = "lock-";

/// Payload stored on the root node when it is first created
pub const DEFAULT_ROOT_PAYLOAD: &str = "root node";
