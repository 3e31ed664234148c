//! Error types for zlock
//!
//! This module defines:
//! - `CoordinationError`: failures reported by the coordination service client
//! - `LockError`: failures of the lock acquisition protocol surfaced to callers

use std::time::Duration;

/// Errors reported by a coordination service session.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CoordinationError {
    #[error("node '{0}' already exists")]
    NodeExists(String),

    #[error("node '{0}' does not exist")]
    NoSuchNode(String),

    #[error("parent of node '{0}' does not exist")]
    NoParent(String),

    #[error("node '{0}' still has children")]
    NotEmpty(String),

    #[error("ephemeral node '{0}' cannot have children")]
    NoChildrenForEphemerals(String),

    #[error("invalid node path: {0}")]
    InvalidPath(String),

    #[error("coordination service unavailable: {0}")]
    Unavailable(String),

    #[error("session {0} expired")]
    SessionExpired(u64),
}

impl CoordinationError {
    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, CoordinationError::Unavailable(_))
    }
}

pub type CoordinationResult<T> = std::result::Result<T, CoordinationError>;

/// Errors surfaced by the lock protocol
#[derive(thiserror::Error, Debug)]
pub enum LockError {
    #[error("coordination service unavailable after {attempts} attempt(s): {message}")]
    CoordinationUnavailable { attempts: u32, message: String },

    #[error("session expired: {0}")]
    SessionExpired(String),

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("node '{0}' already exists")]
    NodeExists(String),

    #[error("node '{0}' does not exist")]
    NoSuchNode(String),

    #[error("could not acquire lock '{root}' after {cycles} wait cycle(s) in {elapsed:?}")]
    NotAcquired {
        root: String,
        cycles: u32,
        elapsed: Duration,
    },

    #[error("lock acquisition cancelled")]
    Cancelled,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl LockError {
    /// Fatal errors require the caller to restart from a fresh session.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            LockError::SessionExpired(_) | LockError::ProtocolViolation(_)
        )
    }
}

impl From<CoordinationError> for LockError {
    fn from(value: CoordinationError) -> Self {
        match value {
            CoordinationError::NodeExists(path) => LockError::NodeExists(path),
            CoordinationError::NoSuchNode(path) => LockError::NoSuchNode(path),
            CoordinationError::NoParent(path) => {
                LockError::ProtocolViolation(format!("parent of '{}' is missing", path))
            }
            CoordinationError::NotEmpty(path) => {
                LockError::ProtocolViolation(format!("node '{}' unexpectedly has children", path))
            }
            CoordinationError::NoChildrenForEphemerals(path) => LockError::ProtocolViolation(
                format!("'{}' is ephemeral and cannot hold candidates", path),
            ),
            CoordinationError::InvalidPath(message) => LockError::InvalidConfig(message),
            CoordinationError::Unavailable(message) => LockError::CoordinationUnavailable {
                attempts: 1,
                message,
            },
            CoordinationError::SessionExpired(id) => {
                LockError::SessionExpired(format!("session {} expired", id))
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, LockError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CoordinationError::NodeExists("/locks".to_string());
        assert_eq!(err.to_string(), "node '/locks' already exists");

        let err = LockError::NotAcquired {
            root: "/locks".to_string(),
            cycles: 3,
            elapsed: Duration::from_millis(1500),
        };
        assert_eq!(
            err.to_string(),
            "could not acquire lock '/locks' after 3 wait cycle(s) in 1.5s"
        );

        let err = LockError::CoordinationUnavailable {
            attempts: 4,
            message: "connection refused".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "coordination service unavailable after 4 attempt(s): connection refused"
        );
    }

    #[test]
    fn test_transient_classification() {
        assert!(CoordinationError::Unavailable("down".to_string()).is_transient());
        assert!(!CoordinationError::SessionExpired(7).is_transient());
        assert!(!CoordinationError::NoSuchNode("/a".to_string()).is_transient());
    }

    #[test]
    fn test_from_coordination_error() {
        let err: LockError = CoordinationError::SessionExpired(7).into();
        assert!(matches!(err, LockError::SessionExpired(_)));
        assert!(err.is_fatal());

        let err: LockError = CoordinationError::NoParent("/locks/lock-".to_string()).into();
        assert!(matches!(err, LockError::ProtocolViolation(_)));

        let err: LockError = CoordinationError::Unavailable("timeout".to_string()).into();
        assert!(matches!(
            err,
            LockError::CoordinationUnavailable { attempts: 1, .. }
        ));
        assert!(!err.is_fatal());
    }
}
