//! Coordination service client contract

use async_trait::async_trait;
use zlock_common::CoordinationResult;

use crate::model::{CreateMode, SessionId, WatchReceiver};

/// Operations on a hierarchical, linearizable node tree, bound to one session.
///
/// Ephemeral nodes created through a client live exactly as long as its
/// session. Every call on an ended session fails with `SessionExpired`;
/// transport failures surface as `Unavailable`.
#[async_trait]
pub trait CoordinationClient: Send + Sync {
    /// Session this client is bound to
    fn session_id(&self) -> SessionId;

    async fn exists(&self, path: &str) -> CoordinationResult<bool>;

    /// Create a node and return its actual path.
    ///
    /// Sequential modes append a zero-padded, monotonically increasing counter
    /// kept by the parent. Fails with `NodeExists` or `NoParent`.
    async fn create(&self, path: &str, payload: &[u8], mode: CreateMode)
    -> CoordinationResult<String>;

    /// Fails with `NoSuchNode` if the node is absent.
    async fn delete(&self, path: &str) -> CoordinationResult<()>;

    /// Child names of `path`, in no particular order.
    async fn get_children(&self, path: &str) -> CoordinationResult<Vec<String>>;

    async fn get_data(&self, path: &str) -> CoordinationResult<Vec<u8>>;

    /// One-shot watch on the child set of `path`.
    async fn watch_children(&self, path: &str) -> CoordinationResult<WatchReceiver>;

    /// One-shot watch on data change or deletion of `path`.
    ///
    /// If the node is already gone the receiver resolves immediately with
    /// `NodeDeleted`.
    async fn watch_node(&self, path: &str) -> CoordinationResult<WatchReceiver>;
}
