//! Node and watch model types

use tokio::sync::oneshot;

/// Identifier of a client session with the coordination service
pub type SessionId = u64;

/// How a node is created
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CreateMode {
    /// Survives the creating session
    Persistent,
    /// Deleted when the creating session ends
    Ephemeral,
    /// Persistent with a service-assigned sequence suffix
    PersistentSequential,
    /// Ephemeral with a service-assigned sequence suffix
    EphemeralSequential,
}

impl CreateMode {
    pub fn new(ephemeral: bool, sequential: bool) -> Self {
        match (ephemeral, sequential) {
            (false, false) => CreateMode::Persistent,
            (true, false) => CreateMode::Ephemeral,
            (false, true) => CreateMode::PersistentSequential,
            (true, true) => CreateMode::EphemeralSequential,
        }
    }

    pub fn is_ephemeral(self) -> bool {
        matches!(self, CreateMode::Ephemeral | CreateMode::EphemeralSequential)
    }

    pub fn is_sequential(self) -> bool {
        matches!(
            self,
            CreateMode::PersistentSequential | CreateMode::EphemeralSequential
        )
    }
}

/// Kind of change a watch reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    NodeCreated,
    NodeDeleted,
    NodeDataChanged,
    NodeChildrenChanged,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::NodeCreated => "node_created",
            EventType::NodeDeleted => "node_deleted",
            EventType::NodeDataChanged => "node_data_changed",
            EventType::NodeChildrenChanged => "node_children_changed",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Notification delivered to a one-shot watch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchedEvent {
    pub kind: EventType,
    /// Path the watch was armed on
    pub path: String,
    /// Child names at delivery time, only filled for `NodeChildrenChanged`
    pub children: Vec<String>,
}

impl WatchedEvent {
    pub fn new(kind: EventType, path: impl Into<String>) -> Self {
        Self {
            kind,
            path: path.into(),
            children: Vec::new(),
        }
    }

    pub fn children_changed(path: impl Into<String>, children: Vec<String>) -> Self {
        Self {
            kind: EventType::NodeChildrenChanged,
            path: path.into(),
            children,
        }
    }
}

/// Receiving end of a one-shot watch.
///
/// Resolves once with the first qualifying change. A watch must be re-armed to
/// keep observing.
pub type WatchReceiver = oneshot::Receiver<WatchedEvent>;
