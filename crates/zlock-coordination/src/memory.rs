//! In-memory coordination service
//!
//! A single-process node tree with the semantics the lock recipe relies on:
//! linearizable operations, session-bound ephemeral nodes, per-parent sequence
//! counters, and one-shot watches. Every operation runs under one mutex and
//! watches are delivered after the mutation is applied.
//!
//! Used by the test suites and the demo binary. `FaultInjector` lets tests
//! simulate an unreachable service or dropped notifications.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, info};
use zlock_common::{CoordinationError, CoordinationResult, path};

use crate::client::CoordinationClient;
use crate::model::{CreateMode, EventType, SessionId, WatchReceiver, WatchedEvent};

type WatchSender = oneshot::Sender<WatchedEvent>;

struct ZNode {
    data: Vec<u8>,
    ephemeral_owner: Option<SessionId>,
    children: BTreeSet<String>,
    /// Counter for sequential children
    next_sequence: u64,
}

impl ZNode {
    fn new(data: Vec<u8>, ephemeral_owner: Option<SessionId>) -> Self {
        Self {
            data,
            ephemeral_owner,
            children: BTreeSet::new(),
            next_sequence: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Open,
    Closed,
    Expired,
}

struct SessionEntry {
    state: SessionState,
    ephemerals: HashSet<String>,
}

/// Watch notifications collected while the tree is locked
#[derive(Default)]
struct Fired(Vec<(WatchSender, WatchedEvent)>);

impl Fired {
    fn deliver(self) {
        for (tx, event) in self.0 {
            // receiver may have given up waiting
            let _ = tx.send(event);
        }
    }
}

struct Tree {
    nodes: HashMap<String, ZNode>,
    sessions: HashMap<SessionId, SessionEntry>,
    data_watches: HashMap<String, Vec<WatchSender>>,
    child_watches: HashMap<String, Vec<WatchSender>>,
    /// Watches that were accepted but will never be delivered
    swallowed: Vec<WatchSender>,
    next_session_id: SessionId,
}

impl Tree {
    fn new() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert("/".to_string(), ZNode::new(Vec::new(), None));
        Self {
            nodes,
            sessions: HashMap::new(),
            data_watches: HashMap::new(),
            child_watches: HashMap::new(),
            swallowed: Vec::new(),
            next_session_id: 1,
        }
    }

    fn check_session(&self, id: SessionId) -> CoordinationResult<()> {
        match self.sessions.get(&id).map(|s| s.state) {
            Some(SessionState::Open) => Ok(()),
            _ => Err(CoordinationError::SessionExpired(id)),
        }
    }

    fn children(&self, node_path: &str) -> CoordinationResult<Vec<String>> {
        self.nodes
            .get(node_path)
            .map(|n| n.children.iter().cloned().collect())
            .ok_or_else(|| CoordinationError::NoSuchNode(node_path.to_string()))
    }

    fn create(
        &mut self,
        session: SessionId,
        node_path: &str,
        data: &[u8],
        mode: CreateMode,
        fired: &mut Fired,
    ) -> CoordinationResult<String> {
        if node_path == "/" {
            return Err(CoordinationError::NodeExists("/".to_string()));
        }
        let parent_path = path::parent(node_path)
            .ok_or_else(|| CoordinationError::InvalidPath(node_path.to_string()))?
            .to_string();

        let (parent_is_ephemeral, sequence) = match self.nodes.get(&parent_path) {
            Some(parent) => (parent.ephemeral_owner.is_some(), parent.next_sequence),
            None => return Err(CoordinationError::NoParent(node_path.to_string())),
        };
        if parent_is_ephemeral {
            return Err(CoordinationError::NoChildrenForEphemerals(parent_path));
        }

        let actual = if mode.is_sequential() {
            format!("{}{}", node_path, path::format_sequence(sequence))
        } else {
            node_path.to_string()
        };
        path::validate(&actual).map_err(CoordinationError::InvalidPath)?;
        if self.nodes.contains_key(&actual) {
            return Err(CoordinationError::NodeExists(actual));
        }

        if let Some(parent) = self.nodes.get_mut(&parent_path) {
            if mode.is_sequential() {
                parent.next_sequence += 1;
            }
            parent.children.insert(path::name(&actual).to_string());
        }

        let owner = mode.is_ephemeral().then_some(session);
        self.nodes
            .insert(actual.clone(), ZNode::new(data.to_vec(), owner));
        if owner.is_some()
            && let Some(entry) = self.sessions.get_mut(&session)
        {
            entry.ephemerals.insert(actual.clone());
        }

        debug!(path = %actual, ?mode, session, "node created");
        self.fire_node(&actual, EventType::NodeCreated, fired);
        self.fire_children(&parent_path, fired);
        Ok(actual)
    }

    fn delete(&mut self, node_path: &str, fired: &mut Fired) -> CoordinationResult<()> {
        if node_path == "/" {
            return Err(CoordinationError::InvalidPath(
                "the tree root cannot be deleted".to_string(),
            ));
        }
        let Some(node) = self.nodes.remove(node_path) else {
            return Err(CoordinationError::NoSuchNode(node_path.to_string()));
        };
        if !node.children.is_empty() {
            self.nodes.insert(node_path.to_string(), node);
            return Err(CoordinationError::NotEmpty(node_path.to_string()));
        }

        let parent_path = path::parent(node_path).map(str::to_string);
        if let Some(parent_path) = &parent_path
            && let Some(parent) = self.nodes.get_mut(parent_path)
        {
            parent.children.remove(path::name(node_path));
        }
        if let Some(owner) = node.ephemeral_owner
            && let Some(entry) = self.sessions.get_mut(&owner)
        {
            entry.ephemerals.remove(node_path);
        }

        debug!(path = %node_path, "node deleted");
        self.fire_node(node_path, EventType::NodeDeleted, fired);
        for tx in self.child_watches.remove(node_path).unwrap_or_default() {
            fired
                .0
                .push((tx, WatchedEvent::new(EventType::NodeDeleted, node_path)));
        }
        if let Some(parent_path) = parent_path {
            self.fire_children(&parent_path, fired);
        }
        Ok(())
    }

    fn set_data(&mut self, node_path: &str, data: &[u8], fired: &mut Fired) -> CoordinationResult<()> {
        let node = self
            .nodes
            .get_mut(node_path)
            .ok_or_else(|| CoordinationError::NoSuchNode(node_path.to_string()))?;
        node.data = data.to_vec();
        self.fire_node(node_path, EventType::NodeDataChanged, fired);
        Ok(())
    }

    fn end_session(&mut self, id: SessionId, state: SessionState, fired: &mut Fired) -> bool {
        let Some(entry) = self.sessions.get_mut(&id) else {
            return false;
        };
        if entry.state != SessionState::Open {
            return false;
        }
        entry.state = state;
        let mut ephemerals: Vec<String> = entry.ephemerals.drain().collect();
        ephemerals.sort();
        for node_path in ephemerals {
            // ephemeral nodes never have children, so this only races with
            // a concurrent explicit delete that already removed the node
            let _ = self.delete(&node_path, fired);
        }
        true
    }

    fn fire_node(&mut self, node_path: &str, kind: EventType, fired: &mut Fired) {
        for tx in self.data_watches.remove(node_path).unwrap_or_default() {
            fired.0.push((tx, WatchedEvent::new(kind, node_path)));
        }
    }

    fn fire_children(&mut self, node_path: &str, fired: &mut Fired) {
        let Some(watchers) = self.child_watches.remove(node_path) else {
            return;
        };
        let children = self.children(node_path).unwrap_or_default();
        for tx in watchers {
            fired.0.push((
                tx,
                WatchedEvent::children_changed(node_path, children.clone()),
            ));
        }
    }

    fn arm_node_watch(&mut self, node_path: &str, swallow: bool) -> WatchReceiver {
        let (tx, rx) = oneshot::channel();
        if !self.nodes.contains_key(node_path) {
            let _ = tx.send(WatchedEvent::new(EventType::NodeDeleted, node_path));
            return rx;
        }
        if swallow {
            self.swallow(tx);
        } else {
            let watchers = self.data_watches.entry(node_path.to_string()).or_default();
            watchers.retain(|w| !w.is_closed());
            watchers.push(tx);
        }
        rx
    }

    fn swallow(&mut self, tx: WatchSender) {
        self.swallowed.retain(|w| !w.is_closed());
        self.swallowed.push(tx);
    }

    fn arm_children_watch(
        &mut self,
        node_path: &str,
        swallow: bool,
    ) -> CoordinationResult<WatchReceiver> {
        if !self.nodes.contains_key(node_path) {
            return Err(CoordinationError::NoSuchNode(node_path.to_string()));
        }
        let (tx, rx) = oneshot::channel();
        if swallow {
            self.swallow(tx);
        } else {
            let watchers = self.child_watches.entry(node_path.to_string()).or_default();
            watchers.retain(|w| !w.is_closed());
            watchers.push(tx);
        }
        Ok(rx)
    }
}

/// Switches for simulating an unreliable coordination service
#[derive(Debug, Default)]
pub struct FaultInjector {
    fail_next: AtomicU32,
    drop_watches: AtomicBool,
}

impl FaultInjector {
    /// Make the next `count` session operations fail with `Unavailable`.
    pub fn fail_next(&self, count: u32) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    /// Accept new watches but never deliver them.
    pub fn drop_watches(&self, enabled: bool) {
        self.drop_watches.store(enabled, Ordering::SeqCst);
    }

    pub fn is_dropping_watches(&self) -> bool {
        self.drop_watches.load(Ordering::SeqCst)
    }

    pub fn pending_failures(&self) -> u32 {
        self.fail_next.load(Ordering::SeqCst)
    }

    fn check(&self) -> CoordinationResult<()> {
        let tripped = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if tripped {
            Err(CoordinationError::Unavailable("injected fault".to_string()))
        } else {
            Ok(())
        }
    }
}

/// In-process coordination service shared by any number of sessions
#[derive(Clone)]
pub struct MemoryCoordinationService {
    tree: Arc<Mutex<Tree>>,
    faults: Arc<FaultInjector>,
}

impl MemoryCoordinationService {
    pub fn new() -> Self {
        Self {
            tree: Arc::new(Mutex::new(Tree::new())),
            faults: Arc::new(FaultInjector::default()),
        }
    }

    /// Open a new session
    pub fn connect(&self) -> MemorySession {
        let id = {
            let mut tree = self.tree.lock();
            let id = tree.next_session_id;
            tree.next_session_id += 1;
            tree.sessions.insert(
                id,
                SessionEntry {
                    state: SessionState::Open,
                    ephemerals: HashSet::new(),
                },
            );
            id
        };
        debug!(session = id, "session opened");
        MemorySession {
            service: self.clone(),
            id,
        }
    }

    /// Simulate loss of a session: its ephemeral nodes are deleted and later
    /// calls through it fail with `SessionExpired`.
    pub fn expire_session(&self, id: SessionId) -> bool {
        let expired = self.end_session(id, SessionState::Expired);
        if expired {
            info!(session = id, "session expired");
        }
        expired
    }

    /// Replace the payload of a node, firing data watches.
    pub fn set_data(&self, node_path: &str, payload: &[u8]) -> CoordinationResult<()> {
        let mut fired = Fired::default();
        let result = self.tree.lock().set_data(node_path, payload, &mut fired);
        fired.deliver();
        result
    }

    pub fn faults(&self) -> &FaultInjector {
        &self.faults
    }

    /// Child names of `node_path` in lexicographic order, empty if absent.
    pub fn children_of(&self, node_path: &str) -> Vec<String> {
        self.tree.lock().children(node_path).unwrap_or_default()
    }

    pub fn node_exists(&self, node_path: &str) -> bool {
        self.tree.lock().nodes.contains_key(node_path)
    }

    /// Number of nodes, not counting the tree root.
    pub fn node_count(&self) -> usize {
        self.tree.lock().nodes.len() - 1
    }

    pub fn open_sessions(&self) -> usize {
        self.tree
            .lock()
            .sessions
            .values()
            .filter(|s| s.state == SessionState::Open)
            .count()
    }

    fn end_session(&self, id: SessionId, state: SessionState) -> bool {
        let mut fired = Fired::default();
        let ended = self.tree.lock().end_session(id, state, &mut fired);
        fired.deliver();
        ended
    }

    fn with_session<T>(
        &self,
        id: SessionId,
        f: impl FnOnce(&mut Tree, &mut Fired) -> CoordinationResult<T>,
    ) -> CoordinationResult<T> {
        self.faults.check()?;
        let mut fired = Fired::default();
        let result = {
            let mut tree = self.tree.lock();
            match tree.check_session(id) {
                Ok(()) => f(&mut *tree, &mut fired),
                Err(e) => Err(e),
            }
        };
        fired.deliver();
        result
    }
}

impl Default for MemoryCoordinationService {
    fn default() -> Self {
        Self::new()
    }
}

/// A client session against [`MemoryCoordinationService`].
///
/// Dropping the session closes it, which deletes its ephemeral nodes just as
/// a crashed process would lose them.
pub struct MemorySession {
    service: MemoryCoordinationService,
    id: SessionId,
}

impl MemorySession {
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Close the session. Returns false if it had already ended.
    pub fn close(&self) -> bool {
        let closed = self.service.end_session(self.id, SessionState::Closed);
        if closed {
            debug!(session = self.id, "session closed");
        }
        closed
    }

    pub fn is_open(&self) -> bool {
        self.service.tree.lock().check_session(self.id).is_ok()
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        self.close();
    }
}

#[async_trait]
impl CoordinationClient for MemorySession {
    fn session_id(&self) -> SessionId {
        self.id
    }

    async fn exists(&self, node_path: &str) -> CoordinationResult<bool> {
        self.service
            .with_session(self.id, |tree, _| Ok(tree.nodes.contains_key(node_path)))
    }

    async fn create(
        &self,
        node_path: &str,
        payload: &[u8],
        mode: CreateMode,
    ) -> CoordinationResult<String> {
        let id = self.id;
        self.service.with_session(id, |tree, fired| {
            tree.create(id, node_path, payload, mode, fired)
        })
    }

    async fn delete(&self, node_path: &str) -> CoordinationResult<()> {
        self.service
            .with_session(self.id, |tree, fired| tree.delete(node_path, fired))
    }

    async fn get_children(&self, node_path: &str) -> CoordinationResult<Vec<String>> {
        self.service
            .with_session(self.id, |tree, _| tree.children(node_path))
    }

    async fn get_data(&self, node_path: &str) -> CoordinationResult<Vec<u8>> {
        self.service.with_session(self.id, |tree, _| {
            tree.nodes
                .get(node_path)
                .map(|n| n.data.clone())
                .ok_or_else(|| CoordinationError::NoSuchNode(node_path.to_string()))
        })
    }

    async fn watch_children(&self, node_path: &str) -> CoordinationResult<WatchReceiver> {
        let swallow = self.service.faults.is_dropping_watches();
        self.service.with_session(self.id, |tree, _| {
            tree.arm_children_watch(node_path, swallow)
        })
    }

    async fn watch_node(&self, node_path: &str) -> CoordinationResult<WatchReceiver> {
        let swallow = self.service.faults.is_dropping_watches();
        self.service
            .with_session(self.id, |tree, _| Ok(tree.arm_node_watch(node_path, swallow)))
    }
}
