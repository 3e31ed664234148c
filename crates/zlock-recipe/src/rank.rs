//! Rank resolution among sibling candidates

use std::sync::Arc;

use tracing::debug;
use zlock_common::{LockError, Result, path};
use zlock_coordination::CoordinationClient;

use crate::registrar::Candidate;
use crate::retry::Retrier;

/// A candidate as observed under the lock root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankedEntry {
    pub node_path: String,
    pub sequence: u64,
    /// Owning host, read from the node payload
    pub host_id: String,
}

/// Snapshot of all candidates ordered by sequence suffix ascending.
///
/// Stale as soon as it is read; a waiter must re-resolve after every wake-up.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RankedView {
    root_path: String,
    entries: Vec<RankedEntry>,
}

impl RankedView {
    pub fn new(root_path: &str, mut entries: Vec<RankedEntry>) -> Self {
        entries.sort_by_key(|e| e.sequence);
        Self {
            root_path: root_path.to_string(),
            entries,
        }
    }

    pub fn root_path(&self) -> &str {
        &self.root_path
    }

    pub fn entries(&self) -> &[RankedEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Current lock holder: the minimum candidate
    pub fn holder(&self) -> Option<&RankedEntry> {
        self.entries.first()
    }

    /// Position of `candidate`; 0 means it holds the lock.
    ///
    /// The entry must match on both path and payload. For an active acquirer
    /// an empty view, a missing entry, or a foreign payload are impossible
    /// states and reported as `ProtocolViolation`.
    pub fn rank_of(&self, candidate: &Candidate) -> Result<usize> {
        if self.entries.is_empty() {
            return Err(LockError::ProtocolViolation(format!(
                "no candidates under '{}' while '{}' is acquiring",
                self.root_path, candidate.host_id
            )));
        }
        let rank = self
            .entries
            .iter()
            .position(|e| e.node_path == candidate.node_path)
            .ok_or_else(|| {
                LockError::ProtocolViolation(format!(
                    "candidate '{}' of '{}' is missing under '{}'",
                    candidate.node_path, candidate.host_id, self.root_path
                ))
            })?;
        let entry = &self.entries[rank];
        if entry.host_id != candidate.host_id {
            return Err(LockError::ProtocolViolation(format!(
                "candidate '{}' is owned by '{}', expected '{}'",
                candidate.node_path, entry.host_id, candidate.host_id
            )));
        }
        Ok(rank)
    }
}

/// Lists and orders the candidates under a lock root
pub struct RankResolver {
    client: Arc<dyn CoordinationClient>,
    root_path: String,
    prefix: String,
    retrier: Retrier,
}

impl RankResolver {
    pub(crate) fn new(
        client: Arc<dyn CoordinationClient>,
        root_path: &str,
        prefix: &str,
        retrier: Retrier,
    ) -> Self {
        Self {
            client,
            root_path: root_path.to_string(),
            prefix: prefix.to_string(),
            retrier,
        }
    }

    /// Read every candidate under the root and order by numeric sequence.
    ///
    /// Children without the candidate prefix and a numeric suffix are
    /// ignored. Candidates deleted between listing and reading are skipped.
    pub async fn resolve_rank(&self) -> Result<RankedView> {
        let client = &self.client;
        let root = self.root_path.as_str();
        let names = self
            .retrier
            .run("get_children", move || client.get_children(root))
            .await?;

        let mut entries = Vec::with_capacity(names.len());
        for name in names {
            let Some(sequence) = path::parse_sequence(&name, &self.prefix) else {
                debug!(root, child = %name, "ignoring foreign child under lock root");
                continue;
            };
            let node_path = path::join(root, &name);
            let node = node_path.as_str();
            match self
                .retrier
                .run("get_data", move || client.get_data(node))
                .await
            {
                Ok(payload) => entries.push(RankedEntry {
                    host_id: String::from_utf8_lossy(&payload).into_owned(),
                    node_path,
                    sequence,
                }),
                Err(LockError::NoSuchNode(_)) => {
                    debug!(root, candidate = %node_path, "candidate vanished while resolving rank");
                }
                Err(e) => return Err(e),
            }
        }

        Ok(RankedView::new(root, entries))
    }

    /// Who holds the lock right now, if anyone.
    ///
    /// Safe to call without being a candidate; a missing or empty root means
    /// the lock is free.
    pub async fn current_holder(&self) -> Result<Option<RankedEntry>> {
        match self.resolve_rank().await {
            Ok(view) => Ok(view.holder().cloned()),
            Err(LockError::NoSuchNode(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelSignal;
    use crate::config::RetryPolicy;
    use crate::registrar::CandidateRegistrar;
    use proptest::prelude::*;
    use zlock_coordination::{CreateMode, MemoryCoordinationService, SessionId};

    fn entry(sequence: u64, host: &str) -> RankedEntry {
        RankedEntry {
            node_path: format!("/locks/lock-{}", sequence),
            sequence,
            host_id: host.to_string(),
        }
    }

    fn candidate(sequence: u64, host: &str) -> Candidate {
        Candidate {
            host_id: host.to_string(),
            node_path: format!("/locks/lock-{}", sequence),
            sequence,
        }
    }

    fn resolver(client: Arc<dyn CoordinationClient>) -> RankResolver {
        RankResolver::new(
            client,
            "/locks",
            "lock-",
            Retrier::new(RetryPolicy::default(), CancelSignal::new()),
        )
    }

    #[test]
    fn test_rank_of() {
        let view = RankedView::new(
            "/locks",
            vec![entry(3, "c"), entry(1, "a"), entry(2, "b")],
        );

        assert_eq!(view.holder().unwrap().host_id, "a");
        assert_eq!(view.rank_of(&candidate(1, "a")).unwrap(), 0);
        assert_eq!(view.rank_of(&candidate(3, "c")).unwrap(), 2);
    }

    #[test]
    fn test_rank_of_impossible_states() {
        let empty = RankedView::new("/locks", Vec::new());
        assert!(matches!(
            empty.rank_of(&candidate(1, "a")),
            Err(LockError::ProtocolViolation(_))
        ));

        let view = RankedView::new("/locks", vec![entry(1, "a")]);
        assert!(matches!(
            view.rank_of(&candidate(2, "b")),
            Err(LockError::ProtocolViolation(_))
        ));
        // right path, wrong owner
        assert!(matches!(
            view.rank_of(&candidate(1, "intruder")),
            Err(LockError::ProtocolViolation(_))
        ));
    }

    #[tokio::test]
    async fn test_resolve_orders_numerically_and_skips_foreign_children() {
        let service = MemoryCoordinationService::new();
        let client: Arc<dyn CoordinationClient> = Arc::new(service.connect());
        client
            .create("/locks", b"", CreateMode::Persistent)
            .await
            .unwrap();
        // narrow suffixes sort wrong lexicographically
        for (name, host) in [("lock-10", "ten"), ("lock-9", "nine"), ("lock-100", "hundred")] {
            client
                .create(&format!("/locks/{}", name), host.as_bytes(), CreateMode::Ephemeral)
                .await
                .unwrap();
        }
        client
            .create("/locks/config", b"", CreateMode::Persistent)
            .await
            .unwrap();

        let view = resolver(client).resolve_rank().await.unwrap();
        let hosts: Vec<&str> = view.entries().iter().map(|e| e.host_id.as_str()).collect();
        assert_eq!(hosts, vec!["nine", "ten", "hundred"]);
        assert_eq!(view.len(), 3);
        assert_eq!(view.root_path(), "/locks");
    }

    #[tokio::test]
    async fn test_current_holder() {
        let service = MemoryCoordinationService::new();
        let client: Arc<dyn CoordinationClient> = Arc::new(service.connect());
        let resolver = resolver(client.clone());

        // root absent
        assert!(resolver.current_holder().await.unwrap().is_none());

        client
            .create("/locks", b"", CreateMode::Persistent)
            .await
            .unwrap();
        assert!(resolver.current_holder().await.unwrap().is_none());

        client
            .create("/locks/lock-", b"host-a", CreateMode::EphemeralSequential)
            .await
            .unwrap();
        client
            .create("/locks/lock-", b"host-b", CreateMode::EphemeralSequential)
            .await
            .unwrap();
        let holder = resolver.current_holder().await.unwrap().unwrap();
        assert_eq!(holder.host_id, "host-a");
        assert_eq!(holder.sequence, 0);
    }

    proptest! {
        #[test]
        fn view_always_puts_lowest_sequence_first(
            sequences in proptest::collection::hash_set(0u64..10_000, 1..20)
        ) {
            let entries: Vec<_> = sequences.iter().map(|s| entry(*s, &s.to_string())).collect();
            let view = RankedView::new("/locks", entries);
            let min = *sequences.iter().min().unwrap();
            prop_assert_eq!(view.holder().unwrap().sequence, min);
            prop_assert!(view.entries().windows(2).all(|w| w[0].sequence < w[1].sequence));
        }
    }

    // ========================================================================
    // Interleavings of register / resolve / release / session loss
    // ========================================================================

    const HOSTS: usize = 4;

    #[derive(Debug, Clone)]
    enum Step {
        Register(usize),
        Resolve(usize),
        ReleaseHolder,
        Expire(usize),
    }

    fn step() -> impl Strategy<Value = Step> {
        prop_oneof![
            3 => (0..HOSTS).prop_map(Step::Register),
            2 => (0..HOSTS).prop_map(Step::Resolve),
            2 => Just(Step::ReleaseHolder),
            1 => (0..HOSTS).prop_map(Step::Expire),
        ]
    }

    struct ContendingHost {
        host_id: String,
        session: SessionId,
        registrar: CandidateRegistrar,
        resolver: RankResolver,
        candidate: Option<Candidate>,
    }

    impl ContendingHost {
        fn connect(service: &MemoryCoordinationService, index: usize) -> Self {
            let session = service.connect();
            let session_id = session.id();
            let client: Arc<dyn CoordinationClient> = Arc::new(session);
            let retrier = Retrier::new(RetryPolicy::default(), CancelSignal::new());
            Self {
                host_id: format!("host-{}", index),
                session: session_id,
                registrar: CandidateRegistrar::new(client.clone(), "/locks", "lock-", retrier.clone()),
                resolver: RankResolver::new(client, "/locks", "lock-", retrier),
                candidate: None,
            }
        }
    }

    /// Every live candidate resolves its own rank through its own session;
    /// exactly the lowest sequence may see rank 0.
    async fn assert_single_holder(
        service: &MemoryCoordinationService,
        hosts: &[ContendingHost],
    ) -> std::result::Result<(), TestCaseError> {
        let live: Vec<&Candidate> = hosts.iter().filter_map(|h| h.candidate.as_ref()).collect();
        prop_assert_eq!(service.children_of("/locks").len(), live.len());

        let mut first = Vec::new();
        for host in hosts {
            let Some(candidate) = &host.candidate else {
                continue;
            };
            let view = host.resolver.resolve_rank().await.unwrap();
            if view.rank_of(candidate).unwrap() == 0 {
                first.push(candidate.sequence);
            }
        }

        match live.iter().map(|c| c.sequence).min() {
            Some(lowest) => prop_assert_eq!(first, vec![lowest]),
            None => prop_assert!(first.is_empty()),
        }
        Ok(())
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn only_the_lowest_candidate_ranks_first(steps in proptest::collection::vec(step(), 1..40)) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            runtime.block_on(async {
                let service = MemoryCoordinationService::new();
                let admin = service.connect();
                admin
                    .create("/locks", b"", CreateMode::Persistent)
                    .await
                    .unwrap();
                let mut hosts: Vec<ContendingHost> =
                    (0..HOSTS).map(|i| ContendingHost::connect(&service, i)).collect();

                for step in steps {
                    match step {
                        Step::Register(i) => {
                            let host = &mut hosts[i];
                            if host.candidate.is_none() {
                                let candidate = host.registrar.register(&host.host_id).await.unwrap();
                                host.candidate = Some(candidate);
                            }
                        }
                        Step::Resolve(i) => {
                            let host = &hosts[i];
                            if let Some(candidate) = &host.candidate {
                                let view = host.resolver.resolve_rank().await.unwrap();
                                let ahead = hosts
                                    .iter()
                                    .filter_map(|h| h.candidate.as_ref())
                                    .filter(|c| c.sequence < candidate.sequence)
                                    .count();
                                prop_assert_eq!(view.rank_of(candidate).unwrap(), ahead);
                            }
                        }
                        Step::ReleaseHolder => {
                            let holder = hosts
                                .iter()
                                .enumerate()
                                .filter_map(|(i, h)| h.candidate.as_ref().map(|c| (c.sequence, i)))
                                .min();
                            if let Some((_, i)) = holder {
                                let host = &mut hosts[i];
                                if let Some(candidate) = host.candidate.take() {
                                    host.registrar.deregister(&candidate).await.unwrap();
                                }
                            }
                        }
                        Step::Expire(i) => {
                            prop_assert!(service.expire_session(hosts[i].session));
                            hosts[i] = ContendingHost::connect(&service, i);
                        }
                    }
                    // covers hand-over too: after a release or expiry the next
                    // lowest candidate is the only one at rank 0
                    assert_single_holder(&service, &hosts).await?;
                }
                Ok::<(), TestCaseError>(())
            })?;
        }
    }
}
