//! Candidate registration

use std::sync::Arc;

use tracing::{debug, info};
use zlock_common::{CoordinationError, LockError, Result, path};
use zlock_coordination::{CoordinationClient, CreateMode};

use crate::retry::Retrier;

/// One host's registered bid for the lock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// Identifier of the requesting host, stored as the node payload
    pub host_id: String,
    /// Full path assigned by the coordination service
    pub node_path: String,
    /// Numeric sequence suffix of `node_path`
    pub sequence: u64,
}

impl Candidate {
    /// Node name without the root path
    pub fn name(&self) -> &str {
        path::name(&self.node_path)
    }
}

/// Creates and deletes ephemeral sequential candidate nodes under the lock root
pub struct CandidateRegistrar {
    client: Arc<dyn CoordinationClient>,
    root_path: String,
    prefix: String,
    retrier: Retrier,
}

impl CandidateRegistrar {
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

    /// Register a new candidate for `host_id`.
    ///
    /// Attempted exactly once: a blind retry after a lost reply could leave a
    /// second candidate for the same host behind.
    pub async fn register(&self, host_id: &str) -> Result<Candidate> {
        let base = path::join(&self.root_path, &self.prefix);
        let node_path = self
            .client
            .create(&base, host_id.as_bytes(), CreateMode::EphemeralSequential)
            .await
            .map_err(|e| match e {
                CoordinationError::NoParent(_) => LockError::ProtocolViolation(format!(
                    "lock root '{}' vanished before candidate registration",
                    self.root_path
                )),
                other => other.into(),
            })?;

        let sequence = path::parse_sequence(path::name(&node_path), &self.prefix).ok_or_else(
            || {
                LockError::ProtocolViolation(format!(
                    "coordination service returned non-sequential candidate '{}'",
                    node_path
                ))
            },
        )?;

        info!(host_id, candidate = %node_path, sequence, "registered lock candidate");
        Ok(Candidate {
            host_id: host_id.to_string(),
            node_path,
            sequence,
        })
    }

    /// Delete a candidate. A candidate that is already gone counts as deleted.
    ///
    /// Runs to completion even if the acquisition was cancelled.
    pub async fn deregister(&self, candidate: &Candidate) -> Result<()> {
        let client = &self.client;
        let node = candidate.node_path.as_str();
        match self
            .retrier
            .detached()
            .run("delete_candidate", move || client.delete(node))
            .await
        {
            Ok(()) => {
                debug!(host_id = %candidate.host_id, candidate = %node, "deleted lock candidate");
                Ok(())
            }
            Err(LockError::NoSuchNode(_)) => {
                debug!(host_id = %candidate.host_id, candidate = %node, "lock candidate already gone");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
