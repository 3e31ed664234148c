//! Lock root node management

use std::sync::Arc;

use tracing::{debug, info};
use zlock_common::{LockError, Result, path};
use zlock_coordination::{CoordinationClient, CreateMode};

use crate::retry::Retrier;

/// Ensures the persistent root node of a lock exists.
pub struct RootNodeManager {
    client: Arc<dyn CoordinationClient>,
    root_path: String,
    payload: Vec<u8>,
    retrier: Retrier,
}

impl RootNodeManager {
    pub(crate) fn new(
        client: Arc<dyn CoordinationClient>,
        root_path: &str,
        payload: &str,
        retrier: Retrier,
    ) -> Self {
        Self {
            client,
            root_path: root_path.to_string(),
            payload: payload.as_bytes().to_vec(),
            retrier,
        }
    }

    pub fn root_path(&self) -> &str {
        &self.root_path
    }

    /// Create the root node, and any missing ancestors, if absent.
    ///
    /// Idempotent across hosts: losing the creation race to another host
    /// (`NodeExists`) counts as success.
    pub async fn ensure_root(&self) -> Result<()> {
        let client = &self.client;
        for node in path::lineage(&self.root_path) {
            let node = node.as_str();
            if self.retrier.run("exists", move || client.exists(node)).await? {
                continue;
            }

            let payload: &[u8] = if node == self.root_path {
                &self.payload
            } else {
                &[]
            };
            let created = self
                .retrier
                .run("create_root", move || {
                    client.create(node, payload, CreateMode::Persistent)
                })
                .await;
            match created {
                Ok(_) => info!(path = %node, "created lock root node"),
                Err(LockError::NodeExists(_)) => {
                    debug!(path = %node, "lock root node created concurrently by another host")
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}
