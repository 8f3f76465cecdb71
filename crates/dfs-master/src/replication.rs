//! Synchronous fan-out of operation log entries to peer coordinators

use crate::oplog::OperationLogEntry;
use dfs_common::config::{NetworkConfig, ReplicationConfig};
use dfs_common::rpc::CoordinatorClient;
use dfs_common::{DfsError, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub struct Replicator {
    peers: Vec<Arc<CoordinatorClient>>,
    /// Acknowledgements needed, the local append counts as one
    required_acks: usize,
    timeout: Duration,
}

impl Replicator {
    pub fn new(peer_addresses: Vec<String>, required_acks: usize, timeout: Duration, network: &NetworkConfig) -> Self {
        let peers = peer_addresses
            .into_iter()
            .map(|address| Arc::new(CoordinatorClient::new(address, network.clone())))
            .collect::<Vec<_>>();
        info!(
            "Replicating operation log to {} peers (quorum {})",
            peers.len(),
            required_acks
        );
        Self {
            peers,
            required_acks,
            timeout,
        }
    }

    /// Build from config; `None` when replication is disabled
    pub fn from_config(config: &ReplicationConfig, network: &NetworkConfig, own_hostname: &str) -> Option<Self> {
        if !config.enabled {
            return None;
        }
        Some(Self::new(
            config.peer_addresses(own_hostname),
            config.required_acks,
            Duration::from_millis(config.timeout_ms),
            network,
        ))
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn required_acks(&self) -> usize {
        self.required_acks
    }

    /// Send `entry` to every peer and wait for a quorum of acknowledgements
    ///
    /// Returns as soon as the quorum is reached; stragglers keep running in
    /// the background.
    pub async fn replicate(&self, entry: &OperationLogEntry) -> Result<()> {
        let mut acks = 1usize;
        if acks >= self.required_acks {
            return Ok(());
        }

        let payload = entry.to_bytes()?;
        let (tx, mut rx) = mpsc::channel(self.peers.len().max(1));
        for peer in &self.peers {
            let peer = peer.clone();
            let payload = payload.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                let outcome = peer.replicate_log(payload).await;
                if let Err(e) = &outcome {
                    warn!("Failed to replicate log entry to {}: {}", peer.address(), e);
                }
                let _ = tx.send(outcome.is_ok()).await;
            });
        }
        drop(tx);

        let deadline = tokio::time::sleep(self.timeout);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                received = rx.recv() => match received {
                    Some(true) => {
                        acks += 1;
                        if acks >= self.required_acks {
                            debug!("Replicated {} entry with {} acks", entry.operation.name(), acks);
                            return Ok(());
                        }
                    }
                    Some(false) => {}
                    None => break,
                },
                _ = &mut deadline => {
                    warn!("Replication timed out after {:?}", self.timeout);
                    break;
                }
            }
        }

        Err(DfsError::QuorumFailure {
            acks,
            required: self.required_acks,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oplog::Operation;

    fn entry() -> OperationLogEntry {
        OperationLogEntry::new(Operation::RenameFile {
            from: "p/a".to_string(),
            to: "p/b".to_string(),
        })
    }

    async fn dead_address() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);
        address
    }

    #[tokio::test]
    async fn test_single_node_quorum_is_local() {
        let replicator = Replicator::new(Vec::new(), 1, Duration::from_secs(1), &NetworkConfig::default());
        replicator.replicate(&entry()).await.unwrap();
    }

    #[tokio::test]
    async fn test_unreachable_peers_fail_quorum() {
        let peers = vec![dead_address().await, dead_address().await];
        let replicator = Replicator::new(peers, 2, Duration::from_secs(5), &NetworkConfig::default());

        match replicator.replicate(&entry()).await {
            Err(DfsError::QuorumFailure { acks, required }) => {
                assert_eq!(acks, 1);
                assert_eq!(required, 2);
            }
            other => panic!("expected quorum failure, got {:?}", other),
        }
    }

    #[test]
    fn test_disabled_by_default() {
        let config = ReplicationConfig::default();
        assert!(Replicator::from_config(&config, &NetworkConfig::default(), "master-0").is_none());

        let enabled = ReplicationConfig {
            enabled: true,
            ..Default::default()
        };
        let replicator = Replicator::from_config(&enabled, &NetworkConfig::default(), "master-0").unwrap();
        assert_eq!(replicator.peer_count(), 2);
        assert_eq!(replicator.required_acks(), 2);
    }
}
