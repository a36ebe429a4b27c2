//! Failure detection for the current leader
//!
//! A periodic `PROBE` to the last known leader. Any failure to get a
//! `GOT_IT` back re-joins the directory and starts an election. A leader
//! missing from the view is looked up through the directory first.

use std::net::SocketAddr;
use tracing::{debug, info, warn};

use crate::p2p::network::NetworkMessage;
use crate::p2p::node::BullyNode;
use crate::p2p::types::random_duration;
use crate::p2p::{PriorityKey, ProbeConfig};

/// What a single probe round did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// Failed, leaderless, leader ourselves, or the directory is unreachable
    Skipped,
    /// The leader answered `GOT_IT`
    Alive,
    /// The leader did not answer; an election was triggered
    LeaderLost,
}

/// Leader liveness loop
#[derive(Debug)]
pub struct FailureDetector {
    node: BullyNode,
    config: ProbeConfig,
}

impl FailureDetector {
    pub fn new(node: BullyNode) -> Self {
        let config = node.config().probe.clone();
        Self { node, config }
    }

    /// Probe forever at randomized intervals
    pub async fn run(self) {
        loop {
            tokio::time::sleep(random_duration(self.config.min_interval_ms, self.config.max_interval_ms)).await;
            self.probe_leader().await;
        }
    }

    /// One probe round
    pub async fn probe_leader(&self) -> ProbeOutcome {
        if self.node.is_failed() {
            return ProbeOutcome::Skipped;
        }
        let Some(leader) = self.node.leader() else {
            return ProbeOutcome::Skipped;
        };
        if leader == self.node.local_key() {
            return ProbeOutcome::Skipped;
        }

        let addr = match self.leader_address(leader).await {
            Ok(Some(addr)) => addr,
            Ok(None) => {
                warn!("Leader {} is unknown to the directory", leader);
                return self.leader_lost(false).await;
            }
            // directory unreachable; try again next round
            Err(()) => return ProbeOutcome::Skipped,
        };

        let inner = &self.node.inner;
        inner.stats.write().await.probes_sent += 1;
        match inner.transport.request(addr, &NetworkMessage::Probe).await {
            Ok(NetworkMessage::GotIt) => {
                debug!("PROBE to leader {} at {}: GOT_IT", leader, addr);
                ProbeOutcome::Alive
            }
            Ok(other) => {
                warn!("PROBE failed to leader {} at {}: unexpected {}", leader, addr, other.kind());
                self.leader_lost(true).await
            }
            Err(e) => {
                warn!("PROBE failed to leader {}: {}", leader, e);
                self.leader_lost(true).await
            }
        }
    }

    /// The leader's address, re-joining once if the view lacks it.
    ///
    /// `Err` when that re-join failed.
    async fn leader_address(&self, leader: PriorityKey) -> Result<Option<SocketAddr>, ()> {
        let known = self.node.inner.membership.read().await.address_of(&leader);
        if known.is_some() {
            return Ok(known);
        }

        info!("Leader {} has no known address, re-joining", leader);
        if !self.node.rejoin().await {
            return Err(());
        }
        let found = self.node.inner.membership.read().await.address_of(&leader);
        Ok(found)
    }

    async fn leader_lost(&self, rejoin: bool) -> ProbeOutcome {
        self.node.inner.stats.write().await.probe_failures += 1;
        if rejoin {
            self.node.rejoin().await;
        }
        self.node.spawn_election("leader probe failed");
        ProbeOutcome::LeaderLost
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::p2p::cluster::Membership;
    use crate::p2p::discovery::DirectoryServer;
    use crate::p2p::{NetworkConfig, NodeConfig};
    use std::net::SocketAddr;
    use std::time::Duration;

    fn test_config(directory: SocketAddr) -> NodeConfig {
        let mut config = NodeConfig {
            directory_address: directory.to_string(),
            network: NetworkConfig { peer_timeout_ms: 300, ..NetworkConfig::default() },
            ..NodeConfig::default()
        };
        config.election.election_wait_ms = 400;
        config.election.leader_wait_ms = 800;
        config.probe.enabled = false;
        config
    }

    #[tokio::test]
    async fn test_probe_skipped_when_leader_or_failed() {
        let directory = DirectoryServer::bind("127.0.0.1:0".parse().unwrap(), NetworkConfig::default())
            .await
            .unwrap();
        let key = PriorityKey::new(5, 5);
        let node = BullyNode::start(key, test_config(directory.local_addr())).await.unwrap();
        assert!(node.wait_for_leader(key, Duration::from_secs(2)).await);

        let detector = FailureDetector::new(node.clone());
        assert_eq!(detector.probe_leader().await, ProbeOutcome::Skipped);

        node.fail().await;
        node.on_leader_announced(PriorityKey::new(9, 9)).await;
        assert_eq!(detector.probe_leader().await, ProbeOutcome::Skipped);
        assert_eq!(node.stats().await.probes_sent, 0);

        node.shutdown().await;
        directory.shutdown().await;
    }

    #[tokio::test]
    async fn test_unknown_leader_address_is_looked_up() {
        let directory = DirectoryServer::bind("127.0.0.1:0".parse().unwrap(), NetworkConfig::default())
            .await
            .unwrap();
        let low_key = PriorityKey::new(1, 1);
        let high_key = PriorityKey::new(9, 9);
        let low = BullyNode::start(low_key, test_config(directory.local_addr())).await.unwrap();
        let high = BullyNode::start(high_key, test_config(directory.local_addr())).await.unwrap();
        assert!(low.wait_for_leader(high_key, Duration::from_secs(5)).await);

        // wait out the re-join the announcement triggered, then forget the leader again
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while low.members().await.get(&high_key).is_none() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let mut view = low.inner.membership.write().await;
        view.replace(Membership::new());
        drop(view);
        assert!(low.members().await.get(&high_key).is_none());

        let detector = FailureDetector::new(low.clone());
        assert_eq!(detector.probe_leader().await, ProbeOutcome::Alive);
        assert_eq!(low.members().await.get(&high_key), Some(high.local_addr()));

        let stats = low.stats().await;
        assert_eq!(stats.probes_sent, 1);
        assert_eq!(stats.probe_failures, 0);
        assert_eq!(low.leader(), Some(high_key));

        low.shutdown().await;
        high.shutdown().await;
        directory.shutdown().await;
    }

    #[tokio::test]
    async fn test_leader_unknown_to_directory_is_lost() {
        let directory = DirectoryServer::bind("127.0.0.1:0".parse().unwrap(), NetworkConfig::default())
            .await
            .unwrap();
        let key = PriorityKey::new(5, 5);
        let node = BullyNode::start(key, test_config(directory.local_addr())).await.unwrap();
        assert!(node.wait_for_leader(key, Duration::from_secs(2)).await);

        // a leader nobody ever registered
        node.inner.election.accept_leader(PriorityKey::new(9, 9));
        let detector = FailureDetector::new(node.clone());
        assert_eq!(detector.probe_leader().await, ProbeOutcome::LeaderLost);
        assert!(node.wait_for_leader(key, Duration::from_secs(2)).await);

        let stats = node.stats().await;
        assert_eq!(stats.probes_sent, 0);
        assert_eq!(stats.probe_failures, 1);

        node.shutdown().await;
        directory.shutdown().await;
    }

    #[tokio::test]
    async fn test_probe_alive_and_lost() {
        let directory = DirectoryServer::bind("127.0.0.1:0".parse().unwrap(), NetworkConfig::default())
            .await
            .unwrap();
        let low_key = PriorityKey::new(1, 1);
        let high_key = PriorityKey::new(9, 9);
        let low = BullyNode::start(low_key, test_config(directory.local_addr())).await.unwrap();
        let high = BullyNode::start(high_key, test_config(directory.local_addr())).await.unwrap();

        assert!(low.wait_for_leader(high_key, Duration::from_secs(5)).await);
        let detector = FailureDetector::new(low.clone());
        assert_eq!(detector.probe_leader().await, ProbeOutcome::Alive);

        high.fail().await;
        assert_eq!(detector.probe_leader().await, ProbeOutcome::LeaderLost);
        assert!(low.wait_for_leader(low_key, Duration::from_secs(5)).await);

        let stats = low.stats().await;
        assert_eq!(stats.probes_sent, 2);
        assert_eq!(stats.probe_failures, 1);

        low.shutdown().await;
        high.shutdown().await;
        directory.shutdown().await;
    }
}
