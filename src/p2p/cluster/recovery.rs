//! Simulated crash and recovery
//!
//! Alternates randomized healthy and failed periods. While failed the node
//! drops every inbound message; on recovery it re-joins and contends again.

use tracing::info;

use crate::p2p::node::BullyNode;
use crate::p2p::types::random_duration;
use crate::p2p::FaultInjectionConfig;

/// Fault injection loop
#[derive(Debug)]
pub struct FaultInjector {
    node: BullyNode,
    config: FaultInjectionConfig,
}

impl FaultInjector {
    pub fn new(node: BullyNode) -> Self {
        let config = node.config().fault_injection.clone();
        Self { node, config }
    }

    pub async fn run(self) {
        loop {
            tokio::time::sleep(random_duration(self.config.min_uptime_ms, self.config.max_uptime_ms)).await;
            self.cycle().await;
        }
    }

    /// One failure period followed by recovery
    pub async fn cycle(&self) {
        let downtime = random_duration(self.config.min_downtime_ms, self.config.max_downtime_ms);
        self.node.fail().await;
        info!("Node {} failed for {:?}", self.node.local_key(), downtime);
        tokio::time::sleep(downtime).await;
        self.node.recover().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::p2p::discovery::DirectoryServer;
    use crate::p2p::{NetworkConfig, NodeConfig, PriorityKey};
    use std::time::Duration;

    #[tokio::test]
    async fn test_cycle_fails_then_recovers() {
        let directory = DirectoryServer::bind("127.0.0.1:0".parse().unwrap(), NetworkConfig::default())
            .await
            .unwrap();
        let mut config = NodeConfig {
            directory_address: directory.local_addr().to_string(),
            network: NetworkConfig { peer_timeout_ms: 300, ..NetworkConfig::default() },
            ..NodeConfig::default()
        };
        config.election.election_wait_ms = 400;
        config.election.leader_wait_ms = 800;
        config.probe.enabled = false;
        config.fault_injection.min_downtime_ms = 200;
        config.fault_injection.max_downtime_ms = 200;

        let key = PriorityKey::new(3, 3);
        let node = BullyNode::start(key, config).await.unwrap();
        assert!(node.wait_for_leader(key, Duration::from_secs(2)).await);

        let injector = FaultInjector::new(node.clone());
        let cycling = tokio::spawn(async move { injector.cycle().await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(node.is_failed());

        cycling.await.unwrap();
        assert!(!node.is_failed());
        assert!(node.is_leader());
        assert!(node.stats().await.leader_claims >= 2);

        node.shutdown().await;
        directory.shutdown().await;
    }
}
