//! Bully election
//!
//! An attempt sends `ELECT` to every higher peer at once and waits a fixed
//! window for the first `GOT_IT`. Silence means every higher peer is gone and
//! this node claims leadership. An acknowledgement means a higher node will
//! take over; if its `I_AM_LEADER` never arrives the attempt restarts.

use std::net::SocketAddr;
use tokio::task::JoinSet;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, info, warn};

use crate::p2p::cluster::Membership;
use crate::p2p::network::{MessageProtocol, NetworkMessage};
use crate::p2p::node::BullyNode;
use crate::p2p::{P2PResult, PriorityKey};

/// How a call to [`BullyNode::start_election`] ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElectionOutcome {
    /// Another attempt was already running; nothing was done
    AlreadyRunning,
    /// This node claimed leadership and announced it
    BecameLeader,
    /// A higher node acknowledged and then announced itself (or someone did)
    LeaderAnnounced,
    /// The attempt ended without a claim: a higher leader was announced
    /// meanwhile, a newer attempt took over, or `ELECT` could not be encoded
    Deferred,
}

enum AttemptResult {
    Claimed,
    Acknowledged,
    Deferred,
}

impl BullyNode {
    /// Run an election unless one is already in progress.
    ///
    /// Returns once this node is leader, a leader was announced, or the
    /// attempt was superseded. The leader watchdog runs inline, so callers
    /// that must not block should spawn this.
    pub async fn start_election(&self, reason: &str) -> ElectionOutcome {
        let Some(mut epoch) = self.inner.election.try_start() else {
            debug!("ELECTION already in progress, ignoring trigger ({})", reason);
            return ElectionOutcome::AlreadyRunning;
        };
        self.inner.stats.write().await.elections_started += 1;
        info!("ELECTION started ({}) by {}", reason, self.inner.key);

        loop {
            match self.run_attempt(epoch).await {
                AttemptResult::Claimed => return ElectionOutcome::BecameLeader,
                AttemptResult::Deferred => return ElectionOutcome::Deferred,
                AttemptResult::Acknowledged => {}
            }

            if self.await_announcement(epoch).await {
                return ElectionOutcome::LeaderAnnounced;
            }

            match self.inner.election.restart(epoch) {
                Some(next) => {
                    warn!("No leader announced within {:?}, restarting election", self.inner.config.election.leader_wait());
                    self.inner.stats.write().await.elections_started += 1;
                    info!("ELECTION started (timeout waiting for leader) by {}", self.inner.key);
                    epoch = next;
                }
                // concluded between the timeout and the restart
                None => return ElectionOutcome::LeaderAnnounced,
            }
        }
    }

    async fn run_attempt(&self, epoch: u64) -> AttemptResult {
        let (higher, view) = {
            let membership = self.inner.membership.read().await;
            (membership.higher_peers(), membership.snapshot())
        };

        if higher.is_empty() {
            self.inner.stats.write().await.self_elections += 1;
            return self.become_leader(epoch).await;
        }

        self.inner.stats.write().await.elect_fanouts += 1;
        match self.send_elect(higher, view).await {
            Ok(true) => {
                self.inner.stats.write().await.acknowledged += 1;
                return AttemptResult::Acknowledged;
            }
            Ok(false) => {}
            Err(e) => {
                // no peer was contacted; never claim on this path
                warn!("Cannot send ELECT, abandoning election: {}", e);
                self.inner.election.finish(epoch);
                return AttemptResult::Deferred;
            }
        }

        info!("No higher peer answered ELECT within {:?}", self.inner.config.election.election_wait());
        self.become_leader(epoch).await
    }

    /// Fan `ELECT` out to every higher peer; true on the first `GOT_IT`.
    ///
    /// Fails without contacting anyone if the message cannot be encoded.
    async fn send_elect(&self, higher: Vec<(PriorityKey, SocketAddr)>, view: Membership) -> P2PResult<bool> {
        let message = NetworkMessage::Elect(view);
        MessageProtocol::encode(&message, self.inner.transport.config().max_message_size)?;
        let deadline = Instant::now() + self.inner.config.election.election_wait();

        let mut pending = JoinSet::new();
        for (peer, addr) in higher {
            let transport = self.inner.transport.clone();
            let message = message.clone();
            debug!("ELECT -> {} at {}", peer, addr);
            pending.spawn(async move { (peer, addr, transport.request(addr, &message).await) });
        }

        let mut acknowledged = false;
        while let Ok(Some(joined)) = timeout_at(deadline, pending.join_next()).await {
            match joined {
                Ok((peer, addr, Ok(NetworkMessage::GotIt))) => {
                    info!("Election response GOT_IT from {} at {}", peer, addr);
                    acknowledged = true;
                    break;
                }
                Ok((peer, addr, Ok(other))) => {
                    warn!("Unexpected {} from {} at {} in reply to ELECT", other.kind(), peer, addr);
                }
                Ok((peer, addr, Err(e))) => {
                    info!("ELECT to {} at {} failed: {}", peer, addr, e);
                }
                Err(e) => {
                    warn!("Election request task failed: {}", e);
                }
            }
        }

        // late replies are irrelevant once the decision is made
        pending.detach_all();
        Ok(acknowledged)
    }

    /// Claim leadership for attempt `epoch` and announce it to every member
    async fn become_leader(&self, epoch: u64) -> AttemptResult {
        let key = self.inner.key;
        if let Err(leader) = self.inner.election.claim(epoch, key) {
            match leader {
                Some(leader) => info!("Not claiming leadership, deferring to leader {}", leader),
                None => info!("Not claiming leadership, election superseded"),
            }
            return AttemptResult::Deferred;
        }

        self.inner.stats.write().await.leader_claims += 1;
        info!("I_AM_LEADER {}", key);

        let peers = self.inner.membership.read().await.peers();
        let node = self.clone();
        self.spawn(async move {
            node.announce(peers).await;
        });

        self.inner.election.finish(epoch);
        AttemptResult::Claimed
    }

    /// Best-effort `I_AM_LEADER` to every other member
    async fn announce(&self, peers: Vec<(PriorityKey, SocketAddr)>) {
        let message = NetworkMessage::IAmLeader(self.inner.key);

        let mut sends = JoinSet::new();
        for (peer, addr) in peers {
            let transport = self.inner.transport.clone();
            let message = message.clone();
            sends.spawn(async move { (peer, addr, transport.send(addr, &message).await) });
        }

        let mut delivered = 0;
        while let Some(joined) = sends.join_next().await {
            match joined {
                Ok((_, _, Ok(()))) => delivered += 1,
                Ok((peer, addr, Err(e))) => info!("Leader announcement to {} at {} failed: {}", peer, addr, e),
                Err(e) => warn!("Leader announcement task failed: {}", e),
            }
        }
        self.inner.stats.write().await.announcements_sent += delivered;
    }

    /// Wait for attempt `epoch` to be concluded by an announcement
    async fn await_announcement(&self, epoch: u64) -> bool {
        let mut rx = self.inner.election.subscribe();
        let waited = timeout(
            self.inner.config.election.leader_wait(),
            rx.wait_for(|s| !(s.in_progress && s.epoch == epoch)),
        )
        .await;
        matches!(waited, Ok(Ok(_)))
    }

    /// Inbound `ELECT`: merge the sender's view and contend ourselves
    pub(crate) async fn on_elect(&self, view: Membership, remote: SocketAddr) {
        info!("ELECT received from {} ({} members), replying GOT_IT", remote, view.len());
        self.inner.stats.write().await.elect_received += 1;
        self.merge_members(&view).await;

        if !self.inner.election.in_progress() {
            self.spawn_election("election message received");
        }
    }

    /// Inbound `I_AM_LEADER`: trusted as-is.
    ///
    /// Announcements carry no view, so a leader we have no address for
    /// triggers a background re-join to learn it.
    pub(crate) async fn on_leader_announced(&self, leader: PriorityKey) {
        let previous = self.inner.election.accept_leader(leader);
        if self.inner.membership.read().await.address_of(&leader).is_none() {
            info!("Leader {} is not in our view, re-joining", leader);
            let node = self.clone();
            self.spawn(async move {
                node.rejoin().await;
            });
        }
        if previous == Some(leader) {
            debug!("I_AM_LEADER {} re-announced", leader);
            return;
        }
        self.inner.stats.write().await.leader_changes += 1;
        info!("New leader is {}", leader);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::p2p::discovery::DirectoryServer;
    use crate::p2p::network::{Listener, MessageHandler};
    use crate::p2p::{NetworkConfig, NodeConfig};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    /// Higher peer that acknowledges `ELECT` after a delay
    struct SlowPeer {
        elects: AtomicUsize,
    }

    #[async_trait]
    impl MessageHandler for SlowPeer {
        async fn handle(&self, message: NetworkMessage, _remote: SocketAddr) -> Option<NetworkMessage> {
            match message {
                NetworkMessage::Elect(_) => {
                    self.elects.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Some(NetworkMessage::GotIt)
                }
                _ => None,
            }
        }
    }

    async fn closed_addr() -> SocketAddr {
        let ghost = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        ghost.local_addr().unwrap()
    }

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

    async fn directory() -> DirectoryServer {
        DirectoryServer::bind("127.0.0.1:0".parse().unwrap(), NetworkConfig::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_reentrant_start_is_dropped() {
        let directory = directory().await;
        let key = PriorityKey::new(1, 1);
        let node = BullyNode::start(key, test_config(directory.local_addr())).await.unwrap();
        assert!(node.wait_for_leader(key, Duration::from_secs(2)).await);

        // hold an attempt open by hand
        let epoch = node.inner.election.try_start().unwrap();
        assert_eq!(node.start_election("test").await, ElectionOutcome::AlreadyRunning);
        node.inner.election.finish(epoch);

        let stats = node.stats().await;
        assert_eq!(stats.elections_started, stats.self_elections + stats.elect_fanouts);

        node.shutdown().await;
        directory.shutdown().await;
    }

    #[tokio::test]
    async fn test_concurrent_triggers_run_one_attempt() {
        let directory = directory().await;
        let key = PriorityKey::new(1, 1);
        let mut config = test_config(directory.local_addr());
        config.election.leader_wait_ms = 5000;
        let node = BullyNode::start(key, config).await.unwrap();
        assert!(node.wait_for_leader(key, Duration::from_secs(2)).await);

        let peer = Arc::new(SlowPeer { elects: AtomicUsize::new(0) });
        let mut listener = Listener::bind("127.0.0.1:0".parse().unwrap(), NetworkConfig::default())
            .await
            .unwrap();
        listener.serve(Arc::clone(&peer)).unwrap();
        let higher = PriorityKey::new(99, 9);
        node.merge_members(&vec![(higher, listener.local_addr())].into_iter().collect())
            .await;

        let mut triggers = JoinSet::new();
        for _ in 0..16 {
            let node = node.clone();
            triggers.spawn(async move { node.start_election("concurrent trigger").await });
        }

        // once the single attempt is acknowledged, the higher peer announces
        let deadline = Instant::now() + Duration::from_secs(2);
        while node.stats().await.acknowledged == 0 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        node.on_leader_announced(higher).await;

        let mut outcomes = Vec::new();
        while let Some(outcome) = triggers.join_next().await {
            outcomes.push(outcome.unwrap());
        }
        let ran: Vec<_> = outcomes
            .iter()
            .filter(|o| **o != ElectionOutcome::AlreadyRunning)
            .collect();
        assert_eq!(ran, vec![&ElectionOutcome::LeaderAnnounced]);
        assert_eq!(peer.elects.load(Ordering::SeqCst), 1);

        let stats = node.stats().await;
        assert_eq!(stats.elect_fanouts, 1);
        assert_eq!(stats.acknowledged, 1);
        assert_eq!(stats.elections_started, stats.self_elections + stats.elect_fanouts);
        assert_eq!(node.leader(), Some(higher));

        node.shutdown().await;
        listener.shutdown().await;
        directory.shutdown().await;
    }

    #[tokio::test]
    async fn test_unencodable_elect_never_claims() {
        let directory = directory().await;
        let key = PriorityKey::new(1, 1);
        let mut config = test_config(directory.local_addr());
        config.network.max_message_size = 64;
        let node = BullyNode::start(key, config).await.unwrap();
        assert!(node.wait_for_leader(key, Duration::from_secs(2)).await);

        let mut view = Membership::new();
        for i in 0..6u32 {
            view.insert(PriorityKey::new(50 + i, 1), closed_addr().await);
        }
        node.merge_members(&view).await;

        let outcome = node.start_election("test").await;
        assert_eq!(outcome, ElectionOutcome::Deferred);
        assert!(!node.election_state().in_progress);

        let stats = node.stats().await;
        assert_eq!(stats.leader_claims, 1);
        assert_eq!(stats.elect_fanouts, 1);

        node.shutdown().await;
        directory.shutdown().await;
    }

    #[tokio::test]
    async fn test_unknown_leader_triggers_rejoin() {
        let directory = directory().await;
        let low = BullyNode::start(PriorityKey::new(1, 1), test_config(directory.local_addr()))
            .await
            .unwrap();
        let high_key = PriorityKey::new(9, 9);
        let high = BullyNode::start(high_key, test_config(directory.local_addr())).await.unwrap();

        assert!(low.wait_for_leader(high_key, Duration::from_secs(5)).await);
        let deadline = Instant::now() + Duration::from_secs(2);
        while low.members().await.get(&high_key).is_none() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(low.members().await.get(&high_key), Some(high.local_addr()));

        low.shutdown().await;
        high.shutdown().await;
        directory.shutdown().await;
    }

    #[tokio::test]
    async fn test_unreachable_higher_peer_is_outwaited() {
        let directory = directory().await;
        let key = PriorityKey::new(1, 1);
        let node = BullyNode::start(key, test_config(directory.local_addr())).await.unwrap();
        assert!(node.wait_for_leader(key, Duration::from_secs(2)).await);

        // a stale higher entry whose port is closed
        let ghost_addr = closed_addr().await;
        node.merge_members(&vec![(PriorityKey::new(99, 9), ghost_addr)].into_iter().collect())
            .await;

        let outcome = node.start_election("test").await;
        assert_eq!(outcome, ElectionOutcome::BecameLeader);
        assert!(node.is_leader());
        assert_eq!(node.stats().await.elect_fanouts, 1);

        node.shutdown().await;
        directory.shutdown().await;
    }

    #[tokio::test]
    async fn test_announcement_from_lower_key_is_trusted() {
        let directory = directory().await;
        let key = PriorityKey::new(50, 5);
        let node = BullyNode::start(key, test_config(directory.local_addr())).await.unwrap();
        assert!(node.wait_for_leader(key, Duration::from_secs(2)).await);

        let lower = PriorityKey::new(1, 1);
        node.on_leader_announced(lower).await;
        assert_eq!(node.leader(), Some(lower));
        assert!(!node.election_state().in_progress);

        node.shutdown().await;
        directory.shutdown().await;
    }
}
