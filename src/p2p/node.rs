//! Main bully node implementation
//!
//! Integrates the listener, membership view, election control, directory
//! client and background loops into a single [`BullyNode`].

use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, PoisonError, Weak};
use std::time::Duration;
use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::p2p::cluster::{FailureDetector, FaultInjector, Membership, MembershipView};
use crate::p2p::consensus::{ElectionControl, ElectionState};
use crate::p2p::discovery::DirectoryClient;
use crate::p2p::network::{Listener, MessageHandler, NetworkMessage, Transport};
use crate::p2p::{NodeConfig, P2PError, P2PResult, PriorityKey};

/// Counters describing what a node has done so far
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct NodeStats {
    /// Election attempts begun, restarts included
    pub elections_started: u64,
    /// Attempts that found no higher peer and claimed immediately
    pub self_elections: u64,
    /// Attempts that sent `ELECT` to higher peers
    pub elect_fanouts: u64,
    /// Attempts acknowledged by at least one higher peer
    pub acknowledged: u64,
    /// `ELECT` messages received from lower peers
    pub elect_received: u64,
    /// Times this node declared itself leader
    pub leader_claims: u64,
    /// `I_AM_LEADER` messages delivered
    pub announcements_sent: u64,
    /// Announced leaders that differed from the previous one
    pub leader_changes: u64,
    pub probes_sent: u64,
    pub probe_failures: u64,
    /// Inbound messages ignored while failed
    pub messages_dropped: u64,
    pub malformed_messages: u64,
    pub rejoin_failures: u64,
    pub simulated_failures: u64,
    pub recoveries: u64,
}

/// A member of the bully group.
///
/// Cheap to clone; all clones share the same state.
#[derive(Clone)]
pub struct BullyNode {
    pub(crate) inner: Arc<NodeInner>,
}

pub(crate) struct NodeInner {
    pub(crate) key: PriorityKey,
    pub(crate) local_addr: SocketAddr,
    pub(crate) config: NodeConfig,
    pub(crate) membership: RwLock<MembershipView>,
    pub(crate) election: ElectionControl,
    pub(crate) transport: Transport,
    pub(crate) directory: DirectoryClient,
    pub(crate) stats: RwLock<NodeStats>,
    listener: Mutex<Option<Listener>>,
    /// Background work owned by the node; `None` once shut down
    tasks: std::sync::Mutex<Option<Vec<JoinHandle<()>>>>,
}

impl std::fmt::Debug for BullyNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BullyNode")
            .field("key", &self.inner.key)
            .field("local_addr", &self.inner.local_addr)
            .field("election", &self.inner.election.snapshot())
            .finish()
    }
}

impl BullyNode {
    /// Bind the listener, join the directory, start the first election and
    /// the background loops.
    ///
    /// Only failures to bind or to complete the initial join are returned.
    pub async fn start(key: PriorityKey, config: NodeConfig) -> P2PResult<Self> {
        config.validate()?;

        let mut listener = Listener::bind(config.listen_address, config.network.clone()).await?;
        let local_addr = listener.local_addr();
        info!("LISTEN {} key={}", local_addr, key);

        let node = Self {
            inner: Arc::new(NodeInner {
                key,
                local_addr,
                membership: RwLock::new(MembershipView::new(key, local_addr)),
                election: ElectionControl::new(),
                transport: Transport::new(config.network.clone()),
                directory: DirectoryClient::new(config.directory_address.clone(), config.network.clone()),
                stats: RwLock::new(NodeStats::default()),
                listener: Mutex::new(None),
                tasks: std::sync::Mutex::new(Some(Vec::new())),
                config,
            }),
        };

        listener.serve(Arc::new(NodeHandler { node: Arc::downgrade(&node.inner) }))?;
        *node.inner.listener.lock().await = Some(listener);

        if let Err(e) = node.join().await {
            node.shutdown().await;
            return Err(e);
        }

        node.spawn_election("start");
        if node.inner.config.probe.enabled {
            node.spawn(FailureDetector::new(node.clone()).run());
        }
        if node.inner.config.fault_injection.enabled {
            node.spawn(FaultInjector::new(node.clone()).run());
        }

        Ok(node)
    }

    /// Stop every background task and close the listener.
    ///
    /// Elections and announcements still in flight are aborted, and nothing
    /// new is spawned afterwards.
    pub async fn shutdown(&self) {
        let tasks = self
            .inner
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .unwrap_or_default();
        for task in tasks {
            task.abort();
        }
        if let Some(mut listener) = self.inner.listener.lock().await.take() {
            listener.shutdown().await;
        }
        info!("Node {} shut down", self.inner.key);
    }

    /// Run `task` in the background until it ends or the node shuts down
    pub(crate) fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut tasks = self.inner.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        match tasks.as_mut() {
            Some(handles) => {
                handles.retain(|handle| !handle.is_finished());
                handles.push(tokio::spawn(task));
            }
            None => debug!("Node {} is shut down, not spawning", self.inner.key),
        }
    }

    /// Start an election in the background
    pub(crate) fn spawn_election(&self, reason: &'static str) {
        let node = self.clone();
        self.spawn(async move {
            node.start_election(reason).await;
        });
    }

    /// Running background tasks
    pub(crate) fn task_count(&self) -> usize {
        self.inner
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map_or(0, |handles| handles.iter().filter(|handle| !handle.is_finished()).count())
    }

    pub fn local_key(&self) -> PriorityKey {
        self.inner.key
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }

    pub fn config(&self) -> &NodeConfig {
        &self.inner.config
    }

    pub fn leader(&self) -> Option<PriorityKey> {
        self.inner.election.leader()
    }

    pub fn is_leader(&self) -> bool {
        self.leader() == Some(self.inner.key)
    }

    pub fn is_failed(&self) -> bool {
        self.inner.election.is_failed()
    }

    pub fn election_state(&self) -> ElectionState {
        self.inner.election.snapshot()
    }

    /// Current membership view
    pub async fn members(&self) -> Membership {
        self.inner.membership.read().await.snapshot()
    }

    pub async fn stats(&self) -> NodeStats {
        self.inner.stats.read().await.clone()
    }

    /// Wait until `leader` is the known leader and no attempt is running
    pub async fn wait_for_leader(&self, leader: PriorityKey, within: Duration) -> bool {
        let mut rx = self.inner.election.subscribe();
        let waited = timeout(within, rx.wait_for(|s| s.leader == Some(leader) && !s.in_progress)).await;
        matches!(waited, Ok(Ok(_)))
    }

    /// Replace the membership view with the directory's answer
    pub async fn join(&self) -> P2PResult<()> {
        let members = self
            .inner
            .directory
            .join(self.inner.key, self.inner.local_addr)
            .await?;

        let mut view = self.inner.membership.write().await;
        view.replace(members);
        info!("JOIN: joined group via {}, members: {}", self.inner.directory.address(), view.snapshot());
        Ok(())
    }

    /// Join again after a suspected failure; errors are logged, not returned
    pub async fn rejoin(&self) -> bool {
        match self.join().await {
            Ok(()) => true,
            Err(e) => {
                warn!("Re-join with directory failed: {}", e);
                self.inner.stats.write().await.rejoin_failures += 1;
                false
            }
        }
    }

    /// Merge a peer's view into ours; incoming entries win
    pub async fn merge_members(&self, incoming: &Membership) -> usize {
        let mut view = self.inner.membership.write().await;
        let added = view.merge(incoming);
        if added > 0 {
            info!("Members merged (+{}): {}", added, view.snapshot());
        }
        added
    }

    /// Enter the simulated crash state; inbound messages are dropped silently
    pub async fn fail(&self) {
        if self.inner.election.set_failed(true) {
            self.inner.stats.write().await.simulated_failures += 1;
            warn!("Simulating failure of node {}", self.inner.key);
        }
    }

    /// Leave the simulated crash state, re-join and contend again
    pub async fn recover(&self) {
        if !self.inner.election.set_failed(false) {
            return;
        }
        self.inner.stats.write().await.recoveries += 1;
        info!("Node {} recovered from failure", self.inner.key);
        self.rejoin().await;
        self.start_election("recovered").await;
    }

    async fn dispatch(&self, message: NetworkMessage, remote: SocketAddr) -> Option<NetworkMessage> {
        match message {
            NetworkMessage::Elect(view) => {
                self.on_elect(view, remote).await;
                Some(NetworkMessage::GotIt)
            }
            NetworkMessage::IAmLeader(leader) => {
                self.on_leader_announced(leader).await;
                None
            }
            NetworkMessage::Probe => {
                debug!("PROBE from {}, replying GOT_IT", remote);
                Some(NetworkMessage::GotIt)
            }
            other => {
                debug!("Ignoring unexpected {} from {}", other.kind(), remote);
                None
            }
        }
    }
}

/// Listener-side handle; weak so the listener never keeps its node alive
struct NodeHandler {
    node: Weak<NodeInner>,
}

impl NodeHandler {
    fn node(&self) -> Option<BullyNode> {
        self.node.upgrade().map(|inner| BullyNode { inner })
    }
}

#[async_trait]
impl MessageHandler for NodeHandler {
    async fn handle(&self, message: NetworkMessage, remote: SocketAddr) -> Option<NetworkMessage> {
        let node = self.node()?;
        if node.is_failed() {
            debug!("Failed: dropping {} from {}", message.kind(), remote);
            node.inner.stats.write().await.messages_dropped += 1;
            return None;
        }
        node.dispatch(message, remote).await
    }

    async fn malformed(&self, remote: SocketAddr, error: P2PError) {
        debug!("Dropping malformed message from {}: {}", remote, error);
        if let Some(node) = self.node() {
            node.inner.stats.write().await.malformed_messages += 1;
        }
    }
}
