//! Leader election
//!
//! [`ElectionControl`] is the single synchronization point for the leader
//! key, the election-in-progress flag and the Failed flag. Every transition
//! is one atomic read-modify-write on a `watch` channel, so background loops
//! and connection handlers can also wait on it.

pub mod bully;

pub use bully::*;

use tokio::sync::watch;

use crate::p2p::PriorityKey;

/// Snapshot of a node's election-related state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ElectionState {
    /// Last leader accepted or claimed
    pub leader: Option<PriorityKey>,
    /// An election attempt is running
    pub in_progress: bool,
    /// Incremented every time an attempt starts or restarts
    pub epoch: u64,
    /// Simulated crash: inbound messages are dropped
    pub failed: bool,
}

impl ElectionState {
    fn holds(&self, epoch: u64) -> bool {
        self.in_progress && self.epoch == epoch
    }
}

/// Atomic transitions over [`ElectionState`]
#[derive(Debug)]
pub struct ElectionControl {
    state: watch::Sender<ElectionState>,
}

impl ElectionControl {
    pub fn new() -> Self {
        let (state, _) = watch::channel(ElectionState::default());
        Self { state }
    }

    pub fn snapshot(&self) -> ElectionState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ElectionState> {
        self.state.subscribe()
    }

    pub fn leader(&self) -> Option<PriorityKey> {
        self.state.borrow().leader
    }

    pub fn in_progress(&self) -> bool {
        self.state.borrow().in_progress
    }

    pub fn is_failed(&self) -> bool {
        self.state.borrow().failed
    }

    /// Begin an attempt unless one is already running.
    ///
    /// Returns the epoch that identifies the new attempt.
    pub fn try_start(&self) -> Option<u64> {
        let mut started = None;
        self.state.send_if_modified(|s| {
            if s.in_progress {
                return false;
            }
            s.in_progress = true;
            s.epoch += 1;
            started = Some(s.epoch);
            true
        });
        started
    }

    /// Restart the attempt `epoch` without ever dropping the flag in between.
    ///
    /// Fails if the attempt was already concluded or superseded.
    pub fn restart(&self, epoch: u64) -> Option<u64> {
        let mut restarted = None;
        self.state.send_if_modified(|s| {
            if !s.holds(epoch) {
                return false;
            }
            s.epoch += 1;
            restarted = Some(s.epoch);
            true
        });
        restarted
    }

    /// Conclude attempt `epoch`. A no-op for stale epochs.
    pub fn finish(&self, epoch: u64) -> bool {
        self.state.send_if_modified(|s| {
            if !s.holds(epoch) {
                return false;
            }
            s.in_progress = false;
            true
        })
    }

    /// Record `local` as leader on behalf of attempt `epoch`.
    ///
    /// Refused when the attempt was superseded by a newer one, or when it was
    /// concluded by an announcement from a key that outranks `local`.
    pub fn claim(&self, epoch: u64, local: PriorityKey) -> Result<(), Option<PriorityKey>> {
        let mut outcome = Ok(());
        self.state.send_if_modified(|s| {
            if s.epoch != epoch {
                outcome = Err(s.leader);
                return false;
            }
            if !s.in_progress {
                if let Some(leader) = s.leader.filter(|l| l.outranks(&local)) {
                    outcome = Err(Some(leader));
                    return false;
                }
            }
            s.leader = Some(local);
            true
        });
        outcome
    }

    /// Accept an announced leader at face value and end any running attempt.
    ///
    /// Returns the previous leader.
    pub fn accept_leader(&self, leader: PriorityKey) -> Option<PriorityKey> {
        let mut previous = None;
        self.state.send_modify(|s| {
            previous = s.leader.replace(leader);
            s.in_progress = false;
        });
        previous
    }

    /// Set or clear the Failed flag; returns true if it changed
    pub fn set_failed(&self, failed: bool) -> bool {
        self.state.send_if_modified(|s| {
            if s.failed == failed {
                return false;
            }
            s.failed = failed;
            true
        })
    }
}

impl Default for ElectionControl {
    fn default() -> Self {
        Self::new()
    }
}
