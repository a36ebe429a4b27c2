//! Cluster membership management
//!
//! The membership view maps priority keys to listen addresses. It only ever
//! grows: there is no leave protocol, and entries for departed nodes stay
//! behind as unreachable addresses.

use std::collections::BTreeMap;
use std::fmt;
use std::net::SocketAddr;
use serde::{Deserialize, Serialize};

use crate::p2p::PriorityKey;

/// Snapshot of group members as exchanged on the wire
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    members: BTreeMap<PriorityKey, SocketAddr>,
}

impl Membership {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: PriorityKey, addr: SocketAddr) -> Option<SocketAddr> {
        self.members.insert(key, addr)
    }

    pub fn get(&self, key: &PriorityKey) -> Option<SocketAddr> {
        self.members.get(key).copied()
    }

    pub fn contains(&self, key: &PriorityKey) -> bool {
        self.members.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Members in ascending key order
    pub fn iter(&self) -> impl Iterator<Item = (&PriorityKey, &SocketAddr)> {
        self.members.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &PriorityKey> {
        self.members.keys()
    }

    /// Largest key present
    pub fn max_key(&self) -> Option<PriorityKey> {
        self.members.keys().next_back().copied()
    }

    /// Members whose key strictly outranks `key`
    pub fn higher_than(&self, key: &PriorityKey) -> Vec<(PriorityKey, SocketAddr)> {
        self.members
            .range((std::ops::Bound::Excluded(*key), std::ops::Bound::Unbounded))
            .map(|(k, a)| (*k, *a))
            .collect()
    }

    /// Every member except `key`
    pub fn others(&self, key: &PriorityKey) -> Vec<(PriorityKey, SocketAddr)> {
        self.members
            .iter()
            .filter(|(k, _)| *k != key)
            .map(|(k, a)| (*k, *a))
            .collect()
    }

    /// Write every incoming entry over ours. Returns how many keys were new.
    pub fn merge(&mut self, incoming: &Membership) -> usize {
        let before = self.members.len();
        for (key, addr) in incoming.iter() {
            self.members.insert(*key, *addr);
        }
        self.members.len() - before
    }
}

impl fmt::Display for Membership {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (key, addr)) in self.members.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}: {}", key, addr)?;
        }
        f.write_str("}")
    }
}

impl FromIterator<(PriorityKey, SocketAddr)> for Membership {
    fn from_iter<I: IntoIterator<Item = (PriorityKey, SocketAddr)>>(iter: I) -> Self {
        Self { members: iter.into_iter().collect() }
    }
}

/// A node's own view of the group.
///
/// Invariant: the local key maps to the local address after every
/// operation, whatever the directory or a peer claims.
#[derive(Debug, Clone)]
pub struct MembershipView {
    local_key: PriorityKey,
    local_addr: SocketAddr,
    members: Membership,
}

impl MembershipView {
    pub fn new(local_key: PriorityKey, local_addr: SocketAddr) -> Self {
        let mut members = Membership::new();
        members.insert(local_key, local_addr);
        Self { local_key, local_addr, members }
    }

    pub fn local_key(&self) -> PriorityKey {
        self.local_key
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Replace the view with the directory's answer
    pub fn replace(&mut self, directory_view: Membership) {
        self.members = directory_view;
        self.ensure_self();
    }

    /// Merge a peer's view; incoming entries win. Returns how many keys were new.
    pub fn merge(&mut self, incoming: &Membership) -> usize {
        let added = self.members.merge(incoming);
        self.ensure_self();
        added
    }

    pub fn snapshot(&self) -> Membership {
        self.members.clone()
    }

    pub fn address_of(&self, key: &PriorityKey) -> Option<SocketAddr> {
        self.members.get(key)
    }

    pub fn higher_peers(&self) -> Vec<(PriorityKey, SocketAddr)> {
        self.members.higher_than(&self.local_key)
    }

    pub fn peers(&self) -> Vec<(PriorityKey, SocketAddr)> {
        self.members.others(&self.local_key)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    fn ensure_self(&mut self) {
        self.members.insert(self.local_key, self.local_addr);
    }
}
