//! Peer map: tracks the connections a host has opened or accepted.
//!
//! The [`PeerMap`] is an index for introspection, not an owner. Connections
//! belong to whoever called `Host::open` or to the inbound handler. Closing a
//! connection marks its entry [`PeerState::Closed`]; [`PeerMap::prune_closed`]
//! evicts those entries so long-running hosts do not grow without bound.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};

/// Which side initiated the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerDirection {
    /// Created by `Host::open`.
    Outbound,
    /// Accepted by the listener.
    Inbound,
}

/// Connection state of a peer entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Open,
    /// Closed locally, by the peer, or by an I/O error.
    Closed,
}

/// A single tracked connection.
#[derive(Debug, Clone)]
pub struct PeerEntry {
    /// Peer name the connection reports from `peer_name()`.
    pub name: String,
    /// Id of the connection that produced this entry.
    pub conn_id: u64,
    /// Resolved socket address of the remote end.
    pub address: SocketAddr,
    pub direction: PeerDirection,
    pub state: PeerState,
    /// When the connection was established.
    pub connected_at: DateTime<Utc>,
}

/// Thread-safe map of peer name to entry.
#[derive(Debug, Clone)]
pub struct PeerMap {
    peers: Arc<RwLock<HashMap<String, PeerEntry>>>,
}

impl PeerMap {
    /// Create a new empty map.
    pub fn new() -> Self {
        Self {
            peers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Record a freshly established connection, replacing any older entry
    /// under the same name.
    pub fn record(&self, name: &str, conn_id: u64, address: SocketAddr, direction: PeerDirection) {
        let mut peers = self.peers.write().unwrap_or_else(|e| e.into_inner());
        peers.insert(
            name.to_string(),
            PeerEntry {
                name: name.to_string(),
                conn_id,
                address,
                direction,
                state: PeerState::Open,
                connected_at: Utc::now(),
            },
        );
    }

    /// Mark a peer as closed (but keep its entry).
    ///
    /// Ignored when the entry has since been replaced by a newer connection
    /// to the same name.
    pub fn mark_closed(&self, name: &str, conn_id: u64) {
        let mut peers = self.peers.write().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = peers.get_mut(name) {
            if entry.conn_id == conn_id {
                entry.state = PeerState::Closed;
            }
        }
    }

    /// Remove a peer entirely.
    pub fn remove(&self, name: &str) -> Option<PeerEntry> {
        let mut peers = self.peers.write().unwrap_or_else(|e| e.into_inner());
        peers.remove(name)
    }

    /// Drop every closed entry. Returns how many were removed.
    pub fn prune_closed(&self) -> usize {
        let mut peers = self.peers.write().unwrap_or_else(|e| e.into_inner());
        let before = peers.len();
        peers.retain(|_, p| p.state == PeerState::Open);
        before - peers.len()
    }

    /// Get a snapshot of a specific peer.
    pub fn get(&self, name: &str) -> Option<PeerEntry> {
        let peers = self.peers.read().unwrap_or_else(|e| e.into_inner());
        peers.get(name).cloned()
    }

    /// Get all open peers.
    pub fn open_peers(&self) -> Vec<PeerEntry> {
        let peers = self.peers.read().unwrap_or_else(|e| e.into_inner());
        peers
            .values()
            .filter(|p| p.state == PeerState::Open)
            .cloned()
            .collect()
    }

    /// Get all peers (open + closed).
    pub fn all_peers(&self) -> Vec<PeerEntry> {
        let peers = self.peers.read().unwrap_or_else(|e| e.into_inner());
        peers.values().cloned().collect()
    }

    pub fn open_count(&self) -> usize {
        let peers = self.peers.read().unwrap_or_else(|e| e.into_inner());
        peers
            .values()
            .filter(|p| p.state == PeerState::Open)
            .count()
    }

    pub fn total_count(&self) -> usize {
        let peers = self.peers.read().unwrap_or_else(|e| e.into_inner());
        peers.len()
    }
}

impl Default for PeerMap {
    fn default() -> Self {
        Self::new()
    }
}
