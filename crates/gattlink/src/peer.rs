//! Peer identity and link state

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// Link State
// ----------------------------------------------------------------------------

/// Connection state of a link.
///
/// Transitions are driven exclusively by transport adapter callbacks; the
/// session never assumes a transition succeeded without one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

impl LinkState {
    pub fn is_connected(&self) -> bool {
        *self == LinkState::Connected
    }

    /// Whether a new outbound connection may be initiated from this state.
    pub fn is_idle(&self) -> bool {
        *self == LinkState::Disconnected
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LinkState::Disconnected => "disconnected",
            LinkState::Connecting => "connecting",
            LinkState::Connected => "connected",
            LinkState::Disconnecting => "disconnecting",
        };
        f.write_str(name)
    }
}

// ----------------------------------------------------------------------------
// Peer Handle
// ----------------------------------------------------------------------------

/// Identity of a discovered or connected peer.
///
/// The address string is the primary key; the name is advisory and may be
/// absent. Handles are never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerHandle {
    pub address: String,
    pub name: Option<String>,
}

impl PeerHandle {
    pub fn new(address: impl Into<String>, name: Option<String>) -> Self {
        Self {
            address: address.into(),
            name,
        }
    }

    /// Human-readable label: the name when known, the address otherwise.
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.address)
    }
}

impl fmt::Display for PeerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} ({})", name, self.address),
            None => f.write_str(&self.address),
        }
    }
}

// ----------------------------------------------------------------------------
// Peer Directory
// ----------------------------------------------------------------------------

/// Address-keyed directory of discovered peers.
///
/// Rediscovery of a known address overwrites the stored handle (latest-wins),
/// so the directory is bounded by the set of distinct addresses rather than
/// growing with every scan callback.
#[derive(Debug, Default)]
pub struct PeerDirectory {
    peers: HashMap<String, PeerHandle>,
}

impl PeerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the handle for its address. Returns the previous
    /// handle when the address was already known.
    pub fn upsert(&mut self, peer: PeerHandle) -> Option<PeerHandle> {
        self.peers.insert(peer.address.clone(), peer)
    }

    pub fn get(&self, address: &str) -> Option<&PeerHandle> {
        self.peers.get(address)
    }

    pub fn contains(&self, address: &str) -> bool {
        self.peers.contains_key(address)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PeerHandle> {
        self.peers.values()
    }

    pub fn clear(&mut self) {
        self.peers.clear();
    }
}
