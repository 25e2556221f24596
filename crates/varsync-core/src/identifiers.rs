//! Peer and key identifiers.
//!
//! Peers are supplied by the transport; the engine only indexes them. Keys
//! pair a variable's logical name with the peer slot it addresses.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identity of a session member.
///
/// Ordering is lexicographic on the underlying string, which is what host
/// election relies on.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    /// Create a peer id from any string-like value
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the id string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True for the empty id, which never names a real peer
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for PeerId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A session member as delivered by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    /// Stable identity
    pub id: PeerId,
    /// Human readable name, informational only
    pub display_name: String,
}

impl Peer {
    /// Create a new peer
    pub fn new(id: impl Into<PeerId>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
        }
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.display_name.is_empty() {
            write!(f, "{}", self.id)
        } else {
            write!(f, "{} ({})", self.id, self.display_name)
        }
    }
}

/// Identifies one replicated slot.
///
/// Shared variables have a single slot with no owner. Owned variables have
/// one slot per present owning peer.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VarKey {
    /// Logical variable name, identical on every peer
    pub name: String,
    /// Owning peer for owned-variable slots
    pub owner: Option<PeerId>,
}

impl VarKey {
    /// Key of a shared variable
    pub fn shared(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            owner: None,
        }
    }

    /// Key of one owner's slot in an owned variable
    pub fn owned(name: impl Into<String>, owner: PeerId) -> Self {
        Self {
            name: name.into(),
            owner: Some(owner),
        }
    }

    /// Whether this key addresses an owned slot
    pub fn is_owned(&self) -> bool {
        self.owner.is_some()
    }
}

impl fmt::Display for VarKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.owner {
            Some(owner) => write!(f, "{}@{}", self.name, owner),
            None => f.write_str(&self.name),
        }
    }
}
