//! Core transport trait definitions

use crate::TransportResult;
use async_trait::async_trait;
use varsync_core::{Peer, PeerId};

/// Message kind tag carried next to every payload
pub type OpCode = u32;

/// Membership snapshot returned by [`Transport::join`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinedSession {
    /// Session that was joined
    pub session_id: String,
    /// The local member
    pub local: Peer,
    /// Every other member present at join time
    pub presences: Vec<Peer>,
}

/// Something the transport observed after join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A member joined the session
    PeerJoined(Peer),
    /// A member left the session
    PeerLeft(Peer),
    /// A payload arrived from another member
    Message {
        /// Message kind
        opcode: OpCode,
        /// Opaque bytes
        payload: Vec<u8>,
        /// Sending member
        source: Peer,
    },
}

/// Session transport consumed by the sync engine.
///
/// Events must be delivered in the order they occurred for any one sender.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Join a session and report who is already there
    async fn join(&self, session_id: &str) -> TransportResult<JoinedSession>;

    /// Leave the current session
    async fn leave(&self) -> TransportResult<()>;

    /// Send a payload to `targets`, or to every other member when `None`
    async fn send(
        &self,
        opcode: OpCode,
        payload: Vec<u8>,
        targets: Option<Vec<PeerId>>,
    ) -> TransportResult<()>;

    /// Wait for the next event; `None` once the session is closed
    async fn next_event(&self) -> Option<TransportEvent>;

    /// Get transport type identifier
    fn transport_type(&self) -> &'static str;
}
