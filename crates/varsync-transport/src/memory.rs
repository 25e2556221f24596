//! In-memory session transport for testing and local play
//!
//! A [`MemoryHub`] plays the role of the match server: it tracks members per
//! session and fans events out over one unbounded channel per member. The hub
//! lock is held while fanning out, so every member observes joins, leaves and
//! messages in one global order.

use crate::{JoinedSession, OpCode, Transport, TransportError, TransportEvent, TransportResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tracing::{debug, trace};
use varsync_core::{Peer, PeerId};

struct Member {
    peer: Peer,
    sender: mpsc::UnboundedSender<TransportEvent>,
}

type Sessions = HashMap<String, BTreeMap<PeerId, Member>>;

/// Shared switchboard connecting [`MemoryTransport`]s.
#[derive(Clone, Default)]
pub struct MemoryHub {
    sessions: Arc<Mutex<Sessions>>,
}

impl MemoryHub {
    /// Create an empty hub
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a transport for `peer` attached to this hub
    pub fn transport(&self, peer: Peer) -> MemoryTransport {
        MemoryTransport {
            hub: self.clone(),
            local: peer,
            session: Mutex::new(None),
            receiver: AsyncMutex::new(None),
        }
    }

    /// Ids currently present in a session
    pub fn members(&self, session_id: &str) -> Vec<PeerId> {
        self.sessions
            .lock()
            .get(session_id)
            .map(|members| members.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn depart(&self, session_id: &str, peer: &Peer) {
        let mut sessions = self.sessions.lock();
        let Some(members) = sessions.get_mut(session_id) else {
            return;
        };
        if members.remove(&peer.id).is_none() {
            return;
        }
        for member in members.values() {
            // A closed receiver belongs to a member that is leaving too.
            let _ = member.sender.send(TransportEvent::PeerLeft(peer.clone()));
        }
        if members.is_empty() {
            sessions.remove(session_id);
        }
        debug!(session = %session_id, peer = %peer.id, "Memory transport left session");
    }
}

/// Transport endpoint for one peer on a [`MemoryHub`].
///
/// Dropping a joined transport leaves the session, which is how tests
/// simulate an abrupt disconnect.
pub struct MemoryTransport {
    hub: MemoryHub,
    local: Peer,
    session: Mutex<Option<String>>,
    receiver: AsyncMutex<Option<mpsc::UnboundedReceiver<TransportEvent>>>,
}

impl MemoryTransport {
    /// The peer this endpoint represents
    pub fn local_peer(&self) -> &Peer {
        &self.local
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn join(&self, session_id: &str) -> TransportResult<JoinedSession> {
        if let Some(current) = self.session.lock().clone() {
            return Err(TransportError::AlreadyJoined {
                session_id: current,
            });
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        *self.receiver.lock().await = Some(receiver);

        let mut slot = self.session.lock();
        if let Some(current) = slot.clone() {
            return Err(TransportError::AlreadyJoined {
                session_id: current,
            });
        }

        let mut sessions = self.hub.sessions.lock();
        let members = sessions.entry(session_id.to_string()).or_default();
        if members.contains_key(&self.local.id) {
            return Err(TransportError::DuplicatePeer {
                peer: self.local.id.clone(),
                session_id: session_id.to_string(),
            });
        }

        let presences: Vec<Peer> = members.values().map(|m| m.peer.clone()).collect();
        for member in members.values() {
            let _ = member
                .sender
                .send(TransportEvent::PeerJoined(self.local.clone()));
        }
        members.insert(
            self.local.id.clone(),
            Member {
                peer: self.local.clone(),
                sender,
            },
        );
        *slot = Some(session_id.to_string());

        debug!(
            session = %session_id,
            peer = %self.local.id,
            presences = presences.len(),
            "Memory transport joined session"
        );
        Ok(JoinedSession {
            session_id: session_id.to_string(),
            local: self.local.clone(),
            presences,
        })
    }

    async fn leave(&self) -> TransportResult<()> {
        let session_id = self.session.lock().take().ok_or(TransportError::NotJoined)?;
        self.hub.depart(&session_id, &self.local);
        Ok(())
    }

    async fn send(
        &self,
        opcode: OpCode,
        payload: Vec<u8>,
        targets: Option<Vec<PeerId>>,
    ) -> TransportResult<()> {
        let session_id = self.session.lock().clone().ok_or(TransportError::NotJoined)?;
        let sessions = self.hub.sessions.lock();
        let members = sessions.get(&session_id).ok_or(TransportError::Closed)?;

        let deliver = |member: &Member| {
            let _ = member.sender.send(TransportEvent::Message {
                opcode,
                payload: payload.clone(),
                source: self.local.clone(),
            });
        };

        match targets {
            None => members
                .values()
                .filter(|m| m.peer.id != self.local.id)
                .for_each(deliver),
            Some(targets) => {
                for target in targets.iter().filter(|t| **t != self.local.id) {
                    match members.get(target) {
                        Some(member) => deliver(member),
                        None => trace!(peer = %target, opcode, "Dropping send to absent peer"),
                    }
                }
            }
        }
        Ok(())
    }

    async fn next_event(&self) -> Option<TransportEvent> {
        let mut receiver = self.receiver.lock().await;
        match receiver.as_mut() {
            Some(receiver) => receiver.recv().await,
            None => None,
        }
    }

    fn transport_type(&self) -> &'static str {
        "memory"
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        if let Some(session_id) = self.session.get_mut().take() {
            self.hub.depart(&session_id, &self.local);
        }
    }
}
