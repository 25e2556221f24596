//! State shared by every part of a joined session

use crate::config::SyncConfig;
use crate::handshake::{HandshakePhase, HandshakeState};
use crate::keys::KeyRegistry;
use crate::migration;
use crate::outbox::Outbox;
use crate::registry::{VarRegistry, STICKY_HOST_VAR};
use crate::roster::{HostChange, Roster};
use crate::var::cell::Update;
use crate::var::{ListenerSet, Origin};
use crate::{SyncError, SyncResult};
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, warn};
use varsync_core::{Envelope, Peer, PeerId, VarKey, WireValue};

pub(crate) struct SyncContext {
    pub(crate) config: SyncConfig,
    pub(crate) local: Peer,
    pub(crate) keys: KeyRegistry,
    pub(crate) vars: VarRegistry,
    pub(crate) roster: Mutex<Roster>,
    pub(crate) phase: watch::Sender<HandshakePhase>,
    pub(crate) handshake: Mutex<HandshakeState>,
    pub(crate) outbox: Outbox,
    pub(crate) host_listeners: ListenerSet<HostChange>,
    pub(crate) error_listeners: ListenerSet<SyncError>,
}

impl SyncContext {
    pub(crate) fn new(config: SyncConfig, local: Peer, vars: VarRegistry, outbox: Outbox) -> Self {
        let (phase, _) = watch::channel(HandshakePhase::Syncing);
        Self {
            config,
            local,
            keys: KeyRegistry::new(),
            vars,
            roster: Mutex::new(Roster::new()),
            phase,
            handshake: Mutex::new(HandshakeState::default()),
            outbox,
            host_listeners: ListenerSet::new(),
            error_listeners: ListenerSet::new(),
        }
    }

    pub(crate) fn phase(&self) -> HandshakePhase {
        self.phase.borrow().clone()
    }

    pub(crate) fn is_ready(&self) -> bool {
        matches!(*self.phase.borrow(), HandshakePhase::Ready)
    }

    pub(crate) fn is_syncing(&self) -> bool {
        matches!(*self.phase.borrow(), HandshakePhase::Syncing)
    }

    pub(crate) fn is_failed(&self) -> bool {
        matches!(*self.phase.borrow(), HandshakePhase::Failed(_))
    }

    pub(crate) fn host(&self) -> Option<PeerId> {
        self.roster.lock().host().cloned()
    }

    /// Whether `peer` is the currently elected host
    pub(crate) fn is_host_peer(&self, peer: &PeerId) -> bool {
        self.roster.lock().host() == Some(peer)
    }

    /// Host role is only taken once the handshake is done
    pub(crate) fn is_host(&self) -> bool {
        self.is_ready() && self.is_host_peer(&self.local.id)
    }

    /// Fail unless local writes are currently allowed.
    ///
    /// A failed or left session answers with the reason it ended.
    pub(crate) fn ensure_writable(&self) -> SyncResult<()> {
        match &*self.phase.borrow() {
            HandshakePhase::Ready => Ok(()),
            HandshakePhase::Syncing => Err(SyncError::HandshakePending),
            HandshakePhase::Failed(err) => Err(err.clone()),
        }
    }

    /// Log an error and hand it to application observers if it is theirs
    pub(crate) fn report(&self, err: SyncError) {
        match &err {
            SyncError::StaleVersion { .. } | SyncError::ConflictingVersion { .. } => {
                debug!(peer = %self.local.id, error = %err, "Write dropped");
            }
            _ if !err.is_surfaced() => {
                warn!(peer = %self.local.id, code = err.code(), error = %err, "Peer misbehaved");
            }
            _ => {
                warn!(peer = %self.local.id, code = err.code(), error = %err, "Sync error");
                self.error_listeners.emit(&err);
            }
        }
    }

    /// Queue a data envelope; empty envelopes are not sent
    pub(crate) fn send_envelope(
        &self,
        envelope: &Envelope,
        targets: Option<Vec<PeerId>>,
    ) -> SyncResult<()> {
        if envelope.is_empty() {
            return Ok(());
        }
        self.outbox.send(self.config.opcodes.data, envelope, targets)
    }

    pub(crate) fn sticky_key() -> VarKey {
        VarKey::shared(STICKY_HOST_VAR)
    }

    /// Sticky host id as currently replicated
    pub(crate) fn sticky_host(&self) -> SyncResult<Option<PeerId>> {
        let value = self.vars.get(&Self::sticky_key())?.read(None)?;
        Ok(match value {
            WireValue::String(id) if !id.is_empty() => Some(PeerId::new(id)),
            _ => None,
        })
    }

    /// Feed the replicated sticky id into host election
    pub(crate) fn refresh_sticky(&self) {
        let sticky = match self.sticky_host() {
            Ok(sticky) => sticky,
            Err(err) => {
                self.report(err);
                return;
            }
        };
        let change = self.roster.lock().set_sticky(sticky);
        if let Some(change) = change {
            migration::on_host_changed(self, change);
        }
    }

    /// Blank the sticky id after its holder left, without a version bump.
    ///
    /// Every peer does this on the same departure, and the next host's
    /// claim carries a higher version than any earlier claim.
    pub(crate) fn clear_sticky(&self, departed: &PeerId) {
        let key = Self::sticky_key();
        let result = self.vars.get(&key).and_then(|var| {
            self.keys.with_slot(&key, |slot| {
                var.write(
                    None,
                    Update {
                        value: Some(WireValue::String(String::new())),
                        old_status: slot.status,
                        new_status: slot.status,
                        source: departed.clone(),
                        origin: Origin::Remote,
                    },
                )
            })
        });
        match result {
            Ok(Some(notify)) => notify(),
            Ok(None) => {}
            Err(err) => self.report(err),
        }
    }

    /// Reset variables and detach observers once the session ends
    pub(crate) fn teardown(&self) {
        self.vars.reset_all();
        self.host_listeners.clear();
        self.error_listeners.clear();
        self.handshake.lock().buffered.clear();
    }
}
