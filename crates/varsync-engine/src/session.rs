//! Session setup and the application-facing handle

use crate::config::SyncConfig;
use crate::context::SyncContext;
use crate::dispatcher;
use crate::egress;
use crate::handshake::{self, HandshakePhase};
use crate::outbox::{self, Outbox};
use crate::registry::{VarRegistry, RESERVED_PREFIX, STICKY_HOST_VAR};
use crate::roster::HostChange;
use crate::tasks::TaskRegistry;
use crate::var::cell::{Validator, VarCell};
use crate::var::{OwnedVar, Proposal, SharedVar, Subscription};
use crate::{SyncError, SyncResult};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use varsync_core::{Peer, PeerId, SyncValue, ValidationStatus, VarKey, VarScope};
use varsync_transport::{JoinedSession, Transport, TransportError};

/// Collects variable registrations before a session is joined.
///
/// Every peer of a session must register the same variables with the same
/// names, types and scopes; a late joiner whose set differs is refused by
/// the host.
pub struct SyncSessionBuilder {
    config: SyncConfig,
    vars: VarRegistry,
}

impl SyncSessionBuilder {
    /// Start a builder with a validated configuration
    pub fn new(config: SyncConfig) -> SyncResult<Self> {
        config.validate()?;
        let mut vars = VarRegistry::default();
        vars.insert(Arc::new(VarCell::new(
            STICKY_HOST_VAR.to_string(),
            VarScope::Shared,
            String::new(),
            None,
        )))?;
        Ok(Self { config, vars })
    }

    /// Register a shared variable that any peer writes without validation
    pub fn register_shared<T: SyncValue>(
        &mut self,
        name: impl Into<String>,
        initial: T,
    ) -> SyncResult<SharedVar<T>> {
        let cell = self.register(name.into(), VarScope::Shared, initial, None)?;
        Ok(SharedVar { cell })
    }

    /// Register a shared variable whose guest writes the host validates
    pub fn register_shared_with_validator<T, F>(
        &mut self,
        name: impl Into<String>,
        initial: T,
        validator: F,
    ) -> SyncResult<SharedVar<T>>
    where
        T: SyncValue,
        F: Fn(&Proposal<T>) -> bool + Send + Sync + 'static,
    {
        let validator: Validator<T> = Arc::new(validator);
        let cell = self.register(name.into(), VarScope::Shared, initial, Some(validator))?;
        Ok(SharedVar { cell })
    }

    /// Register a variable with one slot per peer
    pub fn register_owned<T: SyncValue>(
        &mut self,
        name: impl Into<String>,
        initial: T,
    ) -> SyncResult<OwnedVar<T>> {
        let cell = self.register(name.into(), VarScope::Owned, initial, None)?;
        Ok(OwnedVar { cell })
    }

    /// Register a per-peer variable whose guest writes the host validates
    pub fn register_owned_with_validator<T, F>(
        &mut self,
        name: impl Into<String>,
        initial: T,
        validator: F,
    ) -> SyncResult<OwnedVar<T>>
    where
        T: SyncValue,
        F: Fn(&Proposal<T>) -> bool + Send + Sync + 'static,
    {
        let validator: Validator<T> = Arc::new(validator);
        let cell = self.register(name.into(), VarScope::Owned, initial, Some(validator))?;
        Ok(OwnedVar { cell })
    }

    fn register<T: SyncValue>(
        &mut self,
        name: String,
        scope: VarScope,
        initial: T,
        validator: Option<Validator<T>>,
    ) -> SyncResult<Arc<VarCell<T>>> {
        if name.is_empty() || name.starts_with(RESERVED_PREFIX) {
            return Err(SyncError::ReservedName { name });
        }
        let cell = Arc::new(VarCell::new(name, scope, initial, validator));
        self.vars.insert(cell.clone())?;
        Ok(cell)
    }

    /// Join `session_id` on `transport` and start replicating.
    ///
    /// The first peer in a session is ready at once and becomes host. Later
    /// peers start the late-join handshake; await
    /// [`SyncSession::handshake_complete`] before writing.
    pub async fn join(
        self,
        transport: Arc<dyn Transport>,
        session_id: &str,
    ) -> SyncResult<SyncSession> {
        let joined = transport.join(session_id).await?;
        let (outbox, outbound_rx) = Outbox::new(self.config.wire_format);
        let ctx = Arc::new(SyncContext::new(
            self.config,
            joined.local.clone(),
            self.vars,
            outbox,
        ));

        if let Err(err) = install_members(&ctx, &joined) {
            dispatcher::leave_transport(&ctx, transport.as_ref()).await;
            return Err(err);
        }
        info!(
            peer = %joined.local,
            session = %joined.session_id,
            presences = joined.presences.len(),
            transport = transport.transport_type(),
            "Joined session"
        );

        let outbound = tokio::spawn(outbox::run_outbound(
            ctx.clone(),
            transport.clone(),
            outbound_rx,
        ));
        let tasks = TaskRegistry::new();

        // The phase must be settled before the first inbound event is seen.
        if joined.presences.is_empty() {
            handshake::become_ready(&ctx);
        } else if let Err(err) = handshake::begin(&ctx) {
            handshake::fail(&ctx, err.clone());
            outbound.abort();
            dispatcher::leave_transport(&ctx, transport.as_ref()).await;
            return Err(err);
        } else {
            let timer_ctx = ctx.clone();
            let timer_transport = transport.clone();
            tasks.spawn_cancellable(async move {
                tokio::time::sleep(timer_ctx.config.handshake_timeout()).await;
                let timeout_ms = timer_ctx.config.handshake_timeout_ms;
                if handshake::fail(&timer_ctx, SyncError::HandshakeTimeout { timeout_ms }) {
                    dispatcher::leave_transport(&timer_ctx, timer_transport.as_ref()).await;
                }
            });
        }
        tasks.spawn_cancellable(dispatcher::run_inbound(ctx.clone(), transport.clone()));

        Ok(SyncSession {
            ctx,
            transport,
            session_id: joined.session_id,
            tasks,
            outbound: Mutex::new(Some(outbound)),
        })
    }
}

impl fmt::Debug for SyncSessionBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncSessionBuilder")
            .field("config", &self.config)
            .field("variables", &self.vars.declarations())
            .finish()
    }
}

/// Put the join-time members in the roster and register every slot
fn install_members(ctx: &SyncContext, joined: &JoinedSession) -> SyncResult<()> {
    {
        let mut roster = ctx.roster.lock();
        roster.add(joined.local.clone())?;
        for peer in &joined.presences {
            roster.add(peer.clone())?;
        }
    }
    for var in ctx.vars.shared() {
        ctx.keys.register(var.key(None), var.initial_status())?;
    }
    let members = std::iter::once(&joined.local).chain(&joined.presences);
    for peer in members {
        for var in ctx.vars.owned() {
            ctx.keys
                .register(var.key(Some(&peer.id)), var.initial_status())?;
            var.open_slot(&peer.id);
        }
    }
    Ok(())
}

/// A joined sync session.
///
/// Dropping the session without [`leave`](Self::leave) stops its tasks; the
/// transport notices the departure once its last handle is dropped.
pub struct SyncSession {
    ctx: Arc<SyncContext>,
    transport: Arc<dyn Transport>,
    session_id: String,
    tasks: TaskRegistry,
    outbound: Mutex<Option<JoinHandle<()>>>,
}

impl SyncSession {
    /// The local peer
    pub fn local_peer(&self) -> &Peer {
        &self.ctx.local
    }

    /// Joined session id
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Current handshake phase
    pub fn phase(&self) -> HandshakePhase {
        self.ctx.phase()
    }

    /// Wait until the session is ready or has failed
    pub async fn handshake_complete(&self) -> SyncResult<()> {
        let mut phase = self.ctx.phase.subscribe();
        let settled = phase
            .wait_for(|p| !matches!(p, HandshakePhase::Syncing))
            .await
            .map_err(|_| SyncError::SessionClosed)?
            .clone();
        match settled {
            HandshakePhase::Ready => Ok(()),
            HandshakePhase::Failed(err) => Err(err),
            HandshakePhase::Syncing => Err(SyncError::HandshakePending),
        }
    }

    /// Write a shared variable
    pub fn set<T: SyncValue>(&self, var: &SharedVar<T>, value: T) -> SyncResult<()> {
        let key = var.key();
        self.check_handle(&key, Arc::as_ptr(&var.cell) as *const ())?;
        egress::write_local(&self.ctx, &key, value.into_wire())
    }

    /// Write the local peer's slot of an owned variable
    pub fn set_own<T: SyncValue>(&self, var: &OwnedVar<T>, value: T) -> SyncResult<()> {
        let key = var.key(&self.ctx.local.id);
        self.check_handle(&key, Arc::as_ptr(&var.cell) as *const ())?;
        egress::write_local(&self.ctx, &key, value.into_wire())
    }

    /// Host correction of any peer's slot
    pub fn set_for<T: SyncValue>(
        &self,
        var: &OwnedVar<T>,
        owner: &PeerId,
        value: T,
    ) -> SyncResult<()> {
        let key = var.key(owner);
        self.check_handle(&key, Arc::as_ptr(&var.cell) as *const ())?;
        if *owner != self.ctx.local.id && !self.ctx.is_host() {
            return Err(SyncError::PermissionDenied {
                key,
                reason: "only the host may write another peer's slot".into(),
            });
        }
        egress::write_local(&self.ctx, &key, value.into_wire())
    }

    /// Handles from another builder address a different variable
    fn check_handle(&self, key: &VarKey, cell: *const ()) -> SyncResult<()> {
        if self.ctx.vars.holds(&key.name, cell) {
            Ok(())
        } else {
            Err(SyncError::unknown_key(key))
        }
    }

    /// Observe host changes, including the first host once ready
    pub fn on_host_changed(
        &self,
        listener: impl Fn(&HostChange) + Send + Sync + 'static,
    ) -> Subscription {
        self.ctx.host_listeners.subscribe(listener)
    }

    /// Observe errors the application should know about
    pub fn on_error(&self, listener: impl Fn(&SyncError) + Send + Sync + 'static) -> Subscription {
        self.ctx.error_listeners.subscribe(listener)
    }

    /// Currently elected host
    pub fn host(&self) -> Option<PeerId> {
        self.ctx.host()
    }

    /// Whether the local peer acts as host
    pub fn is_host(&self) -> bool {
        self.ctx.is_host()
    }

    /// Present peers, local peer included
    pub fn peers(&self) -> Vec<Peer> {
        self.ctx.roster.lock().peers().cloned().collect()
    }

    /// Validation status of a slot
    pub fn validation_status(&self, key: &VarKey) -> SyncResult<ValidationStatus> {
        self.ctx.keys.validation_status(key)
    }

    /// Lock version of a slot
    pub fn lock_version(&self, key: &VarKey) -> SyncResult<u64> {
        self.ctx.keys.lock_version(key)
    }

    /// Leave the session.
    ///
    /// Queued messages are delivered first. Afterwards every variable is back
    /// at its initial value and all listeners are detached.
    pub async fn leave(&self) -> SyncResult<()> {
        self.ctx.phase.send_replace(HandshakePhase::Failed(SyncError::SessionClosed));
        self.ctx.outbox.close();
        let outbound = self.outbound.lock().take();
        if let Some(outbound) = outbound {
            if outbound.await.is_err() {
                debug!("Outbound task ended abnormally");
            }
        }
        self.tasks.shutdown();

        let left = self.transport.leave().await;
        self.ctx.teardown();
        info!(peer = %self.ctx.local.id, session = %self.session_id, "Left session");
        match left {
            Ok(()) | Err(TransportError::NotJoined) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

impl Drop for SyncSession {
    fn drop(&mut self) {
        self.ctx.outbox.close();
        if let Some(outbound) = self.outbound.lock().take() {
            outbound.abort();
        }
    }
}

impl fmt::Debug for SyncSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncSession")
            .field("session_id", &self.session_id)
            .field("local", &self.ctx.local)
            .field("phase", &self.ctx.phase())
            .field("host", &self.ctx.host())
            .finish()
    }
}
