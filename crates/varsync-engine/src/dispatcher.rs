//! Inbound event loop
//!
//! Transport events are handled strictly in arrival order on one task:
//! presence changes update the roster and the owned slots, sync messages are
//! routed by op code, and anything else on the transport is ignored.

use crate::context::SyncContext;
use crate::handshake;
use crate::ingress;
use crate::migration;
use crate::SyncResult;
use std::sync::Arc;
use tracing::{debug, info, trace};
use varsync_core::{Envelope, HandshakeRequest, HandshakeResponse, Peer, VarKey};
use varsync_transport::{OpCode, Transport, TransportError, TransportEvent};

/// Consume transport events until the stream ends or the handshake fails
pub(crate) async fn run_inbound(ctx: Arc<SyncContext>, transport: Arc<dyn Transport>) {
    while let Some(event) = transport.next_event().await {
        dispatch(&ctx, event).await;
        if ctx.is_failed() {
            break;
        }
    }
    debug!(peer = %ctx.local.id, "Inbound loop finished");
    if ctx.is_failed() {
        leave_transport(&ctx, transport.as_ref()).await;
    }
}

/// Leave the transport after a failure, reporting anything but `NotJoined`
pub(crate) async fn leave_transport(ctx: &SyncContext, transport: &dyn Transport) {
    match transport.leave().await {
        Ok(()) | Err(TransportError::NotJoined) => {}
        Err(err) => ctx.report(err.into()),
    }
}

async fn dispatch(ctx: &SyncContext, event: TransportEvent) {
    match event {
        TransportEvent::PeerJoined(peer) => peer_joined(ctx, peer),
        TransportEvent::PeerLeft(peer) => peer_left(ctx, peer),
        TransportEvent::Message {
            opcode,
            payload,
            source,
        } => {
            if let Err(err) = route(ctx, opcode, &payload, &source).await {
                ctx.report(err);
            }
        }
    }
}

async fn route(ctx: &SyncContext, opcode: OpCode, payload: &[u8], source: &Peer) -> SyncResult<()> {
    let opcodes = ctx.config.opcodes;
    let format = ctx.config.wire_format;
    if opcode == opcodes.data {
        let envelope: Envelope = format.decode(payload)?;
        if ctx.is_syncing() {
            handshake::buffer(ctx, source.clone(), envelope);
        } else {
            ingress::handle_envelope(ctx, source, envelope).await;
        }
    } else if opcode == opcodes.handshake_request {
        let request: HandshakeRequest = format.decode(payload)?;
        handshake::respond(ctx, source, request)?;
    } else if opcode == opcodes.handshake_response {
        let response: HandshakeResponse = format.decode(payload)?;
        handshake::complete(ctx, source, response).await?;
    } else {
        trace!(opcode, source = %source.id, "Ignoring message with foreign op code");
    }
    Ok(())
}

/// Open the newcomer's owned slots
pub(crate) fn peer_joined(ctx: &SyncContext, peer: Peer) {
    let added = ctx.roster.lock().add(peer.clone());
    let change = match added {
        Ok(change) => change,
        Err(err) => {
            ctx.report(err);
            return;
        }
    };
    for var in ctx.vars.owned() {
        let key = VarKey::owned(var.name(), peer.id.clone());
        if let Err(err) = ctx.keys.register(key, var.initial_status()) {
            ctx.report(err);
        }
        var.open_slot(&peer.id);
    }
    info!(peer = %ctx.local.id, joined = %peer, "Peer joined");
    if let Some(change) = change {
        migration::on_host_changed(ctx, change);
    }
}

/// Close the departed peer's owned slots and re-elect if needed
pub(crate) fn peer_left(ctx: &SyncContext, peer: Peer) {
    let removed = ctx.roster.lock().remove(&peer.id);
    let departure = match removed {
        Ok(departure) => departure,
        Err(err) => {
            ctx.report(err);
            return;
        }
    };
    for var in ctx.vars.owned() {
        let key = VarKey::owned(var.name(), peer.id.clone());
        if ctx.keys.unregister(&key).is_err() {
            trace!(key = %key, "Owned slot was never registered");
        }
        var.close_slot(&peer.id);
    }
    info!(
        peer = %ctx.local.id,
        left = %peer,
        sticky_cleared = departure.sticky_cleared,
        "Peer left"
    );
    if departure.sticky_cleared {
        ctx.clear_sticky(&peer.id);
    }
    if ctx.is_syncing() {
        handshake::resend(ctx);
    }
    if let Some(change) = departure.host_change {
        migration::on_host_changed(ctx, change);
    }
}
