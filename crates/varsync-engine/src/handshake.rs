//! Late-join handshake
//!
//! A peer that joins a non-empty session broadcasts its key declarations.
//! The host answers the joiner alone, with either a snapshot of every slot
//! or the reason the declarations differ. Until the answer arrives, data
//! envelopes are buffered and local writes are refused.

use crate::context::SyncContext;
use crate::egress;
use crate::ingress;
use crate::registry::describe_mismatch;
use crate::roster::HostChange;
use crate::var::cell::Update;
use crate::var::Origin;
use crate::{SyncError, SyncResult};
use std::collections::VecDeque;
use tracing::{debug, info, warn};
use varsync_core::{
    Envelope, HandshakeRequest, HandshakeResponse, Peer, ValueRecord, WireValue,
};

/// Where a session stands in the late-join handshake.
#[derive(Debug, Clone, PartialEq)]
pub enum HandshakePhase {
    /// Waiting for the host's snapshot
    Syncing,
    /// Replicating normally
    Ready,
    /// The handshake failed or the session was left
    Failed(SyncError),
}

#[derive(Debug, Default)]
pub(crate) struct HandshakeState {
    request: Option<HandshakeRequest>,
    pub(crate) buffered: VecDeque<(Peer, Envelope)>,
}

/// Send this peer's key declarations to every present peer
pub(crate) fn begin(ctx: &SyncContext) -> SyncResult<()> {
    let request = HandshakeRequest::new(ctx.vars.declarations());
    info!(
        peer = %ctx.local.id,
        request_id = %request.request_id,
        keys = request.key_set.len(),
        "Requesting session snapshot"
    );
    ctx.outbox
        .send(ctx.config.opcodes.handshake_request, &request, None)?;
    ctx.handshake.lock().request = Some(request);
    Ok(())
}

/// Repeat the outstanding request, for when the peer expected to answer left
pub(crate) fn resend(ctx: &SyncContext) {
    let request = ctx.handshake.lock().request.clone();
    if let Some(request) = request {
        debug!(request_id = %request.request_id, "Re-sending snapshot request");
        if let Err(err) = ctx
            .outbox
            .send(ctx.config.opcodes.handshake_request, &request, None)
        {
            ctx.report(err);
        }
    }
}

/// Hold a data envelope until the snapshot has been applied
pub(crate) fn buffer(ctx: &SyncContext, source: Peer, envelope: Envelope) {
    let limit = ctx.config.max_buffered_envelopes;
    let mut state = ctx.handshake.lock();
    if state.buffered.len() >= limit {
        if let Some((dropped, _)) = state.buffered.pop_front() {
            warn!(source = %dropped.id, limit, "Handshake buffer full; dropping oldest envelope");
        }
    }
    state.buffered.push_back((source, envelope));
}

/// Host side: answer a joiner's request
pub(crate) fn respond(ctx: &SyncContext, source: &Peer, request: HandshakeRequest) -> SyncResult<()> {
    if !ctx.is_host() {
        debug!(source = %source.id, "Ignoring snapshot request; not the host");
        return Ok(());
    }

    let response = match describe_mismatch(&ctx.vars.declarations(), &request.key_set) {
        Some(reason) => {
            warn!(source = %source.id, %reason, "Rejecting joiner with different keys");
            HandshakeResponse::rejected(request.request_id, reason)
        }
        None => {
            let snapshot = snapshot(ctx)?;
            info!(
                source = %source.id,
                values = snapshot.value_count(),
                "Sending session snapshot"
            );
            HandshakeResponse::accepted(request.request_id, snapshot)
        }
    };
    ctx.outbox.send(
        ctx.config.opcodes.handshake_response,
        &response,
        Some(vec![source.id.clone()]),
    )
}

/// Every registered slot with its current value, version and status
fn snapshot(ctx: &SyncContext) -> SyncResult<Envelope> {
    let mut envelope = Envelope::new();
    for key in ctx.keys.keys() {
        let var = ctx.vars.get(&key)?;
        let record = ctx.keys.with_slot(&key, |slot| {
            let value = var.read(key.owner.as_ref())?;
            Ok(ValueRecord::new(&key, value, slot.lock_version, slot.status))
        })?;
        envelope.push_value(record);
    }
    Ok(envelope)
}

/// Joiner side: apply the host's answer
pub(crate) async fn complete(
    ctx: &SyncContext,
    source: &Peer,
    response: HandshakeResponse,
) -> SyncResult<()> {
    let expected = ctx
        .handshake
        .lock()
        .request
        .as_ref()
        .map(|request| request.request_id);
    if !ctx.is_syncing() || expected != Some(response.request_id) {
        debug!(source = %source.id, "Ignoring unsolicited snapshot");
        return Ok(());
    }

    if !response.success {
        let reason = response.reason.unwrap_or_default();
        fail(ctx, SyncError::HandshakeMismatch { reason });
        return Ok(());
    }

    let (values, _) = response.snapshot.into_parts();
    let count = values.len();
    for record in values {
        if let Err(err) = apply_snapshot_record(ctx, source, record) {
            ctx.report(err);
        }
    }
    ctx.refresh_sticky();
    info!(peer = %ctx.local.id, source = %source.id, values = count, "Snapshot applied");

    become_ready(ctx);

    let buffered = std::mem::take(&mut ctx.handshake.lock().buffered);
    if !buffered.is_empty() {
        debug!(envelopes = buffered.len(), "Replaying buffered envelopes");
    }
    for (peer, envelope) in buffered {
        ingress::handle_envelope(ctx, &peer, envelope).await;
    }
    Ok(())
}

/// Snapshot values overwrite local state; versions only move forward
fn apply_snapshot_record(
    ctx: &SyncContext,
    source: &Peer,
    record: ValueRecord<WireValue>,
) -> SyncResult<()> {
    let key = record.var_key();
    let var = ctx.vars.get(&key)?;
    let notify = ctx.keys.with_slot(&key, |slot| {
        let notify = var.write(
            key.owner.as_ref(),
            Update {
                value: Some(record.value),
                old_status: slot.status,
                new_status: record.status,
                source: source.id.clone(),
                origin: Origin::Remote,
            },
        )?;
        slot.adopt(record.lock_version);
        slot.status = record.status;
        Ok(notify)
    })?;
    if let Some(notify) = notify {
        notify();
    }
    Ok(())
}

/// Enter the ready phase and announce the host
pub(crate) fn become_ready(ctx: &SyncContext) {
    ctx.phase.send_replace(HandshakePhase::Ready);
    let host = ctx.host();
    info!(peer = %ctx.local.id, host = ?host, "Session ready");
    if host.as_ref() == Some(&ctx.local.id) {
        if let Err(err) = claim_sticky(ctx) {
            ctx.report(err);
        }
    }
    ctx.host_listeners.emit(&HostChange { old: None, new: host });
}

/// Publish the local id as sticky host
pub(crate) fn claim_sticky(ctx: &SyncContext) -> SyncResult<()> {
    let id = ctx.local.id.as_str().to_string();
    if ctx.sticky_host()?.as_ref() == Some(&ctx.local.id) {
        return Ok(());
    }
    egress::publish(ctx, &SyncContext::sticky_key(), WireValue::String(id))?;
    ctx.refresh_sticky();
    Ok(())
}

/// Leave the syncing phase with `err`; false if it already ended
pub(crate) fn fail(ctx: &SyncContext, err: SyncError) -> bool {
    let failed = ctx.phase.send_if_modified(|phase| {
        if matches!(phase, HandshakePhase::Syncing) {
            *phase = HandshakePhase::Failed(err.clone());
            true
        } else {
            false
        }
    });
    if failed {
        ctx.handshake.lock().buffered.clear();
        ctx.report(err);
    }
    failed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::outbox::Outbox;
    use crate::registry::VarRegistry;
    use varsync_core::{PeerId, VarKey};

    fn context(limit: usize) -> SyncContext {
        let config = SyncConfig {
            max_buffered_envelopes: limit,
            ..SyncConfig::testing()
        };
        let (outbox, _receiver) = Outbox::new(config.wire_format);
        SyncContext::new(config, Peer::new("me", "Me"), VarRegistry::default(), outbox)
    }

    fn envelope(version: u64) -> Envelope {
        let mut envelope = Envelope::new();
        envelope.push_value(ValueRecord::new(
            &VarKey::shared("score"),
            WireValue::Int(version as i64),
            version,
            varsync_core::ValidationStatus::None,
        ));
        envelope
    }

    #[test]
    fn buffer_drops_oldest_when_full() {
        let ctx = context(2);
        let peer = Peer::new(PeerId::from("host"), "Host");
        for version in 1..=3 {
            buffer(&ctx, peer.clone(), envelope(version));
        }
        let state = ctx.handshake.lock();
        let versions: Vec<u64> = state
            .buffered
            .iter()
            .map(|(_, e)| e.ints.values[0].lock_version)
            .collect();
        assert_eq!(versions, vec![2, 3]);
    }

    #[test]
    fn failing_twice_keeps_the_first_reason() {
        let ctx = context(4);
        assert!(fail(&ctx, SyncError::HandshakeTimeout { timeout_ms: 10 }));
        assert!(!fail(&ctx, SyncError::SessionClosed));
        assert_eq!(
            ctx.phase(),
            HandshakePhase::Failed(SyncError::HandshakeTimeout { timeout_ms: 10 })
        );
    }

    #[test]
    fn ready_sessions_cannot_fail_the_handshake() {
        let ctx = context(4);
        ctx.phase.send_replace(HandshakePhase::Ready);
        assert!(!fail(&ctx, SyncError::HandshakeTimeout { timeout_ms: 10 }));
        assert!(ctx.is_ready());
    }
}
