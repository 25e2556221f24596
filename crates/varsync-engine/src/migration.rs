//! Host migration
//!
//! When the host changes, a promoted peer settles every proposal still
//! pending locally by accepting it, then claims the sticky host id. Guests
//! that still hold pending proposals send them again to the new host.

use crate::context::SyncContext;
use crate::handshake;
use crate::roster::HostChange;
use crate::var::cell::Update;
use crate::var::Origin;
use crate::{SyncError, SyncResult};
use tracing::{debug, info};
use varsync_core::{AckRecord, Envelope, ValidationStatus, ValueRecord};

/// React to a host change produced by the roster
pub(crate) fn on_host_changed(ctx: &SyncContext, change: HostChange) {
    if !ctx.is_ready() {
        debug!(
            peer = %ctx.local.id,
            new = ?change.new,
            "Host change before the snapshot; announced once ready"
        );
        return;
    }
    info!(peer = %ctx.local.id, old = ?change.old, new = ?change.new, "Host changed");

    let result = match &change.new {
        Some(host) if *host == ctx.local.id => promote(ctx),
        Some(_) => resend_pending(ctx),
        None => Ok(()),
    };
    if let Err(err) = result {
        ctx.report(err);
    }
    ctx.host_listeners.emit(&change);
}

/// Accept every local pending proposal and take the sticky host id
fn promote(ctx: &SyncContext) -> SyncResult<()> {
    let mut envelope = Envelope::new();
    for key in ctx.keys.keys_with_status(ValidationStatus::Pending) {
        let var = match ctx.vars.get(&key) {
            Ok(var) => var.clone(),
            Err(err) => {
                ctx.report(err);
                continue;
            }
        };
        let accepted = ctx.keys.with_slot(&key, |slot| {
            if slot.status != ValidationStatus::Pending {
                return Ok(None);
            }
            let notify = var.write(
                key.owner.as_ref(),
                Update {
                    value: None,
                    old_status: ValidationStatus::Pending,
                    new_status: ValidationStatus::Validated,
                    source: ctx.local.id.clone(),
                    origin: Origin::Local,
                },
            )?;
            slot.lock_version += 1;
            slot.status = ValidationStatus::Validated;
            let value = var.read(key.owner.as_ref())?;
            Ok(Some((
                ValueRecord::new(&key, value, slot.lock_version, ValidationStatus::Validated),
                notify,
            )))
        });
        match accepted {
            Ok(Some((record, notify))) => {
                envelope.push_ack(
                    var.kind(),
                    AckRecord::new(&key, record.lock_version, ctx.local.id.clone()),
                );
                envelope.push_value(record);
                if let Some(notify) = notify {
                    notify();
                }
            }
            Ok(None) => {}
            Err(err) => ctx.report(err),
        }
    }

    info!(
        peer = %ctx.local.id,
        accepted = envelope.value_count(),
        "Promoted to host; pending proposals accepted"
    );
    ctx.send_envelope(&envelope, None)?;
    handshake::claim_sticky(ctx)
}

/// Send pending proposals to the new host
fn resend_pending(ctx: &SyncContext) -> SyncResult<()> {
    let host = ctx.host().ok_or(SyncError::NoHost)?;
    let mut envelope = Envelope::new();
    for key in ctx.keys.keys_with_status(ValidationStatus::Pending) {
        let var = ctx.vars.get(&key)?;
        let record = ctx.keys.with_slot(&key, |slot| {
            if slot.status != ValidationStatus::Pending {
                return Ok(None);
            }
            let value = var.read(key.owner.as_ref())?;
            Ok(Some(ValueRecord::new(
                &key,
                value,
                slot.lock_version,
                ValidationStatus::Pending,
            )))
        })?;
        if let Some(record) = record {
            envelope.push_value(record);
        }
    }
    if !envelope.is_empty() {
        info!(
            peer = %ctx.local.id,
            host = %host,
            proposals = envelope.value_count(),
            "Re-proposing pending values to the new host"
        );
    }
    ctx.send_envelope(&envelope, Some(vec![host]))
}
