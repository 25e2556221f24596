//! Local writes
//!
//! A local write updates the slot first and then queues the record. Guests
//! editing a validated key turn it pending and send the proposal to the host
//! alone; every other write is broadcast.

use crate::context::SyncContext;
use crate::var::cell::Update;
use crate::var::Origin;
use crate::{SyncError, SyncResult};
use tracing::debug;
use varsync_core::{Envelope, ValidationStatus, ValueRecord, VarKey, WireValue};

/// Application write to `key`
pub(crate) fn write_local(ctx: &SyncContext, key: &VarKey, value: WireValue) -> SyncResult<()> {
    ctx.ensure_writable()?;
    publish(ctx, key, value)
}

/// Apply and send a local write without the handshake gate
pub(crate) fn publish(ctx: &SyncContext, key: &VarKey, value: WireValue) -> SyncResult<()> {
    let var = ctx.vars.get(key)?.clone();
    let as_host = ctx.is_host();
    let host = ctx.host().ok_or(SyncError::NoHost)?;

    if let Some(owner) = &key.owner {
        if *owner != ctx.local.id && !as_host {
            return Err(SyncError::PermissionDenied {
                key: key.clone(),
                reason: "only the owner or the host may write this slot".into(),
            });
        }
    }

    let (record, notify) = ctx.keys.with_slot(key, |slot| {
        let new_status = if as_host {
            if slot.status == ValidationStatus::Pending {
                return Err(SyncError::HostPendingWrite { key: key.clone() });
            }
            slot.status
        } else {
            slot.status.after_guest_edit()
        };
        let notify = var.write(
            key.owner.as_ref(),
            Update {
                value: Some(value.clone()),
                old_status: slot.status,
                new_status,
                source: ctx.local.id.clone(),
                origin: Origin::Local,
            },
        )?;
        slot.lock_version += 1;
        slot.status = new_status;
        Ok((
            ValueRecord::new(key, value, slot.lock_version, new_status),
            notify,
        ))
    })?;

    if let Some(notify) = notify {
        notify();
    }

    let proposal = !as_host && record.status == ValidationStatus::Pending;
    debug!(
        peer = %ctx.local.id,
        key = %key,
        version = record.lock_version,
        status = %record.status,
        proposal,
        "Local write"
    );

    let mut envelope = Envelope::new();
    envelope.push_value(record);
    let targets = proposal.then(|| vec![host]);
    ctx.send_envelope(&envelope, targets)
}
