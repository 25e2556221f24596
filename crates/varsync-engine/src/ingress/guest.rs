//! Guest-side ingestion

use crate::context::SyncContext;
use crate::var::cell::Update;
use crate::var::Origin;
use crate::{SyncError, SyncResult};
use tracing::trace;
use varsync_core::{AckRecord, Peer, ValidationStatus, ValueKind, ValueRecord, WireValue};

pub(super) fn ingest_value(
    ctx: &SyncContext,
    source: &Peer,
    record: ValueRecord<WireValue>,
) -> SyncResult<()> {
    let key = record.var_key();
    let var = ctx.vars.get(&key)?.clone();

    let actual = record.value.kind();
    if actual != var.kind() {
        return Err(SyncError::TypeMismatch {
            key,
            expected: var.kind(),
            actual,
        });
    }

    let from_host = ctx.is_host_peer(&source.id);
    match record.status {
        ValidationStatus::None => {
            if let Some(owner) = &key.owner {
                if *owner != source.id && !from_host {
                    return Err(SyncError::protocol_violation(
                        &source.id,
                        &key,
                        "write to a slot owned by another peer",
                    ));
                }
            }
        }
        ValidationStatus::Validated => {
            if !from_host {
                return Err(SyncError::protocol_violation(
                    &source.id,
                    &key,
                    "validated value from a peer that is not the host",
                ));
            }
        }
        status => {
            return Err(SyncError::protocol_violation(
                &source.id,
                &key,
                format!("{status} values are only sent to the host"),
            ));
        }
    }

    let ValueRecord {
        value,
        lock_version: incoming,
        status,
        ..
    } = record;

    let notify = ctx.keys.with_slot(&key, |slot| {
        if !slot.accepts(incoming) {
            // The host echoes an accepted proposal back to its proposer.
            if incoming == slot.lock_version && var.read(key.owner.as_ref())?.same_value(&value) {
                return Ok(None);
            }
            return Err(SyncError::version_rejected(&key, slot.lock_version, incoming));
        }
        let notify = var.write(
            key.owner.as_ref(),
            Update {
                value: Some(value),
                old_status: slot.status,
                new_status: status,
                source: source.id.clone(),
                origin: Origin::Remote,
            },
        )?;
        slot.lock_version = incoming;
        slot.status = status;
        Ok(notify)
    })?;

    if let Some(notify) = notify {
        notify();
    }
    Ok(())
}

/// Mark the local proposal validated if the host accepted exactly it
pub(super) fn ingest_ack(
    ctx: &SyncContext,
    source: &Peer,
    kind: ValueKind,
    ack: AckRecord,
) -> SyncResult<()> {
    let key = ack.var_key();
    if !ctx.is_host_peer(&source.id) {
        return Err(SyncError::protocol_violation(
            &source.id,
            &key,
            "acknowledgement from a peer that is not the host",
        ));
    }
    let var = ctx.vars.get(&key)?.clone();
    if kind != var.kind() {
        return Err(SyncError::TypeMismatch {
            key,
            expected: var.kind(),
            actual: kind,
        });
    }
    if ack.proposer != ctx.local.id {
        return Ok(());
    }

    let notify = ctx.keys.with_slot(&key, |slot| {
        if slot.status != ValidationStatus::Pending || slot.lock_version != ack.lock_version {
            trace!(
                key = %key,
                local = slot.lock_version,
                acked = ack.lock_version,
                "Acknowledgement for an older proposal"
            );
            return Ok(None);
        }
        let notify = var.write(
            key.owner.as_ref(),
            Update {
                value: None,
                old_status: ValidationStatus::Pending,
                new_status: ValidationStatus::Validated,
                source: source.id.clone(),
                origin: Origin::Remote,
            },
        )?;
        slot.status = ValidationStatus::Validated;
        Ok(notify)
    })?;

    if let Some(notify) = notify {
        notify();
    }
    Ok(())
}
