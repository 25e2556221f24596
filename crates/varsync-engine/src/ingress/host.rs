//! Host-side ingestion
//!
//! Unguarded writes are applied when newer and corrected by broadcast when
//! not. Pending proposals are version-checked, handed to the variable's
//! validator off the receive path, and then either committed and
//! acknowledged or rolled back at the proposer.
//!
//! Every correction moves the slot's version forward, so it is broadcast:
//! peers that did not propose receive the value they already hold at the
//! new version, which keeps their next proposal from looking stale.

use super::Outgoing;
use crate::context::SyncContext;
use crate::keys::KeySlot;
use crate::var::cell::{ErasedVar, Notify, Update, ValidatorCall};
use crate::var::Origin;
use crate::{SyncError, SyncResult};
use std::sync::Arc;
use tracing::{debug, info, warn};
use varsync_core::{AckRecord, Peer, ValidationStatus, ValueRecord, VarKey, WireValue};

/// Outcome of running a validator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Accepted,
    Rejected,
    Missing,
}

pub(super) async fn ingest_value(
    ctx: &SyncContext,
    source: &Peer,
    record: ValueRecord<WireValue>,
    out: &mut Outgoing,
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
    if let Some(owner) = &key.owner {
        if *owner != source.id {
            return Err(SyncError::protocol_violation(
                &source.id,
                &key,
                "write to a slot owned by another peer",
            ));
        }
    }

    let status = record.status;
    match status {
        ValidationStatus::None => apply_unguarded(ctx, var.as_ref(), &key, source, record, out),
        ValidationStatus::Pending => validate_proposal(ctx, var, &key, source, record, out).await,
        status => Err(SyncError::protocol_violation(
            &source.id,
            &key,
            format!("guests never send {status} values"),
        )),
    }
}

/// Move the slot past `incoming` and describe the value it keeps
fn correction(
    var: &dyn ErasedVar,
    key: &VarKey,
    slot: &mut KeySlot,
    incoming: u64,
    status: ValidationStatus,
) -> SyncResult<ValueRecord<WireValue>> {
    let value = var.read(key.owner.as_ref())?;
    slot.lock_version = slot.lock_version.max(incoming) + 1;
    Ok(ValueRecord::new(key, value, slot.lock_version, status))
}

fn apply_unguarded(
    ctx: &SyncContext,
    var: &dyn ErasedVar,
    key: &VarKey,
    source: &Peer,
    record: ValueRecord<WireValue>,
    out: &mut Outgoing,
) -> SyncResult<()> {
    let ValueRecord {
        value,
        lock_version: incoming,
        ..
    } = record;

    enum Outcome {
        Applied(Option<Notify>),
        Corrected {
            local: u64,
            record: ValueRecord<WireValue>,
        },
    }

    let outcome = ctx.keys.with_slot(key, |slot| {
        if !slot.accepts(incoming) {
            let local = slot.lock_version;
            let status = slot.status;
            let record = correction(var, key, slot, incoming, status)?;
            return Ok(Outcome::Corrected { local, record });
        }
        let notify = var.write(
            key.owner.as_ref(),
            Update {
                value: Some(value),
                old_status: slot.status,
                new_status: ValidationStatus::None,
                source: source.id.clone(),
                origin: Origin::Remote,
            },
        )?;
        slot.lock_version = incoming;
        slot.status = ValidationStatus::None;
        Ok(Outcome::Applied(notify))
    })?;

    match outcome {
        Outcome::Applied(notify) => {
            if let Some(notify) = notify {
                notify();
            }
            Ok(())
        }
        Outcome::Corrected { local, record } => {
            debug!(key = %key, source = %source.id, local, incoming, "Correcting outdated write");
            out.broadcast_value(record);
            Err(SyncError::version_rejected(key, local, incoming))
        }
    }
}

async fn validate_proposal(
    ctx: &SyncContext,
    var: Arc<dyn ErasedVar>,
    key: &VarKey,
    source: &Peer,
    record: ValueRecord<WireValue>,
    out: &mut Outgoing,
) -> SyncResult<()> {
    let ValueRecord {
        value,
        lock_version: incoming,
        ..
    } = record;

    enum Gate {
        Open(u64),
        Closed {
            local: u64,
            record: ValueRecord<WireValue>,
        },
    }

    let gate = ctx.keys.with_slot(key, |slot| {
        if slot.accepts(incoming) {
            return Ok(Gate::Open(slot.generation));
        }
        let local = slot.lock_version;
        let record = correction(var.as_ref(), key, slot, incoming, ValidationStatus::Validated)?;
        Ok(Gate::Closed { local, record })
    })?;
    let generation = match gate {
        Gate::Open(generation) => generation,
        Gate::Closed { local, record } => {
            out.broadcast_value(record);
            return Err(SyncError::version_rejected(key, local, incoming));
        }
    };

    let verdict = match var.validator_call(key.owner.as_ref(), &source.id, value.clone())? {
        Some(call) => run_validator(ctx, key, call).await,
        None => Verdict::Missing,
    };

    enum Settled {
        Superseded,
        Raced {
            local: u64,
            record: ValueRecord<WireValue>,
        },
        Accepted {
            record: ValueRecord<WireValue>,
            notify: Option<Notify>,
        },
        Rejected(ValueRecord<WireValue>),
    }

    let settled = ctx.keys.with_slot(key, |slot| {
        if slot.generation != generation {
            return Ok(Settled::Superseded);
        }
        if !slot.accepts(incoming) {
            let local = slot.lock_version;
            let record = correction(var.as_ref(), key, slot, incoming, ValidationStatus::Validated)?;
            return Ok(Settled::Raced { local, record });
        }
        if verdict != Verdict::Accepted {
            let record = correction(var.as_ref(), key, slot, incoming, ValidationStatus::Validated)?;
            return Ok(Settled::Rejected(record));
        }
        let notify = var.write(
            key.owner.as_ref(),
            Update {
                value: Some(value.clone()),
                old_status: slot.status,
                new_status: ValidationStatus::Validated,
                source: source.id.clone(),
                origin: Origin::Remote,
            },
        )?;
        slot.lock_version = incoming;
        slot.status = ValidationStatus::Validated;
        Ok(Settled::Accepted {
            record: ValueRecord::new(key, value, incoming, ValidationStatus::Validated),
            notify,
        })
    });

    let settled = match settled {
        Ok(settled) => settled,
        Err(SyncError::UnknownKey { .. }) => Settled::Superseded,
        Err(err) => return Err(err),
    };

    match settled {
        Settled::Superseded => {
            debug!(key = %key, source = %source.id, "Proposal outlived its slot; dropped");
            Ok(())
        }
        Settled::Raced { local, record } => {
            out.broadcast_value(record);
            Err(SyncError::version_rejected(key, local, incoming))
        }
        Settled::Accepted { record, notify } => {
            info!(key = %key, source = %source.id, version = incoming, "Proposal accepted");
            out.broadcast_value(record);
            out.broadcast_ack(
                var.kind(),
                AckRecord::new(key, incoming, source.id.clone()),
            );
            if let Some(notify) = notify {
                notify();
            }
            Ok(())
        }
        Settled::Rejected(record) => {
            info!(
                key = %key,
                source = %source.id,
                version = record.lock_version,
                "Proposal rejected; rolling back"
            );
            out.broadcast_value(record);
            if verdict == Verdict::Missing {
                Err(SyncError::MissingValidator { key: key.clone() })
            } else {
                Ok(())
            }
        }
    }
}

/// Run a validator on the blocking pool under the configured deadline.
///
/// A validator that panics or overruns counts as a rejection.
async fn run_validator(ctx: &SyncContext, key: &VarKey, call: ValidatorCall) -> Verdict {
    let deadline = ctx.config.validator_timeout();
    match tokio::time::timeout(deadline, tokio::task::spawn_blocking(call)).await {
        Ok(Ok(true)) => Verdict::Accepted,
        Ok(Ok(false)) => Verdict::Rejected,
        Ok(Err(err)) => {
            warn!(key = %key, error = %err, "Validator panicked; rejecting");
            Verdict::Rejected
        }
        Err(_) => {
            warn!(
                key = %key,
                timeout_ms = ctx.config.validator_timeout_ms,
                "Validator timed out; rejecting"
            );
            Verdict::Rejected
        }
    }
}
