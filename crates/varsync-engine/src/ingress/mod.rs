//! Incoming data envelopes
//!
//! Records are applied one at a time in envelope order. A record that fails
//! is reported and skipped; the rest of the envelope still applies. Replies
//! produced while applying are collected and sent once the envelope is done.

mod guest;
mod host;

use crate::context::SyncContext;
use crate::registry::STICKY_HOST_VAR;
use crate::SyncError;
use tracing::trace;
use varsync_core::{AckRecord, Envelope, Peer, ValueKind, ValueRecord, WireValue};

/// Replies queued while applying one envelope
#[derive(Default)]
pub(crate) struct Outgoing {
    broadcast: Envelope,
}

impl Outgoing {
    pub(crate) fn broadcast_value(&mut self, record: ValueRecord<WireValue>) {
        self.broadcast.push_value(record);
    }

    pub(crate) fn broadcast_ack(&mut self, kind: ValueKind, ack: AckRecord) {
        self.broadcast.push_ack(kind, ack);
    }

    fn flush(self, ctx: &SyncContext) {
        if let Err(err) = ctx.send_envelope(&self.broadcast, None) {
            ctx.report(err);
        }
    }
}

/// Apply a data envelope from `source` under the local role
pub(crate) async fn handle_envelope(ctx: &SyncContext, source: &Peer, envelope: Envelope) {
    let (values, acks) = envelope.into_parts();
    let as_host = ctx.is_host();
    trace!(
        peer = %ctx.local.id,
        source = %source.id,
        values = values.len(),
        acks = acks.len(),
        as_host,
        "Envelope received"
    );

    let mut outgoing = Outgoing::default();
    let mut sticky_touched = false;

    for record in values {
        sticky_touched |= record.key == STICKY_HOST_VAR;
        let result = if as_host {
            host::ingest_value(ctx, source, record, &mut outgoing).await
        } else {
            guest::ingest_value(ctx, source, record)
        };
        if let Err(err) = result {
            ctx.report(err);
        }
    }

    for (kind, ack) in acks {
        let result = if as_host {
            Err(SyncError::protocol_violation(
                &source.id,
                &ack.var_key(),
                "acknowledgement sent to the host",
            ))
        } else {
            guest::ingest_ack(ctx, source, kind, ack)
        };
        if let Err(err) = result {
            ctx.report(err);
        }
    }

    outgoing.flush(ctx);

    if sticky_touched {
        ctx.refresh_sticky();
    }
}
