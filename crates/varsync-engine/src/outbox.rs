//! Outbound message queue
//!
//! Engine logic encodes messages synchronously and queues them here; one
//! task drains the queue into the transport in order. Writes therefore never
//! wait on the network, and the order of sends matches the order of the
//! state changes that produced them.

use crate::context::SyncContext;
use crate::{SyncError, SyncResult};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, trace};
use varsync_core::{PeerId, WireFormat};
use varsync_transport::{OpCode, Transport};

/// One encoded message waiting for the transport
#[derive(Debug)]
pub(crate) struct Outbound {
    pub opcode: OpCode,
    pub payload: Vec<u8>,
    pub targets: Option<Vec<PeerId>>,
}

pub(crate) struct Outbox {
    format: WireFormat,
    sender: Mutex<Option<mpsc::UnboundedSender<Outbound>>>,
}

impl Outbox {
    pub(crate) fn new(format: WireFormat) -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Self {
                format,
                sender: Mutex::new(Some(sender)),
            },
            receiver,
        )
    }

    /// Encode `message` and queue it; `targets` of `None` means every peer
    pub(crate) fn send<M: Serialize>(
        &self,
        opcode: OpCode,
        message: &M,
        targets: Option<Vec<PeerId>>,
    ) -> SyncResult<()> {
        let payload = self.format.encode(message)?;
        let guard = self.sender.lock();
        let sender = guard.as_ref().ok_or(SyncError::SessionClosed)?;
        sender
            .send(Outbound {
                opcode,
                payload,
                targets,
            })
            .map_err(|_| SyncError::SessionClosed)
    }

    /// Stop accepting messages; already queued ones are still delivered
    pub(crate) fn close(&self) {
        self.sender.lock().take();
    }
}

/// Drain queued messages into the transport until the outbox closes
pub(crate) async fn run_outbound(
    ctx: Arc<SyncContext>,
    transport: Arc<dyn Transport>,
    mut receiver: mpsc::UnboundedReceiver<Outbound>,
) {
    while let Some(message) = receiver.recv().await {
        trace!(
            opcode = message.opcode,
            bytes = message.payload.len(),
            targets = ?message.targets,
            "Sending"
        );
        if let Err(err) = transport
            .send(message.opcode, message.payload, message.targets)
            .await
        {
            ctx.report(err.into());
        }
    }
    debug!("Outbound queue drained");
}
