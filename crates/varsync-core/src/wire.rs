//! Wire messages exchanged by sync peers.
//!
//! Three logical messages travel on the transport: a data [`Envelope`], a
//! [`HandshakeRequest`] from a late joiner, and the host's
//! [`HandshakeResponse`]. Their byte encoding is chosen by
//! [`crate::WireFormat`].

use crate::identifiers::{PeerId, VarKey};
use crate::status::ValidationStatus;
use crate::value::{ValueKind, WireValue};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

/// One replicated value in transit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueRecord<T> {
    /// Logical variable name
    pub key: String,
    /// The value itself
    pub value: T,
    /// Sender's lock version for the slot after this write
    pub lock_version: u64,
    /// Validation status the sender attaches to the value
    pub status: ValidationStatus,
    /// Owning peer for owned-variable slots
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<PeerId>,
}

impl<T> ValueRecord<T> {
    /// Create a record for the given slot
    pub fn new(key: &VarKey, value: T, lock_version: u64, status: ValidationStatus) -> Self {
        Self {
            key: key.name.clone(),
            value,
            lock_version,
            status,
            owner: key.owner.clone(),
        }
    }

    /// Slot this record addresses
    pub fn var_key(&self) -> VarKey {
        VarKey {
            name: self.key.clone(),
            owner: self.owner.clone(),
        }
    }

    fn map_value<U>(self, f: impl FnOnce(T) -> U) -> ValueRecord<U> {
        ValueRecord {
            key: self.key,
            value: f(self.value),
            lock_version: self.lock_version,
            status: self.status,
            owner: self.owner,
        }
    }
}

/// Host acknowledgement that a slot's pending value is now validated.
///
/// Only the proposer at exactly `lock_version` still holds that value as
/// pending; everyone else already received the validated value itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckRecord {
    /// Logical variable name
    pub key: String,
    /// Owning peer for owned-variable slots
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<PeerId>,
    /// Lock version the acknowledgement applies to
    pub lock_version: u64,
    /// Peer whose proposal was accepted
    pub proposer: PeerId,
}

impl AckRecord {
    /// Create an acknowledgement for the given slot, version and proposer
    pub fn new(key: &VarKey, lock_version: u64, proposer: PeerId) -> Self {
        Self {
            key: key.name.clone(),
            owner: key.owner.clone(),
            lock_version,
            proposer,
        }
    }

    /// Slot this acknowledgement addresses
    pub fn var_key(&self) -> VarKey {
        VarKey {
            name: self.key.clone(),
            owner: self.owner.clone(),
        }
    }
}

/// Values and acknowledgements of one value kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypedBatch<T> {
    /// Value records
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<ValueRecord<T>>,
    /// Acknowledgements
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub acks: Vec<AckRecord>,
}

impl<T> Default for TypedBatch<T> {
    fn default() -> Self {
        Self {
            values: Vec::new(),
            acks: Vec::new(),
        }
    }
}

impl<T> TypedBatch<T> {
    /// True when the batch carries nothing
    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.acks.is_empty()
    }
}

/// A batch of typed value records and acknowledgements.
///
/// Sent as one message per transport send. Empty batches are omitted from
/// the encoded form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Boolean batch
    #[serde(default, skip_serializing_if = "TypedBatch::is_empty")]
    pub bools: TypedBatch<bool>,
    /// Float batch
    #[serde(default, skip_serializing_if = "TypedBatch::is_empty")]
    pub floats: TypedBatch<f64>,
    /// Integer batch
    #[serde(default, skip_serializing_if = "TypedBatch::is_empty")]
    pub ints: TypedBatch<i64>,
    /// String batch
    #[serde(default, skip_serializing_if = "TypedBatch::is_empty")]
    pub strings: TypedBatch<String>,
}

impl Envelope {
    /// Create an empty envelope
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a value record to the batch matching its kind
    pub fn push_value(&mut self, record: ValueRecord<WireValue>) {
        let ValueRecord {
            key,
            value,
            lock_version,
            status,
            owner,
        } = record;
        match value {
            WireValue::Bool(v) => self.bools.values.push(ValueRecord {
                key,
                value: v,
                lock_version,
                status,
                owner,
            }),
            WireValue::Float(v) => self.floats.values.push(ValueRecord {
                key,
                value: v,
                lock_version,
                status,
                owner,
            }),
            WireValue::Int(v) => self.ints.values.push(ValueRecord {
                key,
                value: v,
                lock_version,
                status,
                owner,
            }),
            WireValue::String(v) => self.strings.values.push(ValueRecord {
                key,
                value: v,
                lock_version,
                status,
                owner,
            }),
        }
    }

    /// Add an acknowledgement to the batch of the given kind
    pub fn push_ack(&mut self, kind: ValueKind, ack: AckRecord) {
        match kind {
            ValueKind::Bool => self.bools.acks.push(ack),
            ValueKind::Float => self.floats.acks.push(ack),
            ValueKind::Int => self.ints.acks.push(ack),
            ValueKind::String => self.strings.acks.push(ack),
        }
    }

    /// True when no batch carries anything
    pub fn is_empty(&self) -> bool {
        self.bools.is_empty()
            && self.floats.is_empty()
            && self.ints.is_empty()
            && self.strings.is_empty()
    }

    /// Number of value records across all batches
    pub fn value_count(&self) -> usize {
        self.bools.values.len()
            + self.floats.values.len()
            + self.ints.values.len()
            + self.strings.values.len()
    }

    /// Split into type-erased value records and kind-tagged acknowledgements.
    ///
    /// Values come first in bool, float, int, string order, which is the order
    /// they are applied in.
    pub fn into_parts(self) -> (Vec<ValueRecord<WireValue>>, Vec<(ValueKind, AckRecord)>) {
        let mut values = Vec::with_capacity(self.value_count());
        let mut acks = Vec::new();

        values.extend(self.bools.values.into_iter().map(|r| r.map_value(WireValue::Bool)));
        acks.extend(self.bools.acks.into_iter().map(|a| (ValueKind::Bool, a)));
        values.extend(self.floats.values.into_iter().map(|r| r.map_value(WireValue::Float)));
        acks.extend(self.floats.acks.into_iter().map(|a| (ValueKind::Float, a)));
        values.extend(self.ints.values.into_iter().map(|r| r.map_value(WireValue::Int)));
        acks.extend(self.ints.acks.into_iter().map(|a| (ValueKind::Int, a)));
        values.extend(
            self.strings
                .values
                .into_iter()
                .map(|r| r.map_value(WireValue::String)),
        );
        acks.extend(self.strings.acks.into_iter().map(|a| (ValueKind::String, a)));

        (values, acks)
    }
}

/// Whether a declared variable is shared or owned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VarScope {
    /// One global value
    Shared,
    /// One value per owning peer
    Owned,
}

/// A variable as declared at registration time.
///
/// Two peers can sync only if their declaration sets are equal.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct KeyDeclaration {
    /// Logical variable name
    pub name: String,
    /// Value type
    pub kind: ValueKind,
    /// Shared or owned
    pub scope: VarScope,
}

impl fmt::Display for KeyDeclaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scope = match self.scope {
            VarScope::Shared => "shared",
            VarScope::Owned => "owned",
        };
        write!(f, "{}:{}:{}", self.name, scope, self.kind)
    }
}

/// Late joiner's request for the current state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeRequest {
    /// Correlates the response with this request
    pub request_id: Uuid,
    /// Every variable the joiner registered
    pub key_set: BTreeSet<KeyDeclaration>,
}

impl HandshakeRequest {
    /// Create a request with a fresh id
    pub fn new(key_set: BTreeSet<KeyDeclaration>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            key_set,
        }
    }
}

/// Host's answer to a [`HandshakeRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandshakeResponse {
    /// Id of the request being answered
    pub request_id: Uuid,
    /// Whether the key sets matched
    pub success: bool,
    /// Every stored value, empty on rejection
    #[serde(default)]
    pub snapshot: Envelope,
    /// Why the request was rejected
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl HandshakeResponse {
    /// Accepting response carrying a snapshot
    pub fn accepted(request_id: Uuid, snapshot: Envelope) -> Self {
        Self {
            request_id,
            success: true,
            snapshot,
            reason: None,
        }
    }

    /// Rejecting response; no snapshot is attached
    pub fn rejected(request_id: Uuid, reason: impl Into<String>) -> Self {
        Self {
            request_id,
            success: false,
            snapshot: Envelope::default(),
            reason: Some(reason.into()),
        }
    }
}
