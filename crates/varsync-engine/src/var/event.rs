//! Change notifications and validator input

use varsync_core::{PeerId, ValidationStatus};

/// Where a change came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
    /// A write made through the local session
    Local,
    /// A write received from another peer
    Remote,
}

/// A value or validation-status change of one slot.
///
/// Raised only when the value differs or the status changed.
#[derive(Debug, Clone, PartialEq)]
pub struct VarEvent<T> {
    /// Owning peer for owned-variable slots
    pub owner: Option<PeerId>,
    /// Peer whose write caused the change
    pub source: PeerId,
    /// Local or remote
    pub origin: Origin,
    /// Value before the change
    pub old_value: T,
    /// Value after the change
    pub new_value: T,
    /// Status before the change
    pub old_status: ValidationStatus,
    /// Status after the change
    pub new_status: ValidationStatus,
}

impl<T: PartialEq> VarEvent<T> {
    /// Whether the value itself changed
    pub fn value_changed(&self) -> bool {
        self.old_value != self.new_value
    }

    /// Whether the validation status changed
    pub fn status_changed(&self) -> bool {
        self.old_status != self.new_status
    }
}

/// A guest's proposed write, as seen by the host's validator.
#[derive(Debug, Clone, PartialEq)]
pub struct Proposal<T> {
    /// Proposing peer
    pub source: PeerId,
    /// Slot owner for owned variables
    pub owner: Option<PeerId>,
    /// Current authoritative value
    pub old_value: T,
    /// Proposed value
    pub new_value: T,
}
