//! Validation lifecycle of a replicated slot.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Per-key validation status.
///
/// Transitions are driven by the host only:
/// `None`/`Validated` + guest write → `Pending`; `Pending` + accept →
/// `Validated`; `Pending` + reject → `Invalid` (never stored, triggers a
/// rollback instead).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationStatus {
    /// No validation required (host-authored or unguarded writes)
    #[default]
    None,
    /// Guest-authored write awaiting the host's decision
    Pending,
    /// Host-confirmed value
    Validated,
    /// Host-rejected value
    Invalid,
}

impl ValidationStatus {
    /// Status a guest's local edit moves the key into.
    ///
    /// Re-editing a confirmed value always requires re-validation.
    pub fn after_guest_edit(self) -> Self {
        match self {
            ValidationStatus::Validated => ValidationStatus::Pending,
            other => other,
        }
    }

    /// Whether a guest may legitimately receive this status from the host
    pub fn is_authoritative(self) -> bool {
        matches!(self, ValidationStatus::None | ValidationStatus::Validated)
    }
}

impl fmt::Display for ValidationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ValidationStatus::None => "none",
            ValidationStatus::Pending => "pending",
            ValidationStatus::Validated => "validated",
            ValidationStatus::Invalid => "invalid",
        };
        f.write_str(label)
    }
}
