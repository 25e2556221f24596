//! Sync engine errors
//!
//! One enum for every failure the engine can observe. Per-record ingress
//! errors are isolated: they are reported through [`SyncError::is_surfaced`]
//! routing and never abort the rest of a batch.

use varsync_core::{CodecError, PeerId, ValueKind, VarKey};
use varsync_transport::TransportError;

/// Result alias for engine operations
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors raised by the sync engine.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SyncError {
    /// A peer sent something its role never sends
    #[error("protocol violation by {peer} on {key}: {reason}")]
    ProtocolViolation {
        /// Offending peer
        peer: PeerId,
        /// Key the record addressed
        key: VarKey,
        /// What was wrong
        reason: String,
    },

    /// A record or call referenced an unregistered key
    #[error("unknown key {key}")]
    UnknownKey {
        /// The key
        key: VarKey,
    },

    /// A record's value type differs from the registered variable
    #[error("type mismatch on {key}: registered {expected}, received {actual}")]
    TypeMismatch {
        /// The key
        key: VarKey,
        /// Registered kind
        expected: ValueKind,
        /// Received kind
        actual: ValueKind,
    },

    /// An incoming write is older than the local state
    #[error("stale write on {key}: local version {local}, incoming {incoming}")]
    StaleVersion {
        /// The key
        key: VarKey,
        /// Local lock version
        local: u64,
        /// Incoming lock version
        incoming: u64,
    },

    /// An incoming write raced a different write at the same version
    #[error("conflicting write on {key} at version {version}")]
    ConflictingVersion {
        /// The key
        key: VarKey,
        /// Shared lock version
        version: u64,
    },

    /// The joiner's key declarations differ from the host's
    #[error("handshake rejected: {reason}")]
    HandshakeMismatch {
        /// Host's description of the difference
        reason: String,
    },

    /// No host answered the handshake in time
    #[error("handshake timed out after {timeout_ms} ms")]
    HandshakeTimeout {
        /// Configured deadline
        timeout_ms: u64,
    },

    /// Local writes are refused until the late-join handshake resolves
    #[error("handshake in progress; local writes are not accepted yet")]
    HandshakePending,

    /// A pending proposal reached the host for a variable without validator
    #[error("no validator registered for {key}")]
    MissingValidator {
        /// The key
        key: VarKey,
    },

    /// The host tried to write a key that is still pending validation
    #[error("host write to pending key {key}")]
    HostPendingWrite {
        /// The key
        key: VarKey,
    },

    /// The local peer may not write this slot
    #[error("permission denied on {key}: {reason}")]
    PermissionDenied {
        /// The key
        key: VarKey,
        /// Why the write was refused
        reason: String,
    },

    /// The key is already registered
    #[error("key {key} already registered")]
    DuplicateKey {
        /// The key
        key: VarKey,
    },

    /// A variable with this name already exists
    #[error("variable {name} already registered")]
    DuplicateVariable {
        /// Variable name
        name: String,
    },

    /// The name is reserved for engine-internal variables
    #[error("variable name {name} is reserved")]
    ReservedName {
        /// Variable name
        name: String,
    },

    /// Roster already contains the peer
    #[error("peer {peer} already present")]
    PeerAlreadyPresent {
        /// The peer
        peer: PeerId,
    },

    /// Roster does not contain the peer
    #[error("peer {peer} not present")]
    PeerNotPresent {
        /// The peer
        peer: PeerId,
    },

    /// No host could be elected
    #[error("no host elected")]
    NoHost,

    /// Configuration failed validation
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// Which setting is wrong
        reason: String,
    },

    /// The session has been left or failed
    #[error("session closed")]
    SessionClosed,

    /// Message encoding failure
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Transport failure
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl SyncError {
    /// Create a protocol violation error
    pub fn protocol_violation(peer: &PeerId, key: &VarKey, reason: impl Into<String>) -> Self {
        Self::ProtocolViolation {
            peer: peer.clone(),
            key: key.clone(),
            reason: reason.into(),
        }
    }

    /// Create an unknown key error
    pub fn unknown_key(key: &VarKey) -> Self {
        Self::UnknownKey { key: key.clone() }
    }

    /// Create an invalid configuration error
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Stale or conflicting write for `key`, classified by version
    pub fn version_rejected(key: &VarKey, local: u64, incoming: u64) -> Self {
        if incoming == local {
            Self::ConflictingVersion {
                key: key.clone(),
                version: local,
            }
        } else {
            Self::StaleVersion {
                key: key.clone(),
                local,
                incoming,
            }
        }
    }

    /// Whether application error observers hear about this error.
    ///
    /// Version races are expected under concurrent editing and protocol
    /// violations are a peer's fault, not the application's; both are only
    /// logged.
    pub fn is_surfaced(&self) -> bool {
        !matches!(
            self,
            SyncError::StaleVersion { .. }
                | SyncError::ConflictingVersion { .. }
                | SyncError::ProtocolViolation { .. }
        )
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            SyncError::ProtocolViolation { .. } => "protocol_violation",
            SyncError::UnknownKey { .. } => "unknown_key",
            SyncError::TypeMismatch { .. } => "type_mismatch",
            SyncError::StaleVersion { .. } => "stale_version",
            SyncError::ConflictingVersion { .. } => "conflicting_version",
            SyncError::HandshakeMismatch { .. } => "handshake_mismatch",
            SyncError::HandshakeTimeout { .. } => "handshake_timeout",
            SyncError::HandshakePending => "handshake_pending",
            SyncError::MissingValidator { .. } => "missing_validator",
            SyncError::HostPendingWrite { .. } => "host_pending_write",
            SyncError::PermissionDenied { .. } => "permission_denied",
            SyncError::DuplicateKey { .. } => "duplicate_key",
            SyncError::DuplicateVariable { .. } => "duplicate_variable",
            SyncError::ReservedName { .. } => "reserved_name",
            SyncError::PeerAlreadyPresent { .. } => "peer_already_present",
            SyncError::PeerNotPresent { .. } => "peer_not_present",
            SyncError::NoHost => "no_host",
            SyncError::InvalidConfig { .. } => "invalid_config",
            SyncError::SessionClosed => "session_closed",
            SyncError::Codec(_) => "codec",
            SyncError::Transport(_) => "transport",
        }
    }
}
