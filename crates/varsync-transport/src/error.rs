//! Transport errors

use varsync_core::PeerId;

/// Result alias for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// Errors raised by a [`crate::Transport`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Operation requires a joined session
    #[error("transport has not joined a session")]
    NotJoined,

    /// The transport is already in a session
    #[error("transport already joined session {session_id}")]
    AlreadyJoined {
        /// Session currently joined
        session_id: String,
    },

    /// Another member of the session uses the same peer id
    #[error("peer {peer} is already present in session {session_id}")]
    DuplicatePeer {
        /// Conflicting id
        peer: PeerId,
        /// Session being joined
        session_id: String,
    },

    /// The underlying connection is gone
    #[error("transport closed")]
    Closed,

    /// Failure reported by a concrete backend
    #[error("transport backend error: {reason}")]
    Backend {
        /// Backend description of the failure
        reason: String,
    },
}
