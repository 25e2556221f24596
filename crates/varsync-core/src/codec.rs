//! Pluggable byte encodings for wire messages.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fmt;

/// Error produced by a [`WireFormat`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// Value could not be encoded
    #[error("{format} encode failed: {reason}")]
    Encode {
        /// Format in use
        format: WireFormat,
        /// Underlying failure
        reason: String,
    },

    /// Bytes could not be decoded
    #[error("{format} decode failed: {reason}")]
    Decode {
        /// Format in use
        format: WireFormat,
        /// Underlying failure
        reason: String,
    },
}

/// Byte encoding used for every sync message.
///
/// Both ends of a session must agree on the format. JSON is readable on the
/// wire; CBOR is compact. JSON cannot carry non-finite floats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireFormat {
    /// `serde_json`
    Json,
    /// `serde_cbor`
    #[default]
    Cbor,
}

impl WireFormat {
    /// Encode a message
    pub fn encode<T: Serialize>(&self, message: &T) -> Result<Vec<u8>, CodecError> {
        let encoded = match self {
            WireFormat::Json => serde_json::to_vec(message).map_err(|e| e.to_string()),
            WireFormat::Cbor => serde_cbor::to_vec(message).map_err(|e| e.to_string()),
        };
        encoded.map_err(|reason| CodecError::Encode {
            format: *self,
            reason,
        })
    }

    /// Decode a message
    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError> {
        let decoded = match self {
            WireFormat::Json => serde_json::from_slice(bytes).map_err(|e| e.to_string()),
            WireFormat::Cbor => serde_cbor::from_slice(bytes).map_err(|e| e.to_string()),
        };
        decoded.map_err(|reason| CodecError::Decode {
            format: *self,
            reason,
        })
    }
}

impl fmt::Display for WireFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireFormat::Json => f.write_str("json"),
            WireFormat::Cbor => f.write_str("cbor"),
        }
    }
}
