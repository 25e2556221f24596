//! Sync session configuration
//!
//! Loaded from TOML or built in code; every loader validates before handing
//! the configuration out.

use crate::{SyncError, SyncResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use varsync_core::WireFormat;
use varsync_transport::OpCode;

/// Op codes tagging the three sync message kinds on the transport.
///
/// Other op codes on the same transport are ignored, so application traffic
/// can share the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpCodes {
    /// Late joiner's key-set request
    pub handshake_request: OpCode,
    /// Host's handshake answer
    pub handshake_response: OpCode,
    /// Value and ack envelopes
    pub data: OpCode,
}

impl Default for OpCodes {
    fn default() -> Self {
        Self {
            handshake_request: 1,
            handshake_response: 2,
            data: 3,
        }
    }
}

impl OpCodes {
    /// Check that every op code is distinct
    pub fn validate(&self) -> SyncResult<()> {
        let mut seen = HashSet::new();
        for code in [self.handshake_request, self.handshake_response, self.data] {
            if !seen.insert(code) {
                return Err(SyncError::invalid_config(format!(
                    "op code {code} is used more than once"
                )));
            }
        }
        Ok(())
    }
}

/// Configuration of one sync session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Message kind tags
    pub opcodes: OpCodes,

    /// Byte encoding of sync messages
    pub wire_format: WireFormat,

    /// Deadline for a late joiner's handshake, in milliseconds
    pub handshake_timeout_ms: u64,

    /// Bound on one application validator call, in milliseconds
    pub validator_timeout_ms: u64,

    /// Data envelopes held while a late joiner is syncing
    pub max_buffered_envelopes: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            opcodes: OpCodes::default(),
            wire_format: WireFormat::Cbor,
            handshake_timeout_ms: 5_000,
            validator_timeout_ms: 1_000,
            max_buffered_envelopes: 256,
        }
    }
}

impl SyncConfig {
    /// Create configuration for testing with short deadlines and readable wire
    pub fn testing() -> Self {
        Self {
            wire_format: WireFormat::Json,
            handshake_timeout_ms: 2_000,
            validator_timeout_ms: 500,
            ..Default::default()
        }
    }

    /// Parse and validate TOML
    pub fn from_toml_str(source: &str) -> SyncResult<Self> {
        let config: Self = toml::from_str(source)
            .map_err(|e| SyncError::invalid_config(format!("failed to parse TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    pub fn load(path: impl AsRef<Path>) -> SyncResult<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| {
            SyncError::invalid_config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&source)
    }

    /// Validate configuration settings
    pub fn validate(&self) -> SyncResult<()> {
        self.opcodes.validate()?;

        if self.handshake_timeout_ms == 0 {
            return Err(SyncError::invalid_config(
                "handshake_timeout_ms must be greater than 0",
            ));
        }

        if self.validator_timeout_ms == 0 {
            return Err(SyncError::invalid_config(
                "validator_timeout_ms must be greater than 0",
            ));
        }

        if self.max_buffered_envelopes == 0 {
            return Err(SyncError::invalid_config(
                "max_buffered_envelopes must be greater than 0",
            ));
        }

        Ok(())
    }

    /// Handshake deadline
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    /// Validator call bound
    pub fn validator_timeout(&self) -> Duration {
        Duration::from_millis(self.validator_timeout_ms)
    }
}
