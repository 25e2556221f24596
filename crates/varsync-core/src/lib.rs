#![deny(clippy::dbg_macro)]
#![deny(clippy::todo)]
//! # Varsync Core - Shared Vocabulary
//!
//! Types every other varsync crate speaks:
//! - **Identifiers**: `PeerId`, `Peer`, `VarKey`
//! - **Validation lifecycle**: `ValidationStatus`
//! - **Value types**: the closed set of replicable primitives (`SyncValue`)
//! - **Wire messages**: `Envelope`, `HandshakeRequest`, `HandshakeResponse`
//! - **Codecs**: JSON and CBOR encodings selected by `WireFormat`
//!
//! ## Design Principles
//!
//! - **Closed value set**: bool, float, integer and string values only, so the
//!   envelope can carry one typed batch per kind
//! - **Codec-pluggable**: wire structs are plain serde types; the format is a
//!   configuration choice, not a protocol property

pub mod codec;
pub mod identifiers;
pub mod status;
pub mod value;
pub mod wire;

pub use codec::{CodecError, WireFormat};
pub use identifiers::{Peer, PeerId, VarKey};
pub use status::ValidationStatus;
pub use value::{SyncValue, ValueKind, WireValue};
pub use wire::{
    AckRecord, Envelope, HandshakeRequest, HandshakeResponse, KeyDeclaration, TypedBatch,
    ValueRecord, VarScope,
};
