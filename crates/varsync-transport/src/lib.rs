//! # Varsync Transport
//!
//! The session transport the sync engine consumes. A transport joins one
//! session, reports presence changes, and carries opaque payloads tagged with
//! an op code to all members or to a chosen subset.
//!
//! [`MemoryHub`] provides an in-process implementation for tests and local
//! play.

pub mod error;
pub mod memory;
pub mod traits;

pub use error::{TransportError, TransportResult};
pub use memory::{MemoryHub, MemoryTransport};
pub use traits::{JoinedSession, OpCode, Transport, TransportEvent};
