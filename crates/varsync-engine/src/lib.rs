#![deny(clippy::dbg_macro)]
#![deny(clippy::todo)]
//! # Varsync Engine - Host-Arbitrated Replicated Variables
//!
//! Keeps typed variables consistent across the peers of a small session.
//! One peer, the host, is elected deterministically from the roster and
//! arbitrates: unguarded writes resolve by lock version, guarded writes are
//! proposals the host validates before anyone else sees them.
//!
//! ## Lifecycle
//!
//! 1. Register variables on a [`SyncSessionBuilder`]
//! 2. [`SyncSessionBuilder::join`] a session over any
//!    [`Transport`](varsync_transport::Transport)
//! 3. Late joiners await [`SyncSession::handshake_complete`] for the host's
//!    snapshot
//! 4. Read through the variable handles, write through the session
//! 5. [`SyncSession::leave`]
//!
//! ## Roles
//!
//! - **Host**: applies newer writes, validates proposals, answers late
//!   joiners, corrects outdated peers
//! - **Guest**: proposes guarded edits to the host, applies what the host
//!   and slot owners publish
//!
//! When the host departs, the next host is elected without messages; it
//! accepts whatever it still had pending and guests re-propose theirs.

pub mod config;
pub mod error;
pub mod keys;
pub mod roster;
pub mod var;

mod context;
mod dispatcher;
mod egress;
mod handshake;
mod ingress;
mod migration;
mod outbox;
mod registry;
mod session;
mod tasks;

pub use config::{OpCodes, SyncConfig};
pub use error::{SyncError, SyncResult};
pub use handshake::HandshakePhase;
pub use keys::{KeyRegistry, KeySlot};
pub use roster::{elect_host, Departure, HostChange, Roster};
pub use session::{SyncSession, SyncSessionBuilder};
pub use var::{Origin, OwnedVar, Proposal, SharedVar, Subscription, VarEvent};

pub use varsync_core::{Peer, PeerId, ValidationStatus, VarKey};
