//! Replicated variables
//!
//! Applications hold typed handles ([`SharedVar`], [`OwnedVar`]); the engine
//! drives the same storage through a type-erased cell.

pub(crate) mod cell;
mod event;
mod owned;
mod shared;
mod subscription;

pub use event::{Origin, Proposal, VarEvent};
pub use owned::OwnedVar;
pub use shared::SharedVar;
pub use subscription::Subscription;

pub(crate) use subscription::ListenerSet;
