use super::cell::{ErasedVar, VarCell};
use super::event::VarEvent;
use super::subscription::Subscription;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use varsync_core::{PeerId, SyncValue, VarKey};

/// Handle to a variable holding one value per present peer.
///
/// Each peer writes its own slot through
/// [`SyncSession::set_own`](crate::SyncSession::set_own); the host may
/// correct any slot with [`SyncSession::set_for`](crate::SyncSession::set_for).
/// A slot is dropped, and its per-slot listeners detached, when its owner
/// leaves.
pub struct OwnedVar<T: SyncValue> {
    pub(crate) cell: Arc<VarCell<T>>,
}

impl<T: SyncValue> OwnedVar<T> {
    /// Variable name
    pub fn name(&self) -> &str {
        &self.cell.declaration().name
    }

    /// Key of `owner`'s slot
    pub fn key(&self, owner: &PeerId) -> VarKey {
        VarKey::owned(self.name(), owner.clone())
    }

    /// Value of `owner`'s slot, if that owner is present
    pub fn get(&self, owner: &PeerId) -> Option<T> {
        self.cell.get(Some(owner))
    }

    /// Every present owner's value
    pub fn values(&self) -> BTreeMap<PeerId, T> {
        self.cell.owned_values()
    }

    /// Observe changes of any slot
    pub fn on_changed(&self, listener: impl Fn(&VarEvent<T>) + Send + Sync + 'static) -> Subscription {
        self.cell.subscribe(listener)
    }

    /// Observe changes of one owner's slot until that owner leaves
    pub fn on_slot_changed(
        &self,
        owner: &PeerId,
        listener: impl Fn(&VarEvent<T>) + Send + Sync + 'static,
    ) -> Subscription {
        self.cell.subscribe_slot(owner.clone(), listener)
    }
}

impl<T: SyncValue> Clone for OwnedVar<T> {
    fn clone(&self) -> Self {
        Self {
            cell: self.cell.clone(),
        }
    }
}

impl<T: SyncValue> fmt::Debug for OwnedVar<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OwnedVar")
            .field("name", &self.name())
            .field("values", &self.values())
            .finish()
    }
}
