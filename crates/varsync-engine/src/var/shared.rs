use super::cell::{ErasedVar, VarCell};
use super::event::VarEvent;
use super::subscription::Subscription;
use std::fmt;
use std::sync::Arc;
use varsync_core::{SyncValue, VarKey};

/// Handle to a variable with one value shared by every peer.
///
/// Any peer may propose a new value through
/// [`SyncSession::set`](crate::SyncSession::set).
pub struct SharedVar<T: SyncValue> {
    pub(crate) cell: Arc<VarCell<T>>,
}

impl<T: SyncValue> SharedVar<T> {
    /// Variable name
    pub fn name(&self) -> &str {
        &self.cell.declaration().name
    }

    /// Key of the single slot
    pub fn key(&self) -> VarKey {
        VarKey::shared(self.name())
    }

    /// Current local value
    pub fn get(&self) -> T {
        self.cell.get(None).unwrap_or_default()
    }

    /// Observe value and status changes
    pub fn on_changed(&self, listener: impl Fn(&VarEvent<T>) + Send + Sync + 'static) -> Subscription {
        self.cell.subscribe(listener)
    }
}

impl<T: SyncValue> Clone for SharedVar<T> {
    fn clone(&self) -> Self {
        Self {
            cell: self.cell.clone(),
        }
    }
}

impl<T: SyncValue> fmt::Debug for SharedVar<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedVar")
            .field("name", &self.name())
            .field("value", &self.get())
            .finish()
    }
}
