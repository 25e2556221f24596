//! Per-key lock versions and validation status
//!
//! Every replicated slot owns one [`KeySlot`] in a single mutex-guarded arena.
//! The send path and the receive path both go through [`KeyRegistry`], so a
//! read-modify-write on one slot is never interleaved with another.

use crate::{SyncError, SyncResult};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use tracing::trace;
use varsync_core::{ValidationStatus, VarKey};

/// Concurrency state of one replicated slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeySlot {
    /// Monotonic write counter
    pub lock_version: u64,
    /// Validation lifecycle position
    pub status: ValidationStatus,
    /// Registration stamp; changes whenever the key is re-registered
    pub generation: u64,
}

impl KeySlot {
    /// Whether a write at `incoming` is newer than local state
    pub fn accepts(&self, incoming: u64) -> bool {
        incoming > self.lock_version
    }

    /// Raise the lock version to at least `version`
    pub fn adopt(&mut self, version: u64) {
        self.lock_version = self.lock_version.max(version);
    }
}

#[derive(Debug, Default)]
struct Arena {
    slots: BTreeMap<VarKey, KeySlot>,
    next_generation: u64,
}

/// Arena of key slots guarded by one lock.
#[derive(Debug, Default)]
pub struct KeyRegistry {
    arena: Mutex<Arena>,
}

impl KeyRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a key at version 0
    pub fn register(&self, key: VarKey, initial_status: ValidationStatus) -> SyncResult<()> {
        let mut arena = self.arena.lock();
        if arena.slots.contains_key(&key) {
            return Err(SyncError::DuplicateKey { key });
        }
        arena.next_generation += 1;
        let generation = arena.next_generation;
        trace!(key = %key, status = %initial_status, generation, "Key registered");
        arena.slots.insert(
            key,
            KeySlot {
                lock_version: 0,
                status: initial_status,
                generation,
            },
        );
        Ok(())
    }

    /// Drop a key; used when an owned slot's owner departs
    pub fn unregister(&self, key: &VarKey) -> SyncResult<KeySlot> {
        self.arena
            .lock()
            .slots
            .remove(key)
            .ok_or_else(|| SyncError::unknown_key(key))
    }

    /// Whether `key` is registered
    pub fn contains(&self, key: &VarKey) -> bool {
        self.arena.lock().slots.contains_key(key)
    }

    /// Copy of the slot for `key`
    pub fn slot(&self, key: &VarKey) -> SyncResult<KeySlot> {
        self.with_slot(key, |slot| Ok(*slot))
    }

    /// Current lock version
    pub fn lock_version(&self, key: &VarKey) -> SyncResult<u64> {
        self.with_slot(key, |slot| Ok(slot.lock_version))
    }

    /// Current validation status
    pub fn validation_status(&self, key: &VarKey) -> SyncResult<ValidationStatus> {
        self.with_slot(key, |slot| Ok(slot.status))
    }

    /// Atomically bump the lock version, returning the new value
    pub fn increment_lock_version(&self, key: &VarKey) -> SyncResult<u64> {
        self.with_slot(key, |slot| {
            slot.lock_version += 1;
            Ok(slot.lock_version)
        })
    }

    /// Overwrite the validation status
    pub fn set_validation_status(&self, key: &VarKey, status: ValidationStatus) -> SyncResult<()> {
        self.with_slot(key, |slot| {
            slot.status = status;
            Ok(())
        })
    }

    /// True iff `incoming` is strictly newer than the local version.
    ///
    /// Callers treat equality as a conflict and anything lower as stale.
    pub fn is_acceptable(&self, key: &VarKey, incoming: u64) -> SyncResult<bool> {
        self.with_slot(key, |slot| Ok(slot.accepts(incoming)))
    }

    /// Every registered key in order
    pub fn keys(&self) -> Vec<VarKey> {
        self.arena.lock().slots.keys().cloned().collect()
    }

    /// Keys currently at `status`
    pub fn keys_with_status(&self, status: ValidationStatus) -> Vec<VarKey> {
        self.arena
            .lock()
            .slots
            .iter()
            .filter(|(_, slot)| slot.status == status)
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Run `f` with exclusive access to one slot.
    ///
    /// The arena lock is held for the whole call; `f` may take variable
    /// storage locks but must not re-enter the registry.
    pub(crate) fn with_slot<R>(
        &self,
        key: &VarKey,
        f: impl FnOnce(&mut KeySlot) -> SyncResult<R>,
    ) -> SyncResult<R> {
        let mut arena = self.arena.lock();
        let slot = arena
            .slots
            .get_mut(key)
            .ok_or_else(|| SyncError::unknown_key(key))?;
        f(slot)
    }
}
