//! Variables registered with a session, by name

use crate::var::cell::ErasedVar;
use crate::{SyncError, SyncResult};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use varsync_core::{KeyDeclaration, VarKey, VarScope};

/// Prefix of engine-internal variable names
pub(crate) const RESERVED_PREFIX: &str = "__varsync.";

/// Shared string variable holding the sticky host id, empty when unset
pub(crate) const STICKY_HOST_VAR: &str = "__varsync.host";

#[derive(Default)]
pub(crate) struct VarRegistry {
    vars: BTreeMap<String, Arc<dyn ErasedVar>>,
}

impl VarRegistry {
    pub(crate) fn insert(&mut self, var: Arc<dyn ErasedVar>) -> SyncResult<()> {
        let name = var.name().to_string();
        if self.vars.contains_key(&name) {
            return Err(SyncError::DuplicateVariable { name });
        }
        self.vars.insert(name, var);
        Ok(())
    }

    /// Variable backing `key`, checking the key's shape against its scope
    pub(crate) fn get(&self, key: &VarKey) -> SyncResult<&Arc<dyn ErasedVar>> {
        let var = self
            .vars
            .get(&key.name)
            .ok_or_else(|| SyncError::unknown_key(key))?;
        let shaped = match var.scope() {
            VarScope::Shared => key.owner.is_none(),
            VarScope::Owned => key.owner.is_some(),
        };
        if shaped {
            Ok(var)
        } else {
            Err(SyncError::unknown_key(key))
        }
    }

    /// Whether `cell` is the storage registered under `name`
    pub(crate) fn holds(&self, name: &str, cell: *const ()) -> bool {
        self.vars
            .get(name)
            .is_some_and(|var| Arc::as_ptr(var) as *const () == cell)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Arc<dyn ErasedVar>> {
        self.vars.values()
    }

    pub(crate) fn shared(&self) -> impl Iterator<Item = &Arc<dyn ErasedVar>> {
        self.iter().filter(|var| var.scope() == VarScope::Shared)
    }

    pub(crate) fn owned(&self) -> impl Iterator<Item = &Arc<dyn ErasedVar>> {
        self.iter().filter(|var| var.scope() == VarScope::Owned)
    }

    /// Key-set this peer declares in the late-join handshake
    pub(crate) fn declarations(&self) -> BTreeSet<KeyDeclaration> {
        self.iter().map(|var| var.declaration().clone()).collect()
    }

    pub(crate) fn reset_all(&self) {
        for var in self.iter() {
            var.reset();
        }
    }
}

/// Describe how `theirs` differs from `ours`, `None` when identical
pub(crate) fn describe_mismatch(
    ours: &BTreeSet<KeyDeclaration>,
    theirs: &BTreeSet<KeyDeclaration>,
) -> Option<String> {
    let missing: Vec<String> = ours.difference(theirs).map(ToString::to_string).collect();
    let unexpected: Vec<String> = theirs.difference(ours).map(ToString::to_string).collect();
    if missing.is_empty() && unexpected.is_empty() {
        return None;
    }
    let mut parts = Vec::new();
    if !missing.is_empty() {
        parts.push(format!("missing keys: {}", missing.join(", ")));
    }
    if !unexpected.is_empty() {
        parts.push(format!("unexpected keys: {}", unexpected.join(", ")));
    }
    Some(parts.join("; "))
}
