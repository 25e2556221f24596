//! Typed value storage behind a type-erased interface
//!
//! A [`VarCell`] stores the values of one variable: a single slot for shared
//! variables, one slot per present owner for owned variables. Lock versions
//! and statuses live in the key registry; the cell only holds values and
//! listeners. The engine drives cells through [`ErasedVar`] so that one code
//! path serves every value type.

use super::event::{Origin, Proposal, VarEvent};
use super::subscription::{ListenerSet, Subscription};
use crate::{SyncError, SyncResult};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use varsync_core::{
    KeyDeclaration, PeerId, SyncValue, ValidationStatus, ValueKind, VarKey, VarScope, WireValue,
};

/// Deferred listener invocation, run after every lock is released
pub(crate) type Notify = Box<dyn FnOnce() + Send>;

/// Validator bound to one proposal, ready to run on a blocking thread
pub(crate) type ValidatorCall = Box<dyn FnOnce() -> bool + Send>;

/// Application validator for values of type `T`
pub(crate) type Validator<T> = Arc<dyn Fn(&Proposal<T>) -> bool + Send + Sync>;

/// One write applied to a slot.
pub(crate) struct Update {
    /// New value, `None` for a status-only change
    pub value: Option<WireValue>,
    pub old_status: ValidationStatus,
    pub new_status: ValidationStatus,
    pub source: PeerId,
    pub origin: Origin,
}

/// Value-type-independent view of a variable.
pub(crate) trait ErasedVar: Send + Sync {
    fn declaration(&self) -> &KeyDeclaration;

    fn has_validator(&self) -> bool;

    /// Current value of a slot
    fn read(&self, owner: Option<&PeerId>) -> SyncResult<WireValue>;

    /// Store a value and/or status change, returning the listener call if
    /// anything observable changed
    fn write(&self, owner: Option<&PeerId>, update: Update) -> SyncResult<Option<Notify>>;

    /// Bind the validator to a proposal; `None` when no validator exists
    fn validator_call(
        &self,
        owner: Option<&PeerId>,
        source: &PeerId,
        proposed: WireValue,
    ) -> SyncResult<Option<ValidatorCall>>;

    /// Add an owner's slot at the initial value
    fn open_slot(&self, owner: &PeerId);

    /// Drop an owner's slot and detach its listeners
    fn close_slot(&self, owner: &PeerId);

    /// Restore initial state and detach every listener
    fn reset(&self);

    fn name(&self) -> &str {
        &self.declaration().name
    }

    fn kind(&self) -> ValueKind {
        self.declaration().kind
    }

    fn scope(&self) -> VarScope {
        self.declaration().scope
    }

    /// Status a freshly registered key starts in
    fn initial_status(&self) -> ValidationStatus {
        if self.has_validator() {
            ValidationStatus::Validated
        } else {
            ValidationStatus::None
        }
    }

    /// Key of the slot addressed by `owner`
    fn key(&self, owner: Option<&PeerId>) -> VarKey {
        VarKey {
            name: self.name().to_string(),
            owner: owner.cloned(),
        }
    }
}

#[cfg(test)]
impl std::fmt::Debug for dyn ErasedVar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErasedVar").field("name", &self.name()).finish()
    }
}

/// Storage of one variable of type `T`.
pub(crate) struct VarCell<T: SyncValue> {
    declaration: KeyDeclaration,
    initial: T,
    validator: Option<Validator<T>>,
    slots: Mutex<BTreeMap<Option<PeerId>, T>>,
    listeners: ListenerSet<VarEvent<T>>,
    slot_listeners: Mutex<HashMap<PeerId, ListenerSet<VarEvent<T>>>>,
}

impl<T: SyncValue> VarCell<T> {
    pub(crate) fn new(
        name: String,
        scope: VarScope,
        initial: T,
        validator: Option<Validator<T>>,
    ) -> Self {
        let mut slots = BTreeMap::new();
        if scope == VarScope::Shared {
            slots.insert(None, initial.clone());
        }
        Self {
            declaration: KeyDeclaration {
                name,
                kind: T::KIND,
                scope,
            },
            initial,
            validator,
            slots: Mutex::new(slots),
            listeners: ListenerSet::new(),
            slot_listeners: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn get(&self, owner: Option<&PeerId>) -> Option<T> {
        self.slots.lock().get(&owner.cloned()).cloned()
    }

    pub(crate) fn owned_values(&self) -> BTreeMap<PeerId, T> {
        self.slots
            .lock()
            .iter()
            .filter_map(|(owner, value)| owner.clone().map(|o| (o, value.clone())))
            .collect()
    }

    pub(crate) fn subscribe(
        &self,
        listener: impl Fn(&VarEvent<T>) + Send + Sync + 'static,
    ) -> Subscription {
        self.listeners.subscribe(listener)
    }

    pub(crate) fn subscribe_slot(
        &self,
        owner: PeerId,
        listener: impl Fn(&VarEvent<T>) + Send + Sync + 'static,
    ) -> Subscription {
        self.slot_listeners
            .lock()
            .entry(owner)
            .or_insert_with(ListenerSet::new)
            .subscribe(listener)
    }

    fn check_shape(&self, owner: Option<&PeerId>) -> SyncResult<()> {
        let shaped = match self.declaration.scope {
            VarScope::Shared => owner.is_none(),
            VarScope::Owned => owner.is_some(),
        };
        if shaped {
            Ok(())
        } else {
            Err(SyncError::unknown_key(&self.key(owner)))
        }
    }

    fn decode(&self, owner: Option<&PeerId>, value: WireValue) -> SyncResult<T> {
        let actual = value.kind();
        T::from_wire(value).ok_or_else(|| SyncError::TypeMismatch {
            key: self.key(owner),
            expected: T::KIND,
            actual,
        })
    }

    fn notify(&self, event: VarEvent<T>) -> Notify {
        let mut listeners = self.listeners.snapshot();
        if let Some(owner) = &event.owner {
            if let Some(set) = self.slot_listeners.lock().get(owner) {
                listeners.extend(set.snapshot());
            }
        }
        Box::new(move || {
            for listener in listeners {
                listener(&event);
            }
        })
    }
}

impl<T: SyncValue> ErasedVar for VarCell<T> {
    fn declaration(&self) -> &KeyDeclaration {
        &self.declaration
    }

    fn has_validator(&self) -> bool {
        self.validator.is_some()
    }

    fn read(&self, owner: Option<&PeerId>) -> SyncResult<WireValue> {
        self.check_shape(owner)?;
        self.get(owner)
            .map(SyncValue::into_wire)
            .ok_or_else(|| SyncError::unknown_key(&self.key(owner)))
    }

    fn write(&self, owner: Option<&PeerId>, update: Update) -> SyncResult<Option<Notify>> {
        self.check_shape(owner)?;
        let incoming = update
            .value
            .map(|value| self.decode(owner, value))
            .transpose()?;

        let (old_value, new_value) = {
            let mut slots = self.slots.lock();
            let slot = slots
                .get_mut(&owner.cloned())
                .ok_or_else(|| SyncError::unknown_key(&self.key(owner)))?;
            let old_value = slot.clone();
            if let Some(value) = incoming {
                *slot = value;
            }
            (old_value, slot.clone())
        };

        if old_value.same_value(&new_value) && update.old_status == update.new_status {
            return Ok(None);
        }

        Ok(Some(self.notify(VarEvent {
            owner: owner.cloned(),
            source: update.source,
            origin: update.origin,
            old_value,
            new_value,
            old_status: update.old_status,
            new_status: update.new_status,
        })))
    }

    fn validator_call(
        &self,
        owner: Option<&PeerId>,
        source: &PeerId,
        proposed: WireValue,
    ) -> SyncResult<Option<ValidatorCall>> {
        let new_value = self.decode(owner, proposed)?;
        let Some(validator) = self.validator.clone() else {
            return Ok(None);
        };
        let old_value = self
            .get(owner)
            .ok_or_else(|| SyncError::unknown_key(&self.key(owner)))?;
        let proposal = Proposal {
            source: source.clone(),
            owner: owner.cloned(),
            old_value,
            new_value,
        };
        Ok(Some(Box::new(move || validator(&proposal))))
    }

    fn open_slot(&self, owner: &PeerId) {
        if self.declaration.scope == VarScope::Owned {
            self.slots
                .lock()
                .entry(Some(owner.clone()))
                .or_insert_with(|| self.initial.clone());
        }
    }

    fn close_slot(&self, owner: &PeerId) {
        self.slots.lock().remove(&Some(owner.clone()));
        if let Some(set) = self.slot_listeners.lock().remove(owner) {
            set.clear();
        }
    }

    fn reset(&self) {
        {
            let mut slots = self.slots.lock();
            slots.clear();
            if self.declaration.scope == VarScope::Shared {
                slots.insert(None, self.initial.clone());
            }
        }
        self.listeners.clear();
        for (_, set) in self.slot_listeners.lock().drain() {
            set.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn update(value: Option<WireValue>, old: ValidationStatus, new: ValidationStatus) -> Update {
        Update {
            value,
            old_status: old,
            new_status: new,
            source: PeerId::from("src"),
            origin: Origin::Remote,
        }
    }

    #[test]
    fn equal_value_and_status_raise_nothing() {
        let cell = VarCell::new("score".into(), VarScope::Shared, 0i64, None);
        let unchanged = cell
            .write(
                None,
                update(
                    Some(WireValue::Int(0)),
                    ValidationStatus::None,
                    ValidationStatus::None,
                ),
            )
            .unwrap();
        assert!(unchanged.is_none());

        let status_only = cell
            .write(
                None,
                update(None, ValidationStatus::Pending, ValidationStatus::Validated),
            )
            .unwrap();
        assert!(status_only.is_some());
    }

    #[test]
    fn rewriting_nan_is_not_a_change() {
        let cell = VarCell::new("speed".into(), VarScope::Shared, 0.0f64, None);
        let nan = || {
            update(
                Some(WireValue::Float(f64::NAN)),
                ValidationStatus::None,
                ValidationStatus::None,
            )
        };
        assert!(cell.write(None, nan()).unwrap().is_some());
        assert!(cell.write(None, nan()).unwrap().is_none());
    }

    #[test]
    fn listeners_run_when_notify_is_called() {
        let cell = VarCell::new("score".into(), VarScope::Shared, 0i64, None);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let _sub = cell.subscribe(move |event| sink.lock().push(event.clone()));

        let notify = cell
            .write(
                None,
                update(
                    Some(WireValue::Int(9)),
                    ValidationStatus::None,
                    ValidationStatus::None,
                ),
            )
            .unwrap()
            .unwrap();
        assert!(seen.lock().is_empty());
        notify();

        let events = seen.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].old_value, 0);
        assert_eq!(events[0].new_value, 9);
        assert!(events[0].value_changed());
        assert!(!events[0].status_changed());
    }

    #[test]
    fn wrong_kind_is_a_type_mismatch() {
        let cell = VarCell::new("flag".into(), VarScope::Shared, false, None);
        assert_matches!(
            cell.write(
                None,
                update(
                    Some(WireValue::String("yes".into())),
                    ValidationStatus::None,
                    ValidationStatus::None
                )
            ),
            Err(SyncError::TypeMismatch {
                expected: ValueKind::Bool,
                actual: ValueKind::String,
                ..
            })
        );
    }

    #[test]
    fn owned_slots_open_and_close() {
        let cell = VarCell::new("pos".into(), VarScope::Owned, 1.5f64, None);
        let bob = PeerId::from("bob");
        assert_matches!(cell.read(Some(&bob)), Err(SyncError::UnknownKey { .. }));
        assert_matches!(cell.read(None), Err(SyncError::UnknownKey { .. }));

        cell.open_slot(&bob);
        assert_eq!(cell.read(Some(&bob)).unwrap(), WireValue::Float(1.5));

        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        cell.subscribe_slot(bob.clone(), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .forget();

        cell.close_slot(&bob);
        cell.open_slot(&bob);
        if let Some(notify) = cell
            .write(
                Some(&bob),
                update(
                    Some(WireValue::Float(3.0)),
                    ValidationStatus::None,
                    ValidationStatus::None,
                ),
            )
            .unwrap()
        {
            notify();
        }
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(cell.owned_values().get(&bob), Some(&3.0));
    }

    #[test]
    fn validator_receives_current_and_proposed_values() {
        let cell = VarCell::new(
            "score".into(),
            VarScope::Shared,
            5i64,
            Some(Arc::new(|p: &Proposal<i64>| p.new_value > p.old_value) as Validator<i64>),
        );
        let source = PeerId::from("guest");
        let up = cell
            .validator_call(None, &source, WireValue::Int(6))
            .unwrap()
            .unwrap();
        let down = cell
            .validator_call(None, &source, WireValue::Int(4))
            .unwrap()
            .unwrap();
        assert!(up());
        assert!(!down());
        assert_eq!(cell.initial_status(), ValidationStatus::Validated);
    }

    #[test]
    fn reset_restores_initial_and_detaches() {
        let cell = VarCell::new("name".into(), VarScope::Shared, String::from("x"), None);
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        cell.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .forget();
        cell.write(
            None,
            update(
                Some(WireValue::String("y".into())),
                ValidationStatus::None,
                ValidationStatus::None,
            ),
        )
        .unwrap();
        cell.reset();
        assert_eq!(cell.get(None), Some(String::from("x")));
        if let Some(notify) = cell
            .write(
                None,
                update(
                    Some(WireValue::String("z".into())),
                    ValidationStatus::None,
                    ValidationStatus::None,
                ),
            )
            .unwrap()
        {
            notify();
        }
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
}
