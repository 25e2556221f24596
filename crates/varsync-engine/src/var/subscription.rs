//! Listener registration with drop-to-detach handles

use parking_lot::Mutex;
use std::sync::{Arc, Weak};

type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Inner<E> {
    next_id: u64,
    listeners: Vec<(u64, Listener<E>)>,
}

/// Observers of one event stream.
pub(crate) struct ListenerSet<E> {
    inner: Arc<Mutex<Inner<E>>>,
}

impl<E: 'static> ListenerSet<E> {
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                next_id: 0,
                listeners: Vec::new(),
            })),
        }
    }

    pub(crate) fn subscribe(&self, listener: impl Fn(&E) + Send + Sync + 'static) -> Subscription {
        let mut inner = self.inner.lock();
        inner.next_id += 1;
        let id = inner.next_id;
        inner.listeners.push((id, Arc::new(listener)));

        let weak: Weak<Mutex<Inner<E>>> = Arc::downgrade(&self.inner);
        Subscription {
            detach: Some(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.lock().listeners.retain(|(other, _)| *other != id);
                }
            })),
        }
    }

    /// Listeners registered right now, for calling once locks are released
    pub(crate) fn snapshot(&self) -> Vec<Listener<E>> {
        self.inner
            .lock()
            .listeners
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect()
    }

    pub(crate) fn emit(&self, event: &E) {
        for listener in self.snapshot() {
            listener(event);
        }
    }

    pub(crate) fn clear(&self) {
        self.inner.lock().listeners.clear();
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.inner.lock().listeners.len()
    }
}

/// Handle keeping a listener attached.
///
/// Dropping the handle detaches the listener. Listeners are also detached
/// when their variable is reset, in which case dropping the handle is a
/// no-op.
#[must_use = "dropping a Subscription detaches its listener"]
pub struct Subscription {
    detach: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    /// Detach now
    pub fn unsubscribe(self) {}

    /// Keep the listener attached for the lifetime of its source
    pub fn forget(mut self) {
        self.detach = None;
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("attached", &self.detach.is_some())
            .finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }
}
