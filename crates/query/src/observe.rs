//! Change observation.
//!
//! Mutable relations notify registered observers after each mutation.
//! Observers come in two kinds: direct observers care about changes made
//! to the relation itself, dependent observers are registered on behalf of
//! derived relations and fire for the same changes but are bookkept
//! separately so an update coordinator can tell the two apart.

use crate::change::RowChange;
use hashbrown::HashMap;
use parking_lot::Mutex;
use std::sync::Arc;

/// How an observer relates to the relation it watches.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObservationKind {
    /// Registered by a consumer of the relation itself.
    Direct,
    /// Registered on behalf of a relation derived from this one.
    Dependent,
}

/// Callback invoked with the concrete change after a mutation.
pub type ChangeCallback = Arc<dyn Fn(&RowChange) + Send + Sync>;

/// Removes the observer it was returned for. Dropping it without calling
/// leaves the observer registered.
pub type ObserverRemoval = Box<dyn FnOnce() + Send>;

struct Registered {
    kind: ObservationKind,
    callback: ChangeCallback,
}

/// Observer storage shared by the mutable relation types.
#[derive(Default)]
pub struct ObserverRegistry {
    inner: Mutex<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    next_id: u64,
    observers: HashMap<u64, Registered>,
}

impl ObserverRegistry {
    pub fn new() -> ObserverRegistry {
        ObserverRegistry::default()
    }

    /// Registers a callback and returns its removal token.
    pub fn add(self: &Arc<Self>, callback: ChangeCallback, kind: ObservationKind) -> ObserverRemoval {
        let id = {
            let mut inner = self.inner.lock();
            let id = inner.next_id;
            inner.next_id += 1;
            inner.observers.insert(id, Registered { kind, callback });
            id
        };
        let registry = Arc::clone(self);
        Box::new(move || {
            registry.inner.lock().observers.remove(&id);
        })
    }

    /// Returns true if no observers are registered.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().observers.is_empty()
    }

    /// Delivers `change` to every registered observer. Callbacks run
    /// outside the registry lock so they may add or remove observers.
    pub fn notify(&self, change: &RowChange) {
        if change.is_empty() {
            return;
        }
        let callbacks: Vec<ChangeCallback> = {
            let inner = self.inner.lock();
            inner
                .observers
                .values()
                .map(|r| Arc::clone(&r.callback))
                .collect()
        };
        for callback in callbacks {
            callback(change);
        }
    }

    /// Like [`notify`](Self::notify) but restricted to one observation kind.
    pub fn notify_kind(&self, change: &RowChange, kind: ObservationKind) {
        if change.is_empty() {
            return;
        }
        let callbacks: Vec<ChangeCallback> = {
            let inner = self.inner.lock();
            inner
                .observers
                .values()
                .filter(|r| r.kind == kind)
                .map(|r| Arc::clone(&r.callback))
                .collect()
        };
        for callback in callbacks {
            callback(change);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabula_core::{Row, RowSet, Value};

    fn one_row_change() -> RowChange {
        RowChange {
            added: RowSet::single(Row::from_pairs([("n", Value::Integer(1))])),
            removed: RowSet::new(),
        }
    }

    #[test]
    fn test_notify_reaches_observers() {
        let registry = Arc::new(ObserverRegistry::new());
        let count = Arc::new(Mutex::new(0));

        let seen = Arc::clone(&count);
        let _removal = registry.add(
            Arc::new(move |_| *seen.lock() += 1),
            ObservationKind::Direct,
        );

        registry.notify(&one_row_change());
        registry.notify(&one_row_change());
        assert_eq!(*count.lock(), 2);
    }

    #[test]
    fn test_empty_change_is_not_delivered() {
        let registry = Arc::new(ObserverRegistry::new());
        let count = Arc::new(Mutex::new(0));

        let seen = Arc::clone(&count);
        let _removal = registry.add(
            Arc::new(move |_| *seen.lock() += 1),
            ObservationKind::Direct,
        );

        registry.notify(&RowChange::new());
        assert_eq!(*count.lock(), 0);
    }

    #[test]
    fn test_removal_unregisters() {
        let registry = Arc::new(ObserverRegistry::new());
        let count = Arc::new(Mutex::new(0));

        let seen = Arc::clone(&count);
        let removal = registry.add(
            Arc::new(move |_| *seen.lock() += 1),
            ObservationKind::Direct,
        );

        registry.notify(&one_row_change());
        removal();
        registry.notify(&one_row_change());
        assert_eq!(*count.lock(), 1);
    }

    #[test]
    fn test_notify_kind_filters() {
        let registry = Arc::new(ObserverRegistry::new());
        let direct = Arc::new(Mutex::new(0));
        let dependent = Arc::new(Mutex::new(0));

        let seen = Arc::clone(&direct);
        let _a = registry.add(
            Arc::new(move |_| *seen.lock() += 1),
            ObservationKind::Direct,
        );
        let seen = Arc::clone(&dependent);
        let _b = registry.add(
            Arc::new(move |_| *seen.lock() += 1),
            ObservationKind::Dependent,
        );

        registry.notify_kind(&one_row_change(), ObservationKind::Dependent);
        assert_eq!(*direct.lock(), 0);
        assert_eq!(*dependent.lock(), 1);
    }
}
