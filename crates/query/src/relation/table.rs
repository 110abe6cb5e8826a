//! Directly mutable in-memory tables.

use super::{
    next_relation_id, ContentProvider, MutableRelation, Relation, RelationId,
};
use crate::change::RowChange;
use crate::observe::{ChangeCallback, ObservationKind, ObserverRegistry, ObserverRemoval};
use crate::select::SelectExpression;
use parking_lot::RwLock;
use std::sync::Arc;
use tabula_core::{Error, Result, Row, RowSet, Scheme};

/// A mutable in-memory relation backed by a row set.
///
/// Mutations notify registered change observers synchronously, after the
/// row set has been updated.
pub struct MemoryTableRelation {
    id: RelationId,
    scheme: Scheme,
    rows: RwLock<RowSet>,
    observers: Arc<ObserverRegistry>,
}

impl MemoryTableRelation {
    /// Creates an empty table over `scheme`.
    pub fn new(scheme: Scheme) -> Arc<MemoryTableRelation> {
        Arc::new(MemoryTableRelation {
            id: next_relation_id(),
            scheme,
            rows: RwLock::new(RowSet::new()),
            observers: Arc::new(ObserverRegistry::new()),
        })
    }

    /// A snapshot of the current rows.
    pub fn snapshot(&self) -> RowSet {
        self.rows.read().clone()
    }

    fn check_scheme(&self, row: &Row) -> Result<()> {
        if row.scheme() != self.scheme {
            return Err(Error::scheme_mismatch(self.scheme.clone(), row.scheme()));
        }
        Ok(())
    }
}

impl Relation for MemoryTableRelation {
    fn id(&self) -> RelationId {
        self.id
    }

    fn scheme(&self) -> Scheme {
        self.scheme.clone()
    }

    fn content_provider(&self) -> ContentProvider {
        ContentProvider::Set(self.snapshot())
    }

    fn contains(&self, row: &Row) -> Result<bool> {
        Ok(self.rows.read().contains(row))
    }

    fn update(&self, query: &SelectExpression, new_values: &Row) -> Result<()> {
        if !new_values.scheme().is_subset_of(&self.scheme) {
            return Err(Error::scheme_mismatch(
                self.scheme.clone(),
                new_values.scheme(),
            ));
        }
        let change = {
            let mut rows = self.rows.write();
            // The change is the diff against the rows before the update.
            // An update can collapse a row into one that was already
            // present; such a row is not an addition.
            let before = rows.clone();
            let touched: RowSet = before.iter().filter(|r| query.matches(r)).cloned().collect();
            let updated: RowSet = touched.iter().map(|r| r.updated(new_values)).collect();
            for row in &touched {
                rows.remove(row);
            }
            rows.extend_from(&updated);
            RowChange {
                added: updated.difference(&before),
                removed: touched.difference(&updated),
            }
        };
        if !change.is_empty() {
            self.observers.notify(&change);
        }
        Ok(())
    }

    fn add_change_observer(
        &self,
        callback: ChangeCallback,
        kind: ObservationKind,
    ) -> ObserverRemoval {
        self.observers.add(callback, kind)
    }
}

impl MutableRelation for MemoryTableRelation {
    fn add(&self, row: Row) -> Result<()> {
        self.check_scheme(&row)?;
        let inserted = self.rows.write().insert(row.clone());
        if inserted {
            self.observers.notify(&RowChange {
                added: RowSet::single(row),
                removed: RowSet::new(),
            });
        }
        Ok(())
    }

    fn delete(&self, query: &SelectExpression) -> Result<()> {
        let removed = {
            let mut rows = self.rows.write();
            let removed: RowSet = rows.iter().filter(|r| query.matches(r)).cloned().collect();
            for row in &removed {
                rows.remove(row);
            }
            removed
        };
        self.observers.notify(&RowChange {
            added: RowSet::new(),
            removed,
        });
        Ok(())
    }
}
