//! The asynchronous observer protocol.
//!
//! Observers of a derived relation receive changes in four phases: a
//! will-change marker as soon as any underlying data moves, then the
//! added and removed rows once the delta has been computed, then a
//! did-change marker closing the batch. Several mutations can coalesce
//! into one batch.

use parking_lot::Mutex;
use tabula_core::{Error, RowSet};

/// Receives coalesced changes to an observed relation.
///
/// All methods are invoked from the update manager's worker thread.
/// Between one `relation_will_change` and the matching
/// `relation_did_change` the observed contents are in flux; consumers
/// that mirror the relation should apply the row deltas and treat the
/// did-change call as the point where the mirror is consistent again.
pub trait AsyncObserver: Send + Sync {
    /// Underlying data changed; a delta for this relation is coming.
    fn relation_will_change(&self) {}

    /// Rows that entered the observed relation.
    fn relation_added_rows(&self, rows: &RowSet);

    /// Rows that left the observed relation.
    fn relation_removed_rows(&self, rows: &RowSet);

    /// The batch is complete.
    fn relation_did_change(&self) {}

    /// Computing the delta failed. The batch still closes with
    /// `relation_did_change`; no row deltas are delivered for it.
    fn relation_change_failed(&self, error: &Error) {
        let _ = error;
    }
}

/// An observer that maintains a materialized copy of the observed
/// relation by applying each delta as it arrives.
#[derive(Default)]
pub struct RowMirror {
    rows: Mutex<RowSet>,
    error: Mutex<Option<Error>>,
}

impl RowMirror {
    pub fn new() -> RowMirror {
        RowMirror::default()
    }

    /// Seeds the mirror with the relation's current contents. Call this
    /// before the first mutation arrives; deltas only describe changes.
    pub fn prime(&self, rows: RowSet) {
        *self.rows.lock() = rows;
    }

    /// The mirrored contents.
    pub fn current(&self) -> RowSet {
        self.rows.lock().clone()
    }

    /// The most recent delivery failure, if any.
    pub fn last_error(&self) -> Option<Error> {
        self.error.lock().clone()
    }
}

impl AsyncObserver for RowMirror {
    fn relation_added_rows(&self, rows: &RowSet) {
        self.rows.lock().extend_from(rows);
    }

    fn relation_removed_rows(&self, rows: &RowSet) {
        let mut current = self.rows.lock();
        *current = current.difference(rows);
    }

    fn relation_change_failed(&self, error: &Error) {
        *self.error.lock() = Some(error.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabula_core::{Row, Value};

    fn set(values: &[i64]) -> RowSet {
        values
            .iter()
            .map(|v| Row::from_pairs([("n", Value::Integer(*v))]))
            .collect()
    }

    #[test]
    fn test_mirror_applies_deltas() {
        let mirror = RowMirror::new();
        mirror.prime(set(&[1, 2]));

        mirror.relation_will_change();
        mirror.relation_added_rows(&set(&[3]));
        mirror.relation_removed_rows(&set(&[1]));
        mirror.relation_did_change();

        assert_eq!(mirror.current(), set(&[2, 3]));
        assert!(mirror.last_error().is_none());
    }

    #[test]
    fn test_mirror_records_failures() {
        let mirror = RowMirror::new();
        mirror.relation_change_failed(&Error::MutatedDuringEnumeration);
        assert_eq!(mirror.last_error(), Some(Error::MutatedDuringEnumeration));
    }
}
