//! Concrete row changes.

use tabula_core::RowSet;

/// The concrete effect of a mutation: the rows that appeared and the rows
/// that disappeared. A row never occurs in both sets.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RowChange {
    pub added: RowSet,
    pub removed: RowSet,
}

impl RowChange {
    /// The empty change.
    pub fn new() -> RowChange {
        RowChange::default()
    }

    /// A change with the given sets, normalized so no row is both added
    /// and removed.
    pub fn with(added: RowSet, removed: RowSet) -> RowChange {
        let both = added.intersection(&removed);
        RowChange {
            added: added.difference(&both),
            removed: removed.difference(&both),
        }
    }

    /// True if the change adds and removes nothing.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }

    /// The change with added and removed sets swapped.
    pub fn reversed(&self) -> RowChange {
        RowChange {
            added: self.removed.clone(),
            removed: self.added.clone(),
        }
    }

    /// Applies the change to a row set in place.
    pub fn apply_to(&self, rows: &mut RowSet) {
        for row in &self.removed {
            rows.remove(row);
        }
        rows.extend_from(&self.added);
    }

    /// Folds `incoming` into this change so the result describes the two
    /// changes applied in sequence. A row that was removed here and added
    /// by `incoming` nets out to no change, and vice versa.
    pub fn accumulate(&mut self, incoming: &RowChange) {
        let added = self
            .added
            .union(&incoming.added.difference(&self.removed))
            .difference(&incoming.removed);
        let removed = self
            .removed
            .union(&incoming.removed.difference(&self.added))
            .difference(&incoming.added);
        self.added = added;
        self.removed = removed;
    }
}
