//! Symbolic relation changes.

use tabula_query::change::RowChange;
use tabula_query::relation::{RelationExt, RelationRef};
use tabula_core::Result;

/// The change to a derived relation, expressed as two lazily evaluated
/// relations: the rows gained and the rows lost.
///
/// `None` means "known to be empty", which lets the derivative formulas
/// drop whole subtrees instead of building expressions over empty sets.
#[derive(Clone)]
pub struct RelationChange {
    pub added: Option<RelationRef>,
    pub removed: Option<RelationRef>,
}

impl RelationChange {
    /// The change that adds and removes nothing.
    pub fn empty() -> RelationChange {
        RelationChange {
            added: None,
            removed: None,
        }
    }

    /// True if both sides are statically empty.
    pub fn is_empty(&self) -> bool {
        self.added.is_none() && self.removed.is_none()
    }

    /// Evaluates the added side.
    pub fn added_rows(&self) -> Result<tabula_core::RowSet> {
        match &self.added {
            Some(relation) => relation.row_set(),
            None => Ok(tabula_core::RowSet::new()),
        }
    }

    /// Evaluates the removed side.
    pub fn removed_rows(&self) -> Result<tabula_core::RowSet> {
        match &self.removed {
            Some(relation) => relation.row_set(),
            None => Ok(tabula_core::RowSet::new()),
        }
    }

    /// Evaluates both sides into a concrete change. Rows appearing on
    /// both sides cancel out.
    pub fn row_change(&self) -> Result<RowChange> {
        Ok(RowChange::with(self.added_rows()?, self.removed_rows()?))
    }
}

/// Union where `None` is the empty relation.
pub(crate) fn opt_union(
    a: Option<RelationRef>,
    b: Option<RelationRef>,
) -> Option<RelationRef> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.union(&b)),
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    }
}

/// `a - b` where `None` is the empty relation.
pub(crate) fn opt_difference(
    a: Option<RelationRef>,
    b: Option<RelationRef>,
) -> Option<RelationRef> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.difference(&b)),
        (Some(a), None) => Some(a),
        (None, _) => None,
    }
}

/// Intersection where `None` is the empty relation, which annihilates.
pub(crate) fn opt_intersection(
    a: Option<RelationRef>,
    b: Option<RelationRef>,
) -> Option<RelationRef> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.intersection(&b)),
        _ => None,
    }
}
