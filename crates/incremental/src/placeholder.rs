//! Placeholder relations.

use parking_lot::RwLock;
use std::sync::Arc;
use tabula_core::{Result, Row, RowSet, Scheme};
use tabula_query::relation::{
    next_relation_id, ContentProvider, Relation, RelationId,
};

/// A leaf relation whose contents are swapped in from outside.
///
/// Derivative expressions reference two placeholders per underlying
/// variable, one for the variable's added rows and one for its removed
/// rows. Before the derivative is evaluated the accumulated change is
/// installed here; afterwards the placeholders are cleared so the same
/// derivative can be reused for the next change.
pub struct PlaceholderRelation {
    id: RelationId,
    scheme: Scheme,
    rows: RwLock<RowSet>,
}

impl PlaceholderRelation {
    /// An empty placeholder over `scheme`.
    pub fn new(scheme: Scheme) -> Arc<PlaceholderRelation> {
        Arc::new(PlaceholderRelation {
            id: next_relation_id(),
            scheme,
            rows: RwLock::new(RowSet::new()),
        })
    }

    /// Replaces the placeholder's contents.
    pub fn set_rows(&self, rows: RowSet) {
        *self.rows.write() = rows;
    }

    /// Empties the placeholder.
    pub fn clear(&self) {
        *self.rows.write() = RowSet::new();
    }
}

impl Relation for PlaceholderRelation {
    fn id(&self) -> RelationId {
        self.id
    }

    fn scheme(&self) -> Scheme {
        self.scheme.clone()
    }

    fn content_provider(&self) -> ContentProvider {
        ContentProvider::Set(self.rows.read().clone())
    }

    fn contains(&self, row: &Row) -> Result<bool> {
        Ok(self.rows.read().contains(row))
    }
}
