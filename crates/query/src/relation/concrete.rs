//! Immutable in-memory relations.

use super::{next_relation_id, ContentProvider, Relation, RelationId};
use std::sync::Arc;
use tabula_core::{Result, Row, RowSet, Scheme};

/// A fixed set of rows with a scheme. The cheapest relation there is; the
/// change log and the differentiator use it for literal row sets.
pub struct ConcreteRelation {
    id: RelationId,
    scheme: Scheme,
    rows: RowSet,
}

impl ConcreteRelation {
    /// Creates a relation over `scheme` containing `rows`.
    ///
    /// Panics if any row's scheme differs from `scheme`.
    pub fn new(scheme: Scheme, rows: RowSet) -> Arc<ConcreteRelation> {
        for row in &rows {
            assert_eq!(
                row.scheme(),
                scheme,
                "concrete relation row does not match its scheme"
            );
        }
        Arc::new(ConcreteRelation {
            id: next_relation_id(),
            scheme,
            rows,
        })
    }

    /// The empty relation over `scheme`.
    pub fn empty(scheme: Scheme) -> Arc<ConcreteRelation> {
        ConcreteRelation::new(scheme, RowSet::new())
    }

    /// A single-row relation; the scheme is the row's.
    pub fn from_row(row: Row) -> Arc<ConcreteRelation> {
        let scheme = row.scheme();
        ConcreteRelation::new(scheme, RowSet::single(row))
    }

    /// The rows of this relation.
    pub fn row_set(&self) -> &RowSet {
        &self.rows
    }
}

impl Relation for ConcreteRelation {
    fn id(&self) -> RelationId {
        self.id
    }

    fn scheme(&self) -> Scheme {
        self.scheme.clone()
    }

    fn content_provider(&self) -> ContentProvider {
        ContentProvider::Set(self.rows.clone())
    }

    fn contains(&self, row: &Row) -> Result<bool> {
        Ok(self.rows.contains(row))
    }
}
