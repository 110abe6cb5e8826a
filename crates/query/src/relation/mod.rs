//! The relation abstraction and its combinators.

mod concrete;
mod intermediate;
mod table;

pub use concrete::ConcreteRelation;
pub use intermediate::IntermediateRelation;
pub use table::MemoryTableRelation;

use crate::change::RowChange;
use crate::execute;
use crate::observe::{ChangeCallback, ObservationKind, ObserverRemoval};
use crate::operator::{AggregateFunction, AggregateSpec, Operator};
use crate::select::SelectExpression;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tabula_core::{Attribute, Error, Result, Row, RowSet, Scheme, Value};

/// Process-unique identifier of a relation instance. Identity, not
/// structure: two structurally equal expressions get different ids, and
/// the planner uses the id to share nodes for the same instance.
pub type RelationId = u64;

static NEXT_RELATION_ID: AtomicU64 = AtomicU64::new(1);

/// Allocates a fresh relation id.
pub fn next_relation_id() -> RelationId {
    NEXT_RELATION_ID.fetch_add(1, Ordering::Relaxed)
}

/// Shared handle to a relation.
pub type RelationRef = Arc<dyn Relation>;

/// Iterator of rows produced lazily by a source relation.
pub type RowGenerator = Box<dyn Iterator<Item = Result<Row>> + Send>;

/// How a relation's contents are obtained during planning.
pub enum ContentProvider {
    /// Rows produced lazily, in batches, by an iterator.
    Generator(RowGenerator),
    /// A concrete snapshot of rows.
    Set(RowSet),
    /// An operator applied to other relations.
    Intermediate(Operator, Vec<RelationRef>),
    /// Delegation: this relation has the same contents as another one.
    Underlying(RelationRef),
}

/// Consistency guard linking a relation to the transactional database it
/// belongs to. The runner snapshots the counter when a query starts and
/// refuses to keep pulling rows once it moves.
pub trait TransactionGuard: Send + Sync {
    /// The database's committed-transaction counter.
    fn transaction_counter(&self) -> u64;
}

/// A relation: a scheme plus a lazily evaluated set of rows over it.
pub trait Relation: Send + Sync {
    /// Identity of this relation instance.
    fn id(&self) -> RelationId;

    /// The scheme every row of this relation has.
    fn scheme(&self) -> Scheme;

    /// How the planner obtains this relation's contents.
    fn content_provider(&self) -> ContentProvider;

    /// Returns true if `row` is in the relation's current contents.
    fn contains(&self, row: &Row) -> Result<bool>;

    /// Overlays `new_values` onto every row matching `query`.
    /// Derived relations reject this.
    fn update(&self, query: &SelectExpression, new_values: &Row) -> Result<()> {
        let _ = (query, new_values);
        Err(Error::invalid_operation("relation does not support update"))
    }

    /// Registers a change observer. Relations that never change accept
    /// and ignore the registration.
    fn add_change_observer(
        &self,
        callback: ChangeCallback,
        kind: ObservationKind,
    ) -> ObserverRemoval {
        let _ = (callback, kind);
        Box::new(|| {})
    }

    /// The transactional database this relation reads from, if any.
    fn transaction_guard(&self) -> Option<Arc<dyn TransactionGuard>> {
        None
    }
}

/// A relation whose row set can be changed directly.
pub trait MutableRelation: Relation {
    /// Adds one row. Adding a row already present is a no-op.
    fn add(&self, row: Row) -> Result<()>;

    /// Deletes every row matching `query`.
    fn delete(&self, query: &SelectExpression) -> Result<()>;

    /// The net change applied since some fixed point, for relations that
    /// track one. Others report the empty change.
    fn net_change(&self) -> RowChange {
        RowChange::new()
    }
}

/// Combinators for building derived relations.
///
/// Each method wraps its receiver in an [`IntermediateRelation`]; nothing
/// is evaluated until the result is queried. Scheme and arity rules are
/// checked eagerly and violations panic.
pub trait RelationExt {
    fn as_relation_ref(&self) -> RelationRef;

    /// Rows in either relation. Schemes must match.
    fn union(&self, other: &RelationRef) -> RelationRef {
        IntermediateRelation::build(
            Operator::Union,
            vec![self.as_relation_ref(), other.clone()],
        )
    }

    /// Rows in both relations. Schemes must match.
    fn intersection(&self, other: &RelationRef) -> RelationRef {
        IntermediateRelation::build(
            Operator::Intersection,
            vec![self.as_relation_ref(), other.clone()],
        )
    }

    /// Rows of `self` not in `other`. Schemes must match.
    fn difference(&self, other: &RelationRef) -> RelationRef {
        IntermediateRelation::build(
            Operator::Difference,
            vec![self.as_relation_ref(), other.clone()],
        )
    }

    /// Rows restricted to `scheme`, which must be a subset of this
    /// relation's scheme. Duplicates collapse.
    fn project(&self, scheme: Scheme) -> RelationRef {
        IntermediateRelation::build(Operator::Project(scheme), vec![self.as_relation_ref()])
    }

    /// Rows matching `expression`.
    fn select(&self, expression: SelectExpression) -> RelationRef {
        IntermediateRelation::build(Operator::Select(expression), vec![self.as_relation_ref()])
    }

    /// Rows whose attributes include `row`'s entries with equal values.
    fn select_row(&self, row: &Row) -> RelationRef {
        self.select(SelectExpression::matching_row(row))
    }

    /// Pairs of rows agreeing on `matching` (keys are attributes of
    /// `self`, values attributes of `other`), merged into single rows.
    fn equijoin(
        &self,
        other: &RelationRef,
        matching: BTreeMap<Attribute, Attribute>,
    ) -> RelationRef {
        IntermediateRelation::build(
            Operator::Equijoin(matching),
            vec![self.as_relation_ref(), other.clone()],
        )
    }

    /// Natural join: equijoin on the attributes the two schemes share.
    /// With no shared attributes this is the cross product.
    fn join(&self, other: &RelationRef) -> RelationRef {
        let shared = self
            .as_relation_ref()
            .scheme()
            .intersection(&other.scheme());
        let matching = shared
            .iter()
            .map(|a| (a.clone(), a.clone()))
            .collect();
        self.equijoin(other, matching)
    }

    /// Rows with attributes renamed through `renames`.
    fn rename(&self, renames: BTreeMap<Attribute, Attribute>) -> RelationRef {
        IntermediateRelation::build(Operator::Rename(renames), vec![self.as_relation_ref()])
    }

    /// Every row overlaid with `new_values`.
    fn with_update(&self, new_values: Row) -> RelationRef {
        IntermediateRelation::build(Operator::Update(new_values), vec![self.as_relation_ref()])
    }

    /// Folds all rows into at most one output row under `attribute`.
    fn aggregate(
        &self,
        attribute: Attribute,
        initial: Option<Value>,
        function: AggregateFunction,
    ) -> RelationRef {
        IntermediateRelation::build(
            Operator::Aggregate(AggregateSpec {
                attribute,
                initial,
                function,
            }),
            vec![self.as_relation_ref()],
        )
    }

    /// The number of rows, as a relation with the single attribute
    /// `count`.
    fn count(&self) -> RelationRef {
        IntermediateRelation::build(
            Operator::Aggregate(AggregateSpec::count()),
            vec![self.as_relation_ref()],
        )
    }

    /// The maximum value of `attribute`, or the empty relation if this
    /// relation is empty.
    fn max(&self, attribute: Attribute) -> RelationRef {
        IntermediateRelation::build(
            Operator::Aggregate(AggregateSpec::max(attribute)),
            vec![self.as_relation_ref()],
        )
    }

    /// The minimum value of `attribute`, or the empty relation if this
    /// relation is empty.
    fn min(&self, attribute: Attribute) -> RelationRef {
        IntermediateRelation::build(
            Operator::Aggregate(AggregateSpec::min(attribute)),
            vec![self.as_relation_ref()],
        )
    }

    /// `self` if non-empty, otherwise `other`. Schemes must match.
    fn otherwise(&self, other: &RelationRef) -> RelationRef {
        IntermediateRelation::build(
            Operator::Otherwise,
            vec![self.as_relation_ref(), other.clone()],
        )
    }

    /// All rows if they agree on `attribute`, no rows otherwise.
    fn unique(&self, attribute: Attribute) -> RelationRef {
        IntermediateRelation::build(Operator::Unique(attribute), vec![self.as_relation_ref()])
    }

    /// Splits into the rows matching `expression` and the rows that do
    /// not, in that order.
    fn split(&self, expression: SelectExpression) -> (RelationRef, RelationRef) {
        let matching = self.select(expression.clone());
        let rest = self.select(expression.negated());
        (matching, rest)
    }

    /// Evaluates the relation and returns all of its rows.
    fn row_set(&self) -> Result<RowSet> {
        execute::collect(&self.as_relation_ref())
    }

    /// Lazily iterates the relation's rows, pumping the query pipeline on
    /// demand.
    fn rows(&self) -> execute::Rows {
        execute::rows(&self.as_relation_ref())
    }

    /// Returns true if the relation has no rows.
    fn is_empty_relation(&self) -> Result<bool> {
        Ok(self.row_set()?.is_empty())
    }
}

impl RelationExt for RelationRef {
    fn as_relation_ref(&self) -> RelationRef {
        self.clone()
    }
}

impl RelationExt for Arc<IntermediateRelation> {
    fn as_relation_ref(&self) -> RelationRef {
        self.clone()
    }
}

impl RelationExt for Arc<ConcreteRelation> {
    fn as_relation_ref(&self) -> RelationRef {
        self.clone()
    }
}

impl RelationExt for Arc<MemoryTableRelation> {
    fn as_relation_ref(&self) -> RelationRef {
        self.clone()
    }
}
