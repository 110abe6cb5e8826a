//! Relation algebra, query planning and execution.
//!
//! Relations are lazily evaluated expression trees built with the
//! combinators on [`RelationExt`]. Evaluating one plans the tree into a
//! deduplicated node graph, optimizes it, and pumps rows through an
//! explicit work queue until every consumer has seen all output.
//!
//! ```
//! use tabula_query::relation::{MemoryTableRelation, MutableRelation, RelationExt};
//! use tabula_query::select::SelectExpression;
//! use tabula_core::{Row, Scheme, Value};
//!
//! let table = MemoryTableRelation::new(Scheme::from_attributes(["id", "name"]));
//! table.add(Row::from_pairs([
//!     ("id", Value::Integer(1)),
//!     ("name", Value::Text("ada".into())),
//! ])).unwrap();
//!
//! let names = table.project(Scheme::from_attributes(["name"]));
//! assert_eq!(names.row_set().unwrap().len(), 1);
//! ```

pub mod change;
pub mod execute;
pub mod observe;
pub mod operator;
pub mod planner;
pub mod relation;
pub mod runner;
pub mod select;

pub use change::RowChange;
pub use observe::{ChangeCallback, ObservationKind, ObserverRemoval};
pub use operator::{AggregateFunction, AggregateSpec, Operator};
pub use relation::{
    ConcreteRelation, ContentProvider, IntermediateRelation, MemoryTableRelation,
    MutableRelation, Relation, RelationExt, RelationId, RelationRef, TransactionGuard,
};
pub use select::{BinaryOperator, SelectExpression};
