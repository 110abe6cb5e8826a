//! Relational operators.

use crate::select::SelectExpression;
use core::fmt;
use std::collections::BTreeMap;
use std::sync::Arc;
use tabula_core::{Attribute, Result, Row, Scheme, Value};

/// Fold function for an aggregate: combines the running value (None on the
/// first row when no initial value was given) with the next row's value
/// for the aggregated attribute.
pub type AggregateFunction =
    Arc<dyn Fn(Option<&Value>, &Value) -> Result<Value> + Send + Sync>;

/// One aggregate computation: output attribute, optional initial value and
/// the fold function.
#[derive(Clone)]
pub struct AggregateSpec {
    pub attribute: Attribute,
    pub initial: Option<Value>,
    pub function: AggregateFunction,
}

impl AggregateSpec {
    /// Count of input rows, emitted under the attribute `count`.
    pub fn count() -> AggregateSpec {
        AggregateSpec {
            attribute: Attribute::from("count"),
            initial: Some(Value::Integer(0)),
            function: Arc::new(|current, _| {
                let n = current.and_then(Value::as_integer).unwrap_or(0);
                Ok(Value::Integer(n + 1))
            }),
        }
    }

    /// Maximum value of `attribute` over the input rows.
    pub fn max(attribute: Attribute) -> AggregateSpec {
        AggregateSpec {
            attribute,
            initial: None,
            function: Arc::new(|current, value| {
                Ok(match current {
                    Some(c) if c >= value => c.clone(),
                    _ => value.clone(),
                })
            }),
        }
    }

    /// Minimum value of `attribute` over the input rows.
    pub fn min(attribute: Attribute) -> AggregateSpec {
        AggregateSpec {
            attribute,
            initial: None,
            function: Arc::new(|current, value| {
                Ok(match current {
                    Some(c) if c <= value => c.clone(),
                    _ => value.clone(),
                })
            }),
        }
    }
}

impl fmt::Debug for AggregateSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AggregateSpec")
            .field("attribute", &self.attribute)
            .field("initial", &self.initial)
            .finish_non_exhaustive()
    }
}

/// The operator of a derived relation.
///
/// Operand counts and scheme compatibility are checked when the derived
/// relation is constructed; violations are programming errors and panic.
#[derive(Clone, Debug)]
pub enum Operator {
    /// Rows in any operand. All operands share a scheme.
    Union,
    /// Rows in every operand. All operands share a scheme.
    Intersection,
    /// Rows of the first operand absent from the second. Exactly two
    /// operands with the same scheme.
    Difference,
    /// Rows restricted to a subset of the operand's scheme, deduplicated.
    Project(Scheme),
    /// Rows matching the expression.
    Select(SelectExpression),
    /// Pairs of rows whose values agree on the given attribute mapping,
    /// merged. Keys name attributes of the first operand, values of the
    /// second.
    Equijoin(BTreeMap<Attribute, Attribute>),
    /// Rows with attributes renamed. Unmentioned attributes keep their
    /// names.
    Rename(BTreeMap<Attribute, Attribute>),
    /// Every row overlaid with the given partial row.
    Update(Row),
    /// Fold of all input rows into at most one output row.
    Aggregate(AggregateSpec),
    /// The first operand, in order, whose row set is non-empty.
    Otherwise,
    /// All rows if they agree on the given attribute, no rows otherwise.
    Unique(Attribute),
}
