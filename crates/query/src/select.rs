//! Select expressions.
//!
//! A select expression is evaluated against a single row and produces a
//! value. Filtering interprets that value as a boolean: any non-zero
//! integer is true, everything else is false.

use std::collections::BTreeMap;
use tabula_core::{Attribute, Row, Value};

/// Comparison and logical operators usable in a select expression.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryOperator {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinaryOperator {
    /// Evaluates the operator over two already-computed operand values.
    pub fn evaluate(&self, lhs: &Value, rhs: &Value) -> Value {
        match self {
            BinaryOperator::Eq => Value::boolean(lhs == rhs),
            BinaryOperator::Ne => Value::boolean(lhs != rhs),
            BinaryOperator::Lt => Value::boolean(lhs < rhs),
            BinaryOperator::Le => Value::boolean(lhs <= rhs),
            BinaryOperator::Gt => Value::boolean(lhs > rhs),
            BinaryOperator::Ge => Value::boolean(lhs >= rhs),
            BinaryOperator::And => Value::boolean(lhs.to_bool() && rhs.to_bool()),
            BinaryOperator::Or => Value::boolean(lhs.to_bool() || rhs.to_bool()),
        }
    }
}

/// A predicate tree over row attributes.
#[derive(Clone, Debug, PartialEq)]
pub enum SelectExpression {
    /// A constant value.
    Literal(Value),
    /// The value of the named attribute in the row under test. Evaluates
    /// to `Value::NotFound` when the row lacks the attribute.
    Attribute(Attribute),
    /// A binary comparison or connective.
    Binary(Box<SelectExpression>, BinaryOperator, Box<SelectExpression>),
    /// Boolean negation of the operand's truthiness.
    Not(Box<SelectExpression>),
}

impl SelectExpression {
    /// A literal expression.
    pub fn literal(value: impl Into<Value>) -> SelectExpression {
        SelectExpression::Literal(value.into())
    }

    /// An attribute reference.
    pub fn attribute(attribute: impl Into<Attribute>) -> SelectExpression {
        SelectExpression::Attribute(attribute.into())
    }

    /// The expression that is true for every row.
    pub fn always() -> SelectExpression {
        SelectExpression::literal(true)
    }

    /// The expression that is false for every row.
    pub fn never() -> SelectExpression {
        SelectExpression::literal(false)
    }

    /// `attribute == value`, the most common filter.
    pub fn attr_eq(attribute: impl Into<Attribute>, value: impl Into<Value>) -> SelectExpression {
        SelectExpression::binary(
            SelectExpression::attribute(attribute),
            BinaryOperator::Eq,
            SelectExpression::literal(value),
        )
    }

    /// A binary expression node.
    pub fn binary(
        lhs: SelectExpression,
        operator: BinaryOperator,
        rhs: SelectExpression,
    ) -> SelectExpression {
        SelectExpression::Binary(Box::new(lhs), operator, Box::new(rhs))
    }

    /// Logical conjunction with `other`.
    pub fn and(self, other: SelectExpression) -> SelectExpression {
        SelectExpression::binary(self, BinaryOperator::And, other)
    }

    /// Logical disjunction with `other`.
    pub fn or(self, other: SelectExpression) -> SelectExpression {
        SelectExpression::binary(self, BinaryOperator::Or, other)
    }

    /// Logical negation.
    pub fn negated(self) -> SelectExpression {
        SelectExpression::Not(Box::new(self))
    }

    /// The expression matching exactly the rows whose attributes include
    /// `row`'s entries with equal values. The empty row matches everything.
    pub fn matching_row(row: &Row) -> SelectExpression {
        let mut expression: Option<SelectExpression> = None;
        for (attribute, value) in row.iter() {
            let term = SelectExpression::attr_eq(attribute.clone(), value.clone());
            expression = Some(match expression {
                Some(e) => e.and(term),
                None => term,
            });
        }
        expression.unwrap_or_else(SelectExpression::always)
    }

    /// The disjunction of [`matching_row`](Self::matching_row) over `rows`.
    /// No rows yields the never-true expression.
    pub fn matching_any<'a>(rows: impl IntoIterator<Item = &'a Row>) -> SelectExpression {
        let mut expression: Option<SelectExpression> = None;
        for row in rows {
            let term = SelectExpression::matching_row(row);
            expression = Some(match expression {
                Some(e) => e.or(term),
                None => term,
            });
        }
        expression.unwrap_or_else(SelectExpression::never)
    }

    /// Evaluates the expression against `row`.
    pub fn value_with_row(&self, row: &Row) -> Value {
        match self {
            SelectExpression::Literal(value) => value.clone(),
            SelectExpression::Attribute(attribute) => row.value(attribute),
            SelectExpression::Binary(lhs, operator, rhs) => {
                operator.evaluate(&lhs.value_with_row(row), &rhs.value_with_row(row))
            }
            SelectExpression::Not(operand) => {
                Value::boolean(!operand.value_with_row(row).to_bool())
            }
        }
    }

    /// Returns true if the expression's value for `row` is truthy.
    pub fn matches(&self, row: &Row) -> bool {
        self.value_with_row(row).to_bool()
    }

    /// Rewrites attribute references through `renames`, for pushing a
    /// select through a rename.
    pub fn renamed(&self, renames: &BTreeMap<Attribute, Attribute>) -> SelectExpression {
        match self {
            SelectExpression::Literal(value) => SelectExpression::Literal(value.clone()),
            SelectExpression::Attribute(attribute) => SelectExpression::Attribute(
                renames.get(attribute).unwrap_or(attribute).clone(),
            ),
            SelectExpression::Binary(lhs, operator, rhs) => SelectExpression::binary(
                lhs.renamed(renames),
                *operator,
                rhs.renamed(renames),
            ),
            SelectExpression::Not(operand) => operand.renamed(renames).negated(),
        }
    }
}

impl From<bool> for SelectExpression {
    fn from(v: bool) -> Self {
        SelectExpression::literal(v)
    }
}
