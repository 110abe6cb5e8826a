//! Derived relations.

use super::{
    next_relation_id, ContentProvider, Relation, RelationId, RelationRef, TransactionGuard,
};
use crate::execute;
use crate::operator::Operator;
use std::sync::{Arc, Weak};
use tabula_core::{Result, Row, Scheme};

/// A relation defined as an operator applied to other relations.
///
/// Construction checks operand counts and scheme compatibility and panics
/// on violation; a malformed expression tree is a programming error, not a
/// runtime condition.
pub struct IntermediateRelation {
    id: RelationId,
    operator: Operator,
    operands: Vec<RelationRef>,
    scheme: Scheme,
    self_ref: Weak<IntermediateRelation>,
}

impl IntermediateRelation {
    /// Builds the derived relation, validating the operands.
    pub fn build(operator: Operator, operands: Vec<RelationRef>) -> RelationRef {
        let scheme = result_scheme(&operator, &operands);
        Arc::new_cyclic(|self_ref| IntermediateRelation {
            id: next_relation_id(),
            operator,
            operands,
            scheme,
            self_ref: self_ref.clone(),
        })
    }

    /// The operator defining this relation.
    pub fn operator(&self) -> &Operator {
        &self.operator
    }

    /// The operand relations.
    pub fn operands(&self) -> &[RelationRef] {
        &self.operands
    }

    fn as_ref(&self) -> RelationRef {
        // The weak self-reference is set in build() and lives as long as
        // the relation itself.
        self.self_ref
            .upgrade()
            .expect("intermediate relation outlived its own allocation")
    }
}

fn same_scheme_operands(operands: &[RelationRef]) -> Scheme {
    assert!(!operands.is_empty(), "operator requires at least one operand");
    let scheme = operands[0].scheme();
    for operand in &operands[1..] {
        assert_eq!(
            operand.scheme(),
            scheme,
            "operands must share a scheme"
        );
    }
    scheme
}

fn result_scheme(operator: &Operator, operands: &[RelationRef]) -> Scheme {
    match operator {
        Operator::Union | Operator::Intersection => same_scheme_operands(operands),
        Operator::Difference => {
            assert_eq!(operands.len(), 2, "difference takes exactly two operands");
            same_scheme_operands(operands)
        }
        Operator::Otherwise => same_scheme_operands(operands),
        Operator::Project(scheme) => {
            assert_eq!(operands.len(), 1, "project takes exactly one operand");
            assert!(
                scheme.is_subset_of(&operands[0].scheme()),
                "projection scheme must be a subset of the operand's scheme"
            );
            scheme.clone()
        }
        Operator::Select(_) => {
            assert_eq!(operands.len(), 1, "select takes exactly one operand");
            operands[0].scheme()
        }
        Operator::Equijoin(matching) => {
            assert_eq!(operands.len(), 2, "equijoin takes exactly two operands");
            let left = operands[0].scheme();
            let right = operands[1].scheme();
            for (a, b) in matching {
                assert!(left.contains(a), "equijoin key {a} missing from left scheme");
                assert!(right.contains(b), "equijoin key {b} missing from right scheme");
            }
            left.union(&right)
        }
        Operator::Rename(renames) => {
            assert_eq!(operands.len(), 1, "rename takes exactly one operand");
            let scheme = operands[0].scheme();
            for from in renames.keys() {
                assert!(scheme.contains(from), "rename source {from} missing from scheme");
            }
            let renamed: Scheme = scheme
                .iter()
                .map(|a| renames.get(a).unwrap_or(a).clone())
                .collect();
            assert_eq!(
                renamed.len(),
                scheme.len(),
                "rename must not collapse attributes"
            );
            renamed
        }
        Operator::Update(new_values) => {
            assert_eq!(operands.len(), 1, "update takes exactly one operand");
            let scheme = operands[0].scheme();
            assert!(
                new_values.scheme().is_subset_of(&scheme),
                "update values must be a subset of the operand's scheme"
            );
            scheme
        }
        Operator::Aggregate(spec) => {
            assert_eq!(operands.len(), 1, "aggregate takes exactly one operand");
            Scheme::from_attributes([spec.attribute.clone()])
        }
        Operator::Unique(attribute) => {
            assert_eq!(operands.len(), 1, "unique takes exactly one operand");
            let scheme = operands[0].scheme();
            assert!(
                scheme.contains(attribute),
                "unique attribute {attribute} missing from scheme"
            );
            scheme
        }
    }
}

impl Relation for IntermediateRelation {
    fn id(&self) -> RelationId {
        self.id
    }

    fn scheme(&self) -> Scheme {
        self.scheme.clone()
    }

    fn content_provider(&self) -> ContentProvider {
        ContentProvider::Intermediate(self.operator.clone(), self.operands.clone())
    }

    fn contains(&self, row: &Row) -> Result<bool> {
        execute::contains(&self.as_ref(), row)
    }

    fn transaction_guard(&self) -> Option<Arc<dyn TransactionGuard>> {
        // A derived relation is guarded when any operand is.
        self.operands
            .iter()
            .find_map(|operand| operand.transaction_guard())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relation::{ConcreteRelation, RelationExt};
    use tabula_core::{RowSet, Value};

    fn rel(values: &[i64]) -> RelationRef {
        ConcreteRelation::new(
            Scheme::from_attributes(["n"]),
            values
                .iter()
                .map(|v| Row::from_pairs([("n", Value::Integer(*v))]))
                .collect(),
        )
    }

    #[test]
    fn test_union_scheme() {
        let u = rel(&[1]).union(&rel(&[2]));
        assert_eq!(u.scheme(), Scheme::from_attributes(["n"]));
    }

    #[test]
    #[should_panic(expected = "share a scheme")]
    fn test_union_scheme_mismatch_panics() {
        let other = ConcreteRelation::empty(Scheme::from_attributes(["m"]));
        rel(&[1]).union(&(other as RelationRef));
    }

    #[test]
    #[should_panic(expected = "subset of the operand")]
    fn test_project_outside_scheme_panics() {
        rel(&[1]).project(Scheme::from_attributes(["missing"]));
    }

    #[test]
    #[should_panic(expected = "collapse")]
    fn test_rename_collision_panics() {
        let r = ConcreteRelation::empty(Scheme::from_attributes(["a", "b"]));
        (r as RelationRef).rename(
            [("a".into(), "b".into())]
                .into_iter()
                .collect::<std::collections::BTreeMap<_, _>>(),
        );
    }

    #[test]
    fn test_contains_evaluates() {
        let u = rel(&[1, 2]).union(&rel(&[3]));
        assert!(u.contains(&Row::from_pairs([("n", Value::Integer(3))])).unwrap());
        assert!(!u.contains(&Row::from_pairs([("n", Value::Integer(4))])).unwrap());
    }

    #[test]
    fn test_empty_concrete_round_trip() {
        let e = ConcreteRelation::new(Scheme::from_attributes(["n"]), RowSet::new());
        let u = rel(&[1]).union(&(e as RelationRef));
        assert_eq!(u.row_set().unwrap(), rel(&[1]).row_set().unwrap());
    }
}
