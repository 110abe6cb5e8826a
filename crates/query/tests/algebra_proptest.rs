//! Property tests: the engine's operators agree with plain set algebra.

use proptest::prelude::*;
use std::collections::BTreeSet;
use tabula_core::{Row, RowSet, Scheme, Value};
use tabula_query::relation::{ConcreteRelation, RelationExt, RelationRef};
use tabula_query::select::SelectExpression;

fn rel(values: &BTreeSet<i64>) -> RelationRef {
    ConcreteRelation::new(
        Scheme::from_attributes(["n"]),
        values
            .iter()
            .map(|v| Row::from_pairs([("n", Value::Integer(*v))]))
            .collect(),
    )
}

fn set(values: &BTreeSet<i64>) -> RowSet {
    values
        .iter()
        .map(|v| Row::from_pairs([("n", Value::Integer(*v))]))
        .collect()
}

fn small_set() -> impl Strategy<Value = BTreeSet<i64>> {
    prop::collection::btree_set(0i64..8, 0..8)
}

proptest! {
    #[test]
    fn union_agrees_with_set_union(a in small_set(), b in small_set()) {
        let engine = rel(&a).union(&rel(&b)).row_set().unwrap();
        let expected = set(&a).union(&set(&b));
        prop_assert_eq!(engine, expected);
    }

    #[test]
    fn intersection_agrees_with_set_intersection(a in small_set(), b in small_set()) {
        let engine = rel(&a).intersection(&rel(&b)).row_set().unwrap();
        let expected = set(&a).intersection(&set(&b));
        prop_assert_eq!(engine, expected);
    }

    #[test]
    fn difference_agrees_with_set_difference(a in small_set(), b in small_set()) {
        let engine = rel(&a).difference(&rel(&b)).row_set().unwrap();
        let expected = set(&a).difference(&set(&b));
        prop_assert_eq!(engine, expected);
    }

    #[test]
    fn union_with_self_is_identity(a in small_set()) {
        // Same instance twice, and a structurally equal second instance:
        // the planner shares a node in the first case and must still
        // produce the same rows in both.
        let a_rel = rel(&a);
        prop_assert_eq!(a_rel.union(&a_rel).row_set().unwrap(), set(&a));
        prop_assert_eq!(a_rel.union(&rel(&a)).row_set().unwrap(), set(&a));
    }

    #[test]
    fn union_then_difference_absorbs(a in small_set(), b in small_set()) {
        let a_rel = rel(&a);
        let b_rel = rel(&b);
        let through_union = a_rel.union(&b_rel).difference(&b_rel).row_set().unwrap();
        let direct = a_rel.difference(&b_rel).row_set().unwrap();
        prop_assert_eq!(through_union, direct);
    }

    #[test]
    fn difference_and_intersection_partition(a in small_set(), b in small_set()) {
        let a_rel = rel(&a);
        let b_rel = rel(&b);
        let outside = a_rel.difference(&b_rel);
        let inside = a_rel.intersection(&b_rel);
        let rebuilt = outside.union(&inside).row_set().unwrap();
        prop_assert_eq!(rebuilt, set(&a));
    }

    #[test]
    fn split_partitions_cleanly(a in small_set(), pivot in 0i64..8) {
        let expression = SelectExpression::attr_eq("n", pivot);
        let (matching, rest) = rel(&a).split(expression);
        let matching = matching.row_set().unwrap();
        let rest = rest.row_set().unwrap();

        prop_assert!(matching.intersection(&rest).is_empty());
        prop_assert_eq!(matching.union(&rest), set(&a));
    }

    #[test]
    fn nested_unions_survive_optimization(parts in prop::collection::vec(small_set(), 1..6)) {
        let mut relation = rel(&parts[0]);
        let mut expected = parts[0].clone();
        for part in &parts[1..] {
            relation = relation.union(&rel(part));
            expected.extend(part.iter().copied());
        }
        prop_assert_eq!(relation.row_set().unwrap(), set(&expected));
    }

    #[test]
    fn count_matches_cardinality(a in small_set()) {
        let counted = rel(&a).count().row_set().unwrap();
        let expected = RowSet::single(Row::from_pairs([
            ("count", Value::Integer(a.len() as i64)),
        ]));
        prop_assert_eq!(counted, expected);
    }
}
