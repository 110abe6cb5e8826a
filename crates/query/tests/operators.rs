//! End-to-end evaluation of every relational operator.

use std::collections::BTreeMap;
use std::sync::Arc;
use tabula_core::{Error, Result, Row, RowSet, Scheme, Value};
use tabula_query::execute;
use std::sync::atomic::{AtomicU64, Ordering};
use tabula_query::relation::{
    ConcreteRelation, ContentProvider, Relation, RelationExt, RelationId, RelationRef,
    TransactionGuard,
};
use tabula_query::select::SelectExpression;

fn row(pairs: &[(&str, i64)]) -> Row {
    Row::from_pairs(pairs.iter().map(|(a, v)| (*a, Value::Integer(*v))))
}

fn rel(attribute: &str, values: &[i64]) -> RelationRef {
    ConcreteRelation::new(
        Scheme::from_attributes([attribute]),
        values
            .iter()
            .map(|v| Row::from_pairs([(attribute, Value::Integer(*v))]))
            .collect(),
    )
}

fn numbers(values: &[i64]) -> RelationRef {
    rel("n", values)
}

fn set(attribute: &str, values: &[i64]) -> RowSet {
    values
        .iter()
        .map(|v| Row::from_pairs([(attribute, Value::Integer(*v))]))
        .collect()
}

#[test]
fn union_merges_and_deduplicates() {
    let u = numbers(&[1, 2]).union(&numbers(&[2, 3]));
    assert_eq!(u.row_set().unwrap(), set("n", &[1, 2, 3]));
}

#[test]
fn intersection_keeps_common_rows() {
    let i = numbers(&[1, 2, 3]).intersection(&numbers(&[2, 3, 4]));
    assert_eq!(i.row_set().unwrap(), set("n", &[2, 3]));
}

#[test]
fn difference_subtracts() {
    let d = numbers(&[1, 2, 3]).difference(&numbers(&[2]));
    assert_eq!(d.row_set().unwrap(), set("n", &[1, 3]));
}

#[test]
fn project_collapses_duplicates() {
    let people = ConcreteRelation::new(
        Scheme::from_attributes(["id", "dept"]),
        [
            row(&[("id", 1), ("dept", 10)]),
            row(&[("id", 2), ("dept", 10)]),
            row(&[("id", 3), ("dept", 20)]),
        ]
        .into_iter()
        .collect(),
    );
    let depts = people.project(Scheme::from_attributes(["dept"]));
    assert_eq!(depts.row_set().unwrap(), set("dept", &[10, 20]));
}

#[test]
fn select_filters() {
    let s = numbers(&[1, 2, 3, 4]).select(SelectExpression::attr_eq("n", 3));
    assert_eq!(s.row_set().unwrap(), set("n", &[3]));
}

#[test]
fn equijoin_matches_on_mapping() {
    let orders = ConcreteRelation::new(
        Scheme::from_attributes(["order", "customer"]),
        [
            row(&[("order", 100), ("customer", 1)]),
            row(&[("order", 101), ("customer", 2)]),
        ]
        .into_iter()
        .collect(),
    );
    let customers = ConcreteRelation::new(
        Scheme::from_attributes(["id", "tier"]),
        [row(&[("id", 1), ("tier", 5)]), row(&[("id", 3), ("tier", 7)])]
            .into_iter()
            .collect(),
    );

    let matching: BTreeMap<_, _> = [("customer".into(), "id".into())].into_iter().collect();
    let joined = (orders as RelationRef).equijoin(&(customers as RelationRef), matching);

    let expected: RowSet = RowSet::single(row(&[
        ("order", 100),
        ("customer", 1),
        ("id", 1),
        ("tier", 5),
    ]));
    assert_eq!(joined.row_set().unwrap(), expected);
}

#[test]
fn natural_join_uses_shared_attributes() {
    let left = ConcreteRelation::new(
        Scheme::from_attributes(["k", "a"]),
        [row(&[("k", 1), ("a", 10)]), row(&[("k", 2), ("a", 20)])]
            .into_iter()
            .collect(),
    );
    let right = ConcreteRelation::new(
        Scheme::from_attributes(["k", "b"]),
        [row(&[("k", 1), ("b", 100)])].into_iter().collect(),
    );

    let joined = (left as RelationRef).join(&(right as RelationRef));
    assert_eq!(
        joined.row_set().unwrap(),
        RowSet::single(row(&[("k", 1), ("a", 10), ("b", 100)]))
    );
}

#[test]
fn join_with_no_shared_attributes_is_cross_product() {
    let joined = numbers(&[1, 2]).join(&rel("m", &[7, 8]));
    assert_eq!(joined.row_set().unwrap().len(), 4);
}

#[test]
fn join_with_self_is_identity() {
    let a = numbers(&[1, 2, 3]);
    let joined = a.join(&a);
    assert_eq!(joined.row_set().unwrap(), a.row_set().unwrap());
}

#[test]
fn rename_rewrites_attributes() {
    let renames: BTreeMap<_, _> = [("n".into(), "m".into())].into_iter().collect();
    let renamed = numbers(&[1, 2]).rename(renames);
    assert_eq!(renamed.scheme(), Scheme::from_attributes(["m"]));
    assert_eq!(renamed.row_set().unwrap(), set("m", &[1, 2]));
}

#[test]
fn with_update_overlays_values() {
    let r = ConcreteRelation::new(
        Scheme::from_attributes(["id", "n"]),
        [row(&[("id", 1), ("n", 10)]), row(&[("id", 2), ("n", 20)])]
            .into_iter()
            .collect(),
    );
    let updated = (r as RelationRef).with_update(row(&[("n", 0)]));
    let expected: RowSet = [row(&[("id", 1), ("n", 0)]), row(&[("id", 2), ("n", 0)])]
        .into_iter()
        .collect();
    assert_eq!(updated.row_set().unwrap(), expected);
}

#[test]
fn count_aggregates() {
    assert_eq!(
        numbers(&[5, 6, 7]).count().row_set().unwrap(),
        RowSet::single(row(&[("count", 3)]))
    );
    assert_eq!(
        numbers(&[]).count().row_set().unwrap(),
        RowSet::single(row(&[("count", 0)]))
    );
}

#[test]
fn max_and_min() {
    let r = numbers(&[3, 9, 4]);
    assert_eq!(
        r.max("n".into()).row_set().unwrap(),
        RowSet::single(row(&[("n", 9)]))
    );
    assert_eq!(
        r.min("n".into()).row_set().unwrap(),
        RowSet::single(row(&[("n", 3)]))
    );
    // No rows, no extreme.
    assert!(numbers(&[]).max("n".into()).row_set().unwrap().is_empty());
}

#[test]
fn aggregate_error_fails_the_query() {
    let r = numbers(&[1, 2]);
    let failing = r.aggregate(
        "n".into(),
        None,
        Arc::new(|_, _| Err(Error::aggregate("no can do"))),
    );
    assert!(matches!(
        failing.row_set(),
        Err(Error::Aggregate { .. })
    ));
}

#[test]
fn otherwise_picks_first_nonempty() {
    let fallback = numbers(&[9]);
    assert_eq!(
        numbers(&[1]).otherwise(&fallback).row_set().unwrap(),
        set("n", &[1])
    );
    assert_eq!(
        numbers(&[]).otherwise(&fallback).row_set().unwrap(),
        set("n", &[9])
    );
}

#[test]
fn unique_requires_agreement() {
    let agreeing = ConcreteRelation::new(
        Scheme::from_attributes(["id", "g"]),
        [row(&[("id", 1), ("g", 7)]), row(&[("id", 2), ("g", 7)])]
            .into_iter()
            .collect(),
    );
    let mixed = ConcreteRelation::new(
        Scheme::from_attributes(["id", "g"]),
        [row(&[("id", 1), ("g", 7)]), row(&[("id", 2), ("g", 8)])]
            .into_iter()
            .collect(),
    );

    assert_eq!(
        (agreeing as RelationRef).unique("g".into()).row_set().unwrap().len(),
        2
    );
    assert!((mixed as RelationRef)
        .unique("g".into())
        .row_set()
        .unwrap()
        .is_empty());
}

#[test]
fn split_partitions() {
    let (high, low) = numbers(&[1, 2, 3, 4]).split(SelectExpression::binary(
        SelectExpression::attribute("n"),
        tabula_query::select::BinaryOperator::Gt,
        SelectExpression::literal(2),
    ));
    assert_eq!(high.row_set().unwrap(), set("n", &[3, 4]));
    assert_eq!(low.row_set().unwrap(), set("n", &[1, 2]));
}

#[test]
fn lazy_rows_iterate_everything() {
    let u = numbers(&[1, 2, 3]).union(&numbers(&[3, 4]));
    let collected: Result<RowSet> = u.rows().collect();
    assert_eq!(collected.unwrap(), set("n", &[1, 2, 3, 4]));
}

#[test]
fn collect_all_shares_one_evaluation() {
    let base = numbers(&[1, 2, 3, 4]);
    let low = base.select(SelectExpression::binary(
        SelectExpression::attribute("n"),
        tabula_query::select::BinaryOperator::Lt,
        SelectExpression::literal(3),
    ));
    let counted = low.count();

    let results = execute::collect_all(&[low.clone(), counted]).unwrap();
    assert_eq!(results[0], set("n", &[1, 2]));
    assert_eq!(results[1], RowSet::single(row(&[("count", 2)])));
}

/// A source that produces its rows lazily through a generator.
struct NumberStream {
    id: RelationId,
    limit: i64,
}

impl NumberStream {
    fn new(limit: i64) -> Arc<NumberStream> {
        Arc::new(NumberStream {
            id: tabula_query::relation::next_relation_id(),
            limit,
        })
    }
}

impl Relation for NumberStream {
    fn id(&self) -> RelationId {
        self.id
    }

    fn scheme(&self) -> Scheme {
        Scheme::from_attributes(["n"])
    }

    fn content_provider(&self) -> ContentProvider {
        let limit = self.limit;
        ContentProvider::Generator(Box::new(
            (0..limit).map(|v| Ok(Row::from_pairs([("n", Value::Integer(v))]))),
        ))
    }

    fn contains(&self, row: &Row) -> Result<bool> {
        Ok(matches!(
            row.value(&"n".into()).as_integer(),
            Some(v) if v >= 0 && v < self.limit
        ))
    }
}

struct TickingGuard {
    counter: AtomicU64,
}

impl TransactionGuard for TickingGuard {
    fn transaction_counter(&self) -> u64 {
        self.counter.load(Ordering::SeqCst)
    }
}

/// A guarded source whose snapshot can coincide with a commit on the
/// guard, standing in for a writer that lands between two sources being
/// read.
struct GuardedRows {
    id: RelationId,
    rows: RowSet,
    guard: Arc<TickingGuard>,
    commit_on_read: bool,
}

impl GuardedRows {
    fn new(values: &[i64], guard: Arc<TickingGuard>, commit_on_read: bool) -> RelationRef {
        Arc::new(GuardedRows {
            id: tabula_query::relation::next_relation_id(),
            rows: set("n", values),
            guard,
            commit_on_read,
        })
    }
}

impl Relation for GuardedRows {
    fn id(&self) -> RelationId {
        self.id
    }

    fn scheme(&self) -> Scheme {
        Scheme::from_attributes(["n"])
    }

    fn content_provider(&self) -> ContentProvider {
        if self.commit_on_read {
            self.guard.counter.fetch_add(1, Ordering::SeqCst);
        }
        ContentProvider::Set(self.rows.clone())
    }

    fn contains(&self, row: &Row) -> Result<bool> {
        Ok(self.rows.contains(row))
    }

    fn transaction_guard(&self) -> Option<Arc<dyn TransactionGuard>> {
        Some(self.guard.clone())
    }
}

#[test]
fn commit_landing_between_source_snapshots_surfaces_an_error() {
    let guard = Arc::new(TickingGuard {
        counter: AtomicU64::new(0),
    });
    let quiet = GuardedRows::new(&[1, 2], Arc::clone(&guard), false);
    let racing = GuardedRows::new(&[3], guard, true);

    // The second source's snapshot is taken after a commit the first
    // source's snapshot did not see. The run must report the mutation
    // instead of splicing the two states together.
    let result = quiet.union(&racing).row_set();
    assert!(matches!(result, Err(Error::MutatedDuringEnumeration)));
}

#[test]
fn generator_sources_stream_in_batches() {
    let stream: RelationRef = NumberStream::new(200);
    let selected = stream.select(SelectExpression::binary(
        SelectExpression::attribute("n"),
        tabula_query::select::BinaryOperator::Ge,
        SelectExpression::literal(150),
    ));
    assert_eq!(selected.row_set().unwrap().len(), 50);
}
