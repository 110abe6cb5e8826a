//! Transactional databases.
//!
//! A transactional database owns a set of named change-logging relations
//! and coordinates mutations across them. Outside a transaction each
//! mutation commits on its own. Inside one, mutations go to a per-relation
//! branch visible only to the transacting thread; commit folds every
//! branch back atomically, bumps the transaction counter, and notifies
//! observers once per relation with the net change.

use crate::changelog::{ChangeLogEntry, ChangeLogSnapshot, ChangeLoggingRelation, LogOperation};
use crate::Flush;
use hashbrown::HashMap;
use parking_lot::{Condvar, Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};
use tabula_core::{Error, Result, Row, RowSet, Scheme};
use tabula_query::change::RowChange;
use tabula_query::observe::{ChangeCallback, ObservationKind, ObserverRemoval};
use tabula_query::relation::{
    next_relation_id, ContentProvider, MutableRelation, MemoryTableRelation, Relation,
    RelationExt, RelationId, RelationRef, TransactionGuard,
};
use tabula_query::select::SelectExpression;

#[derive(Default)]
struct TransactionSlot {
    owner: Option<ThreadId>,
}

struct DbState {
    relations: HashMap<String, Arc<TransactionalRelation>>,
}

/// A database of named relations with atomic multi-relation transactions
/// and whole-database snapshots.
pub struct TransactionalDatabase {
    state: RwLock<DbState>,
    /// Committed-transaction counter; queries capture it and fail with
    /// `MutatedDuringEnumeration` when it moves mid-enumeration.
    counter: AtomicU64,
    transaction: Mutex<TransactionSlot>,
    transaction_available: Condvar,
    self_ref: Weak<TransactionalDatabase>,
}

impl TransactionalDatabase {
    pub fn new() -> Arc<TransactionalDatabase> {
        Arc::new_cyclic(|self_ref| TransactionalDatabase {
            state: RwLock::new(DbState {
                relations: HashMap::new(),
            }),
            counter: AtomicU64::new(0),
            transaction: Mutex::new(TransactionSlot::default()),
            transaction_available: Condvar::new(),
            self_ref: self_ref.clone(),
        })
    }

    /// Returns the named relation, creating it over an empty table if it
    /// does not exist yet.
    ///
    /// Panics if the relation exists with a different scheme.
    pub fn relation(&self, name: &str, scheme: Scheme) -> Arc<TransactionalRelation> {
        if let Some(existing) = self.state.read().relations.get(name) {
            assert_eq!(
                existing.scheme(),
                scheme,
                "relation {name} exists with a different scheme"
            );
            return existing.clone();
        }
        let mut state = self.state.write();
        state
            .relations
            .entry(name.to_string())
            .or_insert_with(|| {
                let base = MemoryTableRelation::new(scheme);
                Arc::new(TransactionalRelation {
                    id: next_relation_id(),
                    name: name.to_string(),
                    db: self.self_ref.clone(),
                    main: ChangeLoggingRelation::new(base),
                    branch: RwLock::new(None),
                })
            })
            .clone()
    }

    /// Returns the named relation if it exists.
    pub fn existing_relation(&self, name: &str) -> Option<Arc<TransactionalRelation>> {
        self.state.read().relations.get(name).cloned()
    }

    /// Starts a transaction, blocking until no other thread holds one.
    ///
    /// Panics if the calling thread already holds a transaction.
    pub fn begin_transaction(&self) {
        let current = thread::current().id();
        let mut slot = self.transaction.lock();
        assert!(
            slot.owner != Some(current),
            "nested transactions are not supported"
        );
        while slot.owner.is_some() {
            self.transaction_available.wait(&mut slot);
        }
        slot.owner = Some(current);
    }

    /// Commits the calling thread's transaction: every branch is folded
    /// into its relation atomically, the transaction counter moves, and
    /// observers are notified with one net change per relation.
    ///
    /// Panics if the calling thread holds no transaction.
    pub fn end_transaction(&self) {
        let current = thread::current().id();
        {
            let slot = self.transaction.lock();
            assert_eq!(
                slot.owner,
                Some(current),
                "end_transaction from a thread that holds no transaction"
            );
        }

        let mut notifications: Vec<(Arc<ChangeLoggingRelation>, RowChange)> = Vec::new();
        {
            let state = self.state.write();
            let mut committed = false;
            for relation in state.relations.values() {
                let Some(branch) = relation.branch.write().take() else {
                    continue;
                };
                let change = branch.change_since(0);
                if change.is_empty() {
                    continue;
                }
                let operations: Vec<LogOperation> = branch
                    .entries()
                    .iter()
                    .flat_map(|entry| entry.operations.iter().cloned())
                    .collect();
                relation.main.append_entry(ChangeLogEntry {
                    operations,
                    change: change.clone(),
                });
                notifications.push((relation.main.clone(), change));
                committed = true;
            }
            if committed {
                self.counter.fetch_add(1, Ordering::SeqCst);
            }
            tracing::debug!(
                relations = notifications.len(),
                "transaction committed"
            );
        }

        {
            let mut slot = self.transaction.lock();
            slot.owner = None;
            self.transaction_available.notify_one();
        }

        for (relation, change) in notifications {
            relation.notify_observers(&change);
        }
    }

    /// Runs `body` inside a transaction.
    pub fn transaction<R>(&self, body: impl FnOnce() -> R) -> R {
        self.begin_transaction();
        let result = body();
        self.end_transaction();
        result
    }

    /// Runs `body` inside a transaction and returns the database
    /// snapshots from just before and just after it.
    pub fn transaction_with_snapshots<R>(
        &self,
        body: impl FnOnce() -> R,
    ) -> (R, DatabaseSnapshot, DatabaseSnapshot) {
        let before = self.take_snapshot();
        let result = self.transaction(body);
        let after = self.take_snapshot();
        (result, before, after)
    }

    /// Captures every relation's current state.
    pub fn take_snapshot(&self) -> DatabaseSnapshot {
        let state = self.state.read();
        DatabaseSnapshot {
            relations: state
                .relations
                .iter()
                .map(|(name, relation)| (name.clone(), relation.main.snapshot()))
                .collect(),
        }
    }

    /// Returns every relation to the state a snapshot captured. Counts as
    /// a mutation: the transaction counter moves and observers hear about
    /// the rows that changed.
    pub fn restore_snapshot(&self, snapshot: &DatabaseSnapshot) {
        let state = self.state.read();
        for (name, captured) in &snapshot.relations {
            if let Some(relation) = state.relations.get(name) {
                relation.main.restore(captured);
            }
        }
        self.counter.fetch_add(1, Ordering::SeqCst);
    }

    /// Writes every relation's log through to its base table.
    pub fn save(&self) -> Result<()> {
        let state = self.state.read();
        for relation in state.relations.values() {
            relation.main.flush()?;
        }
        Ok(())
    }

    fn thread_owns_transaction(&self) -> bool {
        self.transaction.lock().owner == Some(thread::current().id())
    }

    /// Commits a single out-of-transaction mutation: counter bump only,
    /// the relation has already logged and notified.
    fn note_standalone_mutation(&self) {
        self.counter.fetch_add(1, Ordering::SeqCst);
    }
}

impl TransactionGuard for TransactionalDatabase {
    fn transaction_counter(&self) -> u64 {
        self.counter.load(Ordering::SeqCst)
    }
}

/// A whole-database snapshot: one change-log snapshot per relation.
pub struct DatabaseSnapshot {
    relations: HashMap<String, ChangeLogSnapshot>,
}

/// A named relation living in a transactional database.
///
/// Reads and writes route to the thread's transaction branch when the
/// calling thread holds the database transaction, and to the shared
/// relation otherwise.
pub struct TransactionalRelation {
    id: RelationId,
    name: String,
    db: Weak<TransactionalDatabase>,
    main: Arc<ChangeLoggingRelation>,
    branch: RwLock<Option<Arc<ChangeLoggingRelation>>>,
}

impl TransactionalRelation {
    /// The relation's name within its database.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The relation the calling thread should read and write: the
    /// transaction branch if this thread holds the transaction, the
    /// shared relation otherwise.
    fn target(&self) -> Arc<ChangeLoggingRelation> {
        let Some(db) = self.db.upgrade() else {
            return self.main.clone();
        };
        if !db.thread_owns_transaction() {
            return self.main.clone();
        }
        let mut branch = self.branch.write();
        branch
            .get_or_insert_with(|| self.main.branch())
            .clone()
    }

    fn after_mutation(&self, mutated_main: bool) {
        if !mutated_main {
            return;
        }
        if let Some(db) = self.db.upgrade() {
            db.note_standalone_mutation();
        }
    }
}

impl Relation for TransactionalRelation {
    fn id(&self) -> RelationId {
        self.id
    }

    fn scheme(&self) -> Scheme {
        self.main.scheme()
    }

    fn content_provider(&self) -> ContentProvider {
        ContentProvider::Underlying(self.target())
    }

    fn contains(&self, row: &Row) -> Result<bool> {
        self.target().contains(row)
    }

    fn update(&self, query: &SelectExpression, new_values: &Row) -> Result<()> {
        let target = self.target();
        let is_main = Arc::ptr_eq(&target, &self.main);
        target.update(query, new_values)?;
        self.after_mutation(is_main);
        Ok(())
    }

    fn add_change_observer(
        &self,
        callback: ChangeCallback,
        kind: ObservationKind,
    ) -> ObserverRemoval {
        // Observers always watch the shared relation; branch mutations
        // surface once, at commit.
        self.main.add_change_observer(callback, kind)
    }

    fn transaction_guard(&self) -> Option<Arc<dyn TransactionGuard>> {
        self.db
            .upgrade()
            .map(|db| db as Arc<dyn TransactionGuard>)
    }
}

impl MutableRelation for TransactionalRelation {
    fn add(&self, row: Row) -> Result<()> {
        let target = self.target();
        let is_main = Arc::ptr_eq(&target, &self.main);
        target.add(row)?;
        self.after_mutation(is_main);
        Ok(())
    }

    fn delete(&self, query: &SelectExpression) -> Result<()> {
        let target = self.target();
        let is_main = Arc::ptr_eq(&target, &self.main);
        target.delete(query)?;
        self.after_mutation(is_main);
        Ok(())
    }

    fn net_change(&self) -> RowChange {
        self.main.net_change()
    }
}

/// One cascade rule: when rows leave `source`, each removed row selects
/// the rows of `dependent` that must go with it.
pub struct CascadeRule {
    pub source: Arc<TransactionalRelation>,
    pub dependent: Arc<TransactionalRelation>,
    pub make_query: Box<dyn Fn(&Row) -> SelectExpression + Send + Sync>,
}

/// Deletes the rows of `relation` matching `query`, then follows the
/// cascade rules wave by wave: every row removed from a rule's source
/// relation selects dependent rows for deletion, until no wave removes
/// anything. Cycles terminate because deletes only shrink relations.
pub fn cascading_delete(
    relation: &Arc<TransactionalRelation>,
    query: &SelectExpression,
    rules: &[CascadeRule],
) -> Result<()> {
    let mut wave: Vec<(Arc<TransactionalRelation>, SelectExpression)> =
        vec![(relation.clone(), query.clone())];

    while let Some((target, query)) = wave.pop() {
        let doomed: RowSet = (target.clone() as RelationRef)
            .select(query.clone())
            .row_set()?;
        if doomed.is_empty() {
            continue;
        }
        target.delete(&query)?;
        for rule in rules {
            if !Arc::ptr_eq(&rule.source, &target) {
                continue;
            }
            for row in &doomed {
                wave.push((rule.dependent.clone(), (rule.make_query)(row)));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabula_core::Value;

    fn row(pairs: &[(&str, i64)]) -> Row {
        Row::from_pairs(pairs.iter().map(|(a, v)| (*a, Value::Integer(*v))))
    }

    fn set(attribute: &str, values: &[i64]) -> RowSet {
        values
            .iter()
            .map(|v| Row::from_pairs([(attribute, Value::Integer(*v))]))
            .collect()
    }

    #[test]
    fn test_standalone_mutations_commit_immediately() {
        let db = TransactionalDatabase::new();
        let r = db.relation("numbers", Scheme::from_attributes(["n"]));
        r.add(row(&[("n", 1)])).unwrap();

        assert_eq!((r.clone() as RelationRef).row_set().unwrap(), set("n", &[1]));
        assert_eq!(db.transaction_counter(), 1);
    }

    #[test]
    fn test_transaction_batches_changes() {
        let db = TransactionalDatabase::new();
        let r = db.relation("numbers", Scheme::from_attributes(["n"]));

        let counter_before = db.transaction_counter();
        db.transaction(|| {
            r.add(row(&[("n", 1)])).unwrap();
            r.add(row(&[("n", 2)])).unwrap();
            // The transacting thread sees its own writes.
            assert!(r.contains(&row(&[("n", 1)])).unwrap());
        });

        assert_eq!(db.transaction_counter(), counter_before + 1);
        assert_eq!(
            (r.clone() as RelationRef).row_set().unwrap(),
            set("n", &[1, 2])
        );
    }

    #[test]
    fn test_empty_transaction_does_not_bump_counter() {
        let db = TransactionalDatabase::new();
        db.relation("numbers", Scheme::from_attributes(["n"]));
        let before = db.transaction_counter();
        db.transaction(|| {});
        assert_eq!(db.transaction_counter(), before);
    }

    #[test]
    fn test_transaction_notifies_net_change_once() {
        use parking_lot::Mutex;

        let db = TransactionalDatabase::new();
        let r = db.relation("numbers", Scheme::from_attributes(["n"]));

        let seen: Arc<Mutex<Vec<RowChange>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _removal = r.add_change_observer(
            Arc::new(move |change| sink.lock().push(change.clone())),
            ObservationKind::Direct,
        );

        db.transaction(|| {
            r.add(row(&[("n", 1)])).unwrap();
            r.add(row(&[("n", 2)])).unwrap();
            r.delete(&SelectExpression::attr_eq("n", 1)).unwrap();
        });

        let changes = seen.lock();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].added, set("n", &[2]));
        assert!(changes[0].removed.is_empty());
    }

    #[test]
    fn test_snapshot_restore_round_trip() {
        let db = TransactionalDatabase::new();
        let r = db.relation("numbers", Scheme::from_attributes(["n"]));
        r.add(row(&[("n", 1)])).unwrap();

        let snapshot = db.take_snapshot();
        r.add(row(&[("n", 2)])).unwrap();
        let counter = db.transaction_counter();

        db.restore_snapshot(&snapshot);
        assert_eq!((r.clone() as RelationRef).row_set().unwrap(), set("n", &[1]));
        assert_eq!(db.transaction_counter(), counter + 1);
    }

    #[test]
    fn test_save_writes_through() {
        let db = TransactionalDatabase::new();
        let r = db.relation("numbers", Scheme::from_attributes(["n"]));
        r.add(row(&[("n", 1)])).unwrap();
        db.save().unwrap();
        assert_eq!(r.main.log_len(), 0);
        assert_eq!((r.clone() as RelationRef).row_set().unwrap(), set("n", &[1]));
    }

    #[test]
    fn test_relation_lookup_is_stable() {
        let db = TransactionalDatabase::new();
        let a = db.relation("r", Scheme::from_attributes(["n"]));
        let b = db.relation("r", Scheme::from_attributes(["n"]));
        assert_eq!(a.id(), b.id());
        assert!(db.existing_relation("missing").is_none());
    }
}
