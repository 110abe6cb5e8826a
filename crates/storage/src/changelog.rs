//! Change-logging relations.
//!
//! A change-logging relation wraps a base table and records every
//! mutation in a log instead of writing it through. Its visible contents
//! are the base rows minus the net removed set plus the net added set.
//! The log supports snapshots: a snapshot captures the log position and
//! the net sets, and restoring one moves the relation back (or forward)
//! to that point, notifying observers of the rows that changed.

use crate::Flush;
use parking_lot::RwLock;
use std::sync::Arc;
use tabula_core::{Error, Result, Row, RowSet, Scheme};
use tabula_query::change::RowChange;
use tabula_query::observe::{ChangeCallback, ObservationKind, ObserverRegistry, ObserverRemoval};
use tabula_query::relation::{
    next_relation_id, ContentProvider, MemoryTableRelation, MutableRelation, Relation,
    RelationId,
};
use tabula_query::select::SelectExpression;

/// One logged mutation, recorded as issued. Entries keep the operations
/// for inspection; snapshots and flushes work from the net concrete
/// change instead.
#[derive(Clone, Debug)]
pub enum LogOperation {
    /// Insert the rows.
    Add(RowSet),
    /// Remove every row matching the expression.
    Delete(SelectExpression),
    /// Overlay the partial row onto every row matching the expression.
    Update(SelectExpression, Row),
}

/// One log entry: the operations as issued, plus their net concrete
/// effect at the time they were applied. The concrete change is what
/// snapshots replay, in either direction.
#[derive(Debug)]
pub struct ChangeLogEntry {
    pub operations: Vec<LogOperation>,
    pub change: RowChange,
}

/// A point-in-time capture of a change-logging relation's state.
pub struct ChangeLogSnapshot {
    log: Vec<Arc<ChangeLogEntry>>,
    net: RowChange,
}

struct LogState {
    log: Vec<Arc<ChangeLogEntry>>,
    /// Net effect of the whole log over the base contents.
    net: RowChange,
}

/// A relation that buffers mutations in a log over a base table.
pub struct ChangeLoggingRelation {
    id: RelationId,
    base: Arc<MemoryTableRelation>,
    state: RwLock<LogState>,
    observers: Arc<ObserverRegistry>,
}

impl ChangeLoggingRelation {
    /// Wraps `base` with an empty log.
    pub fn new(base: Arc<MemoryTableRelation>) -> Arc<ChangeLoggingRelation> {
        Arc::new(ChangeLoggingRelation {
            id: next_relation_id(),
            base,
            state: RwLock::new(LogState {
                log: Vec::new(),
                net: RowChange::new(),
            }),
            observers: Arc::new(ObserverRegistry::new()),
        })
    }

    /// A new relation over the same base, starting from this relation's
    /// current visible contents with an empty log. Transactions mutate a
    /// branch and fold it back on commit.
    pub fn branch(&self) -> Arc<ChangeLoggingRelation> {
        let state = self.state.read();
        Arc::new(ChangeLoggingRelation {
            id: next_relation_id(),
            base: self.base.clone(),
            state: RwLock::new(LogState {
                log: Vec::new(),
                net: state.net.clone(),
            }),
            observers: Arc::new(ObserverRegistry::new()),
        })
    }

    /// The relation's current visible rows.
    pub fn visible_rows(&self) -> RowSet {
        let base = self.base.snapshot();
        let state = self.state.read();
        visible(&base, &state.net)
    }

    /// Number of log entries.
    pub fn log_len(&self) -> usize {
        self.state.read().log.len()
    }

    /// The net concrete change the log applies over the base contents.
    pub fn net_log_change(&self) -> RowChange {
        self.state.read().net.clone()
    }

    /// Accumulates the concrete changes of the log entries from
    /// `position` onward.
    pub fn change_since(&self, position: usize) -> RowChange {
        let state = self.state.read();
        let mut change = RowChange::new();
        for entry in &state.log[position.min(state.log.len())..] {
            change.accumulate(&entry.change);
        }
        change
    }

    /// Captures the current log position and net sets.
    pub fn snapshot(&self) -> ChangeLogSnapshot {
        let state = self.state.read();
        ChangeLogSnapshot {
            log: state.log.clone(),
            net: state.net.clone(),
        }
    }

    /// Returns the relation to the state a snapshot captured and reports
    /// the visible change to observers.
    ///
    /// Panics if the snapshot belongs to a diverged history: the shorter
    /// of the two logs must be a prefix of the longer.
    pub fn restore(&self, snapshot: &ChangeLogSnapshot) {
        let change = {
            let mut state = self.state.write();
            let shared = state.log.len().min(snapshot.log.len());
            for (current, captured) in state.log[..shared].iter().zip(&snapshot.log[..shared]) {
                assert!(
                    Arc::ptr_eq(current, captured),
                    "snapshot restore across diverged change logs"
                );
            }
            let base = self.base.snapshot();
            let before = visible(&base, &state.net);
            let after = visible(&base, &snapshot.net);
            state.log = snapshot.log.clone();
            state.net = snapshot.net.clone();
            RowChange {
                added: after.difference(&before),
                removed: before.difference(&after),
            }
        };
        self.observers.notify(&change);
    }

    /// Appends an externally computed entry, as commit does when folding
    /// a transaction branch back in. The caller notifies observers.
    pub(crate) fn append_entry(&self, entry: ChangeLogEntry) {
        let mut state = self.state.write();
        state.net.accumulate(&entry.change);
        state.log.push(Arc::new(entry));
    }

    /// Everything in the log, oldest first.
    pub(crate) fn entries(&self) -> Vec<Arc<ChangeLogEntry>> {
        self.state.read().log.clone()
    }

    pub(crate) fn notify_observers(&self, change: &RowChange) {
        self.observers.notify(change);
    }

    fn log_mutation(&self, operations: Vec<LogOperation>, change: RowChange) {
        if change.is_empty() {
            return;
        }
        self.append_entry(ChangeLogEntry {
            operations,
            change: change.clone(),
        });
        self.observers.notify(&change);
    }
}

fn visible(base: &RowSet, net: &RowChange) -> RowSet {
    base.difference(&net.removed).union(&net.added)
}

impl Relation for ChangeLoggingRelation {
    fn id(&self) -> RelationId {
        self.id
    }

    fn scheme(&self) -> Scheme {
        self.base.scheme()
    }

    fn content_provider(&self) -> ContentProvider {
        ContentProvider::Set(self.visible_rows())
    }

    fn contains(&self, row: &Row) -> Result<bool> {
        let state = self.state.read();
        if state.net.added.contains(row) {
            return Ok(true);
        }
        if state.net.removed.contains(row) {
            return Ok(false);
        }
        self.base.contains(row)
    }

    fn update(&self, query: &SelectExpression, new_values: &Row) -> Result<()> {
        if !new_values.scheme().is_subset_of(&self.scheme()) {
            return Err(Error::scheme_mismatch(self.scheme(), new_values.scheme()));
        }
        let before = self.visible_rows();
        let touched: RowSet = before.iter().filter(|r| query.matches(r)).cloned().collect();
        let updated: RowSet = touched.iter().map(|r| r.updated(new_values)).collect();
        let change = RowChange {
            added: updated.difference(&before),
            removed: touched.difference(&updated),
        };
        self.log_mutation(
            vec![LogOperation::Update(query.clone(), new_values.clone())],
            change,
        );
        Ok(())
    }

    fn add_change_observer(
        &self,
        callback: ChangeCallback,
        kind: ObservationKind,
    ) -> ObserverRemoval {
        self.observers.add(callback, kind)
    }
}

impl MutableRelation for ChangeLoggingRelation {
    fn add(&self, row: Row) -> Result<()> {
        if row.scheme() != self.scheme() {
            return Err(Error::scheme_mismatch(self.scheme(), row.scheme()));
        }
        if self.contains(&row)? {
            return Ok(());
        }
        self.log_mutation(
            vec![LogOperation::Add(RowSet::single(row.clone()))],
            RowChange {
                added: RowSet::single(row),
                removed: RowSet::new(),
            },
        );
        Ok(())
    }

    fn delete(&self, query: &SelectExpression) -> Result<()> {
        let removed: RowSet = self
            .visible_rows()
            .iter()
            .filter(|r| query.matches(r))
            .cloned()
            .collect();
        self.log_mutation(
            vec![LogOperation::Delete(query.clone())],
            RowChange {
                added: RowSet::new(),
                removed,
            },
        );
        Ok(())
    }

    fn net_change(&self) -> RowChange {
        self.net_log_change()
    }
}

impl Flush for ChangeLoggingRelation {
    /// Writes the net logged change through to the base table and clears
    /// the log. The visible contents do not change, so observers are not
    /// notified.
    fn flush(&self) -> Result<()> {
        let mut state = self.state.write();
        for row in state.net.removed.iter() {
            self.base
                .delete(&SelectExpression::matching_row(row))?;
        }
        for row in state.net.added.iter().cloned().collect::<Vec<_>>() {
            self.base.add(row)?;
        }
        state.log.clear();
        state.net = RowChange::new();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabula_core::Value;
    use tabula_query::relation::RelationExt;

    fn row(v: i64) -> Row {
        Row::from_pairs([("n", Value::Integer(v))])
    }

    fn set(values: &[i64]) -> RowSet {
        values.iter().map(|v| row(*v)).collect()
    }

    fn logged(base_values: &[i64]) -> Arc<ChangeLoggingRelation> {
        let base = MemoryTableRelation::new(Scheme::from_attributes(["n"]));
        for v in base_values {
            base.add(row(*v)).unwrap();
        }
        ChangeLoggingRelation::new(base)
    }

    #[test]
    fn test_mutations_are_logged_not_written_through() {
        let r = logged(&[1, 2]);
        r.add(row(3)).unwrap();
        r.delete(&SelectExpression::attr_eq("n", 1)).unwrap();

        assert_eq!(r.visible_rows(), set(&[2, 3]));
        assert_eq!(r.base.snapshot(), set(&[1, 2]));
        assert_eq!(r.log_len(), 2);
    }

    #[test]
    fn test_adding_visible_row_is_a_noop() {
        let r = logged(&[1]);
        r.add(row(1)).unwrap();
        assert_eq!(r.log_len(), 0);
    }

    #[test]
    fn test_update_logs_net_effect() {
        let r = logged(&[1, 2]);
        r.update(&SelectExpression::attr_eq("n", 1), &row(9)).unwrap();
        assert_eq!(r.visible_rows(), set(&[2, 9]));

        let net = r.net_log_change();
        assert_eq!(net.added, set(&[9]));
        assert_eq!(net.removed, set(&[1]));
    }

    #[test]
    fn test_snapshot_round_trip() {
        let r = logged(&[1, 2]);
        r.add(row(3)).unwrap();
        let snapshot = r.snapshot();

        r.delete(&SelectExpression::attr_eq("n", 2)).unwrap();
        r.add(row(4)).unwrap();
        assert_eq!(r.visible_rows(), set(&[1, 3, 4]));

        r.restore(&snapshot);
        assert_eq!(r.visible_rows(), set(&[1, 2, 3]));
    }

    #[test]
    fn test_restore_forward() {
        let r = logged(&[1]);
        let early = r.snapshot();
        r.add(row(2)).unwrap();
        let late = r.snapshot();

        r.restore(&early);
        assert_eq!(r.visible_rows(), set(&[1]));
        r.restore(&late);
        assert_eq!(r.visible_rows(), set(&[1, 2]));
    }

    #[test]
    fn test_restore_notifies_the_visible_delta() {
        use parking_lot::Mutex;

        let r = logged(&[1]);
        let snapshot = r.snapshot();
        r.add(row(2)).unwrap();

        let seen: Arc<Mutex<Vec<RowChange>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _removal = r.add_change_observer(
            Arc::new(move |change| sink.lock().push(change.clone())),
            ObservationKind::Direct,
        );

        r.restore(&snapshot);
        let changes = seen.lock();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].removed, set(&[2]));
        assert!(changes[0].added.is_empty());
    }

    #[test]
    fn test_flush_writes_through() {
        let r = logged(&[1, 2]);
        r.add(row(3)).unwrap();
        r.delete(&SelectExpression::attr_eq("n", 1)).unwrap();
        r.flush().unwrap();

        assert_eq!(r.base.snapshot(), set(&[2, 3]));
        assert_eq!(r.visible_rows(), set(&[2, 3]));
        assert_eq!(r.log_len(), 0);
    }

    #[test]
    fn test_queries_see_logged_state() {
        let r = logged(&[1, 2]);
        r.add(row(5)).unwrap();
        let as_ref: tabula_query::relation::RelationRef = r.clone();
        assert_eq!(as_ref.row_set().unwrap(), set(&[1, 2, 5]));
    }

    #[test]
    fn test_change_since_accumulates_suffix() {
        let r = logged(&[]);
        r.add(row(1)).unwrap();
        let position = r.log_len();
        r.add(row(2)).unwrap();
        r.delete(&SelectExpression::attr_eq("n", 1)).unwrap();

        let change = r.change_since(position);
        assert_eq!(change.added, set(&[2]));
        assert_eq!(change.removed, set(&[1]));
    }
}
