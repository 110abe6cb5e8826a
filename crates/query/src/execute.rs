//! Convenience entry points for evaluating a relation.

use crate::planner::{OutputCallback, QueryPlanner};
use crate::relation::{RelationExt, RelationRef};
use crate::runner::QueryRunner;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tabula_core::{Error, Result, Row, RowSet};

#[derive(Default)]
struct Sink {
    rows: Vec<Row>,
    error: Option<Error>,
}

fn sink_callback(sink: &Arc<Mutex<Sink>>) -> OutputCallback {
    let sink = Arc::clone(sink);
    Box::new(move |batch| {
        let mut sink = sink.lock();
        match batch {
            Ok(rows) => sink.rows.extend(rows),
            Err(error) => sink.error = Some(error),
        }
    })
}

/// Evaluates `relation` fully and returns its rows.
pub fn collect(relation: &RelationRef) -> Result<RowSet> {
    let sink = Arc::new(Mutex::new(Sink::default()));
    let planner = QueryPlanner::new(vec![(relation.clone(), sink_callback(&sink))]);
    let mut runner = QueryRunner::new(planner);
    runner.run();

    let mut sink = sink.lock();
    if let Some(error) = sink.error.take() {
        return Err(error);
    }
    Ok(sink.rows.drain(..).collect())
}

/// Returns true if `row` is in `relation`, evaluating only the selection
/// for that row.
pub fn contains(relation: &RelationRef, row: &Row) -> Result<bool> {
    let selected = relation.select_row(row);
    Ok(!collect(&selected)?.is_empty())
}

/// Lazy row iterator over a relation.
///
/// Each call to `next` pumps the underlying runner just far enough to
/// produce another row. If the backing database commits a transaction
/// mid-iteration the iterator yields `Err(MutatedDuringEnumeration)` once
/// rows delivered so far are drained, then ends.
pub struct Rows {
    runner: QueryRunner,
    sink: Arc<Mutex<Sink>>,
    pending: VecDeque<Row>,
    finished: bool,
}

impl Iterator for Rows {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(row) = self.pending.pop_front() {
                return Some(Ok(row));
            }
            if self.finished {
                return None;
            }
            {
                let mut sink = self.sink.lock();
                self.pending.extend(sink.rows.drain(..));
                if !self.pending.is_empty() {
                    continue;
                }
                if let Some(error) = sink.error.take() {
                    self.finished = true;
                    return Some(Err(error));
                }
            }
            if self.runner.is_done() {
                self.finished = true;
                continue;
            }
            self.runner.pump();
        }
    }
}

/// Starts a lazy evaluation of `relation`.
pub fn rows(relation: &RelationRef) -> Rows {
    let sink = Arc::new(Mutex::new(Sink::default()));
    let planner = QueryPlanner::new(vec![(relation.clone(), sink_callback(&sink))]);
    let runner = QueryRunner::new(planner);
    Rows {
        runner,
        sink,
        pending: VecDeque::new(),
        finished: false,
    }
}

/// Evaluates several relations in one shared plan, returning their row
/// sets in order. Shared subexpressions are computed once.
pub fn collect_all(relations: &[RelationRef]) -> Result<Vec<RowSet>> {
    let sinks: Vec<Arc<Mutex<Sink>>> = relations
        .iter()
        .map(|_| Arc::new(Mutex::new(Sink::default())))
        .collect();
    let roots = relations
        .iter()
        .zip(&sinks)
        .map(|(relation, sink)| (relation.clone(), sink_callback(sink)))
        .collect();
    let mut runner = QueryRunner::new(QueryPlanner::new(roots));
    runner.run();

    sinks
        .into_iter()
        .map(|sink| {
            let mut sink = sink.lock();
            if let Some(error) = sink.error.take() {
                return Err(error);
            }
            Ok(sink.rows.drain(..).collect())
        })
        .collect()
}
