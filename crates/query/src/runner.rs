//! Query execution.
//!
//! The runner drives a planned node graph with an explicit work queue
//! instead of a call stack. Each pump step either processes buffered rows
//! at one node or pulls a batch from a source; rows propagate through
//! parent edges until every node has seen end-of-input on all of its
//! inputs.

use crate::operator::AggregateSpec;
use crate::planner::{CapturedGuard, ParentEdge, PlanNode, PlanOp, QueryPlanner, SourceContent};
use hashbrown::HashMap;
use std::collections::BTreeMap;
use std::collections::VecDeque;
use tabula_core::{Attribute, Error, Result, Row, RowSet, Value};

/// Rows pulled from a source per pump step. Bounding the batch keeps the
/// transaction-counter check meaningful for long enumerations.
const INITIATOR_BATCH: usize = 64;

#[derive(Default)]
struct InputBuffer {
    rows: Vec<Row>,
    eof: bool,
}

struct JoinState {
    /// Key attributes per side, in matching order.
    keys: [Vec<Attribute>; 2],
    /// Rows buffered before a build side is chosen.
    pending: [Vec<Row>; 2],
    /// Once one input finishes, its rows become the hash side.
    build: Option<BuildSide>,
}

struct BuildSide {
    side: usize,
    map: HashMap<Vec<Value>, Vec<Row>>,
}

impl JoinState {
    fn new(matching: &BTreeMap<Attribute, Attribute>) -> JoinState {
        JoinState {
            keys: [
                matching.keys().cloned().collect(),
                matching.values().cloned().collect(),
            ],
            pending: [Vec::new(), Vec::new()],
            build: None,
        }
    }

    fn key(&self, side: usize, row: &Row) -> Vec<Value> {
        self.keys[side].iter().map(|a| row.value(a)).collect()
    }

    fn probe(&self, probe_row: &Row, out: &mut Vec<Row>) {
        let build = self.build.as_ref().expect("probe before build side chosen");
        let probe_side = 1 - build.side;
        let Some(matches) = build.map.get(&self.key(probe_side, probe_row)) else {
            return;
        };
        for build_row in matches {
            // Merge with the left operand's row first so output is stable
            // regardless of which side was built.
            let merged = if build.side == 0 {
                build_row.updated(probe_row)
            } else {
                probe_row.updated(build_row)
            };
            out.push(merged);
        }
    }
}

enum OperatorState {
    /// Rows stream through with per-row transformation only.
    Stateless,
    /// One row set accumulated per input, consumed at end-of-input.
    Accumulate(Vec<RowSet>),
    /// Difference holds back first-input rows until the second input has
    /// finished.
    Difference {
        subtrahend: RowSet,
        pending: Vec<Row>,
    },
    Join(JoinState),
    Aggregate {
        current: Option<Value>,
    },
}

struct NodeState {
    buffers: Vec<InputBuffer>,
    /// Inputs that have not yet reached end-of-input.
    active_inputs: usize,
    /// Rows already emitted, for operators that can produce duplicates.
    unique: Option<RowSet>,
    extra: OperatorState,
    done: bool,
}

impl NodeState {
    fn new(node: &PlanNode) -> NodeState {
        let inputs = node.children.len();
        let mut buffers = Vec::with_capacity(inputs);
        buffers.resize_with(inputs, InputBuffer::default);
        let extra = match &node.op {
            PlanOp::Intersection | PlanOp::Otherwise | PlanOp::Unique(_) => {
                OperatorState::Accumulate(vec![RowSet::new(); inputs])
            }
            PlanOp::Difference => OperatorState::Difference {
                subtrahend: RowSet::new(),
                pending: Vec::new(),
            },
            PlanOp::Equijoin(matching) => OperatorState::Join(JoinState::new(matching)),
            PlanOp::Aggregate(spec) => OperatorState::Aggregate {
                current: spec.initial.clone(),
            },
            _ => OperatorState::Stateless,
        };
        let unique = match &node.op {
            PlanOp::Union
            | PlanOp::Project(_)
            | PlanOp::Rename(_)
            | PlanOp::Update(_)
            | PlanOp::Equijoin(_) => Some(RowSet::new()),
            _ => None,
        };
        NodeState {
            buffers,
            active_inputs: inputs,
            unique,
            extra,
            done: node.removed,
        }
    }
}

enum SourceState {
    Set { rows: Vec<Row>, position: usize },
    Generator(crate::relation::RowGenerator),
}

impl SourceState {
    fn new(content: SourceContent) -> SourceState {
        match content {
            SourceContent::Set(rows) => SourceState::Set { rows, position: 0 },
            SourceContent::Generator(generator) => SourceState::Generator(generator),
        }
    }

    /// Pulls up to `batch` rows; the flag reports exhaustion.
    fn pull(&mut self, batch: usize) -> Result<(Vec<Row>, bool)> {
        match self {
            SourceState::Set { rows, position } => {
                let end = (*position + batch).min(rows.len());
                let pulled = rows[*position..end].to_vec();
                *position = end;
                Ok((pulled, *position >= rows.len()))
            }
            SourceState::Generator(generator) => {
                let mut pulled = Vec::with_capacity(batch);
                for _ in 0..batch {
                    match generator.next() {
                        Some(Ok(row)) => pulled.push(row),
                        Some(Err(error)) => return Err(error),
                        None => return Ok((pulled, true)),
                    }
                }
                Ok((pulled, false))
            }
        }
    }
}

/// Executes a planned query to completion, one pump step at a time.
pub struct QueryRunner {
    nodes: Vec<PlanNode>,
    states: Vec<NodeState>,
    sources: Vec<Option<SourceState>>,
    /// Guards with counters captured at plan time, before the source
    /// contents they cover were snapshotted.
    guards: Vec<Option<CapturedGuard>>,
    /// Source nodes not yet exhausted, pulled from the back.
    initiators: Vec<usize>,
    queue: VecDeque<(usize, usize)>,
    done: bool,
    error: Option<Error>,
}

impl QueryRunner {
    pub fn new(planner: QueryPlanner) -> QueryRunner {
        let mut nodes = planner.into_nodes();
        let count = nodes.len();
        let mut states = Vec::with_capacity(count);
        let mut sources = Vec::with_capacity(count);
        let mut guards = Vec::with_capacity(count);
        let mut initiators = Vec::new();

        for (index, node) in nodes.iter_mut().enumerate() {
            states.push(NodeState::new(node));
            guards.push(node.guard.clone());
            let source = if let PlanOp::Source(content) = &mut node.op {
                Some(SourceState::new(content.take()))
            } else {
                None
            };
            if source.is_some() && !node.removed {
                initiators.push(index);
            }
            sources.push(source);
        }

        QueryRunner {
            nodes,
            states,
            sources,
            guards,
            initiators,
            queue: VecDeque::new(),
            done: false,
            error: None,
        }
    }

    /// True once every node has finished or an error ended the run.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// The error that ended the run, if any.
    pub fn error(&self) -> Option<&Error> {
        self.error.as_ref()
    }

    /// Performs one unit of work: process one queued buffer delivery, or
    /// pull one batch from a source, or notice completion.
    pub fn pump(&mut self) {
        if self.done {
            return;
        }
        let step = if let Some((node, _input)) = self.queue.pop_front() {
            self.process(node)
        } else if !self.initiators.is_empty() {
            self.pull_initiator()
        } else {
            self.done = true;
            Ok(())
        };
        if let Err(error) = step {
            self.fail(error);
        }
    }

    /// Pumps until the query completes or fails.
    pub fn run(&mut self) {
        while !self.done {
            self.pump();
        }
    }

    fn pull_initiator(&mut self) -> Result<()> {
        let node = *self
            .initiators
            .last()
            .expect("pull_initiator with no initiators");
        if let Some(guard) = &self.guards[node] {
            if guard.is_stale() {
                return Err(Error::MutatedDuringEnumeration);
            }
        }
        let source = self.sources[node]
            .as_mut()
            .expect("initiator node without source content");
        let (rows, exhausted) = source.pull(INITIATOR_BATCH)?;
        if exhausted {
            self.initiators.pop();
        }
        self.emit(node, rows);
        if exhausted {
            self.complete(node);
        }
        Ok(())
    }

    /// Drains every input buffer of one node through its operator. All
    /// buffers are drained on every visit, so the call is idempotent and
    /// end-of-input is observed with no rows left behind.
    fn process(&mut self, index: usize) -> Result<()> {
        let node = &self.nodes[index];
        let state = &mut self.states[index];
        if state.done {
            return Ok(());
        }
        let NodeState {
            buffers,
            active_inputs,
            unique,
            extra,
            ..
        } = state;
        let at_eof = *active_inputs == 0;
        let mut out: Vec<Row> = Vec::new();

        match &node.op {
            PlanOp::Source(_) => {}
            PlanOp::Union => {
                for buffer in buffers.iter_mut() {
                    out.append(&mut buffer.rows);
                }
            }
            PlanOp::Project(scheme) => {
                for buffer in buffers.iter_mut() {
                    out.extend(buffer.rows.drain(..).map(|row| row.project(scheme)));
                }
            }
            PlanOp::Select(expression) => {
                for buffer in buffers.iter_mut() {
                    out.extend(buffer.rows.drain(..).filter(|row| expression.matches(row)));
                }
            }
            PlanOp::Rename(renames) => {
                for buffer in buffers.iter_mut() {
                    out.extend(buffer.rows.drain(..).map(|row| row.renamed(renames)));
                }
            }
            PlanOp::Update(new_values) => {
                for buffer in buffers.iter_mut() {
                    out.extend(buffer.rows.drain(..).map(|row| row.updated(new_values)));
                }
            }
            PlanOp::Intersection => {
                let OperatorState::Accumulate(sets) = extra else {
                    unreachable!("intersection state")
                };
                for (input, buffer) in buffers.iter_mut().enumerate() {
                    sets[input].extend(buffer.rows.drain(..));
                }
                if at_eof {
                    let mut result = sets[0].clone();
                    for set in &sets[1..] {
                        result = result.intersection(set);
                    }
                    out.extend(result);
                }
            }
            PlanOp::Otherwise => {
                let OperatorState::Accumulate(sets) = extra else {
                    unreachable!("otherwise state")
                };
                for (input, buffer) in buffers.iter_mut().enumerate() {
                    sets[input].extend(buffer.rows.drain(..));
                }
                if at_eof {
                    if let Some(first) = sets.iter().find(|set| !set.is_empty()) {
                        out.extend(first.iter().cloned());
                    }
                }
            }
            PlanOp::Unique(attribute) => {
                let OperatorState::Accumulate(sets) = extra else {
                    unreachable!("unique state")
                };
                for (input, buffer) in buffers.iter_mut().enumerate() {
                    sets[input].extend(buffer.rows.drain(..));
                }
                if at_eof {
                    let rows = &sets[0];
                    let mut values = rows.iter().map(|row| row.value(attribute));
                    let all_agree = match values.next() {
                        Some(first) => values.all(|value| value == first),
                        None => true,
                    };
                    if all_agree {
                        out.extend(rows.iter().cloned());
                    }
                }
            }
            PlanOp::Difference => {
                let OperatorState::Difference {
                    subtrahend,
                    pending,
                } = extra
                else {
                    unreachable!("difference state")
                };
                subtrahend.extend(buffers[1].rows.drain(..));
                let incoming: Vec<Row> = buffers[0].rows.drain(..).collect();
                if buffers[1].eof {
                    out.extend(
                        pending
                            .drain(..)
                            .chain(incoming)
                            .filter(|row| !subtrahend.contains(row)),
                    );
                } else {
                    pending.extend(incoming);
                }
            }
            PlanOp::Equijoin(_) => {
                let OperatorState::Join(join) = extra else {
                    unreachable!("join state")
                };
                for side in 0..2 {
                    let incoming: Vec<Row> = buffers[side].rows.drain(..).collect();
                    if incoming.is_empty() {
                        continue;
                    }
                    match &join.build {
                        Some(build) if build.side != side => {
                            for row in &incoming {
                                join.probe(row, &mut out);
                            }
                        }
                        // Rows for an already-built side can only be
                        // stragglers from the event that finished it.
                        Some(_) => {}
                        None => join.pending[side].extend(incoming),
                    }
                }
                if join.build.is_none() && (buffers[0].eof || buffers[1].eof) {
                    let side = match (buffers[0].eof, buffers[1].eof) {
                        (true, true) => usize::from(join.pending[1].len() < join.pending[0].len()),
                        (true, false) => 0,
                        _ => 1,
                    };
                    let mut map: HashMap<Vec<Value>, Vec<Row>> = HashMap::new();
                    for row in join.pending[side].drain(..).collect::<Vec<_>>() {
                        map.entry(join.key(side, &row)).or_default().push(row);
                    }
                    join.build = Some(BuildSide { side, map });
                    let probe_rows: Vec<Row> = join.pending[1 - side].drain(..).collect();
                    for row in &probe_rows {
                        join.probe(row, &mut out);
                    }
                }
            }
            PlanOp::Aggregate(spec) => {
                let OperatorState::Aggregate { current } = extra else {
                    unreachable!("aggregate state")
                };
                fold_aggregate(spec, current, buffers)?;
                if at_eof {
                    if let Some(value) = current.take() {
                        out.push(Row::from_pairs([(spec.attribute.clone(), value)]));
                    }
                }
            }
        }

        if let Some(seen) = unique {
            out.retain(|row| seen.insert(row.clone()));
        }

        self.emit(index, out);
        if at_eof {
            self.complete(index);
        }
        Ok(())
    }

    /// Delivers rows to the node's callbacks and fans them out to parent
    /// input buffers.
    fn emit(&mut self, index: usize, rows: Vec<Row>) {
        if rows.is_empty() {
            return;
        }
        if !self.nodes[index].callbacks.is_empty() {
            for callback in &mut self.nodes[index].callbacks {
                callback(Ok(rows.clone()));
            }
        }
        let parents: Vec<ParentEdge> = self.nodes[index].parents.clone();
        for edge in parents {
            self.states[edge.node].buffers[edge.input]
                .rows
                .extend(rows.iter().cloned());
            self.queue.push_back((edge.node, edge.input));
        }
    }

    /// Marks a node finished and propagates end-of-input to its parents.
    fn complete(&mut self, index: usize) {
        if self.states[index].done {
            return;
        }
        self.states[index].done = true;
        let parents: Vec<ParentEdge> = self.nodes[index].parents.clone();
        for edge in parents {
            let state = &mut self.states[edge.node];
            if !state.buffers[edge.input].eof {
                state.buffers[edge.input].eof = true;
                state.active_inputs -= 1;
            }
            self.queue.push_back((edge.node, edge.input));
        }
    }

    /// Records the error, tells every consumer, and stops.
    fn fail(&mut self, error: Error) {
        tracing::debug!(%error, "query run failed");
        for node in &mut self.nodes {
            for callback in &mut node.callbacks {
                callback(Err(error.clone()));
            }
        }
        self.error = Some(error);
        self.done = true;
    }
}

fn fold_aggregate(
    spec: &AggregateSpec,
    current: &mut Option<Value>,
    buffers: &mut [InputBuffer],
) -> Result<()> {
    for buffer in buffers.iter_mut() {
        for row in buffer.rows.drain(..) {
            let value = row.value(&spec.attribute);
            *current = Some((spec.function)(current.as_ref(), &value)?);
        }
    }
    Ok(())
}
