//! Query planning.
//!
//! The planner turns one or more relation expression trees into a flat
//! graph of plan nodes. Nodes are deduplicated by relation identity, so a
//! relation instance referenced from several places in the tree (or from
//! several roots) becomes a single shared node whose output fans out to
//! every parent.

mod optimizer;

use crate::operator::{AggregateSpec, Operator};
use crate::relation::{ContentProvider, RelationRef, RowGenerator, TransactionGuard};
use crate::select::SelectExpression;
use hashbrown::HashMap;
use std::collections::BTreeMap;
use std::sync::Arc;
use tabula_core::{Attribute, Result, Row, Scheme};

/// Callback receiving batches of output rows for one root, or the error
/// that ended the query.
pub type OutputCallback = Box<dyn FnMut(Result<Vec<Row>>) + Send>;

/// The contents of a source node.
pub enum SourceContent {
    /// A concrete snapshot, emitted in batches.
    Set(Vec<Row>),
    /// Rows pulled lazily from an iterator.
    Generator(RowGenerator),
}

impl SourceContent {
    /// Moves the content out, leaving an exhausted set behind.
    pub(crate) fn take(&mut self) -> SourceContent {
        core::mem::replace(self, SourceContent::Set(Vec::new()))
    }
}

/// The operation a plan node performs on its inputs.
pub enum PlanOp {
    Source(SourceContent),
    Union,
    Intersection,
    Difference,
    Project(Scheme),
    Select(SelectExpression),
    Equijoin(BTreeMap<Attribute, Attribute>),
    Rename(BTreeMap<Attribute, Attribute>),
    Update(Row),
    Aggregate(AggregateSpec),
    Otherwise,
    Unique(Attribute),
}

/// Edge from a node to one parent, recording which of the parent's inputs
/// the node feeds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ParentEdge {
    pub node: usize,
    pub input: usize,
}

/// A transaction guard together with the counter value read when the
/// guard was resolved. The counter is captured before any contents under
/// the guard are snapshotted, so a commit landing while the plan is still
/// being built shows up as a counter mismatch at run time.
#[derive(Clone)]
pub struct CapturedGuard {
    pub guard: Arc<dyn TransactionGuard>,
    pub counter: u64,
}

impl CapturedGuard {
    fn new(guard: Arc<dyn TransactionGuard>) -> CapturedGuard {
        CapturedGuard {
            counter: guard.transaction_counter(),
            guard,
        }
    }

    /// True if the guarded state has changed since the capture.
    pub fn is_stale(&self) -> bool {
        self.guard.transaction_counter() != self.counter
    }
}

/// One node of the plan graph.
pub struct PlanNode {
    pub op: PlanOp,
    /// Indices of the nodes feeding each input, in operand order.
    pub children: Vec<usize>,
    /// Reverse edges, rebuilt by the optimizer after rewrites.
    pub parents: Vec<ParentEdge>,
    /// Output callbacks for roots that map to this node.
    pub callbacks: Vec<OutputCallback>,
    /// Transactional consistency guard inherited from the relation tree,
    /// with the counter captured at guard resolution.
    pub guard: Option<CapturedGuard>,
    /// Set by the optimizer when the node was rewritten away.
    pub removed: bool,
}

impl PlanNode {
    fn new(op: PlanOp, guard: Option<CapturedGuard>) -> PlanNode {
        PlanNode {
            op,
            children: Vec::new(),
            parents: Vec::new(),
            callbacks: Vec::new(),
            guard,
            removed: false,
        }
    }
}

/// Builds and optimizes the plan graph for a set of query roots.
pub struct QueryPlanner {
    nodes: Vec<PlanNode>,
    node_for_relation: HashMap<u64, usize>,
}

impl QueryPlanner {
    /// Plans all roots into one shared graph and runs the optimizer.
    pub fn new(roots: Vec<(RelationRef, OutputCallback)>) -> QueryPlanner {
        let mut planner = QueryPlanner {
            nodes: Vec::new(),
            node_for_relation: HashMap::new(),
        };
        for (relation, callback) in roots {
            let index = planner.visit(relation, None);
            planner.nodes[index].callbacks.push(callback);
        }
        optimizer::optimize(&mut planner.nodes);
        tracing::debug!(
            nodes = planner.nodes.len(),
            live = planner.nodes.iter().filter(|n| !n.removed).count(),
            "planned query"
        );
        planner
    }

    /// Consumes the planner, yielding the node graph for execution.
    pub(crate) fn into_nodes(self) -> Vec<PlanNode> {
        self.nodes
    }

    /// Number of live nodes after optimization. Exposed for tests.
    pub fn live_node_count(&self) -> usize {
        self.nodes.iter().filter(|n| !n.removed).count()
    }

    fn visit(
        &mut self,
        relation: RelationRef,
        inherited_guard: Option<CapturedGuard>,
    ) -> usize {
        if let Some(&index) = self.node_for_relation.get(&relation.id()) {
            return index;
        }
        // Captured before this relation's contents are touched, so every
        // snapshot under the guard is checked against a counter read that
        // precedes it.
        let guard = relation
            .transaction_guard()
            .map(CapturedGuard::new)
            .or(inherited_guard);
        let index = match relation.content_provider() {
            ContentProvider::Underlying(underlying) => self.visit(underlying, guard),
            ContentProvider::Set(rows) => {
                let content = SourceContent::Set(rows.sorted());
                self.push_node(PlanNode::new(PlanOp::Source(content), guard))
            }
            ContentProvider::Generator(generator) => self.push_node(PlanNode::new(
                PlanOp::Source(SourceContent::Generator(generator)),
                guard,
            )),
            ContentProvider::Intermediate(operator, operands) => {
                let index =
                    self.push_node(PlanNode::new(plan_op(operator), guard.clone()));
                // Registered before the operands are visited so a
                // self-referential expression cannot recurse forever.
                self.node_for_relation.insert(relation.id(), index);
                for (input, operand) in operands.into_iter().enumerate() {
                    let child = self.visit(operand, guard.clone());
                    self.nodes[index].children.push(child);
                    self.nodes[child].parents.push(ParentEdge { node: index, input });
                }
                index
            }
        };
        self.node_for_relation.insert(relation.id(), index);
        index
    }

    fn push_node(&mut self, node: PlanNode) -> usize {
        self.nodes.push(node);
        self.nodes.len() - 1
    }
}

fn plan_op(operator: Operator) -> PlanOp {
    match operator {
        Operator::Union => PlanOp::Union,
        Operator::Intersection => PlanOp::Intersection,
        Operator::Difference => PlanOp::Difference,
        Operator::Project(scheme) => PlanOp::Project(scheme),
        Operator::Select(expression) => PlanOp::Select(expression),
        Operator::Equijoin(matching) => PlanOp::Equijoin(matching),
        Operator::Rename(renames) => PlanOp::Rename(renames),
        Operator::Update(new_values) => PlanOp::Update(new_values),
        Operator::Aggregate(spec) => PlanOp::Aggregate(spec),
        Operator::Otherwise => PlanOp::Otherwise,
        Operator::Unique(attribute) => PlanOp::Unique(attribute),
    }
}
