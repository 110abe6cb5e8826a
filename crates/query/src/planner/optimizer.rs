//! Plan graph rewrites.
//!
//! Two rewrites, both on union nodes, both preserving the produced rows:
//! a union with a single input passes rows through unchanged and is
//! spliced out, and a union feeding only unions is merged into its
//! parents. Nodes carrying output callbacks are never rewritten away
//! because a consumer is attached to them.

use super::{ParentEdge, PlanNode, PlanOp};

/// Merged unions are capped at this many operands so one node's input
/// buffers stay bounded.
const MAX_MERGED_OPERANDS: usize = 10;

pub(super) fn optimize(nodes: &mut [PlanNode]) {
    // Children are planned after their parents, so one ascending pass
    // sees each parent before the unions feeding it and chains of nested
    // unions collapse in a single sweep.
    for index in 0..nodes.len() {
        if nodes[index].removed || !nodes[index].callbacks.is_empty() {
            continue;
        }
        if !matches!(nodes[index].op, PlanOp::Union) {
            continue;
        }
        if nodes[index].children.len() == 1 {
            splice_out(nodes, index);
        } else if can_merge_into_parents(nodes, index) {
            merge_into_parents(nodes, index);
        }
    }
    rebuild_parent_edges(nodes);
}

fn parent_indices(nodes: &[PlanNode], index: usize) -> Vec<usize> {
    nodes
        .iter()
        .enumerate()
        .filter(|(_, node)| !node.removed && node.children.contains(&index))
        .map(|(i, _)| i)
        .collect()
}

/// Replaces every reference to a single-input union with its child.
fn splice_out(nodes: &mut [PlanNode], index: usize) {
    let child = nodes[index].children[0];
    for parent in parent_indices(nodes, index) {
        for slot in &mut nodes[parent].children {
            if *slot == index {
                *slot = child;
            }
        }
    }
    nodes[index].removed = true;
    nodes[index].children.clear();
}

fn can_merge_into_parents(nodes: &[PlanNode], index: usize) -> bool {
    let operands = nodes[index].children.len();
    if operands > MAX_MERGED_OPERANDS {
        return false;
    }
    let parents = parent_indices(nodes, index);
    if parents.is_empty() {
        return false;
    }
    parents.iter().all(|&parent| {
        matches!(nodes[parent].op, PlanOp::Union)
            && nodes[parent].children.len() - 1 + operands <= MAX_MERGED_OPERANDS
    })
}

/// Folds a union's operands directly into each parent union.
fn merge_into_parents(nodes: &mut [PlanNode], index: usize) {
    let operands = nodes[index].children.clone();
    for parent in parent_indices(nodes, index) {
        nodes[parent].children.retain(|&child| child != index);
        nodes[parent].children.extend_from_slice(&operands);
    }
    nodes[index].removed = true;
    nodes[index].children.clear();
}

/// Parent edges are derived data; rewrites only touch children lists and
/// this recomputes the reverse direction once at the end.
fn rebuild_parent_edges(nodes: &mut [PlanNode]) {
    for node in nodes.iter_mut() {
        node.parents.clear();
    }
    for index in 0..nodes.len() {
        if nodes[index].removed {
            continue;
        }
        for (input, &child) in nodes[index].children.clone().iter().enumerate() {
            nodes[child].parents.push(ParentEdge { node: index, input });
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::planner::{OutputCallback, QueryPlanner};
    use crate::relation::{ConcreteRelation, RelationExt, RelationRef};
    use tabula_core::{Row, Scheme, Value};

    fn rel(values: &[i64]) -> RelationRef {
        ConcreteRelation::new(
            Scheme::from_attributes(["n"]),
            values
                .iter()
                .map(|v| Row::from_pairs([("n", Value::Integer(*v))]))
                .collect(),
        )
    }

    fn sink() -> OutputCallback {
        Box::new(|_| {})
    }

    #[test]
    fn test_nested_unions_collapse() {
        // ((a u b) u (c u d)) should plan as one union over four sources.
        let left = rel(&[1]).union(&rel(&[2]));
        let right = rel(&[3]).union(&rel(&[4]));
        let root = left.union(&right);

        let planner = QueryPlanner::new(vec![(root, sink())]);
        assert_eq!(planner.live_node_count(), 5);
    }

    #[test]
    fn test_observed_union_is_kept() {
        let inner = rel(&[1]).union(&rel(&[2]));
        let root = inner.union(&rel(&[3]));

        // The inner union has its own consumer, so it must survive even
        // though it feeds another union.
        let planner = QueryPlanner::new(vec![(root, sink()), (inner, sink())]);
        assert_eq!(planner.live_node_count(), 5);
    }

    #[test]
    fn test_merge_respects_operand_bound() {
        let mut left = rel(&[0]);
        for v in 1..=9 {
            left = left.union(&rel(&[v]));
        }
        let right = rel(&[10]).union(&rel(&[11]));
        let root = left.union(&right);

        let planner = QueryPlanner::new(vec![(root.clone(), sink())]);
        // Whatever shape the rewrites settle on, the rows must survive.
        let rows = root.row_set().unwrap();
        assert_eq!(rows.len(), 12);
        assert!(planner.live_node_count() >= 13);
    }
}
