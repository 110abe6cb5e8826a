//! Symbolic differentiation of relation expressions.
//!
//! Walks an expression tree and produces, for each operator, the
//! expressions describing how its output changes when its operands do.
//! Leaf relations become variables tracked through placeholder pairs;
//! shared subexpressions are differentiated once and reuse the same
//! change.

use crate::change::{opt_difference, opt_intersection, opt_union, RelationChange};
use crate::placeholder::PlaceholderRelation;
use hashbrown::HashMap;
use std::sync::Arc;
use tabula_query::change::RowChange;
use tabula_query::operator::Operator;
use tabula_query::relation::{
    ConcreteRelation, ContentProvider, IntermediateRelation, RelationExt, RelationId,
    RelationRef,
};

/// The placeholder pair standing in for one variable's change.
struct Placeholders {
    added: Arc<PlaceholderRelation>,
    removed: Arc<PlaceholderRelation>,
}

struct Variable {
    relation: RelationRef,
    placeholders: Placeholders,
    accumulated: RowChange,
}

/// The derivative of a relation expression.
///
/// Feed it the concrete changes observed on its variables, install the
/// placeholders, and evaluate [`change`](Self::change) to get the
/// expression's delta. [`clear`](Self::clear) resets it for the next
/// round.
pub struct Derivative {
    change: RelationChange,
    variables: HashMap<RelationId, Variable>,
}

impl Derivative {
    /// Differentiates `relation` with respect to all of its variables.
    pub fn of(relation: &RelationRef) -> Derivative {
        let mut differentiator = Differentiator {
            memo: HashMap::new(),
            variables: HashMap::new(),
        };
        let change = differentiator.change_of(relation);
        tracing::debug!(
            variables = differentiator.variables.len(),
            "differentiated relation"
        );
        Derivative {
            change,
            variables: differentiator
                .variables
                .into_iter()
                .map(|(id, (relation, placeholders))| {
                    (
                        id,
                        Variable {
                            relation,
                            placeholders,
                            accumulated: RowChange::new(),
                        },
                    )
                })
                .collect(),
        }
    }

    /// The symbolic change of the differentiated expression.
    pub fn change(&self) -> &RelationChange {
        &self.change
    }

    /// True if `id` is one of the expression's variables.
    pub fn tracks(&self, id: RelationId) -> bool {
        self.variables.contains_key(&id)
    }

    /// The ids of all tracked variables.
    pub fn variable_ids(&self) -> impl Iterator<Item = RelationId> + '_ {
        self.variables.keys().copied()
    }

    /// The tracked variables themselves, paired with their ids.
    pub fn variables(&self) -> impl Iterator<Item = (RelationId, &RelationRef)> + '_ {
        self.variables.iter().map(|(id, v)| (*id, &v.relation))
    }

    /// Folds an observed change on one variable into its accumulated
    /// change. Changes net out: a row removed and later re-added counts
    /// as untouched.
    pub fn add_change(&mut self, variable: RelationId, change: &RowChange) {
        if let Some(v) = self.variables.get_mut(&variable) {
            v.accumulated.accumulate(change);
        }
    }

    /// Copies each variable's accumulated change into its placeholders so
    /// the derivative expressions can be evaluated.
    pub fn install_placeholders(&self) {
        for variable in self.variables.values() {
            variable
                .placeholders
                .added
                .set_rows(variable.accumulated.added.clone());
            variable
                .placeholders
                .removed
                .set_rows(variable.accumulated.removed.clone());
        }
    }

    /// Clears accumulated changes and placeholders.
    pub fn clear(&mut self) {
        for variable in self.variables.values_mut() {
            variable.accumulated = RowChange::new();
            variable.placeholders.added.clear();
            variable.placeholders.removed.clear();
        }
    }
}

struct Differentiator {
    memo: HashMap<RelationId, RelationChange>,
    variables: HashMap<RelationId, (RelationRef, Placeholders)>,
}

impl Differentiator {
    fn change_of(&mut self, relation: &RelationRef) -> RelationChange {
        if let Some(change) = self.memo.get(&relation.id()) {
            return change.clone();
        }
        let change = match relation.content_provider() {
            ContentProvider::Underlying(underlying) => self.change_of(&underlying),
            ContentProvider::Intermediate(operator, operands) => {
                self.derive_operator(relation, &operator, &operands)
            }
            ContentProvider::Set(_) | ContentProvider::Generator(_) => {
                self.variable(relation)
            }
        };
        self.memo.insert(relation.id(), change.clone());
        change
    }

    /// A leaf is a variable: its change is exactly its placeholder pair.
    fn variable(&mut self, relation: &RelationRef) -> RelationChange {
        let (_, placeholders) = self.variables.entry(relation.id()).or_insert_with(|| {
            (
                relation.clone(),
                Placeholders {
                    added: PlaceholderRelation::new(relation.scheme()),
                    removed: PlaceholderRelation::new(relation.scheme()),
                },
            )
        });
        RelationChange {
            added: Some(placeholders.added.clone() as RelationRef),
            removed: Some(placeholders.removed.clone() as RelationRef),
        }
    }

    fn derive_operator(
        &mut self,
        relation: &RelationRef,
        operator: &Operator,
        operands: &[RelationRef],
    ) -> RelationChange {
        match operator {
            Operator::Union => {
                self.fold_pairwise(operands, union_derivative, |a, b| a.union(b))
            }
            Operator::Intersection => {
                self.fold_pairwise(operands, intersection_derivative, |a, b| {
                    a.intersection(b)
                })
            }
            Operator::Difference => {
                let a_change = self.change_of(&operands[0]);
                let b_change = self.change_of(&operands[1]);
                difference_derivative(&operands[0], &a_change, &operands[1], &b_change)
            }
            Operator::Project(scheme) => {
                let change = self.change_of(&operands[0]);
                let scheme = scheme.clone();
                RelationChange {
                    added: opt_difference(
                        change.added.clone().map(|r| r.project(scheme.clone())),
                        Some(pre_change(&operands[0], &change).project(scheme.clone())),
                    ),
                    removed: opt_difference(
                        change.removed.clone().map(|r| r.project(scheme.clone())),
                        Some(operands[0].project(scheme)),
                    ),
                }
            }
            Operator::Select(expression) => {
                let change = self.change_of(&operands[0]);
                RelationChange {
                    added: change.added.map(|r| r.select(expression.clone())),
                    removed: change.removed.map(|r| r.select(expression.clone())),
                }
            }
            Operator::Rename(renames) => {
                let change = self.change_of(&operands[0]);
                RelationChange {
                    added: change.added.map(|r| r.rename(renames.clone())),
                    removed: change.removed.map(|r| r.rename(renames.clone())),
                }
            }
            Operator::Update(new_values) => {
                // An update is a projection onto the untouched attributes
                // joined with the constant new values, and differentiates
                // like that composition.
                let change = self.change_of(&operands[0]);
                let untouched = operands[0].scheme().difference(&new_values.scheme());
                let constant: RelationRef = ConcreteRelation::from_row(new_values.clone());
                let projected_added = opt_difference(
                    change.added.clone().map(|r| r.project(untouched.clone())),
                    Some(pre_change(&operands[0], &change).project(untouched.clone())),
                );
                let projected_removed = opt_difference(
                    change.removed.clone().map(|r| r.project(untouched.clone())),
                    Some(operands[0].project(untouched)),
                );
                RelationChange {
                    added: projected_added.map(|r| r.join(&constant)),
                    removed: projected_removed.map(|r| r.join(&constant)),
                }
            }
            Operator::Equijoin(_)
            | Operator::Aggregate(_)
            | Operator::Otherwise
            | Operator::Unique(_) => self.recompute_derivative(relation, operator, operands),
        }
    }

    /// Derivatives of n-ary operators are built two operands at a time;
    /// the running "left side" is the operator applied to the operands
    /// folded so far.
    fn fold_pairwise(
        &mut self,
        operands: &[RelationRef],
        step: fn(
            &RelationRef,
            &RelationChange,
            &RelationRef,
            &RelationChange,
        ) -> RelationChange,
        combine: fn(&RelationRef, &RelationRef) -> RelationRef,
    ) -> RelationChange {
        let mut left = operands[0].clone();
        let mut left_change = self.change_of(&operands[0]);
        for right in &operands[1..] {
            let right_change = self.change_of(right);
            left_change = step(&left, &left_change, right, &right_change);
            left = combine(&left, right);
        }
        left_change
    }

    /// Fallback for operators without a closed-form derivative: rebuild
    /// the operator over pre-change operands and diff new against old.
    fn recompute_derivative(
        &mut self,
        relation: &RelationRef,
        operator: &Operator,
        operands: &[RelationRef],
    ) -> RelationChange {
        let changes: Vec<RelationChange> =
            operands.iter().map(|o| self.change_of(o)).collect();
        if changes.iter().all(RelationChange::is_empty) {
            return RelationChange::empty();
        }
        let pre_operands: Vec<RelationRef> = operands
            .iter()
            .zip(&changes)
            .map(|(operand, change)| pre_change(operand, change))
            .collect();
        let old = IntermediateRelation::build(operator.clone(), pre_operands);
        RelationChange {
            added: Some(relation.difference(&old)),
            removed: Some(old.difference(relation)),
        }
    }
}

/// The operand as it was before its change: current rows minus the added
/// rows, plus the removed rows.
fn pre_change(relation: &RelationRef, change: &RelationChange) -> RelationRef {
    let without_added = match &change.added {
        Some(added) => relation.difference(added),
        None => relation.clone(),
    };
    match &change.removed {
        Some(removed) => without_added.union(removed),
        None => without_added,
    }
}

fn union_derivative(
    a: &RelationRef,
    a_change: &RelationChange,
    b: &RelationRef,
    b_change: &RelationChange,
) -> RelationChange {
    // A row enters the union when it enters one side and is not already
    // present on the other; it leaves when it leaves one side and the
    // other side does not still hold it.
    let b_without_new = opt_difference(Some(b.clone()), b_change.added.clone());
    let a_without_new = opt_difference(Some(a.clone()), a_change.added.clone());
    let added = opt_union(
        opt_difference(
            opt_difference(a_change.added.clone(), b_without_new),
            b_change.removed.clone(),
        ),
        opt_difference(
            opt_difference(b_change.added.clone(), a_without_new),
            a_change.removed.clone(),
        ),
    );
    let removed = opt_union(
        opt_difference(
            a_change.removed.clone(),
            opt_difference(Some(b.clone()), b_change.removed.clone()),
        ),
        opt_difference(
            b_change.removed.clone(),
            opt_difference(Some(a.clone()), a_change.removed.clone()),
        ),
    );
    RelationChange { added, removed }
}

fn intersection_derivative(
    a: &RelationRef,
    a_change: &RelationChange,
    b: &RelationRef,
    b_change: &RelationChange,
) -> RelationChange {
    let added = opt_union(
        opt_difference(
            opt_intersection(a_change.added.clone(), Some(b.clone())),
            b_change.removed.clone(),
        ),
        opt_difference(
            opt_intersection(b_change.added.clone(), Some(a.clone())),
            a_change.removed.clone(),
        ),
    );
    // A removed row only leaves the intersection if the other side held
    // it before the change, hence the union with the other side's
    // removals.
    let removed = opt_union(
        opt_difference(
            opt_intersection(
                a_change.removed.clone(),
                opt_union(Some(b.clone()), b_change.removed.clone()),
            ),
            b_change.added.clone(),
        ),
        opt_difference(
            opt_intersection(
                b_change.removed.clone(),
                opt_union(Some(a.clone()), a_change.removed.clone()),
            ),
            a_change.added.clone(),
        ),
    );
    RelationChange { added, removed }
}

fn difference_derivative(
    a: &RelationRef,
    a_change: &RelationChange,
    b: &RelationRef,
    b_change: &RelationChange,
) -> RelationChange {
    let added = opt_union(
        opt_intersection(Some(a.clone()), b_change.removed.clone()),
        opt_difference(a_change.added.clone(), Some(b.clone())),
    );
    let removed = opt_union(
        opt_intersection(
            opt_difference(Some(a.clone()), a_change.added.clone()),
            b_change.added.clone(),
        ),
        opt_difference(
            opt_difference(a_change.removed.clone(), b_change.removed.clone()),
            opt_difference(Some(b.clone()), b_change.added.clone()),
        ),
    );
    RelationChange { added, removed }
}
