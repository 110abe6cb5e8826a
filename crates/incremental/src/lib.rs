//! Incremental evaluation of relation expressions.
//!
//! Instead of recomputing a derived relation after every mutation, the
//! differentiator produces a symbolic derivative: a pair of relation
//! expressions describing the rows the derived relation gains and loses
//! when its underlying variables change. The expressions mention
//! placeholder relations; filling the placeholders with a concrete change
//! and evaluating the derivative yields the delta, usually touching far
//! fewer rows than the full relation holds.

pub mod change;
pub mod differentiator;
pub mod placeholder;

pub use change::RelationChange;
pub use differentiator::Derivative;
pub use placeholder::PlaceholderRelation;
