//! Hashed sets of rows.

use crate::row::Row;
use core::fmt;
use hashbrown::hash_set;
use hashbrown::HashSet;

/// A set of rows.
///
/// Because rows are interned, membership tests hash and compare by
/// identity. The set operations here are the building blocks the runner
/// and the change log use.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct RowSet {
    rows: HashSet<Row>,
}

impl RowSet {
    /// Creates an empty row set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a set containing a single row.
    pub fn single(row: Row) -> Self {
        let mut set = RowSet::new();
        set.insert(row);
        set
    }

    /// Returns the number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns true if the set is empty.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Returns true if `row` is in the set.
    pub fn contains(&self, row: &Row) -> bool {
        self.rows.contains(row)
    }

    /// Inserts a row, returning true if it was not already present.
    pub fn insert(&mut self, row: Row) -> bool {
        self.rows.insert(row)
    }

    /// Removes a row, returning true if it was present.
    pub fn remove(&mut self, row: &Row) -> bool {
        self.rows.remove(row)
    }

    /// Removes and returns an arbitrary row.
    pub fn pop(&mut self) -> Option<Row> {
        let row = self.rows.iter().next().cloned()?;
        self.rows.remove(&row);
        Some(row)
    }

    /// Keeps only the rows for which `keep` returns true.
    pub fn retain(&mut self, keep: impl FnMut(&Row) -> bool) {
        self.rows.retain(keep)
    }

    /// Adds every row of `other` to this set.
    pub fn extend_from(&mut self, other: &RowSet) {
        self.rows.extend(other.rows.iter().cloned());
    }

    /// Returns the union of the two sets.
    pub fn union(&self, other: &RowSet) -> RowSet {
        let mut result = self.clone();
        result.extend_from(other);
        result
    }

    /// Returns the rows of `self` that are not in `other`.
    pub fn difference(&self, other: &RowSet) -> RowSet {
        RowSet {
            rows: self.rows.difference(&other.rows).cloned().collect(),
        }
    }

    /// Returns the rows common to both sets.
    pub fn intersection(&self, other: &RowSet) -> RowSet {
        RowSet {
            rows: self.rows.intersection(&other.rows).cloned().collect(),
        }
    }

    /// Iterates the rows in arbitrary order.
    pub fn iter(&self) -> hash_set::Iter<'_, Row> {
        self.rows.iter()
    }

    /// Returns the rows sorted by value, for deterministic output.
    pub fn sorted(&self) -> Vec<Row> {
        let mut rows: Vec<Row> = self.rows.iter().cloned().collect();
        rows.sort();
        rows
    }
}

impl fmt::Debug for RowSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.sorted().iter()).finish()
    }
}

impl FromIterator<Row> for RowSet {
    fn from_iter<I: IntoIterator<Item = Row>>(iter: I) -> Self {
        RowSet {
            rows: iter.into_iter().collect(),
        }
    }
}

impl Extend<Row> for RowSet {
    fn extend<I: IntoIterator<Item = Row>>(&mut self, iter: I) {
        self.rows.extend(iter)
    }
}

impl<'a> IntoIterator for &'a RowSet {
    type Item = &'a Row;
    type IntoIter = hash_set::Iter<'a, Row>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.iter()
    }
}

impl IntoIterator for RowSet {
    type Item = Row;
    type IntoIter = hash_set::IntoIter<Row>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn row(v: i64) -> Row {
        Row::from_pairs([("n", Value::Integer(v))])
    }

    fn set(values: &[i64]) -> RowSet {
        values.iter().map(|v| row(*v)).collect()
    }

    #[test]
    fn test_insert_is_set_like() {
        let mut s = RowSet::new();
        assert!(s.insert(row(1)));
        assert!(!s.insert(row(1)));
        assert_eq!(s.len(), 1);
    }

    #[test]
    fn test_set_algebra() {
        let a = set(&[1, 2, 3]);
        let b = set(&[3, 4]);

        assert_eq!(a.union(&b), set(&[1, 2, 3, 4]));
        assert_eq!(a.difference(&b), set(&[1, 2]));
        assert_eq!(a.intersection(&b), set(&[3]));
    }

    #[test]
    fn test_sorted_is_deterministic() {
        let s = set(&[3, 1, 2]);
        let values: Vec<i64> = s
            .sorted()
            .iter()
            .map(|r| r.value(&"n".into()).as_integer().unwrap())
            .collect();
        assert_eq!(values, vec![1, 2, 3]);
    }
}
