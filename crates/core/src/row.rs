//! Interned row type.
//!
//! Rows are immutable mappings from attribute name to value. Structurally
//! identical rows are uniqued through a global intern table so that row
//! equality and hashing reduce to identity comparison, which keeps the
//! engine's uniquing sets and buffers cheap.

use crate::scheme::{Attribute, Scheme};
use crate::value::Value;
use core::cmp::Ordering;
use core::fmt;
use core::hash::{Hash, Hasher};
use hashbrown::HashMap;
use parking_lot::Mutex;
use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock, Weak};

struct RowInner {
    /// Structural hash over the sorted entries, precomputed at intern time.
    hash: u64,
    /// Entries sorted by attribute name.
    entries: Box<[(Attribute, Value)]>,
}

/// Intern table: structural hash to the live rows carrying that hash.
/// Entries are weak so dropped rows can be collected; dead references are
/// pruned whenever a bucket is touched.
static INTERN: OnceLock<Mutex<HashMap<u64, Vec<Weak<RowInner>>>>> = OnceLock::new();

fn intern_table() -> &'static Mutex<HashMap<u64, Vec<Weak<RowInner>>>> {
    INTERN.get_or_init(|| Mutex::new(HashMap::new()))
}

fn structural_hash(entries: &[(Attribute, Value)]) -> u64 {
    // DefaultHasher with no keys is deterministic within a process, which
    // is all the table needs.
    let mut hasher = DefaultHasher::new();
    for (attribute, value) in entries {
        attribute.hash(&mut hasher);
        value.hash(&mut hasher);
    }
    hasher.finish()
}

fn intern(entries: Vec<(Attribute, Value)>) -> Arc<RowInner> {
    let hash = structural_hash(&entries);
    let mut table = intern_table().lock();
    let bucket = table.entry(hash).or_default();

    let mut found = None;
    bucket.retain(|weak| match weak.upgrade() {
        Some(existing) => {
            if found.is_none() && *existing.entries == *entries {
                found = Some(existing);
            }
            true
        }
        None => false,
    });
    if let Some(existing) = found {
        return existing;
    }

    let inner = Arc::new(RowInner {
        hash,
        entries: entries.into_boxed_slice(),
    });
    bucket.push(Arc::downgrade(&inner));
    inner
}

/// An immutable row: a mapping from attribute name to value.
///
/// Two rows with equal value maps always resolve to the same interned
/// allocation, so `==` and hashing are identity comparisons.
#[derive(Clone)]
pub struct Row {
    inner: Arc<RowInner>,
}

impl Row {
    /// Creates a row from attribute/value pairs. Later pairs override
    /// earlier ones with the same attribute.
    pub fn from_pairs<I, A>(pairs: I) -> Row
    where
        I: IntoIterator<Item = (A, Value)>,
        A: Into<Attribute>,
    {
        let map: BTreeMap<Attribute, Value> = pairs
            .into_iter()
            .map(|(attribute, value)| (attribute.into(), value))
            .collect();
        Row {
            inner: intern(map.into_iter().collect()),
        }
    }

    /// The row with no attributes.
    pub fn empty() -> Row {
        Row::from_pairs::<_, Attribute>([])
    }

    /// Returns true if the two rows are the same interned instance.
    pub fn same_instance(a: &Row, b: &Row) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }

    /// Returns the number of attributes in the row.
    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    /// Returns true if the row has no attributes.
    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    /// Returns the value for `attribute`, or None if the row does not have
    /// that attribute.
    pub fn get(&self, attribute: &Attribute) -> Option<&Value> {
        self.inner
            .entries
            .binary_search_by(|(a, _)| a.cmp(attribute))
            .ok()
            .map(|index| &self.inner.entries[index].1)
    }

    /// Returns the value for `attribute`, or `Value::NotFound` if the row
    /// does not have that attribute.
    pub fn value(&self, attribute: &Attribute) -> Value {
        self.get(attribute).cloned().unwrap_or(Value::NotFound)
    }

    /// Returns the row's scheme.
    pub fn scheme(&self) -> Scheme {
        self.inner
            .entries
            .iter()
            .map(|(attribute, _)| attribute.clone())
            .collect()
    }

    /// Iterates the entries in attribute order.
    pub fn iter(&self) -> impl Iterator<Item = (&Attribute, &Value)> {
        self.inner
            .entries
            .iter()
            .map(|(attribute, value)| (attribute, value))
    }

    /// Returns the row restricted to the attributes in `scheme`.
    pub fn project(&self, scheme: &Scheme) -> Row {
        Row::from_pairs(
            self.iter()
                .filter(|(attribute, _)| scheme.contains(attribute))
                .map(|(attribute, value)| (attribute.clone(), value.clone())),
        )
    }

    /// Returns the row with attributes renamed through `renames`.
    /// Attributes not mentioned keep their names.
    pub fn renamed(&self, renames: &BTreeMap<Attribute, Attribute>) -> Row {
        Row::from_pairs(self.iter().map(|(attribute, value)| {
            let renamed = renames.get(attribute).unwrap_or(attribute).clone();
            (renamed, value.clone())
        }))
    }

    /// Returns the row with `new_values`' entries overriding this row's.
    pub fn updated(&self, new_values: &Row) -> Row {
        Row::from_pairs(
            self.iter()
                .chain(new_values.iter())
                .map(|(attribute, value)| (attribute.clone(), value.clone())),
        )
    }
}

impl PartialEq for Row {
    fn eq(&self, other: &Self) -> bool {
        // Interning makes identity equivalent to structural equality.
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Row {}

impl Hash for Row {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.inner.hash);
    }
}

impl PartialOrd for Row {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Row {
    fn cmp(&self, other: &Self) -> Ordering {
        self.inner.entries.cmp(&other.inner.entries)
    }
}

impl fmt::Debug for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (attribute, value) in self.iter() {
            map.entry(&attribute.name(), &format_args!("{}", value));
        }
        map.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, i64)]) -> Row {
        Row::from_pairs(
            pairs
                .iter()
                .map(|(attribute, value)| (*attribute, Value::Integer(*value))),
        )
    }

    #[test]
    fn test_interning_shares_instances() {
        let a = Row::from_pairs([("x", Value::Integer(1)), ("y", Value::Text("t".into()))]);
        let b = Row::from_pairs([("y", Value::Text("t".into())), ("x", Value::Integer(1))]);
        assert!(Row::same_instance(&a, &b));
        assert_eq!(a, b);
    }

    #[test]
    fn test_distinct_rows_are_distinct() {
        let a = row(&[("x", 1)]);
        let b = row(&[("x", 2)]);
        assert!(!Row::same_instance(&a, &b));
        assert_ne!(a, b);
    }

    #[test]
    fn test_get_and_value() {
        let r = row(&[("id", 7), ("n", 3)]);
        assert_eq!(r.get(&"id".into()), Some(&Value::Integer(7)));
        assert_eq!(r.value(&"missing".into()), Value::NotFound);
    }

    #[test]
    fn test_scheme() {
        let r = row(&[("b", 1), ("a", 2)]);
        assert_eq!(r.scheme(), Scheme::from_attributes(["a", "b"]));
    }

    #[test]
    fn test_project() {
        let r = row(&[("a", 1), ("b", 2), ("c", 3)]);
        let p = r.project(&Scheme::from_attributes(["a", "c"]));
        assert_eq!(p, row(&[("a", 1), ("c", 3)]));
    }

    #[test]
    fn test_renamed() {
        let r = row(&[("a", 1), ("b", 2)]);
        let renames = BTreeMap::from([(Attribute::from("a"), Attribute::from("z"))]);
        assert_eq!(r.renamed(&renames), row(&[("z", 1), ("b", 2)]));
    }

    #[test]
    fn test_updated() {
        let r = row(&[("a", 1), ("b", 2)]);
        let fragment = row(&[("b", 9)]);
        assert_eq!(r.updated(&fragment), row(&[("a", 1), ("b", 9)]));
    }

    #[test]
    fn test_reintern_after_drop() {
        let first = row(&[("gone", 42)]);
        drop(first);
        let second = row(&[("gone", 42)]);
        let third = row(&[("gone", 42)]);
        assert!(Row::same_instance(&second, &third));
    }
}
