//! Attribute names and schemes.

use core::fmt;
use std::collections::btree_set;
use std::collections::BTreeSet;
use std::sync::Arc;

/// The name of one attribute (column) of a relation.
///
/// Attribute names are shared `Arc<str>` so rows and schemes can hold them
/// without copying the text.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Attribute(Arc<str>);

impl Attribute {
    /// Creates an attribute with the given name.
    pub fn new(name: impl AsRef<str>) -> Self {
        Attribute(Arc::from(name.as_ref()))
    }

    /// Returns the attribute name.
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Attribute {
    fn from(name: &str) -> Self {
        Attribute::new(name)
    }
}

impl From<String> for Attribute {
    fn from(name: String) -> Self {
        Attribute(Arc::from(name.as_str()))
    }
}

impl fmt::Debug for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.name())
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The set of attribute names a relation's rows must have.
///
/// Backed by a `BTreeSet` so iteration order is deterministic.
#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Scheme {
    attributes: BTreeSet<Attribute>,
}

impl Scheme {
    /// Creates an empty scheme.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a scheme from anything yielding attribute names.
    pub fn from_attributes<I, A>(attributes: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<Attribute>,
    {
        Scheme {
            attributes: attributes.into_iter().map(Into::into).collect(),
        }
    }

    /// Returns true if the scheme has no attributes.
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    /// Returns the number of attributes.
    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    /// Returns true if `attribute` is part of this scheme.
    pub fn contains(&self, attribute: &Attribute) -> bool {
        self.attributes.contains(attribute)
    }

    /// Returns true if every attribute of `self` is in `other`.
    pub fn is_subset_of(&self, other: &Scheme) -> bool {
        self.attributes.is_subset(&other.attributes)
    }

    /// Inserts an attribute, returning true if it was not already present.
    pub fn insert(&mut self, attribute: Attribute) -> bool {
        self.attributes.insert(attribute)
    }

    /// Returns the union of the two schemes.
    pub fn union(&self, other: &Scheme) -> Scheme {
        Scheme {
            attributes: self.attributes.union(&other.attributes).cloned().collect(),
        }
    }

    /// Returns the attributes of `self` that are not in `other`.
    pub fn difference(&self, other: &Scheme) -> Scheme {
        Scheme {
            attributes: self
                .attributes
                .difference(&other.attributes)
                .cloned()
                .collect(),
        }
    }

    /// Returns the attributes common to both schemes.
    pub fn intersection(&self, other: &Scheme) -> Scheme {
        Scheme {
            attributes: self
                .attributes
                .intersection(&other.attributes)
                .cloned()
                .collect(),
        }
    }

    /// Iterates the attributes in name order.
    pub fn iter(&self) -> btree_set::Iter<'_, Attribute> {
        self.attributes.iter()
    }
}

impl<'a> IntoIterator for &'a Scheme {
    type Item = &'a Attribute;
    type IntoIter = btree_set::Iter<'a, Attribute>;

    fn into_iter(self) -> Self::IntoIter {
        self.attributes.iter()
    }
}

impl FromIterator<Attribute> for Scheme {
    fn from_iter<I: IntoIterator<Item = Attribute>>(iter: I) -> Self {
        Scheme {
            attributes: iter.into_iter().collect(),
        }
    }
}

impl fmt::Debug for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.attributes.iter()).finish()
    }
}
