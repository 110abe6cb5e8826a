//! Tabula Core - Core types for the Tabula relational engine.
//!
//! This crate provides the foundational types shared by every other Tabula
//! crate:
//!
//! - `Value`: the closed set of values a relation cell can hold
//! - `Attribute` / `Scheme`: attribute names and attribute sets
//! - `Row`: an immutable, interned mapping from attribute to value
//! - `RowSet`: a hashed set of rows with the set algebra the engine needs
//! - `Error`: error types for engine operations
//!
//! # Example
//!
//! ```rust
//! use tabula_core::{Attribute, Row, Scheme, Value};
//!
//! let row = Row::from_pairs([("id", Value::Integer(1)), ("name", "Alice".into())]);
//!
//! assert_eq!(row.scheme(), Scheme::from_attributes(["id", "name"]));
//! assert_eq!(row.value(&Attribute::from("name")), Value::Text("Alice".into()));
//!
//! // Structurally equal rows intern to the same allocation.
//! let again = Row::from_pairs([("name", "Alice".into()), ("id", Value::Integer(1))]);
//! assert!(Row::same_instance(&row, &again));
//! ```

mod error;
mod row;
mod rowset;
mod scheme;
mod value;

pub use error::{Error, Result};
pub use row::Row;
pub use rowset::RowSet;
pub use scheme::{Attribute, Scheme};
pub use value::Value;
