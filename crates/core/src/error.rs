//! Error types for the Tabula engine.

use crate::scheme::{Attribute, Scheme};
use core::fmt;

/// Result type alias for Tabula operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Error types for engine operations.
///
/// `Clone` is deliberate: one error raised during a pump cycle is delivered
/// to every registered output callback.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Error {
    /// Two relations that must share a scheme do not.
    SchemeMismatch {
        expected: Scheme,
        got: Scheme,
    },
    /// An attribute was required but absent from a scheme or row.
    AttributeNotFound {
        attribute: Attribute,
    },
    /// A transactional commit happened while a query over the same
    /// database was still enumerating. The read should be retried.
    MutatedDuringEnumeration,
    /// An aggregate fold function failed.
    Aggregate {
        message: String,
    },
    /// A storage collaborator failed (I/O, malformed persisted data).
    Storage {
        message: String,
    },
    /// Operation not valid for this relation (e.g. mutating a derived
    /// relation).
    InvalidOperation {
        message: String,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::SchemeMismatch { expected, got } => {
                write!(f, "Scheme mismatch: expected {:?}, got {:?}", expected, got)
            }
            Error::AttributeNotFound { attribute } => {
                write!(f, "Attribute not found: {}", attribute)
            }
            Error::MutatedDuringEnumeration => {
                write!(f, "Database mutated during enumeration")
            }
            Error::Aggregate { message } => {
                write!(f, "Aggregate function failed: {}", message)
            }
            Error::Storage { message } => {
                write!(f, "Storage error: {}", message)
            }
            Error::InvalidOperation { message } => {
                write!(f, "Invalid operation: {}", message)
            }
        }
    }
}

impl std::error::Error for Error {}

impl Error {
    /// Creates a scheme mismatch error.
    pub fn scheme_mismatch(expected: Scheme, got: Scheme) -> Self {
        Error::SchemeMismatch { expected, got }
    }

    /// Creates an attribute not found error.
    pub fn attribute_not_found(attribute: impl Into<Attribute>) -> Self {
        Error::AttributeNotFound {
            attribute: attribute.into(),
        }
    }

    /// Creates an aggregate error.
    pub fn aggregate(message: impl Into<String>) -> Self {
        Error::Aggregate {
            message: message.into(),
        }
    }

    /// Creates a storage error.
    pub fn storage(message: impl Into<String>) -> Self {
        Error::Storage {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Error::InvalidOperation {
            message: message.into(),
        }
    }
}
