//! Change logging and transactional storage.
//!
//! [`ChangeLoggingRelation`] buffers mutations over a base table in a
//! replayable log with snapshot and restore. [`TransactionalDatabase`]
//! groups named change-logging relations, runs atomic transactions across
//! them, and hands out the transaction counter that queries use to detect
//! mid-enumeration mutations.

pub mod changelog;
pub mod database;

pub use changelog::{ChangeLogEntry, ChangeLogSnapshot, ChangeLoggingRelation, LogOperation};
pub use database::{
    cascading_delete, CascadeRule, DatabaseSnapshot, TransactionalDatabase,
    TransactionalRelation,
};

use tabula_core::Result;

/// Storage that can write its buffered state through to its backing
/// store.
pub trait Flush {
    fn flush(&self) -> Result<()>;
}
