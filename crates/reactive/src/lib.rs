//! Asynchronous observation of derived relations.
//!
//! [`UpdateManager`] watches the variables a derived relation depends
//! on and pushes incremental row deltas to [`AsyncObserver`]s from a
//! worker thread. Changes made in one transaction arrive as a single
//! will-change/did-change batch.
//!
//! ```
//! use std::sync::Arc;
//! use tabula_core::{Row, Scheme, Value};
//! use tabula_query::relation::{MutableRelation, RelationExt};
//! use tabula_query::select::SelectExpression;
//! use tabula_query::relation::MemoryTableRelation;
//! use tabula_reactive::{RowMirror, UpdateManager};
//!
//! let manager = UpdateManager::new();
//! let people = MemoryTableRelation::new(Scheme::from_attributes(["name"]));
//! let selected = people.select(SelectExpression::attr_eq("name", "carol"));
//!
//! let mirror = Arc::new(RowMirror::new());
//! let token = manager.observe(&selected, mirror.clone());
//!
//! people.add(Row::from_pairs([("name", Value::from("carol"))])).unwrap();
//! manager.flush();
//! assert_eq!(mirror.current().len(), 1);
//! token.remove();
//! ```

pub mod observer;
pub mod update_manager;

pub use observer::{AsyncObserver, RowMirror};
pub use update_manager::{ObservationToken, UpdateManager};
