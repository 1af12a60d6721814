//! Client access layer over a shared-memory style record store.
//!
//! Every operation that touches the store is bracketed with the engine's
//! coarse read or write lock; records and query cursors are safe,
//! bounds-checked wrappers around the engine's opaque handles.

pub mod conn;
pub mod engine;
pub mod errors;
pub mod query;
pub mod record;
pub mod value;

pub use conn::{connect, ConnectConfig, Connection};
pub use engine::Cond;
pub use errors::{DbError, Result};
pub use query::{Cursor, MatchSpec, Predicate, Query};
pub use record::Record;
pub use value::{Date, EncodeOpts, FieldArg, FieldType, FieldValue, Time};
