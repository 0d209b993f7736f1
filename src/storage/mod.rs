//! SQLite-backed durable store.
//!
//! A single `session_state` key/value table holds tokens, watermarks and the
//! saved filter selection. Keys use a dotted `session.*` convention.

mod schema;
mod session;
mod types;

pub use schema::Database;
pub use types::{DatabaseError, FilterSelection, SessionState};
