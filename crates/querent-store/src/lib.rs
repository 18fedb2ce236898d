//! Embedded storage for the Querent analytics agent.
//!
//! Three concerns live here, all behind narrow seams:
//! - [`engine`] — the [`QueryExecution`] port and its SQLite implementation.
//!   Queries run read-only on the blocking pool with a deadline, so the query
//!   engine can never stall the async request path.
//! - [`schema`] — table introspection and the per-process [`SchemaCache`].
//! - [`etl`] — the one-time CSV loader that builds the queryable table,
//!   including the derived timestamp/geocode columns.

pub mod engine;
pub mod etl;
pub mod schema;

pub use engine::{QueryExecution, QueryResult, SqliteEngine};
pub use etl::{load_csv, LoadSummary};
pub use schema::{introspect, SchemaCache};
