//! Database access layer
//!
//! Catalog introspection and table operations, written against the
//! [`StatementExecutor`] seam and backed by a PostgreSQL pool in production.

pub mod engine;
pub mod introspect;
pub mod postgres;
pub mod traits;

#[cfg(test)]
pub(crate) mod testing;

pub use engine::DataEngine;
pub use introspect::CatalogIntrospector;
pub use postgres::PgExecutor;
pub use traits::{DatabaseError, ErrorKind, QueryOutput, StatementExecutor};
