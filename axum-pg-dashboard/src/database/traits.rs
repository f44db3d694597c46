//! Statement executor trait and database error type
//!
//! The query engine and catalog introspector only ever talk to the database
//! through [`StatementExecutor`], so they can run against a live pool or an
//! in-memory double.

use crate::schema::Row;
use crate::statement::Statement;
use async_trait::async_trait;
use thiserror::Error;

/// Rows and row count produced by one statement
#[derive(Debug, Clone, Default)]
pub struct QueryOutput {
    /// Rows returned, as JSON objects in result-set column order
    pub rows: Vec<Row>,

    /// Rows returned or affected as reported by the server
    pub rows_affected: u64,
}

impl QueryOutput {
    pub fn from_rows(rows: Vec<Row>) -> Self {
        let rows_affected = rows.len() as u64;
        Self { rows, rows_affected }
    }
}

/// Executes parameterized statements
///
/// Implementations must run each statement on its own; no transaction spans
/// calls.
#[async_trait]
pub trait StatementExecutor: Send + Sync + 'static {
    /// Run a statement and collect its rows
    ///
    /// # Arguments
    ///
    /// * `statement` - SQL text with positional placeholders and its parameters
    ///
    /// # Returns
    ///
    /// The returned rows plus the affected-row count
    async fn query(&self, statement: &Statement) -> Result<QueryOutput, DatabaseError>;
}

/// Category of a [`DatabaseError`], for matching without inspecting text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// No active connection pool
    ConnectionUnavailable,
    /// A connect request could not establish a pool
    ConnectionFailed,
    /// The request was refused before reaching the database
    QueryRejected,
    /// The referenced table does not exist
    NotFound,
    /// The database rejected a well-formed statement
    DatabaseExecutionFailed,
    /// Result could not be serialized
    Serialization,
}

/// Database error type
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// No pool is connected
    #[error("Database connection is not available")]
    ConnectionUnavailable,

    /// A single connection strategy failed
    #[error("Connection attempt '{strategy}' failed: {message}")]
    ConnectionAttempt { strategy: String, message: String },

    /// Every connection strategy failed
    #[error("Failed to connect to database after {attempts} attempt(s)")]
    ConnectionFailed { attempts: usize },

    /// Connection parameters are incomplete or unparsable
    #[error("Invalid connection descriptor: {0}")]
    InvalidDescriptor(String),

    /// Refused before execution (readonly guard, bad identifier or filter)
    #[error("Query rejected: {0}")]
    QueryRejected(String),

    /// Table not found
    #[error("Table not found: {0}")]
    TableNotFound(String),

    /// Invalid column name
    #[error("Invalid column: {0}")]
    InvalidColumn(String),

    /// The database rejected the statement
    #[error("{0}")]
    Execution(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl DatabaseError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DatabaseError::ConnectionUnavailable => ErrorKind::ConnectionUnavailable,
            DatabaseError::ConnectionAttempt { .. }
            | DatabaseError::ConnectionFailed { .. }
            | DatabaseError::InvalidDescriptor(_) => ErrorKind::ConnectionFailed,
            DatabaseError::QueryRejected(_) | DatabaseError::InvalidColumn(_) => {
                ErrorKind::QueryRejected
            }
            DatabaseError::TableNotFound(_) => ErrorKind::NotFound,
            DatabaseError::Execution(_) => ErrorKind::DatabaseExecutionFailed,
            DatabaseError::Serialization(_) => ErrorKind::Serialization,
        }
    }
}

impl From<sqlx::Error> for DatabaseError {
    fn from(error: sqlx::Error) -> Self {
        match error {
            // Pass the server's own message through untouched
            sqlx::Error::Database(database_error) => {
                DatabaseError::Execution(database_error.message().to_string())
            }
            other => DatabaseError::Execution(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for DatabaseError {
    fn from(error: serde_json::Error) -> Self {
        DatabaseError::Serialization(error.to_string())
    }
}
