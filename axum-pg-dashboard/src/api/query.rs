//! Raw SQL query execution endpoint

use axum::{
    extract::State,
    response::{Json, Response},
};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use super::{error_response, success_with_message, Operation};
use crate::connection::ConnectionManager;

/// Request body for query execution
#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    /// SQL text with `$n` placeholders
    pub query: String,

    /// Positional parameters
    #[serde(default)]
    pub params: Vec<Value>,

    /// Refuse write statements (default: true)
    #[serde(default = "default_readonly")]
    pub readonly: bool,
}

fn default_readonly() -> bool {
    true
}

/// Handler for POST /data-management/query/execute
///
/// Executes arbitrary SQL and returns the columns, rows, row count and
/// execution time. In readonly mode any statement that mentions a write
/// keyword is refused with 400.
pub async fn execute_query_handler(
    State(manager): State<Arc<ConnectionManager>>,
    Json(request): Json<QueryRequest>,
) -> Response {
    debug!(readonly = request.readonly, params = request.params.len(), "POST query");
    let result = match manager.engine().await {
        Ok(engine) => engine.execute_query(&request.query, &request.params, request.readonly).await,
        Err(error) => Err(error),
    };

    match result {
        Ok(output) => {
            let message = format!("Query executed in {}ms", output.execution_time_milliseconds);
            success_with_message(output, message)
        }
        Err(error) => error_response(&error, Operation::Write, "Query execution failed"),
    }
}
