//! Schema listing, table search and table metadata endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

use super::{error_response, success, Operation};
use crate::connection::ConnectionManager;
use crate::schema::{ColumnStatistics, TableDescriptor};

/// Query parameters of the table search endpoint
#[derive(Debug, Default, Deserialize)]
pub struct SearchQuery {
    /// Case-insensitive substring of the schema or table name
    #[serde(default)]
    pub q: String,
}

/// Table metadata plus per-column null statistics
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableStatistics {
    pub table_info: TableDescriptor,
    pub column_statistics: Vec<ColumnStatistics>,
}

/// Handler for GET /data-management/schemas
///
/// Lists every non-system schema with its base tables and estimated row
/// counts.
pub async fn list_schemas_handler(State(manager): State<Arc<ConnectionManager>>) -> Response {
    let result = match manager.engine().await {
        Ok(engine) => engine.list_schemas().await,
        Err(error) => Err(error),
    };

    match result {
        Ok(schemas) => success(schemas),
        Err(error) => error_response(&error, Operation::Read, "Failed to fetch schemas"),
    }
}

/// Handler for GET /data-management/search/tables
///
/// Query parameters:
/// - q: Substring to look for in schema and table names
///
/// The response carries a `total` next to the matches.
pub async fn search_tables_handler(
    State(manager): State<Arc<ConnectionManager>>,
    Query(query): Query<SearchQuery>,
) -> Response {
    let result = match manager.engine().await {
        Ok(engine) => engine.search_tables(&query.q).await,
        Err(error) => Err(error),
    };

    match result {
        Ok(matches) => {
            let total = matches.len();
            (
                StatusCode::OK,
                Json(json!({
                    "success": true,
                    "data": matches,
                    "total": total,
                })),
            )
                .into_response()
        }
        Err(error) => error_response(&error, Operation::Read, "Failed to search tables"),
    }
}

/// Handler for GET /data-management/tables/{schema}/{table}/info
pub async fn get_table_info_handler(
    State(manager): State<Arc<ConnectionManager>>,
    Path((schema, table)): Path<(String, String)>,
) -> Response {
    let result = match manager.engine().await {
        Ok(engine) => engine.get_table_info(&schema, &table).await,
        Err(error) => Err(error),
    };

    match result {
        Ok(descriptor) => success(descriptor),
        Err(error) => error_response(&error, Operation::Read, "Failed to fetch table information"),
    }
}

/// Handler for GET /data-management/tables/{schema}/{table}/statistics
///
/// Returns the table descriptor together with total, non-null and null
/// counts per column.
pub async fn column_statistics_handler(
    State(manager): State<Arc<ConnectionManager>>,
    Path((schema, table)): Path<(String, String)>,
) -> Response {
    let engine = match manager.engine().await {
        Ok(engine) => engine,
        Err(error) => return error_response(&error, Operation::Read, "Failed to fetch table statistics"),
    };

    let result = tokio::try_join!(
        engine.get_table_info(&schema, &table),
        engine.column_statistics(&schema, &table),
    );

    match result {
        Ok((table_info, column_statistics)) => success(TableStatistics {
            table_info,
            column_statistics,
        }),
        Err(error) => error_response(&error, Operation::Read, "Failed to fetch table statistics"),
    }
}
