//! REST API endpoints
//!
//! Every handler answers with the envelope `{ success, data, message?,
//! pagination? }`. Errors use the same envelope with `success: false`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{delete, get, post},
    Router,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::error;

use crate::connection::ConnectionManager;
use crate::database::traits::{DatabaseError, ErrorKind};
use crate::schema::PaginatedResult;

pub mod connection;
pub mod query;
pub mod rows;
pub mod tables;

/// Largest page size a request may ask for
pub const MAX_LIMIT: u64 = 500;

/// Response envelope shared by every endpoint
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub pagination: Option<PaginationMeta>,
}

/// Pagination block of a paged response
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginationMeta {
    pub page: u64,
    pub limit: u64,
    pub total: u64,
    pub total_pages: u64,
}

impl From<&PaginatedResult> for PaginationMeta {
    fn from(result: &PaginatedResult) -> Self {
        Self {
            page: result.page,
            limit: result.limit,
            total: result.total_count,
            total_pages: result.total_pages,
        }
    }
}

pub(crate) fn success<T: Serialize>(data: T) -> Response {
    respond(StatusCode::OK, true, Some(data), None, None)
}

pub(crate) fn success_with_message<T: Serialize>(data: T, message: impl Into<String>) -> Response {
    respond(StatusCode::OK, true, Some(data), Some(message.into()), None)
}

pub(crate) fn paginated<T: Serialize>(data: T, pagination: PaginationMeta) -> Response {
    respond(StatusCode::OK, true, Some(data), None, Some(pagination))
}

pub(crate) fn failure(status: StatusCode, message: impl Into<String>) -> Response {
    respond::<()>(status, false, None, Some(message.into()), None)
}

fn respond<T: Serialize>(
    status: StatusCode,
    success: bool,
    data: Option<T>,
    message: Option<String>,
    pagination: Option<PaginationMeta>,
) -> Response {
    (
        status,
        Json(ApiResponse {
            success,
            data,
            message,
            pagination,
        }),
    )
        .into_response()
}

/// Whether a failing operation reads or writes
///
/// Read failures hide the database message behind a generic one; write
/// failures pass it through so the caller can fix the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Operation {
    Read,
    Write,
}

/// Map an operation error to a status code and envelope
///
/// # Arguments
///
/// * `error` - The error returned by the engine or connection manager
/// * `operation` - Whether the failing operation reads or writes
/// * `summary` - Generic message for read failures, e.g. "Failed to fetch schemas"
pub(crate) fn error_response(error: &DatabaseError, operation: Operation, summary: &str) -> Response {
    match error.kind() {
        ErrorKind::ConnectionUnavailable => failure(StatusCode::SERVICE_UNAVAILABLE, error.to_string()),
        ErrorKind::ConnectionFailed | ErrorKind::QueryRejected => {
            failure(StatusCode::BAD_REQUEST, error.to_string())
        }
        ErrorKind::NotFound => failure(StatusCode::NOT_FOUND, error.to_string()),
        ErrorKind::DatabaseExecutionFailed | ErrorKind::Serialization => {
            error!(%error, "{}", summary);
            match operation {
                Operation::Read => failure(StatusCode::INTERNAL_SERVER_ERROR, summary),
                Operation::Write => failure(StatusCode::BAD_REQUEST, format!("{}: {}", summary, error)),
            }
        }
    }
}

/// Create the API router with all endpoints
///
/// # Arguments
///
/// * `manager` - Connection manager shared by every handler
pub fn create_api_router(manager: Arc<ConnectionManager>) -> Router {
    Router::new()
        .route("/database/connect", post(connection::connect_handler))
        .route("/database/disconnect", delete(connection::disconnect_handler))
        .route("/database/status", get(connection::status_handler))
        .route("/data-management/schemas", get(tables::list_schemas_handler))
        .route("/data-management/search/tables", get(tables::search_tables_handler))
        .route(
            "/data-management/tables/{schema}/{table}/info",
            get(tables::get_table_info_handler),
        )
        .route(
            "/data-management/tables/{schema}/{table}/statistics",
            get(tables::column_statistics_handler),
        )
        .route(
            "/data-management/tables/{schema}/{table}/data",
            get(rows::get_table_data_handler),
        )
        .route(
            "/data-management/tables/{schema}/{table}/relations/{column}/{value}",
            get(rows::related_rows_handler),
        )
        .route(
            "/data-management/tables/{schema}/{table}/reverse-relations/{referenced_column}/{record_id}",
            get(rows::reverse_related_rows_handler),
        )
        .route(
            "/data-management/tables/{schema}/{table}/records",
            post(rows::create_record_handler)
                .put(rows::update_record_handler)
                .delete(rows::delete_record_handler),
        )
        .route(
            "/data-management/tables/{schema}/{table}/bulk-insert",
            post(rows::bulk_insert_handler),
        )
        .route(
            "/data-management/tables/{schema}/{table}/export",
            post(rows::export_table_handler),
        )
        .route(
            "/data-management/foreign-key-data/{schema}/{table}/{column}",
            get(rows::foreign_key_data_handler),
        )
        .route("/data-management/query/execute", post(query::execute_query_handler))
        .with_state(manager)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{EnvironmentFacts, ResolverConfig};
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt;

    fn router() -> Router {
        let manager = ConnectionManager::new(ResolverConfig::default()).with_environment(EnvironmentFacts::host());
        create_api_router(Arc::new(manager))
    }

    async fn call(request: Request<Body>) -> (StatusCode, Value) {
        let response = router().oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn status_reports_disconnected() {
        let (status, body) = call(
            Request::get("/database/status").body(Body::empty()).unwrap(),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["connected"], false);
        assert_eq!(body["data"]["state"], "idle");
    }

    #[tokio::test]
    async fn data_routes_are_unavailable_while_disconnected() {
        for uri in [
            "/data-management/schemas",
            "/data-management/tables/public/users/info",
            "/data-management/tables/public/users/data?page=2&limit=10",
            "/data-management/search/tables?q=user",
        ] {
            let (status, body) = call(Request::get(uri).body(Body::empty()).unwrap()).await;
            assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE, "{}", uri);
            assert_eq!(body["success"], false);
        }
    }

    #[tokio::test]
    async fn query_route_is_unavailable_while_disconnected() {
        let request = Request::post("/data-management/query/execute")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"query":"SELECT 1"}"#))
            .unwrap();
        let (status, _) = call(request).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn bulk_insert_route_is_unavailable_while_disconnected() {
        let request = Request::post("/data-management/tables/public/users/bulk-insert")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"records":[{"name":"a"}],"concurrency":2}"#))
            .unwrap();
        let (status, body) = call(request).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn connect_rejects_incomplete_parts() {
        let request = Request::post("/database/connect")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"host":"db","username":"svc"}"#))
            .unwrap();
        let (status, body) = call(request).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn malformed_filters_are_rejected() {
        let request = Request::get("/data-management/tables/public/users/data?filters=not-json")
            .body(Body::empty())
            .unwrap();
        let (status, _) = call(request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn read_failures_hide_database_message() {
        let error = DatabaseError::Execution("relation \"secret\" does not exist".into());
        let response = error_response(&error, Operation::Read, "Failed to fetch table data");
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let response = error_response(&error, Operation::Write, "Failed to create record");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = error_response(&DatabaseError::TableNotFound("x".into()), Operation::Read, "");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
