//! Row endpoints: paged reads, record writes, bulk insert, export and
//! relation traversal

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

use super::{error_response, failure, paginated, success, success_with_message, Operation, PaginationMeta, MAX_LIMIT};
use crate::connection::ConnectionManager;
use crate::schema::{
    ExportFormat, FilterCondition, ForeignKeyReference, PaginationRequest, RelatedRows, Row, SortDirection,
};

/// Query parameters shared by every paged row endpoint
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableQuery {
    pub page: Option<u64>,
    pub limit: Option<u64>,
    pub sort_by: Option<String>,
    pub sort_order: Option<SortDirection>,

    /// JSON array of filter conditions
    pub filters: Option<String>,
}

impl TableQuery {
    /// Page request with the limit clamped to `1..=MAX_LIMIT`
    pub fn pagination(&self) -> PaginationRequest {
        let defaults = PaginationRequest::default();
        PaginationRequest {
            page: self.page.unwrap_or(defaults.page).max(1),
            limit: self.limit.unwrap_or(defaults.limit).clamp(1, MAX_LIMIT),
            sort_by: self.sort_by.clone().filter(|column| !column.is_empty()),
            sort_direction: self.sort_order.unwrap_or_default(),
        }
    }

    /// Decode the `filters` parameter
    pub fn filters(&self) -> Result<Vec<FilterCondition>, String> {
        match self.filters.as_deref().map(str::trim) {
            None | Some("") => Ok(Vec::new()),
            Some(raw) => serde_json::from_str(raw).map_err(|error| format!("Invalid filters parameter: {}", error)),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateRecordRequest {
    pub data: Row,
}

#[derive(Debug, Deserialize)]
pub struct UpdateRecordRequest {
    pub data: Row,

    #[serde(rename = "where")]
    pub where_values: Row,
}

#[derive(Debug, Deserialize)]
pub struct DeleteRecordRequest {
    #[serde(rename = "where")]
    pub where_values: Row,
}

#[derive(Debug, Deserialize)]
pub struct BulkInsertRequest {
    pub records: Vec<Row>,

    #[serde(default)]
    pub upsert: bool,

    /// Records in flight at once; sequential when absent
    pub concurrency: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ExportRequest {
    #[serde(default)]
    pub format: ExportFormat,

    #[serde(default)]
    pub filters: Vec<FilterCondition>,
}

#[derive(Debug, Deserialize)]
pub struct ForeignKeyQuery {
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReverseRelationQuery {
    pub referencing_schema: Option<String>,
    pub referencing_table: Option<String>,
    pub referencing_column: Option<String>,
    pub page: Option<u64>,
    pub limit: Option<u64>,
    pub sort_by: Option<String>,
    pub sort_order: Option<SortDirection>,
}

impl ReverseRelationQuery {
    fn pagination(&self) -> PaginationRequest {
        TableQuery {
            page: self.page,
            limit: self.limit,
            sort_by: self.sort_by.clone(),
            sort_order: self.sort_order,
            filters: None,
        }
        .pagination()
    }
}

/// Handler for GET /data-management/tables/{schema}/{table}/data
///
/// Query parameters:
/// - page: 1-based page number (default: 1)
/// - limit: Rows per page (default: 50, max: 500)
/// - sortBy: Column name to sort by (optional)
/// - sortOrder: "ASC" or "DESC" (default: "ASC")
/// - filters: JSON array of `{column, operator, value}` (optional)
pub async fn get_table_data_handler(
    State(manager): State<Arc<ConnectionManager>>,
    Path((schema, table)): Path<(String, String)>,
    Query(query): Query<TableQuery>,
) -> Response {
    let filters = match query.filters() {
        Ok(filters) => filters,
        Err(message) => return failure(StatusCode::BAD_REQUEST, message),
    };
    let pagination = query.pagination();
    debug!(%schema, %table, page = pagination.page, limit = pagination.limit, "GET table data");

    let result = match manager.engine().await {
        Ok(engine) => engine.get_table_data(&schema, &table, &filters, &pagination).await,
        Err(error) => Err(error),
    };

    match result {
        Ok(page) => {
            let meta = PaginationMeta::from(&page);
            paginated(page.rows, meta)
        }
        Err(error) => error_response(&error, Operation::Read, "Failed to fetch table data"),
    }
}

/// Handler for POST /data-management/tables/{schema}/{table}/records
pub async fn create_record_handler(
    State(manager): State<Arc<ConnectionManager>>,
    Path((schema, table)): Path<(String, String)>,
    Json(request): Json<CreateRecordRequest>,
) -> Response {
    debug!(%schema, %table, "POST record");
    let result = match manager.engine().await {
        Ok(engine) => engine.create_record(&schema, &table, &request.data).await,
        Err(error) => Err(error),
    };

    match result {
        Ok(row) => success_with_message(row, "Record created successfully"),
        Err(error) => error_response(&error, Operation::Write, "Failed to create record"),
    }
}

/// Handler for PUT /data-management/tables/{schema}/{table}/records
///
/// Updates every row whose columns equal the `where` values.
pub async fn update_record_handler(
    State(manager): State<Arc<ConnectionManager>>,
    Path((schema, table)): Path<(String, String)>,
    Json(request): Json<UpdateRecordRequest>,
) -> Response {
    debug!(%schema, %table, "PUT records");
    let result = match manager.engine().await {
        Ok(engine) => {
            engine
                .update_record(&schema, &table, &request.data, &request.where_values)
                .await
        }
        Err(error) => Err(error),
    };

    match result {
        Ok(rows) => {
            let message = format!("Updated {} record(s)", rows.len());
            success_with_message(rows, message)
        }
        Err(error) => error_response(&error, Operation::Write, "Failed to update record"),
    }
}

/// Handler for DELETE /data-management/tables/{schema}/{table}/records
pub async fn delete_record_handler(
    State(manager): State<Arc<ConnectionManager>>,
    Path((schema, table)): Path<(String, String)>,
    Json(request): Json<DeleteRecordRequest>,
) -> Response {
    debug!(%schema, %table, "DELETE records");
    let result = match manager.engine().await {
        Ok(engine) => engine.delete_record(&schema, &table, &request.where_values).await,
        Err(error) => Err(error),
    };

    match result {
        Ok(deleted) => success_with_message(
            json!({ "deletedCount": deleted }),
            format!("Deleted {} record(s)", deleted),
        ),
        Err(error) => error_response(&error, Operation::Write, "Failed to delete record"),
    }
}

/// Handler for POST /data-management/tables/{schema}/{table}/bulk-insert
///
/// Each record is inserted on its own. The response is 200 even when some
/// records fail; `success` is false and `data.errors` lists the failures.
pub async fn bulk_insert_handler(
    State(manager): State<Arc<ConnectionManager>>,
    Path((schema, table)): Path<(String, String)>,
    Json(request): Json<BulkInsertRequest>,
) -> Response {
    debug!(%schema, %table, records = request.records.len(), upsert = request.upsert, "POST bulk insert");
    let result = match manager.engine().await {
        Ok(engine) => match request.concurrency {
            Some(concurrency) => {
                engine
                    .bulk_insert_concurrent(&schema, &table, &request.records, request.upsert, concurrency)
                    .await
            }
            None => engine.bulk_insert(&schema, &table, &request.records, request.upsert).await,
        },
        Err(error) => Err(error),
    };

    match result {
        Ok(outcome) => {
            let message = format!("Processed {} record(s)", outcome.processed_count);
            (
                StatusCode::OK,
                Json(json!({
                    "success": outcome.success,
                    "data": outcome,
                    "message": message,
                })),
            )
                .into_response()
        }
        Err(error) => error_response(&error, Operation::Write, "Failed to perform bulk insert"),
    }
}

/// Handler for POST /data-management/tables/{schema}/{table}/export
///
/// Body: `{ format?: "csv" | "json", filters?: [...] }`. The serialized
/// rows come back as a string together with a suggested file name.
pub async fn export_table_handler(
    State(manager): State<Arc<ConnectionManager>>,
    Path((schema, table)): Path<(String, String)>,
    body: Option<Json<ExportRequest>>,
) -> Response {
    let request = body.map(|Json(request)| request).unwrap_or_default();

    let result = match manager.engine().await {
        Ok(engine) => {
            engine
                .export_table_data(&schema, &table, &request.filters, request.format)
                .await
        }
        Err(error) => Err(error),
    };

    match result {
        Ok(content) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "data": content,
                "filename": format!("{}_{}.{}", schema, table, request.format.extension()),
            })),
        )
            .into_response(),
        Err(error) => error_response(&error, Operation::Read, "Failed to export table data"),
    }
}

/// Handler for GET /data-management/foreign-key-data/{schema}/{table}/{column}
///
/// Query parameters:
/// - value: Value the column must equal
///
/// Returns at most ten matching rows.
pub async fn foreign_key_data_handler(
    State(manager): State<Arc<ConnectionManager>>,
    Path((schema, table, column)): Path<(String, String, String)>,
    Query(query): Query<ForeignKeyQuery>,
) -> Response {
    let value = Value::String(query.value);
    let result = match manager.engine().await {
        Ok(engine) => engine.get_foreign_key_data(&schema, &table, &column, &value).await,
        Err(error) => Err(error),
    };

    match result {
        Ok(rows) => success(rows),
        Err(error) => error_response(&error, Operation::Read, "Failed to fetch foreign key data"),
    }
}

/// Handler for GET /data-management/tables/{schema}/{table}/relations/{column}/{value}
///
/// Follows the foreign key on `column` and pages through the referenced
/// rows matching `value`.
pub async fn related_rows_handler(
    State(manager): State<Arc<ConnectionManager>>,
    Path((schema, table, column, value)): Path<(String, String, String, String)>,
    Query(query): Query<TableQuery>,
) -> Response {
    let pagination = query.pagination();
    let result = match manager.engine().await {
        Ok(engine) => engine.get_related_rows(&schema, &table, &column, &value, &pagination).await,
        Err(error) => Err(error),
    };

    match result {
        Ok(related) => related_response(related),
        Err(error) => error_response(&error, Operation::Read, "Failed to fetch related table data"),
    }
}

/// Handler for GET /data-management/tables/{schema}/{table}/reverse-relations/{referenced_column}/{record_id}
///
/// Query parameters:
/// - referencingSchema, referencingTable, referencingColumn: The foreign key
///   pointing at this table (required)
/// - page, limit, sortBy, sortOrder: As for the table data endpoint
pub async fn reverse_related_rows_handler(
    State(manager): State<Arc<ConnectionManager>>,
    Path((schema, table, referenced_column, record_id)): Path<(String, String, String, String)>,
    Query(query): Query<ReverseRelationQuery>,
) -> Response {
    let pagination = query.pagination();
    let referencing = match (
        query.referencing_schema.filter(|value| !value.is_empty()),
        query.referencing_table.filter(|value| !value.is_empty()),
        query.referencing_column.filter(|value| !value.is_empty()),
    ) {
        (Some(schema), Some(table), Some(column)) => ForeignKeyReference { schema, table, column },
        _ => return failure(StatusCode::BAD_REQUEST, "Missing required query parameters"),
    };

    let result = match manager.engine().await {
        Ok(engine) => {
            engine
                .get_reverse_related_rows(&schema, &table, &referenced_column, &record_id, &referencing, &pagination)
                .await
        }
        Err(error) => Err(error),
    };

    match result {
        Ok(related) => related_response(related),
        Err(error) => error_response(&error, Operation::Read, "Failed to fetch reverse relation data"),
    }
}

fn related_response(related: RelatedRows) -> Response {
    let pagination = PaginationMeta::from(&related.rows);
    (
        StatusCode::OK,
        Json(json!({
            "success": true,
            "data": related.rows.rows,
            "pagination": pagination,
            "relationInfo": related.relation,
        })),
    )
        .into_response()
}
