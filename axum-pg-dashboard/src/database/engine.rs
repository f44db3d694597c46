//! Query engine
//!
//! All table-level operations of the dashboard. Every operation builds its
//! statements through [`crate::statement`] and runs them on one
//! [`StatementExecutor`]; nothing is retried and nothing spans a transaction.

use crate::database::introspect::CatalogIntrospector;
use crate::database::traits::{DatabaseError, StatementExecutor};
use crate::schema::{
    BulkOperationResult, ColumnDescriptor, ColumnStatistics, ColumnTypes, ExportFormat,
    FilterCondition, FilterOperator, ForeignKeyReference, PaginatedResult, PaginationRequest,
    QueryResult, RelatedRows, RelationInfo, Row, SchemaSummary, TableDescriptor,
    TableSearchResult, ValidationError,
};
use crate::statement::{
    build_count, build_delete, build_insert, build_limit_clause, build_lookup,
    build_null_statistics, build_order_clause, build_select, build_update, build_where_clause,
    contains_write_operation, qualified_table, query_parameter, Statement,
};
use crate::validation::validate_record;
use futures::stream::{self, StreamExt};
use serde_json::Value;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Rows returned by a foreign-key display lookup
pub const FOREIGN_KEY_LOOKUP_LIMIT: u32 = 10;

/// Column name used for errors that are not tied to a single field
pub const GENERAL_ERROR_COLUMN: &str = "general";

/// Table operations over a statement executor
pub struct DataEngine<E: StatementExecutor> {
    executor: E,
}

/// Result of inserting one record of a bulk request
type RecordOutcome = Result<Option<Row>, Vec<ValidationError>>;

/// Per-request state shared by every record of a bulk insert
struct BulkInsertPlan {
    table_reference: String,
    descriptor: TableDescriptor,
    types: ColumnTypes,
    conflict_keys: Option<Vec<String>>,
}

impl<E: StatementExecutor> DataEngine<E> {
    pub fn new(executor: E) -> Self {
        Self { executor }
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    fn introspector(&self) -> CatalogIntrospector<'_, E> {
        CatalogIntrospector::new(&self.executor)
    }

    /// All user tables grouped by schema, with estimated row counts
    pub async fn list_schemas(&self) -> Result<Vec<SchemaSummary>, DatabaseError> {
        self.introspector().list_schemas().await
    }

    /// Tables whose schema or table name contains `query` (case-insensitive)
    pub async fn search_tables(&self, query: &str) -> Result<Vec<TableSearchResult>, DatabaseError> {
        let needle = query.to_lowercase();
        let needle = needle.as_str();
        let schemas = self.list_schemas().await?;

        Ok(schemas
            .into_iter()
            .flat_map(|schema| {
                let schema_matches = schema.schema_name.to_lowercase().contains(needle);
                let schema_name = schema.schema_name;
                schema
                    .tables
                    .into_iter()
                    .filter(move |table| {
                        schema_matches || table.table_name.to_lowercase().contains(needle)
                    })
                    .map(move |table| TableSearchResult {
                        schema_name: schema_name.clone(),
                        table_name: table.table_name,
                        row_count: table.row_count,
                    })
            })
            .collect())
    }

    /// Full descriptor of one table
    pub async fn get_table_info(&self, schema: &str, table: &str) -> Result<TableDescriptor, DatabaseError> {
        self.introspector().table_descriptor(schema, table).await
    }

    /// One page of filtered, sorted rows plus the total match count
    ///
    /// Runs a COUNT with the WHERE clause first, then the page query. Both
    /// statements share the same filter parameters; LIMIT and OFFSET are
    /// numbered after them.
    ///
    /// # Arguments
    ///
    /// * `schema` - Schema name
    /// * `table` - Table name
    /// * `filters` - Filter conditions, joined with AND
    /// * `pagination` - Page, page size and ordering
    pub async fn get_table_data(
        &self,
        schema: &str,
        table: &str,
        filters: &[FilterCondition],
        pagination: &PaginationRequest,
    ) -> Result<PaginatedResult, DatabaseError> {
        let table_reference = qualified_table(schema, table)?;
        let types = self.introspector().column_types(schema, table).await?;

        ensure_columns_exist(&types, filters.iter().map(|filter| filter.column.as_str()))?;
        ensure_columns_exist(&types, pagination.sort_by.as_deref())?;

        let where_clause = build_where_clause(filters, &types, 1)?;
        let limit_clause = build_limit_clause(
            pagination.page,
            pagination.limit,
            where_clause.next_index(1),
        )?;
        let order_clause = build_order_clause(pagination.sort_by.as_deref(), pagination.sort_direction)?;

        debug!(schema, table, filters = filters.len(), page = pagination.page, "fetching table data");

        let count = self
            .executor
            .query(&build_count(&table_reference, &where_clause))
            .await?;
        let total_count = count
            .rows
            .first()
            .and_then(|row| row.get("total"))
            .and_then(Value::as_u64)
            .unwrap_or(0);

        let page = self
            .executor
            .query(&build_select(
                &table_reference,
                &where_clause,
                &order_clause,
                Some(&limit_clause),
            ))
            .await?;

        Ok(PaginatedResult {
            rows: page.rows,
            page: pagination.page,
            limit: pagination.limit,
            total_count,
            total_pages: total_count.div_ceil(pagination.limit),
        })
    }

    /// Insert one record and return the stored row
    pub async fn create_record(&self, schema: &str, table: &str, payload: &Row) -> Result<Row, DatabaseError> {
        let table_reference = qualified_table(schema, table)?;
        let types = self.introspector().column_types(schema, table).await?;
        ensure_columns_exist(&types, payload.keys().map(String::as_str))?;

        let output = self
            .executor
            .query(&build_insert(&table_reference, payload, &types, None)?)
            .await?;

        info!(schema, table, "record created");
        Ok(output.rows.into_iter().next().unwrap_or_default())
    }

    /// Update every row matching `where_values` (equality only)
    pub async fn update_record(
        &self,
        schema: &str,
        table: &str,
        data: &Row,
        where_values: &Row,
    ) -> Result<Vec<Row>, DatabaseError> {
        let table_reference = qualified_table(schema, table)?;
        let types = self.introspector().column_types(schema, table).await?;
        ensure_columns_exist(&types, data.keys().chain(where_values.keys()).map(String::as_str))?;

        let output = self
            .executor
            .query(&build_update(&table_reference, data, where_values, &types)?)
            .await?;

        info!(schema, table, rows = output.rows.len(), "records updated");
        Ok(output.rows)
    }

    /// Delete every row matching `where_values` and return the affected count
    pub async fn delete_record(&self, schema: &str, table: &str, where_values: &Row) -> Result<u64, DatabaseError> {
        let table_reference = qualified_table(schema, table)?;
        let types = self.introspector().column_types(schema, table).await?;
        ensure_columns_exist(&types, where_values.keys().map(String::as_str))?;

        let output = self
            .executor
            .query(&build_delete(&table_reference, where_values, &types)?)
            .await?;

        info!(schema, table, rows = output.rows_affected, "records deleted");
        Ok(output.rows_affected)
    }

    async fn plan_bulk_insert(&self, schema: &str, table: &str, upsert: bool) -> Result<BulkInsertPlan, DatabaseError> {
        let table_reference = qualified_table(schema, table)?;
        let descriptor = self.get_table_info(schema, table).await?;
        let types = descriptor.column_types();
        let conflict_keys = (upsert && !descriptor.primary_keys.is_empty())
            .then(|| descriptor.primary_keys.clone());

        Ok(BulkInsertPlan {
            table_reference,
            descriptor,
            types,
            conflict_keys,
        })
    }

    /// Validate and insert one record, turning every failure into data
    async fn insert_record(&self, plan: &BulkInsertPlan, index: usize, record: &Row) -> RecordOutcome {
        let mut errors: Vec<ValidationError> = record
            .iter()
            .filter(|(column, _)| plan.descriptor.column(column).is_none())
            .map(|(column, value)| ValidationError {
                column: column.clone(),
                value: value.clone(),
                message: "Unknown column".to_string(),
                record_index: Some(index),
            })
            .collect();

        errors.extend(
            validate_record(record, &plan.descriptor)
                .into_iter()
                .map(|error| ValidationError {
                    record_index: Some(index),
                    ..error
                }),
        );

        if !errors.is_empty() {
            return Err(errors);
        }

        let result = match build_insert(
            &plan.table_reference,
            record,
            &plan.types,
            plan.conflict_keys.as_deref(),
        ) {
            Ok(statement) => self.executor.query(&statement).await,
            Err(error) => Err(error),
        };

        match result {
            Ok(output) => Ok(output.rows.into_iter().next()),
            Err(error) => {
                debug!(record = index, %error, "bulk insert record failed");
                Err(vec![ValidationError {
                    column: GENERAL_ERROR_COLUMN.to_string(),
                    value: Value::Object(record.clone()),
                    message: error.to_string(),
                    record_index: Some(index),
                }])
            }
        }
    }

    /// Insert records one after another, isolating failures per record
    ///
    /// The table is introspected once. A record that fails validation or is
    /// rejected by the database adds its errors to the result and the batch
    /// continues with the next record. With `upsert` set and a primary key
    /// present, each insert becomes an upsert on the primary key.
    pub async fn bulk_insert(
        &self,
        schema: &str,
        table: &str,
        records: &[Row],
        upsert: bool,
    ) -> Result<BulkOperationResult, DatabaseError> {
        let plan = self.plan_bulk_insert(schema, table, upsert).await?;

        let mut outcomes = Vec::with_capacity(records.len());
        for (index, record) in records.iter().enumerate() {
            outcomes.push(self.insert_record(&plan, index, record).await);
        }

        let result = collect_bulk_outcomes(outcomes);
        info!(
            schema,
            table,
            processed = result.processed_count,
            failed = records.len() - result.processed_count,
            "bulk insert finished"
        );
        Ok(result)
    }

    /// Bulk insert with up to `concurrency` records in flight
    ///
    /// Isolation is the same as [`DataEngine::bulk_insert`] and errors are
    /// still reported in input order.
    pub async fn bulk_insert_concurrent(
        &self,
        schema: &str,
        table: &str,
        records: &[Row],
        upsert: bool,
        concurrency: usize,
    ) -> Result<BulkOperationResult, DatabaseError> {
        let plan = self.plan_bulk_insert(schema, table, upsert).await?;
        let plan = &plan;

        // Collected first: a lazily mapped stream is not Send for every lifetime
        let pending: Vec<_> = records
            .iter()
            .enumerate()
            .map(|(index, record)| self.insert_record(plan, index, record))
            .collect();

        let outcomes: Vec<RecordOutcome> = stream::iter(pending)
            .buffered(concurrency.max(1))
            .collect()
            .await;

        let result = collect_bulk_outcomes(outcomes);
        info!(
            schema,
            table,
            concurrency,
            processed = result.processed_count,
            "concurrent bulk insert finished"
        );
        Ok(result)
    }

    /// Run caller-supplied SQL
    ///
    /// With `readonly` set, text containing a write keyword is rejected before
    /// anything reaches the database.
    pub async fn execute_query(&self, sql: &str, params: &[Value], readonly: bool) -> Result<QueryResult, DatabaseError> {
        if readonly && contains_write_operation(sql) {
            warn!("rejected write statement in readonly mode");
            return Err(DatabaseError::QueryRejected(
                "Write operations are not allowed in readonly mode".to_string(),
            ));
        }

        let statement = Statement::with_params(sql, params.iter().map(query_parameter).collect());

        let start_time = Instant::now();
        let output = self.executor.query(&statement).await?;
        let execution_time_milliseconds = start_time.elapsed().as_millis() as u64;

        let columns = output
            .rows
            .first()
            .map(|row| row.keys().cloned().collect())
            .unwrap_or_default();

        debug!(rows = output.rows_affected, elapsed_ms = execution_time_milliseconds, "query executed");

        Ok(QueryResult {
            columns,
            rows: output.rows,
            row_count: output.rows_affected,
            execution_time_milliseconds,
        })
    }

    /// Up to ten rows where `column` equals `value`
    pub async fn get_foreign_key_data(
        &self,
        schema: &str,
        table: &str,
        column: &str,
        value: &Value,
    ) -> Result<Vec<Row>, DatabaseError> {
        let table_reference = qualified_table(schema, table)?;
        let types = self.introspector().column_types(schema, table).await?;
        ensure_columns_exist(&types, Some(column))?;

        let output = self
            .executor
            .query(&build_lookup(
                &table_reference,
                column,
                value,
                &types,
                FOREIGN_KEY_LOOKUP_LIMIT,
            )?)
            .await?;

        Ok(output.rows)
    }

    /// Serialize every row matching `filters` as JSON or CSV
    pub async fn export_table_data(
        &self,
        schema: &str,
        table: &str,
        filters: &[FilterCondition],
        format: ExportFormat,
    ) -> Result<String, DatabaseError> {
        let table_reference = qualified_table(schema, table)?;
        let types = self.introspector().column_types(schema, table).await?;
        ensure_columns_exist(&types, filters.iter().map(|filter| filter.column.as_str()))?;

        let where_clause = build_where_clause(filters, &types, 1)?;
        let output = self
            .executor
            .query(&build_select(&table_reference, &where_clause, "", None))
            .await?;

        debug!(schema, table, rows = output.rows.len(), format = format.extension(), "exporting table");

        match format {
            ExportFormat::Json => Ok(serde_json::to_string_pretty(&output.rows)?),
            ExportFormat::Csv => Ok(rows_to_csv(&output.rows)),
        }
    }

    /// Total, non-null and null counts for every column
    ///
    /// Columns are queried concurrently. A column whose query fails is still
    /// listed, with its counts absent and an error message set.
    pub async fn column_statistics(&self, schema: &str, table: &str) -> Result<Vec<ColumnStatistics>, DatabaseError> {
        let table_reference = qualified_table(schema, table)?;
        let descriptor = self.get_table_info(schema, table).await?;

        let statistics = descriptor
            .columns
            .iter()
            .map(|column| self.single_column_statistics(&table_reference, column));

        Ok(futures::future::join_all(statistics).await)
    }

    async fn single_column_statistics(&self, table_reference: &str, column: &ColumnDescriptor) -> ColumnStatistics {
        let counts = match build_null_statistics(table_reference, &column.column_name) {
            Ok(statement) => self.executor.query(&statement).await,
            Err(error) => Err(error),
        };

        let counts = counts.and_then(|output| {
            let row = output.rows.into_iter().next().unwrap_or_default();
            match (read_count(&row, "total_count"), read_count(&row, "non_null_count")) {
                (Some(total), Some(non_null)) => Ok((total, non_null)),
                _ => Err(DatabaseError::Execution("Statistics row is incomplete".to_string())),
            }
        });

        match counts {
            Ok((total, non_null)) => {
                let nulls = total - non_null;
                let percentage = if total > 0 {
                    (nulls as f64 / total as f64 * 10_000.0).round() / 100.0
                } else {
                    0.0
                };

                ColumnStatistics {
                    column_name: column.column_name.clone(),
                    data_type: column.data_type.clone(),
                    total_count: Some(total),
                    non_null_count: Some(non_null),
                    null_count: Some(nulls),
                    null_percentage: Some(percentage),
                    error: None,
                }
            }
            Err(error) => {
                warn!(column = %column.column_name, %error, "column statistics failed");
                ColumnStatistics {
                    column_name: column.column_name.clone(),
                    data_type: column.data_type.clone(),
                    total_count: None,
                    non_null_count: None,
                    null_count: None,
                    null_percentage: None,
                    error: Some("Could not retrieve statistics".to_string()),
                }
            }
        }
    }

    /// Follow a foreign-key column to the rows it references
    pub async fn get_related_rows(
        &self,
        schema: &str,
        table: &str,
        column: &str,
        value: &str,
        pagination: &PaginationRequest,
    ) -> Result<RelatedRows, DatabaseError> {
        let descriptor = self.get_table_info(schema, table).await?;
        let reference = descriptor
            .column(column)
            .and_then(|column| column.references.clone())
            .ok_or_else(|| DatabaseError::QueryRejected(format!("Column {} is not a foreign key", column)))?;

        let filters = [FilterCondition::new(
            reference.column.clone(),
            FilterOperator::Equal,
            value,
        )];
        let rows = self
            .get_table_data(&reference.schema, &reference.table, &filters, pagination)
            .await?;

        Ok(RelatedRows {
            rows,
            relation: RelationInfo {
                source_schema: schema.to_string(),
                source_table: table.to_string(),
                source_column: column.to_string(),
                target_schema: reference.schema,
                target_table: reference.table,
                target_column: reference.column,
            },
        })
    }

    /// Rows of a referencing table that point at one record of this table
    ///
    /// # Arguments
    ///
    /// * `schema` / `table` - The referenced table
    /// * `referenced_column` - Column of the referenced table the key points at
    /// * `record_id` - Key value of the referenced record
    /// * `referencing` - Table and column holding the foreign key
    /// * `pagination` - Page, page size and ordering of the referencing rows
    pub async fn get_reverse_related_rows(
        &self,
        schema: &str,
        table: &str,
        referenced_column: &str,
        record_id: &str,
        referencing: &ForeignKeyReference,
        pagination: &PaginationRequest,
    ) -> Result<RelatedRows, DatabaseError> {
        let foreign_keys = self
            .introspector()
            .foreign_keys(&referencing.schema, &referencing.table)
            .await?;

        let is_reference = foreign_keys.iter().any(|foreign_key| {
            foreign_key.column_name == referencing.column
                && foreign_key.referenced_schema == schema
                && foreign_key.referenced_table == table
                && foreign_key.referenced_column == referenced_column
        });
        if !is_reference {
            return Err(DatabaseError::QueryRejected(format!(
                "Column {}.{}.{} does not reference {}.{}.{}",
                referencing.schema, referencing.table, referencing.column, schema, table, referenced_column
            )));
        }

        let filters = [FilterCondition::new(
            referencing.column.clone(),
            FilterOperator::Equal,
            record_id,
        )];
        let rows = self
            .get_table_data(&referencing.schema, &referencing.table, &filters, pagination)
            .await?;

        Ok(RelatedRows {
            rows,
            relation: RelationInfo {
                source_schema: schema.to_string(),
                source_table: table.to_string(),
                source_column: referenced_column.to_string(),
                target_schema: referencing.schema.clone(),
                target_table: referencing.table.clone(),
                target_column: referencing.column.clone(),
            },
        })
    }
}

/// Reject names that are not columns of the table
fn ensure_columns_exist<'a>(
    types: &ColumnTypes,
    columns: impl IntoIterator<Item = &'a str>,
) -> Result<(), DatabaseError> {
    for column in columns {
        if !types.contains_key(column) {
            return Err(DatabaseError::InvalidColumn(column.to_string()));
        }
    }
    Ok(())
}

fn collect_bulk_outcomes(outcomes: Vec<RecordOutcome>) -> BulkOperationResult {
    let mut result = BulkOperationResult {
        success: true,
        processed_count: 0,
        errors: Vec::new(),
        inserted_rows: Vec::new(),
    };

    for outcome in outcomes {
        match outcome {
            Ok(row) => {
                result.processed_count += 1;
                result.inserted_rows.extend(row);
            }
            Err(errors) => result.errors.extend(errors),
        }
    }

    result.success = result.errors.is_empty();
    result
}

fn read_count(row: &Row, key: &str) -> Option<i64> {
    match row.get(key) {
        Some(Value::Number(number)) => number.as_i64(),
        Some(Value::String(text)) => text.parse().ok(),
        _ => None,
    }
}

/// Render rows as CSV
///
/// The header is the first row's keys in order. Values containing a comma
/// are quoted with embedded quotes doubled; nulls and missing keys are empty.
/// An empty row set renders as an empty string.
pub fn rows_to_csv(rows: &[Row]) -> String {
    let Some(first) = rows.first() else {
        return String::new();
    };

    let headers: Vec<&String> = first.keys().collect();
    let mut lines = Vec::with_capacity(rows.len() + 1);
    lines.push(
        headers
            .iter()
            .map(|header| header.as_str())
            .collect::<Vec<_>>()
            .join(","),
    );

    for row in rows {
        let fields: Vec<String> = headers
            .iter()
            .map(|header| csv_field(row.get(header.as_str())))
            .collect();
        lines.push(fields.join(","));
    }

    lines.join("\n")
}

fn csv_field(value: Option<&Value>) -> String {
    let text = match value {
        None | Some(Value::Null) => return String::new(),
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
    };

    if text.contains(',') {
        format!("\"{}\"", text.replace('"', "\"\""))
    } else {
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::testing::{rows, FakeExecutor};
    use crate::statement::SqlParameter;
    use serde_json::json;

    fn record(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    fn people_columns() -> Value {
        json!([
            {
                "column_name": "id", "data_type": "integer", "udt_schema": "pg_catalog",
                "udt_name": "int4", "is_nullable": false,
                "column_default": "nextval('people_id_seq'::regclass)",
                "max_length": null, "numeric_precision": 32, "numeric_scale": 0,
                "is_auto_generated": false, "is_primary_key": true,
                "foreign_table_schema": null, "foreign_table_name": null, "foreign_column_name": null
            },
            {
                "column_name": "name", "data_type": "character varying", "udt_schema": "pg_catalog",
                "udt_name": "varchar", "is_nullable": false, "column_default": null,
                "max_length": 10, "numeric_precision": null, "numeric_scale": null,
                "is_auto_generated": false, "is_primary_key": false,
                "foreign_table_schema": null, "foreign_table_name": null, "foreign_column_name": null
            },
            {
                "column_name": "team_id", "data_type": "integer", "udt_schema": "pg_catalog",
                "udt_name": "int4", "is_nullable": true, "column_default": null,
                "max_length": null, "numeric_precision": 32, "numeric_scale": 0,
                "is_auto_generated": false, "is_primary_key": false,
                "foreign_table_schema": "public", "foreign_table_name": "teams",
                "foreign_column_name": "id"
            }
        ])
    }

    fn column_types_rows() -> Value {
        json!([
            {"column_name": "id", "data_type": "integer", "udt_schema": "pg_catalog", "udt_name": "int4"},
            {"column_name": "name", "data_type": "character varying", "udt_schema": "pg_catalog", "udt_name": "varchar"},
            {"column_name": "team_id", "data_type": "integer", "udt_schema": "pg_catalog", "udt_name": "int4"}
        ])
    }

    /// A database holding a `public.people` table
    fn people_database() -> FakeExecutor {
        FakeExecutor::new(|statement| {
            let sql = statement.sql.as_str();
            if sql.contains("LEFT JOIN LATERAL") {
                Ok(rows(people_columns()))
            } else if sql.contains("FROM information_schema.columns") {
                Ok(rows(column_types_rows()))
            } else if sql.contains("SELECT COUNT(*) AS total FROM") {
                Ok(rows(json!([{"total": 45}])))
            } else if sql.starts_with("SELECT * FROM \"public\".\"people\"") {
                Ok(rows(json!([
                    {"id": 1, "name": "Ada", "team_id": 2},
                    {"id": 2, "name": "Grace", "team_id": null}
                ])))
            } else if sql.starts_with("INSERT INTO") {
                let mut row = Row::new();
                row.insert("id".into(), json!(99));
                Ok(rows(Value::Array(vec![Value::Object(row)])))
            } else {
                Ok(rows(json!([])))
            }
        })
    }

    #[tokio::test]
    async fn pages_rows_and_computes_total_pages() {
        let engine = DataEngine::new(people_database());
        let pagination = PaginationRequest {
            page: 2,
            limit: 20,
            ..Default::default()
        };
        let filters = vec![FilterCondition::new("name", FilterOperator::Like, "a")];

        let result = engine
            .get_table_data("public", "people", &filters, &pagination)
            .await
            .unwrap();

        assert_eq!(result.total_count, 45);
        assert_eq!(result.total_pages, 3);
        assert!(result.rows.len() as u64 <= result.limit);

        let statements = engine.executor().statements();
        let count = &statements[1];
        let select = &statements[2];
        assert!(count.sql.starts_with("SELECT COUNT(*)"));
        assert_eq!(count.params, vec![SqlParameter::Text(Some("%a%".into()))]);
        assert!(select.sql.ends_with("LIMIT $2 OFFSET $3"));
        assert_eq!(&select.params[..1], &count.params[..]);
        assert_eq!(
            &select.params[1..],
            &[SqlParameter::Integer(20), SqlParameter::Integer(20)]
        );
    }

    #[tokio::test]
    async fn rejects_unknown_filter_and_sort_columns() {
        let engine = DataEngine::new(people_database());
        let filters = vec![FilterCondition::new("salary", FilterOperator::Equal, "1")];
        let error = engine
            .get_table_data("public", "people", &filters, &PaginationRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(error, DatabaseError::InvalidColumn(ref column) if column == "salary"));

        let pagination = PaginationRequest {
            sort_by: Some("nope".into()),
            ..Default::default()
        };
        assert!(engine
            .get_table_data("public", "people", &[], &pagination)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn table_info_lists_primary_keys_in_column_order() {
        let engine = DataEngine::new(people_database());
        let descriptor = engine.get_table_info("public", "people").await.unwrap();

        let expected: Vec<String> = descriptor
            .columns
            .iter()
            .filter(|column| column.is_primary_key)
            .map(|column| column.column_name.clone())
            .collect();
        assert_eq!(descriptor.primary_keys, expected);
        assert_eq!(descriptor.primary_keys, vec!["id"]);
    }

    #[tokio::test]
    async fn bulk_insert_isolates_invalid_record() {
        let engine = DataEngine::new(people_database());
        let records = vec![
            record(json!({"name": "Ada"})),
            record(json!({"name": "Far too long a name"})),
            record(json!({"name": "Linus"})),
        ];

        let result = engine.bulk_insert("public", "people", &records, false).await.unwrap();

        assert!(!result.success);
        assert_eq!(result.processed_count, 2);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].column, "name");
        assert_eq!(result.errors[0].record_index, Some(1));

        let inserts = engine
            .executor()
            .statements()
            .into_iter()
            .filter(|statement| statement.sql.starts_with("INSERT"))
            .collect::<Vec<_>>();
        assert_eq!(inserts.len(), 2);
        assert_eq!(inserts[1].params, vec![SqlParameter::Text(Some("Linus".into()))]);
    }

    #[tokio::test]
    async fn bulk_insert_reports_database_failures_as_general_errors() {
        let engine = DataEngine::new(FakeExecutor::new(|statement| {
            if statement.sql.contains("LEFT JOIN LATERAL") {
                Ok(rows(people_columns()))
            } else if statement.sql.starts_with("INSERT")
                && statement.params.contains(&SqlParameter::Text(Some("dup".into())))
            {
                Err(DatabaseError::Execution(
                    "duplicate key value violates unique constraint".into(),
                ))
            } else {
                Ok(rows(json!([])))
            }
        }));
        let records = vec![
            record(json!({"name": "dup"})),
            record(json!({"name": "fine"})),
        ];

        let result = engine.bulk_insert("public", "people", &records, false).await.unwrap();
        assert_eq!(result.processed_count, 1);
        assert_eq!(result.errors[0].column, GENERAL_ERROR_COLUMN);
        assert_eq!(result.errors[0].value, json!({"name": "dup"}));
        assert!(result.errors[0].message.contains("duplicate key"));
    }

    #[tokio::test]
    async fn bulk_upsert_conflicts_on_primary_key() {
        let engine = DataEngine::new(people_database());
        let records = vec![record(json!({"id": 1, "name": "Ada"}))];

        engine.bulk_insert("public", "people", &records, true).await.unwrap();

        let insert = engine
            .executor()
            .statements()
            .into_iter()
            .find(|statement| statement.sql.starts_with("INSERT"))
            .unwrap();
        assert!(insert.sql.contains("ON CONFLICT (\"id\") DO UPDATE SET \"name\" = EXCLUDED.\"name\""));
    }

    #[tokio::test]
    async fn concurrent_bulk_insert_keeps_input_order() {
        let engine = DataEngine::new(people_database());
        let records = vec![
            record(json!({"name": null})),
            record(json!({"name": "ok"})),
            record(json!({"name": 5})),
            record(json!({"nickname": "x", "name": "ok"})),
        ];

        let result = engine
            .bulk_insert_concurrent("public", "people", &records, false, 0)
            .await
            .unwrap();

        assert_eq!(result.processed_count, 1);
        let indexes: Vec<_> = result.errors.iter().map(|error| error.record_index).collect();
        assert_eq!(indexes, vec![Some(0), Some(2), Some(3)]);
        assert_eq!(result.errors[2].message, "Unknown column");
    }

    #[tokio::test]
    async fn readonly_guard_rejects_before_execution() {
        let engine = DataEngine::new(FakeExecutor::new(|_| Ok(rows(json!([])))));

        let error = engine.execute_query("drop table users", &[], true).await.unwrap_err();
        assert!(matches!(error, DatabaseError::QueryRejected(_)));
        assert!(engine.executor().statements().is_empty());

        engine.execute_query("DROP TABLE users", &[], false).await.unwrap();
        assert_eq!(engine.executor().statements().len(), 1);
    }

    #[tokio::test]
    async fn execute_query_reports_columns_and_row_count() {
        let engine = DataEngine::new(FakeExecutor::new(|_| {
            Ok(rows(json!([{"b": 1, "a": 2}, {"b": 3, "a": 4}])))
        }));

        let result = engine
            .execute_query("SELECT b, a FROM t WHERE a > $1", &[json!(0)], true)
            .await
            .unwrap();
        assert_eq!(result.columns, vec!["b", "a"]);
        assert_eq!(result.row_count, 2);
        assert_eq!(
            engine.executor().statements()[0].params,
            vec![SqlParameter::Text(Some("0".into()))]
        );
    }

    #[tokio::test]
    async fn delete_returns_affected_count() {
        let engine = DataEngine::new(FakeExecutor::new(|statement| {
            if statement.sql.starts_with("DELETE") {
                Ok(crate::database::traits::QueryOutput {
                    rows: vec![],
                    rows_affected: 3,
                })
            } else {
                Ok(rows(column_types_rows()))
            }
        }));

        let deleted = engine
            .delete_record("public", "people", &record(json!({"team_id": 2})))
            .await
            .unwrap();
        assert_eq!(deleted, 3);
    }

    #[tokio::test]
    async fn foreign_key_lookup_is_limited() {
        let engine = DataEngine::new(people_database());
        engine
            .get_foreign_key_data("public", "people", "id", &json!(2))
            .await
            .unwrap();

        let lookup = engine.executor().statements().pop().unwrap();
        assert!(lookup.sql.ends_with("LIMIT 10"));
    }

    #[tokio::test]
    async fn related_rows_follow_the_foreign_key() {
        let engine = DataEngine::new(people_database());
        let related = engine
            .get_related_rows("public", "people", "team_id", "2", &PaginationRequest::default())
            .await
            .unwrap();

        assert_eq!(related.relation.target_table, "teams");
        assert_eq!(related.relation.target_column, "id");

        let error = engine
            .get_related_rows("public", "people", "name", "x", &PaginationRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(error, DatabaseError::QueryRejected(_)));
    }

    #[tokio::test]
    async fn reverse_relation_requires_matching_foreign_key() {
        let engine = DataEngine::new(people_database());
        let referencing = ForeignKeyReference {
            schema: "public".into(),
            table: "people".into(),
            column: "team_id".into(),
        };

        // The fake catalog has no foreign-key list, so nothing references teams
        let error = engine
            .get_reverse_related_rows("public", "teams", "id", "2", &referencing, &PaginationRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(error, DatabaseError::QueryRejected(_)));
    }

    #[tokio::test]
    async fn column_statistics_report_failures_inline() {
        let engine = DataEngine::new(FakeExecutor::new(|statement| {
            let sql = statement.sql.as_str();
            if sql.contains("LEFT JOIN LATERAL") {
                Ok(rows(people_columns()))
            } else if sql.contains("COUNT(\"name\")") {
                Err(DatabaseError::Execution("permission denied".into()))
            } else if sql.contains("non_null_count") {
                Ok(rows(json!([{"total_count": 8, "non_null_count": 6}])))
            } else {
                Ok(rows(json!([])))
            }
        }));

        let statistics = engine.column_statistics("public", "people").await.unwrap();
        assert_eq!(statistics.len(), 3);
        assert_eq!(statistics[0].null_count, Some(2));
        assert_eq!(statistics[0].null_percentage, Some(25.0));
        assert!(statistics[1].error.is_some());
        assert_eq!(statistics[1].total_count, None);
    }

    #[tokio::test]
    async fn search_matches_schema_or_table_name() {
        let engine = DataEngine::new(FakeExecutor::new(|_| {
            Ok(rows(json!([
                {"schema_name": "public", "table_name": "Orders", "estimated_rows": 1},
                {"schema_name": "public", "table_name": "users", "estimated_rows": 2},
                {"schema_name": "billing", "table_name": "invoices", "estimated_rows": 3}
            ])))
        }));

        let found = engine.search_tables("ORD").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].table_name, "Orders");

        let found = engine.search_tables("bill").await.unwrap();
        assert_eq!(found[0].schema_name, "billing");
    }

    #[tokio::test]
    async fn raw_query_binds_numbers_and_booleans_with_their_types() {
        let engine = DataEngine::new(FakeExecutor::new(|_| Ok(rows(json!([{"name": "Ann"}])))));
        engine
            .execute_query(
                "SELECT * FROM people WHERE age > $1 AND score < $2 AND active = $3",
                &[json!(30), json!(9.5), json!(false)],
                true,
            )
            .await
            .unwrap();

        let statement = engine.executor().statements().pop().unwrap();
        assert_eq!(
            statement.params,
            vec![
                SqlParameter::Integer(30),
                SqlParameter::Float(9.5),
                SqlParameter::Boolean(false),
            ]
        );
    }

    #[tokio::test]
    async fn exports_json_array() {
        let engine = DataEngine::new(people_database());
        let text = engine
            .export_table_data("public", "people", &[], ExportFormat::Json)
            .await
            .unwrap();
        let parsed: Vec<Row> = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed.len(), 2);
    }

    #[test]
    fn csv_quotes_commas_and_blanks_nulls() {
        let rows = vec![
            record(json!({"name": "Smith, John", "age": 40, "note": null})),
            record(json!({"name": "say \"hi\", ok", "age": 7, "note": "plain"})),
        ];

        assert_eq!(
            rows_to_csv(&rows),
            "name,age,note\n\"Smith, John\",40,\n\"say \"\"hi\"\", ok\",7,plain"
        );
        assert_eq!(rows_to_csv(&[]), "");
    }
}
