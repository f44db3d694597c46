//! Schema types for dynamic database introspection and data access
//!
//! These types describe database objects discovered at runtime and the
//! requests/results of the data operations. Descriptors are rebuilt on every
//! call and must not be assumed fresh beyond a single request.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A JSON object representing one database row, keyed by column name in
/// result-set order
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Complete descriptor for a database table
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableDescriptor {
    /// Schema containing the table
    pub schema_name: String,

    /// Name of the table
    pub table_name: String,

    /// Estimated row count from catalog statistics (not an exact count)
    pub row_count: i64,

    /// Columns in ordinal order
    pub columns: Vec<ColumnDescriptor>,

    /// Primary key column names, in column order
    pub primary_keys: Vec<String>,

    /// Foreign key constraints
    pub foreign_keys: Vec<ForeignKeyDescriptor>,

    /// Index definitions
    pub indexes: Vec<IndexDescriptor>,
}

impl TableDescriptor {
    /// Look up a column by name
    pub fn column(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|column| column.column_name == name)
    }

    /// Cast types for every column, for typed parameter binding
    pub fn column_types(&self) -> ColumnTypes {
        self.columns
            .iter()
            .map(|column| (column.column_name.clone(), column.cast_type()))
            .collect()
    }
}

/// Column name to SQL cast type (e.g. `"pg_catalog"."int4"`)
pub type ColumnTypes = std::collections::HashMap<String, CastType>;

/// Type name used to cast a text parameter to a column's type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CastType {
    /// Quoted, schema-qualified type name
    pub sql: String,

    /// Whether the column is an array type
    pub is_array: bool,
}

impl CastType {
    /// Cast type from the catalog's `udt_schema`, `udt_name` and `data_type`
    ///
    /// Array columns report their element type with a `_` prefix.
    pub fn from_catalog(udt_schema: &str, udt_name: &str, data_type: &str) -> Self {
        let (name, is_array) = match udt_name.strip_prefix('_') {
            Some(element) if data_type == "ARRAY" => (element, true),
            _ => (udt_name, false),
        };

        Self {
            sql: format!(
                "\"{}\".\"{}\"",
                udt_schema.replace('"', "\"\""),
                name.replace('"', "\"\"")
            ),
            is_array,
        }
    }
}

/// Information about a single column
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnDescriptor {
    /// Column name
    pub column_name: String,

    /// SQL data type as reported by the catalog (e.g. "integer", "character varying")
    pub data_type: String,

    /// Validation family derived from the data type
    pub type_family: TypeFamily,

    /// Schema of the underlying type
    pub udt_schema: String,

    /// Name of the underlying type (e.g. "int4", "_text")
    pub udt_name: String,

    /// Whether the column allows NULL values
    pub is_nullable: bool,

    /// Default value expression (if any)
    pub default_value: Option<String>,

    /// Declared maximum character length
    pub max_length: Option<i64>,

    /// Declared numeric precision
    pub numeric_precision: Option<i64>,

    /// Declared numeric scale
    pub numeric_scale: Option<i64>,

    /// Identity, generated or sequence-backed column
    pub is_auto_generated: bool,

    /// Whether this column is part of the primary key
    pub is_primary_key: bool,

    /// Whether this column references another table
    pub is_foreign_key: bool,

    /// Referenced column, present exactly when `is_foreign_key` is set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub references: Option<ForeignKeyReference>,
}

impl ColumnDescriptor {
    /// The type to cast bound text parameters to for this column
    pub fn cast_type(&self) -> CastType {
        CastType::from_catalog(&self.udt_schema, &self.udt_name, &self.data_type)
    }
}

/// Target of a foreign key column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForeignKeyReference {
    pub schema: String,
    pub table: String,
    pub column: String,
}

/// Coarse type classification used by record validation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TypeFamily {
    Integer,
    Numeric,
    Text,
    Boolean,
    Date,
    Timestamp,
    Other,
}

impl TypeFamily {
    /// Classify a catalog `data_type` string
    pub fn from_data_type(data_type: &str) -> Self {
        match data_type.to_ascii_lowercase().as_str() {
            "integer" | "bigint" | "smallint" => TypeFamily::Integer,
            "numeric" | "decimal" | "real" | "double precision" => TypeFamily::Numeric,
            "character varying" | "varchar" | "text" | "character" | "char" => TypeFamily::Text,
            "boolean" => TypeFamily::Boolean,
            "date" => TypeFamily::Date,
            "timestamp" | "timestamp without time zone" | "timestamp with time zone" => {
                TypeFamily::Timestamp
            }
            _ => TypeFamily::Other,
        }
    }
}

/// Foreign key constraint information
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForeignKeyDescriptor {
    /// Constraint name
    pub constraint_name: String,

    /// Column name in this table
    pub column_name: String,

    /// Referenced schema
    pub referenced_schema: String,

    /// Referenced table name
    pub referenced_table: String,

    /// Referenced column name
    pub referenced_column: String,
}

/// Index information
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexDescriptor {
    /// Index name
    pub index_name: String,

    /// Columns (or expressions) included in the index
    pub columns: Vec<String>,

    /// Whether the index enforces uniqueness
    pub is_unique: bool,

    /// Whether the index backs the primary key
    pub is_primary: bool,
}

/// A schema and its tables (for listing)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaSummary {
    pub schema_name: String,
    pub tables: Vec<TableSummary>,
}

/// A table within a schema listing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSummary {
    pub table_name: String,

    /// Estimated row count
    pub row_count: i64,
}

/// A table matched by a name search
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSearchResult {
    pub schema_name: String,
    pub table_name: String,
    pub row_count: i64,
}

/// Comparison operator of a filter condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterOperator {
    #[serde(rename = "=")]
    Equal,
    #[serde(rename = "!=")]
    NotEqual,
    #[serde(rename = ">")]
    GreaterThan,
    #[serde(rename = "<")]
    LessThan,
    #[serde(rename = ">=")]
    GreaterThanOrEqual,
    #[serde(rename = "<=")]
    LessThanOrEqual,
    #[serde(rename = "LIKE")]
    Like,
    #[serde(rename = "ILIKE")]
    ILike,
    #[serde(rename = "IN")]
    In,
    #[serde(rename = "NOT IN")]
    NotIn,
}

impl FilterOperator {
    /// SQL spelling of the operator
    pub fn as_sql(&self) -> &'static str {
        match self {
            FilterOperator::Equal => "=",
            FilterOperator::NotEqual => "!=",
            FilterOperator::GreaterThan => ">",
            FilterOperator::LessThan => "<",
            FilterOperator::GreaterThanOrEqual => ">=",
            FilterOperator::LessThanOrEqual => "<=",
            FilterOperator::Like => "LIKE",
            FilterOperator::ILike => "ILIKE",
            FilterOperator::In => "IN",
            FilterOperator::NotIn => "NOT IN",
        }
    }
}

impl fmt::Display for FilterOperator {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_sql())
    }
}

impl FromStr for FilterOperator {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.split_whitespace().collect::<Vec<_>>().join(" ").to_uppercase();
        match normalized.as_str() {
            "=" => Ok(FilterOperator::Equal),
            "!=" | "<>" => Ok(FilterOperator::NotEqual),
            ">" => Ok(FilterOperator::GreaterThan),
            "<" => Ok(FilterOperator::LessThan),
            ">=" => Ok(FilterOperator::GreaterThanOrEqual),
            "<=" => Ok(FilterOperator::LessThanOrEqual),
            "LIKE" => Ok(FilterOperator::Like),
            "ILIKE" => Ok(FilterOperator::ILike),
            "IN" => Ok(FilterOperator::In),
            "NOT IN" => Ok(FilterOperator::NotIn),
            _ => Err(format!("Unsupported filter operator: {}", value)),
        }
    }
}

/// How a filter joins the previous one
///
/// Only AND is applied today; OR is accepted and treated as AND.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogicalOperator {
    #[default]
    And,
    Or,
}

/// A single column filter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterCondition {
    /// Column to filter on
    pub column: String,

    /// Comparison operator
    pub operator: FilterOperator,

    /// Raw filter value; comma separated for IN / NOT IN
    pub value: String,

    #[serde(default)]
    pub logical_operator: LogicalOperator,
}

impl FilterCondition {
    pub fn new(column: impl Into<String>, operator: FilterOperator, value: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            operator,
            value: value.into(),
            logical_operator: LogicalOperator::And,
        }
    }
}

/// Sort direction for row queries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

/// Page, page size and ordering for a row query
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginationRequest {
    /// 1-based page number
    #[serde(default = "default_page")]
    pub page: u64,

    /// Rows per page
    #[serde(default = "default_limit")]
    pub limit: u64,

    /// Column name to sort by
    pub sort_by: Option<String>,

    #[serde(default)]
    pub sort_direction: SortDirection,
}

impl Default for PaginationRequest {
    fn default() -> Self {
        Self {
            page: default_page(),
            limit: default_limit(),
            sort_by: None,
            sort_direction: SortDirection::Asc,
        }
    }
}

fn default_page() -> u64 {
    1
}

fn default_limit() -> u64 {
    50
}

/// One page of rows plus pagination metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginatedResult {
    pub rows: Vec<Row>,
    pub page: u64,
    pub limit: u64,

    /// Rows matching the filters across all pages
    pub total_count: u64,

    /// `ceil(total_count / limit)`
    pub total_pages: u64,
}

/// A per-field (or per-record) problem found while inserting data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationError {
    /// Offending column, or "general" for database failures
    pub column: String,

    /// The rejected value (the whole record for database failures)
    pub value: serde_json::Value,

    pub message: String,

    /// Position of the record in a bulk request
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_index: Option<usize>,
}

/// Outcome of a bulk insert
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkOperationResult {
    /// True when no record produced an error
    pub success: bool,

    /// Records written successfully
    pub processed_count: usize,

    /// Errors in input order
    pub errors: Vec<ValidationError>,

    /// Rows returned by the successful inserts
    pub inserted_rows: Vec<Row>,
}

/// Result from executing a raw query
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    /// Column names in the result
    pub columns: Vec<String>,

    /// Rows returned (empty for statements without a result set)
    pub rows: Vec<Row>,

    /// Rows returned or affected
    pub row_count: u64,

    /// Query execution time in milliseconds
    pub execution_time_milliseconds: u64,
}

/// Serialization format for exports
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Csv,
    Json,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Json => "json",
        }
    }
}

/// Null statistics for a single column
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnStatistics {
    pub column_name: String,
    pub data_type: String,
    pub total_count: Option<i64>,
    pub non_null_count: Option<i64>,
    pub null_count: Option<i64>,

    /// Share of NULL values, rounded to two decimals
    pub null_percentage: Option<f64>,

    /// Set when the statistics query for this column failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Rows of a table reached by following a foreign key
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelatedRows {
    pub rows: PaginatedResult,
    pub relation: RelationInfo,
}

/// Source and target of a followed relation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationInfo {
    pub source_schema: String,
    pub source_table: String,
    pub source_column: String,
    pub target_schema: String,
    pub target_table: String,
    pub target_column: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_operator_parses_sql_spellings() {
        assert_eq!("not  in".parse::<FilterOperator>(), Ok(FilterOperator::NotIn));
        assert_eq!("ilike".parse::<FilterOperator>(), Ok(FilterOperator::ILike));
        assert_eq!("<>".parse::<FilterOperator>(), Ok(FilterOperator::NotEqual));
        assert!("BETWEEN".parse::<FilterOperator>().is_err());
    }

    #[test]
    fn filter_condition_deserializes_with_default_join() {
        let filter: FilterCondition =
            serde_json::from_str(r#"{"column":"id","operator":"NOT IN","value":"1,2"}"#).unwrap();
        assert_eq!(filter.operator, FilterOperator::NotIn);
        assert_eq!(filter.logical_operator, LogicalOperator::And);
    }

    #[test]
    fn type_family_classifies_catalog_types() {
        assert_eq!(TypeFamily::from_data_type("bigint"), TypeFamily::Integer);
        assert_eq!(TypeFamily::from_data_type("double precision"), TypeFamily::Numeric);
        assert_eq!(TypeFamily::from_data_type("character varying"), TypeFamily::Text);
        assert_eq!(TypeFamily::from_data_type("timestamp with time zone"), TypeFamily::Timestamp);
        assert_eq!(TypeFamily::from_data_type("jsonb"), TypeFamily::Other);
    }

    #[test]
    fn array_columns_cast_to_element_type() {
        let column = ColumnDescriptor {
            column_name: "tags".into(),
            data_type: "ARRAY".into(),
            type_family: TypeFamily::Other,
            udt_schema: "pg_catalog".into(),
            udt_name: "_text".into(),
            is_nullable: true,
            default_value: None,
            max_length: None,
            numeric_precision: None,
            numeric_scale: None,
            is_auto_generated: false,
            is_primary_key: false,
            is_foreign_key: false,
            references: None,
        };

        let cast = column.cast_type();
        assert_eq!(cast.sql, "\"pg_catalog\".\"text\"");
        assert!(cast.is_array);
    }

    #[test]
    fn catalog_cast_type_quotes_names_and_keeps_underscored_scalars() {
        let cast = CastType::from_catalog("my\"schema", "_status", "USER-DEFINED");
        assert_eq!(cast.sql, "\"my\"\"schema\".\"_status\"");
        assert!(!cast.is_array);

        let cast = CastType::from_catalog("public", "_mood", "ARRAY");
        assert_eq!(cast.sql, "\"public\".\"mood\"");
        assert!(cast.is_array);
    }
}
