//! Identifier quoting and parameterized statement building
//!
//! Everything in this module is a pure transformation from structured table,
//! filter and payload descriptions into SQL text plus an ordered parameter
//! list. Placeholders are positional (`$1`, `$2`, ...) and always contiguous
//! across a whole statement: every fragment builder takes the index its first
//! placeholder must use.

use crate::database::traits::DatabaseError;
use crate::schema::{CastType, ColumnTypes, FilterCondition, FilterOperator, Row, SortDirection};
use serde_json::Value;

/// Keywords that mark a statement as a write for the readonly guard
pub const WRITE_KEYWORDS: [&str; 7] = [
    "INSERT", "UPDATE", "DELETE", "DROP", "CREATE", "ALTER", "TRUNCATE",
];

/// A value bound to a positional placeholder
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParameter {
    /// Text value (or NULL); the server casts it to the target column type
    Text(Option<String>),

    /// Sequence of text values, bound as a `text[]`; `None` elements are NULL
    TextList(Vec<Option<String>>),

    /// Integer value, used for LIMIT / OFFSET and numeric query parameters
    Integer(i64),

    Float(f64),

    Boolean(bool),
}

/// Complete SQL statement with its parameters
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<SqlParameter>,
}

impl Statement {
    /// A statement without parameters
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    pub fn with_params(sql: impl Into<String>, params: Vec<SqlParameter>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }
}

/// A clause (e.g. WHERE, LIMIT/OFFSET) and the parameters its placeholders refer to
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fragment {
    /// Clause text, empty when the clause is omitted
    pub sql: String,
    pub params: Vec<SqlParameter>,
}

impl Fragment {
    pub fn is_empty(&self) -> bool {
        self.sql.is_empty()
    }

    /// Index the first placeholder of a following fragment must use
    pub fn next_index(&self, first_index: usize) -> usize {
        first_index + self.params.len()
    }
}

/// Parameters collected while building a fragment, numbered from a fixed start
struct ParameterList {
    first_index: usize,
    params: Vec<SqlParameter>,
}

impl ParameterList {
    fn starting_at(first_index: usize) -> Self {
        Self {
            first_index,
            params: Vec::new(),
        }
    }

    /// Add a parameter and return its placeholder index
    fn push(&mut self, parameter: SqlParameter) -> usize {
        self.params.push(parameter);
        self.first_index + self.params.len() - 1
    }
}

/// Quote an identifier, doubling embedded quotes
///
/// Empty identifiers are rejected before they can reach the database.
pub fn quote_identifier(identifier: &str) -> Result<String, DatabaseError> {
    if identifier.is_empty() {
        return Err(DatabaseError::QueryRejected(
            "Identifier must not be empty".to_string(),
        ));
    }

    Ok(format!("\"{}\"", identifier.replace('"', "\"\"")))
}

/// Build a schema-qualified, quoted table reference
pub fn qualified_table(schema: &str, table: &str) -> Result<String, DatabaseError> {
    Ok(format!(
        "{}.{}",
        quote_identifier(schema)?,
        quote_identifier(table)?
    ))
}

/// Whether the text contains any write keyword (case-insensitive)
///
/// This is a lexical scan, not a parser: a keyword inside a string literal or
/// comment also matches, and writes reached through other syntax do not.
pub fn contains_write_operation(sql: &str) -> bool {
    let upper = sql.to_uppercase();
    WRITE_KEYWORDS.iter().any(|keyword| upper.contains(keyword))
}

/// Placeholder for a parameter, cast to the column type when it is known
fn placeholder(index: usize, cast: Option<&CastType>) -> String {
    match cast {
        Some(cast) if cast.is_array => format!("CAST(${} AS {}[])", index, cast.sql),
        Some(cast) => format!("CAST(${} AS {})", index, cast.sql),
        None => format!("${}", index),
    }
}

/// Placeholder for a list parameter compared element-wise against a column
fn list_placeholder(index: usize, cast: Option<&CastType>) -> String {
    match cast {
        Some(cast) => format!("CAST(${} AS {}[])", index, cast.sql),
        None => format!("${}", index),
    }
}

/// Pre-transform a filter value for binding
///
/// IN / NOT IN values are split on commas into a sequence, LIKE / ILIKE
/// values are wrapped in `%` wildcards, anything else is bound unchanged.
pub fn filter_parameter(filter: &FilterCondition) -> SqlParameter {
    match filter.operator {
        FilterOperator::In | FilterOperator::NotIn => SqlParameter::TextList(
            filter
                .value
                .split(',')
                .map(|item| Some(item.trim().to_string()))
                .collect(),
        ),
        FilterOperator::Like | FilterOperator::ILike => {
            SqlParameter::Text(Some(format!("%{}%", filter.value)))
        }
        _ => SqlParameter::Text(Some(filter.value.clone())),
    }
}

/// Convert a JSON payload value into a bound parameter
pub fn payload_parameter(value: &Value, cast: Option<&CastType>) -> SqlParameter {
    match value {
        Value::Null => SqlParameter::Text(None),
        Value::String(text) => SqlParameter::Text(Some(text.clone())),
        Value::Array(items) if cast.is_some_and(|cast| cast.is_array) => SqlParameter::TextList(
            items
                .iter()
                .map(|item| match item {
                    Value::Null => None,
                    Value::String(text) => Some(text.clone()),
                    other => Some(other.to_string()),
                })
                .collect(),
        ),
        other => SqlParameter::Text(Some(other.to_string())),
    }
}

/// Convert a raw query parameter into a bound parameter
///
/// Numbers and booleans keep their wire type so they compare against typed
/// columns without a cast. Arrays and objects are sent as JSON text.
pub fn query_parameter(value: &Value) -> SqlParameter {
    match value {
        Value::Null => SqlParameter::Text(None),
        Value::Bool(flag) => SqlParameter::Boolean(*flag),
        Value::Number(number) => match number.as_i64() {
            Some(integer) => SqlParameter::Integer(integer),
            None => number
                .as_f64()
                .map(SqlParameter::Float)
                .unwrap_or_else(|| SqlParameter::Text(Some(number.to_string()))),
        },
        Value::String(text) => SqlParameter::Text(Some(text.clone())),
        other => SqlParameter::Text(Some(other.to_string())),
    }
}

/// Build a WHERE clause from filter conditions
///
/// Conditions are joined with AND. Returns an empty fragment when there are
/// no filters.
///
/// # Arguments
///
/// * `filters` - Filter conditions in order
/// * `types` - Cast types of the table's columns
/// * `first_index` - Placeholder index of the first parameter
pub fn build_where_clause(
    filters: &[FilterCondition],
    types: &ColumnTypes,
    first_index: usize,
) -> Result<Fragment, DatabaseError> {
    if filters.is_empty() {
        return Ok(Fragment::default());
    }

    let mut params = ParameterList::starting_at(first_index);
    let mut conditions = Vec::with_capacity(filters.len());

    for filter in filters {
        let quoted_column = quote_identifier(&filter.column)?;
        let cast = types.get(&filter.column);
        let index = params.push(filter_parameter(filter));

        let condition = match filter.operator {
            FilterOperator::In => {
                format!("{} = ANY({})", quoted_column, list_placeholder(index, cast))
            }
            FilterOperator::NotIn => {
                format!("{} <> ALL({})", quoted_column, list_placeholder(index, cast))
            }
            FilterOperator::Like | FilterOperator::ILike => format!(
                "CAST({} AS text) {} ${}",
                quoted_column,
                filter.operator.as_sql(),
                index
            ),
            _ => format!(
                "{} {} {}",
                quoted_column,
                filter.operator.as_sql(),
                placeholder(index, cast)
            ),
        };
        conditions.push(condition);
    }

    Ok(Fragment {
        sql: format!("WHERE {}", conditions.join(" AND ")),
        params: params.params,
    })
}

/// Build equality conditions (`"a" = $1 AND "b" IS NULL`) from a column map
fn build_equality_conditions(
    values: &Row,
    types: &ColumnTypes,
    first_index: usize,
) -> Result<Fragment, DatabaseError> {
    let mut params = ParameterList::starting_at(first_index);
    let mut conditions = Vec::with_capacity(values.len());

    for (column, value) in values {
        let quoted_column = quote_identifier(column)?;
        if value.is_null() {
            conditions.push(format!("{} IS NULL", quoted_column));
            continue;
        }

        let cast = types.get(column);
        let index = params.push(payload_parameter(value, cast));
        conditions.push(format!("{} = {}", quoted_column, placeholder(index, cast)));
    }

    Ok(Fragment {
        sql: conditions.join(" AND "),
        params: params.params,
    })
}

/// Build an ORDER BY clause; empty when no sort column is given
pub fn build_order_clause(
    sort_by: Option<&str>,
    direction: SortDirection,
) -> Result<String, DatabaseError> {
    match sort_by {
        Some(column) => Ok(format!(
            "ORDER BY {} {}",
            quote_identifier(column)?,
            direction.as_sql()
        )),
        None => Ok(String::new()),
    }
}

/// Build `LIMIT $n OFFSET $n+1` with OFFSET = (page - 1) * limit
pub fn build_limit_clause(page: u64, limit: u64, first_index: usize) -> Result<Fragment, DatabaseError> {
    if page < 1 {
        return Err(DatabaseError::QueryRejected("Page must be at least 1".to_string()));
    }
    if limit < 1 {
        return Err(DatabaseError::QueryRejected("Limit must be at least 1".to_string()));
    }

    let offset = (page - 1).saturating_mul(limit);
    let limit = i64::try_from(limit)
        .map_err(|_| DatabaseError::QueryRejected("Limit is too large".to_string()))?;
    let offset = i64::try_from(offset)
        .map_err(|_| DatabaseError::QueryRejected("Page is too large".to_string()))?;

    let mut params = ParameterList::starting_at(first_index);
    let limit_index = params.push(SqlParameter::Integer(limit));
    let offset_index = params.push(SqlParameter::Integer(offset));

    Ok(Fragment {
        sql: format!("LIMIT ${} OFFSET ${}", limit_index, offset_index),
        params: params.params,
    })
}

/// Join the non-empty parts of a statement with single spaces
fn join_parts(parts: &[&str]) -> String {
    parts
        .iter()
        .filter(|part| !part.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(" ")
}

/// `SELECT COUNT(*) AS total FROM table [WHERE ...]`
pub fn build_count(table_reference: &str, where_clause: &Fragment) -> Statement {
    Statement::with_params(
        join_parts(&[
            &format!("SELECT COUNT(*) AS total FROM {}", table_reference),
            &where_clause.sql,
        ]),
        where_clause.params.clone(),
    )
}

/// `SELECT * FROM table [WHERE ...] [ORDER BY ...] [LIMIT ... OFFSET ...]`
///
/// The limit fragment must have been numbered after the WHERE parameters.
pub fn build_select(
    table_reference: &str,
    where_clause: &Fragment,
    order_clause: &str,
    limit_clause: Option<&Fragment>,
) -> Statement {
    let mut params = where_clause.params.clone();
    let limit_sql = match limit_clause {
        Some(limit) => {
            params.extend(limit.params.iter().cloned());
            limit.sql.as_str()
        }
        None => "",
    };

    Statement::with_params(
        join_parts(&[
            &format!("SELECT * FROM {}", table_reference),
            &where_clause.sql,
            order_clause,
            limit_sql,
        ]),
        params,
    )
}

/// Single-row INSERT ... RETURNING *, optionally as an upsert
///
/// # Arguments
///
/// * `table_reference` - Qualified, quoted table name
/// * `payload` - Column values to insert
/// * `types` - Cast types of the table's columns
/// * `conflict_keys` - Primary key columns; turns the insert into an upsert
pub fn build_insert(
    table_reference: &str,
    payload: &Row,
    types: &ColumnTypes,
    conflict_keys: Option<&[String]>,
) -> Result<Statement, DatabaseError> {
    if payload.is_empty() {
        return Ok(Statement::new(format!(
            "INSERT INTO {} DEFAULT VALUES RETURNING *",
            table_reference
        )));
    }

    let mut params = ParameterList::starting_at(1);
    let mut columns = Vec::with_capacity(payload.len());
    let mut placeholders = Vec::with_capacity(payload.len());

    for (column, value) in payload {
        let cast = types.get(column);
        columns.push(quote_identifier(column)?);
        let index = params.push(payload_parameter(value, cast));
        placeholders.push(placeholder(index, cast));
    }

    let mut sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        table_reference,
        columns.join(", "),
        placeholders.join(", ")
    );

    if let Some(keys) = conflict_keys.filter(|keys| !keys.is_empty()) {
        let conflict_columns = keys
            .iter()
            .map(|key| quote_identifier(key))
            .collect::<Result<Vec<_>, _>>()?;

        let updates = payload
            .keys()
            .filter(|column| !keys.contains(column))
            .map(|column| {
                let quoted = quote_identifier(column)?;
                Ok(format!("{} = EXCLUDED.{}", quoted, quoted))
            })
            .collect::<Result<Vec<_>, DatabaseError>>()?;

        sql.push_str(&format!(" ON CONFLICT ({})", conflict_columns.join(", ")));
        if updates.is_empty() {
            sql.push_str(" DO NOTHING");
        } else {
            sql.push_str(&format!(" DO UPDATE SET {}", updates.join(", ")));
        }
    }

    sql.push_str(" RETURNING *");
    Ok(Statement::with_params(sql, params.params))
}

/// UPDATE ... SET ... WHERE ... RETURNING *
///
/// SET parameters come first, WHERE parameters continue the numbering.
pub fn build_update(
    table_reference: &str,
    data: &Row,
    where_values: &Row,
    types: &ColumnTypes,
) -> Result<Statement, DatabaseError> {
    if data.is_empty() {
        return Err(DatabaseError::QueryRejected("No columns to update".to_string()));
    }
    if where_values.is_empty() {
        return Err(DatabaseError::QueryRejected(
            "Update requires at least one WHERE condition".to_string(),
        ));
    }

    let mut params = ParameterList::starting_at(1);
    let mut assignments = Vec::with_capacity(data.len());
    for (column, value) in data {
        let cast = types.get(column);
        let index = params.push(payload_parameter(value, cast));
        assignments.push(format!("{} = {}", quote_identifier(column)?, placeholder(index, cast)));
    }

    let conditions = build_equality_conditions(where_values, types, params.first_index + params.params.len())?;
    let mut all_params = params.params;
    all_params.extend(conditions.params);

    Ok(Statement::with_params(
        format!(
            "UPDATE {} SET {} WHERE {} RETURNING *",
            table_reference,
            assignments.join(", "),
            conditions.sql
        ),
        all_params,
    ))
}

/// DELETE FROM ... WHERE ...
pub fn build_delete(
    table_reference: &str,
    where_values: &Row,
    types: &ColumnTypes,
) -> Result<Statement, DatabaseError> {
    if where_values.is_empty() {
        return Err(DatabaseError::QueryRejected(
            "Delete requires at least one WHERE condition".to_string(),
        ));
    }

    let conditions = build_equality_conditions(where_values, types, 1)?;
    Ok(Statement::with_params(
        format!("DELETE FROM {} WHERE {}", table_reference, conditions.sql),
        conditions.params,
    ))
}

/// `SELECT * FROM table WHERE column = value LIMIT n`
pub fn build_lookup(
    table_reference: &str,
    column: &str,
    value: &Value,
    types: &ColumnTypes,
    limit: u32,
) -> Result<Statement, DatabaseError> {
    let mut lookup = Row::new();
    lookup.insert(column.to_string(), value.clone());
    let conditions = build_equality_conditions(&lookup, types, 1)?;

    Ok(Statement::with_params(
        format!(
            "SELECT * FROM {} WHERE {} LIMIT {}",
            table_reference, conditions.sql, limit
        ),
        conditions.params,
    ))
}

/// Total and non-null counts for one column
pub fn build_null_statistics(table_reference: &str, column: &str) -> Result<Statement, DatabaseError> {
    Ok(Statement::new(format!(
        "SELECT COUNT(*) AS total_count, COUNT({}) AS non_null_count FROM {}",
        quote_identifier(column)?,
        table_reference
    )))
}
