//! PostgreSQL statement executor

use crate::database::traits::{DatabaseError, QueryOutput, StatementExecutor};
use crate::schema::Row as JsonRow;
use crate::statement::{SqlParameter, Statement};
use async_trait::async_trait;
use futures::TryStreamExt;
use serde_json::Value;
use sqlx::postgres::types::{PgInterval, PgMoney, PgTimeTz};
use sqlx::postgres::{PgArguments, PgRow, PgTypeKind};
use sqlx::query::Query;
use sqlx::types::chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use sqlx::types::{Decimal, Uuid};
use sqlx::{Column, Either, Executor, PgPool, Postgres, Row, TypeInfo, ValueRef};

/// Executes statements on a PostgreSQL connection pool
#[derive(Clone)]
pub struct PgExecutor {
    pool: PgPool,
}

impl PgExecutor {
    /// Create a new PostgreSQL executor
    ///
    /// # Arguments
    ///
    /// * `pool` - PostgreSQL connection pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl StatementExecutor for PgExecutor {
    async fn query(&self, statement: &Statement) -> Result<QueryOutput, DatabaseError> {
        let query = statement
            .params
            .iter()
            .fold(sqlx::query(&statement.sql), bind_parameter);

        let mut output = QueryOutput::default();
        let mut stream = self.pool.fetch_many(query);
        while let Some(item) = stream.try_next().await? {
            match item {
                Either::Left(result) => output.rows_affected += result.rows_affected(),
                Either::Right(row) => output.rows.push(row_to_json(&row)?),
            }
        }

        Ok(output)
    }
}

/// Bind one parameter to a query
fn bind_parameter<'q>(
    query: Query<'q, Postgres, PgArguments>,
    parameter: &SqlParameter,
) -> Query<'q, Postgres, PgArguments> {
    match parameter {
        SqlParameter::Text(value) => query.bind(value.clone()),
        SqlParameter::TextList(values) => query.bind(values.clone()),
        SqlParameter::Integer(value) => query.bind(*value),
        SqlParameter::Float(value) => query.bind(*value),
        SqlParameter::Boolean(value) => query.bind(*value),
    }
}

fn number_or_null(value: Option<f64>) -> Value {
    value
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

fn string_or_null(value: Option<String>) -> Value {
    value.map(Value::String).unwrap_or(Value::Null)
}

/// Arrays keep their NULL elements
fn array_or_null<T>(value: Option<Vec<Option<T>>>, convert: impl Fn(T) -> Value) -> Value {
    value
        .map(|items| {
            Value::Array(
                items
                    .into_iter()
                    .map(|item| item.map(&convert).unwrap_or(Value::Null))
                    .collect(),
            )
        })
        .unwrap_or(Value::Null)
}

fn plural(value: i64, unit: &str) -> String {
    if value == 1 {
        format!("{value} {unit}")
    } else {
        format!("{value} {unit}s")
    }
}

/// Render an interval the way psql prints it, e.g. `1 year 2 mons 3 days 04:05:06.5`
pub fn format_interval(interval: &PgInterval) -> String {
    let mut parts = Vec::new();
    let years = i64::from(interval.months / 12);
    let months = i64::from(interval.months % 12);
    if years != 0 {
        parts.push(plural(years, "year"));
    }
    if months != 0 {
        parts.push(plural(months, "mon"));
    }
    if interval.days != 0 {
        parts.push(plural(i64::from(interval.days), "day"));
    }

    if interval.microseconds != 0 || parts.is_empty() {
        let sign = if interval.microseconds < 0 { "-" } else { "" };
        let total = interval.microseconds.unsigned_abs();
        let seconds = total / 1_000_000;
        let fraction = total % 1_000_000;
        let mut clock = format!(
            "{sign}{:02}:{:02}:{:02}",
            seconds / 3600,
            (seconds / 60) % 60,
            seconds % 60
        );
        if fraction != 0 {
            let digits = format!("{fraction:06}");
            clock.push('.');
            clock.push_str(digits.trim_end_matches('0'));
        }
        parts.push(clock);
    }

    parts.join(" ")
}

/// Convert a PostgreSQL row to a JSON object
pub fn row_to_json(row: &PgRow) -> Result<JsonRow, DatabaseError> {
    let mut map = serde_json::Map::new();

    for (index, column) in row.columns().iter().enumerate() {
        let column_name = column.name();
        let type_name = column.type_info().name();

        let value: Value = match type_name {
            "BOOL" => {
                let val: Option<bool> = row.try_get(index)?;
                val.map(Value::Bool).unwrap_or(Value::Null)
            }
            "INT2" => {
                let val: Option<i16> = row.try_get(index)?;
                val.map(|v| Value::Number(v.into())).unwrap_or(Value::Null)
            }
            "INT4" => {
                let val: Option<i32> = row.try_get(index)?;
                val.map(|v| Value::Number(v.into())).unwrap_or(Value::Null)
            }
            "INT8" => {
                let val: Option<i64> = row.try_get(index)?;
                val.map(|v| Value::Number(v.into())).unwrap_or(Value::Null)
            }
            "OID" => {
                let val: Option<sqlx::postgres::types::Oid> = row.try_get(index)?;
                val.map(|v| Value::Number(v.0.into())).unwrap_or(Value::Null)
            }
            "FLOAT4" => {
                let val: Option<f32> = row.try_get(index)?;
                number_or_null(val.map(f64::from))
            }
            "FLOAT8" => {
                let val: Option<f64> = row.try_get(index)?;
                number_or_null(val)
            }
            "NUMERIC" => {
                // Keep precision by rendering as text
                let val: Option<Decimal> = row.try_get(index)?;
                string_or_null(val.map(|v| v.to_string()))
            }
            "TEXT" | "VARCHAR" | "CHAR" | "NAME" | "BPCHAR" | "CITEXT" => {
                let val: Option<String> = row.try_get(index)?;
                string_or_null(val)
            }
            "BYTEA" => {
                let val: Option<Vec<u8>> = row.try_get(index)?;
                string_or_null(val.map(|bytes| format!("[BLOB: {} bytes]", bytes.len())))
            }
            "TIMESTAMPTZ" => {
                let val: Option<DateTime<Utc>> = row.try_get(index)?;
                string_or_null(val.map(|v| v.to_rfc3339()))
            }
            "TIMESTAMP" => {
                let val: Option<NaiveDateTime> = row.try_get(index)?;
                string_or_null(val.map(|v| v.to_string()))
            }
            "DATE" => {
                let val: Option<NaiveDate> = row.try_get(index)?;
                string_or_null(val.map(|v| v.to_string()))
            }
            "TIME" => {
                let val: Option<NaiveTime> = row.try_get(index)?;
                string_or_null(val.map(|v| v.to_string()))
            }
            "JSON" | "JSONB" => {
                let val: Option<Value> = row.try_get(index)?;
                val.unwrap_or(Value::Null)
            }
            "UUID" => {
                let val: Option<Uuid> = row.try_get(index)?;
                string_or_null(val.map(|v| v.to_string()))
            }
            "INTERVAL" => {
                let val: Option<PgInterval> = row.try_get(index)?;
                string_or_null(val.as_ref().map(format_interval))
            }
            "TIMETZ" => {
                let val: Option<PgTimeTz<NaiveTime, FixedOffset>> = row.try_get(index)?;
                string_or_null(val.map(|v| format!("{}{}", v.time, v.offset)))
            }
            "MONEY" => {
                let val: Option<PgMoney> = row.try_get(index)?;
                string_or_null(val.map(|v| Decimal::new(v.0, 2).to_string()))
            }
            "BOOL[]" => {
                let val: Option<Vec<Option<bool>>> = row.try_get(index)?;
                array_or_null(val, Value::Bool)
            }
            "INT2[]" => {
                let val: Option<Vec<Option<i16>>> = row.try_get(index)?;
                array_or_null(val, Value::from)
            }
            "INT4[]" => {
                let val: Option<Vec<Option<i32>>> = row.try_get(index)?;
                array_or_null(val, Value::from)
            }
            "INT8[]" => {
                let val: Option<Vec<Option<i64>>> = row.try_get(index)?;
                array_or_null(val, Value::from)
            }
            "FLOAT4[]" => {
                let val: Option<Vec<Option<f32>>> = row.try_get(index)?;
                array_or_null(val, |v| number_or_null(Some(f64::from(v))))
            }
            "FLOAT8[]" => {
                let val: Option<Vec<Option<f64>>> = row.try_get(index)?;
                array_or_null(val, |v| number_or_null(Some(v)))
            }
            "NUMERIC[]" => {
                let val: Option<Vec<Option<Decimal>>> = row.try_get(index)?;
                array_or_null(val, |v| Value::String(v.to_string()))
            }
            "UUID[]" => {
                let val: Option<Vec<Option<Uuid>>> = row.try_get(index)?;
                array_or_null(val, |v| Value::String(v.to_string()))
            }
            "TEXT[]" | "VARCHAR[]" | "NAME[]" | "BPCHAR[]" => {
                let val: Option<Vec<Option<String>>> = row.try_get(index)?;
                array_or_null(val, Value::String)
            }
            _ if matches!(column.type_info().kind(), PgTypeKind::Enum(_)) => {
                // Enum labels travel as plain text in the binary protocol
                let val: Option<String> = row
                    .try_get_unchecked::<Option<String>, _>(index)
                    .ok()
                    .flatten();
                string_or_null(val)
            }
            _ => match row.try_get::<Option<String>, _>(index) {
                Ok(val) => string_or_null(val),
                Err(_) if row.try_get_raw(index)?.is_null() => Value::Null,
                Err(_) => Value::String(format!("[{type_name}]")),
            },
        };

        map.insert(column_name.to_string(), value);
    }

    Ok(map)
}
