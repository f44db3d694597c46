//! Record validation against a table descriptor
//!
//! Validation is advisory: it never mutates the record and runs per record,
//! so one record's failure does not affect another.

use crate::schema::{ColumnDescriptor, Row, TableDescriptor, TypeFamily, ValidationError};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;

pub const REQUIRED_MESSAGE: &str = "Field is required";

/// Check a candidate record against the table's column constraints
///
/// Returns one entry per problem found; an empty list means the record is
/// valid.
pub fn validate_record(record: &Row, table: &TableDescriptor) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    for column in &table.columns {
        let value = record.get(&column.column_name);

        if is_missing_required(column, value) {
            errors.push(ValidationError {
                column: column.column_name.clone(),
                value: value.cloned().unwrap_or(Value::Null),
                message: REQUIRED_MESSAGE.to_string(),
                record_index: None,
            });
            continue;
        }

        if let Some(value) = value.filter(|value| !value.is_null()) {
            if let Some(message) = validate_value(value, column) {
                errors.push(ValidationError {
                    column: column.column_name.clone(),
                    value: value.clone(),
                    message,
                    record_index: None,
                });
            }
        }
    }

    errors
}

/// An explicit null in a NOT NULL column is always an error; an omitted value
/// is only an error when the database has nothing to fill it with.
fn is_missing_required(column: &ColumnDescriptor, value: Option<&Value>) -> bool {
    if column.is_nullable {
        return false;
    }

    match value {
        Some(Value::Null) => true,
        Some(_) => false,
        None => column.default_value.is_none() && !column.is_auto_generated,
    }
}

/// Check a present value against its column's type family
pub fn validate_value(value: &Value, column: &ColumnDescriptor) -> Option<String> {
    match column.type_family {
        TypeFamily::Integer => (!is_integer(value)).then(|| "Value must be an integer".to_string()),
        TypeFamily::Numeric => (!is_number(value)).then(|| "Value must be a number".to_string()),
        TypeFamily::Text => match value {
            Value::String(text) => match column.max_length {
                Some(max_length) if text.chars().count() as i64 > max_length => {
                    Some(format!("Value exceeds maximum length of {}", max_length))
                }
                _ => None,
            },
            _ => Some("Value must be a string".to_string()),
        },
        TypeFamily::Boolean => match value {
            Value::Bool(_) => None,
            Value::String(text) if text == "true" || text == "false" => None,
            _ => Some("Value must be true or false".to_string()),
        },
        TypeFamily::Date => (!is_date_time(value)).then(|| "Value must be a valid date".to_string()),
        TypeFamily::Timestamp => {
            (!is_date_time(value)).then(|| "Value must be a valid timestamp".to_string())
        }
        TypeFamily::Other => None,
    }
}

fn is_integer(value: &Value) -> bool {
    match value {
        Value::Number(number) => {
            number.is_i64()
                || number.is_u64()
                || number.as_f64().is_some_and(|float| float.is_finite() && float.fract() == 0.0)
        }
        Value::String(text) => {
            let text = text.trim();
            text.parse::<i128>().is_ok()
                || text
                    .parse::<f64>()
                    .is_ok_and(|float| float.is_finite() && float.fract() == 0.0)
        }
        _ => false,
    }
}

fn is_number(value: &Value) -> bool {
    match value {
        Value::Number(_) => true,
        Value::String(text) => text.trim().parse::<f64>().is_ok_and(|float| !float.is_nan()),
        _ => false,
    }
}

/// Accepts RFC 3339, `YYYY-MM-DD`, `YYYY-MM-DD[ T]HH:MM:SS[.f]` and epoch milliseconds
fn is_date_time(value: &Value) -> bool {
    match value {
        Value::Number(number) => number
            .as_i64()
            .is_some_and(|millis| DateTime::<Utc>::from_timestamp_millis(millis).is_some()),
        Value::String(text) => parse_date_time(text.trim()),
        _ => false,
    }
}

fn parse_date_time(text: &str) -> bool {
    const NAIVE_FORMATS: [&str; 4] = [
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M",
    ];

    DateTime::parse_from_rfc3339(text).is_ok()
        || DateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f%#z").is_ok()
        || NaiveDate::parse_from_str(text, "%Y-%m-%d").is_ok()
        || NAIVE_FORMATS
            .iter()
            .any(|format| NaiveDateTime::parse_from_str(text, format).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn column(name: &str, data_type: &str) -> ColumnDescriptor {
        ColumnDescriptor {
            column_name: name.to_string(),
            data_type: data_type.to_string(),
            type_family: TypeFamily::from_data_type(data_type),
            udt_schema: "pg_catalog".to_string(),
            udt_name: data_type.to_string(),
            is_nullable: true,
            default_value: None,
            max_length: None,
            numeric_precision: None,
            numeric_scale: None,
            is_auto_generated: false,
            is_primary_key: false,
            is_foreign_key: false,
            references: None,
        }
    }

    fn table(columns: Vec<ColumnDescriptor>) -> TableDescriptor {
        TableDescriptor {
            schema_name: "public".into(),
            table_name: "things".into(),
            row_count: 0,
            primary_keys: vec![],
            foreign_keys: vec![],
            indexes: vec![],
            columns,
        }
    }

    fn record(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn missing_required_column_yields_single_error() {
        let mut name = column("name", "text");
        name.is_nullable = false;
        let descriptor = table(vec![name, column("note", "text")]);

        let errors = validate_record(&record(json!({"note": "hi"})), &descriptor);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].column, "name");
        assert_eq!(errors[0].message, "Field is required");
    }

    #[test]
    fn omitted_column_with_default_is_not_required() {
        let mut id = column("id", "integer");
        id.is_nullable = false;
        id.default_value = Some("nextval('things_id_seq'::regclass)".into());
        let mut created = column("created_at", "timestamp with time zone");
        created.is_nullable = false;
        created.is_auto_generated = true;
        let descriptor = table(vec![id, created]);

        assert!(validate_record(&Row::new(), &descriptor).is_empty());
        let errors = validate_record(&record(json!({"id": null})), &descriptor);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].message, REQUIRED_MESSAGE);
    }

    #[test]
    fn string_one_character_too_long_yields_length_error() {
        let mut code = column("code", "character varying");
        code.max_length = Some(10);
        let descriptor = table(vec![code]);

        let errors = validate_record(&record(json!({"code": "abcdefghijk"})), &descriptor);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].message, "Value exceeds maximum length of 10");
        assert!(validate_record(&record(json!({"code": "abcdefghij"})), &descriptor).is_empty());
    }

    #[test]
    fn checks_integer_and_numeric_families() {
        let integer = column("count", "bigint");
        assert_eq!(validate_value(&json!(3), &integer), None);
        assert_eq!(validate_value(&json!("42"), &integer), None);
        assert_eq!(validate_value(&json!(2.0), &integer), None);
        assert!(validate_value(&json!(2.5), &integer).is_some());
        assert!(validate_value(&json!("four"), &integer).is_some());

        let numeric = column("price", "numeric");
        assert_eq!(validate_value(&json!("19.99"), &numeric), None);
        assert_eq!(validate_value(&json!(1e3), &numeric), None);
        assert_eq!(
            validate_value(&json!("cheap"), &numeric).as_deref(),
            Some("Value must be a number")
        );
    }

    #[test]
    fn checks_text_and_boolean_families() {
        let text = column("name", "text");
        assert_eq!(validate_value(&json!(12), &text).as_deref(), Some("Value must be a string"));

        let flag = column("active", "boolean");
        assert_eq!(validate_value(&json!(true), &flag), None);
        assert_eq!(validate_value(&json!("false"), &flag), None);
        assert_eq!(
            validate_value(&json!("yes"), &flag).as_deref(),
            Some("Value must be true or false")
        );
    }

    #[test]
    fn checks_date_and_timestamp_families() {
        let date = column("born", "date");
        assert_eq!(validate_value(&json!("2024-02-29"), &date), None);
        assert_eq!(
            validate_value(&json!("2023-02-29"), &date).as_deref(),
            Some("Value must be a valid date")
        );

        let timestamp = column("seen_at", "timestamp without time zone");
        assert_eq!(validate_value(&json!("2024-05-01T10:30:00Z"), &timestamp), None);
        assert_eq!(validate_value(&json!("2024-05-01 10:30:00.123"), &timestamp), None);
        assert_eq!(validate_value(&json!(1_700_000_000_000_i64), &timestamp), None);
        assert_eq!(
            validate_value(&json!("yesterday"), &timestamp).as_deref(),
            Some("Value must be a valid timestamp")
        );
    }

    #[test]
    fn unknown_types_pass_through() {
        let payload = column("payload", "jsonb");
        assert_eq!(validate_value(&json!({"anything": [1, 2]}), &payload), None);
    }

    #[test]
    fn validation_does_not_mutate_record() {
        let descriptor = table(vec![column("count", "integer")]);
        let input = record(json!({"count": "x", "extra": 1}));
        let before = input.clone();
        let _ = validate_record(&input, &descriptor);
        assert_eq!(input, before);
    }
}
