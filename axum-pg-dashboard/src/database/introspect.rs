//! Catalog introspection
//!
//! Turns a (schema, table) pair into a [`TableDescriptor`] by reading the
//! PostgreSQL metadata catalog. Nothing here is cached.

use crate::database::traits::{DatabaseError, StatementExecutor};
use crate::schema::{
    CastType, ColumnDescriptor, ColumnTypes, ForeignKeyDescriptor, ForeignKeyReference,
    IndexDescriptor, Row, SchemaSummary, TableDescriptor, TableSummary, TypeFamily,
};
use crate::statement::{SqlParameter, Statement};
use serde_json::Value;

const COLUMNS_QUERY: &str = r#"
    SELECT
        c.column_name::text AS column_name,
        c.data_type::text AS data_type,
        c.udt_schema::text AS udt_schema,
        c.udt_name::text AS udt_name,
        (c.is_nullable = 'YES') AS is_nullable,
        c.column_default::text AS column_default,
        c.character_maximum_length::int8 AS max_length,
        c.numeric_precision::int8 AS numeric_precision,
        c.numeric_scale::int8 AS numeric_scale,
        (c.is_identity = 'YES' OR c.is_generated = 'ALWAYS') AS is_auto_generated,
        EXISTS (
            SELECT 1
            FROM information_schema.table_constraints tc
            JOIN information_schema.key_column_usage kcu
              ON kcu.constraint_name = tc.constraint_name
              AND kcu.constraint_schema = tc.constraint_schema
            WHERE tc.constraint_type = 'PRIMARY KEY'
              AND tc.table_schema = c.table_schema
              AND tc.table_name = c.table_name
              AND kcu.column_name = c.column_name
        ) AS is_primary_key,
        fk.foreign_table_schema,
        fk.foreign_table_name,
        fk.foreign_column_name
    FROM information_schema.columns c
    LEFT JOIN LATERAL (
        SELECT
            ccu.table_schema::text AS foreign_table_schema,
            ccu.table_name::text AS foreign_table_name,
            ccu.column_name::text AS foreign_column_name
        FROM information_schema.table_constraints tc
        JOIN information_schema.key_column_usage kcu
          ON kcu.constraint_name = tc.constraint_name
          AND kcu.constraint_schema = tc.constraint_schema
        JOIN information_schema.constraint_column_usage ccu
          ON ccu.constraint_name = tc.constraint_name
          AND ccu.constraint_schema = tc.constraint_schema
        WHERE tc.constraint_type = 'FOREIGN KEY'
          AND kcu.table_schema = c.table_schema
          AND kcu.table_name = c.table_name
          AND kcu.column_name = c.column_name
        LIMIT 1
    ) fk ON true
    WHERE c.table_schema = $1
      AND c.table_name = $2
    ORDER BY c.ordinal_position
"#;

const FOREIGN_KEYS_QUERY: &str = r#"
    SELECT
        tc.constraint_name::text AS constraint_name,
        kcu.column_name::text AS column_name,
        ccu.table_schema::text AS foreign_table_schema,
        ccu.table_name::text AS foreign_table_name,
        ccu.column_name::text AS foreign_column_name
    FROM information_schema.table_constraints tc
    JOIN information_schema.key_column_usage kcu
      ON tc.constraint_name = kcu.constraint_name
      AND tc.constraint_schema = kcu.constraint_schema
    JOIN information_schema.constraint_column_usage ccu
      ON ccu.constraint_name = tc.constraint_name
      AND ccu.constraint_schema = tc.constraint_schema
    WHERE tc.constraint_type = 'FOREIGN KEY'
      AND tc.table_schema = $1
      AND tc.table_name = $2
    ORDER BY tc.constraint_name, kcu.ordinal_position
"#;

const INDEXES_QUERY: &str = r#"
    SELECT
        i.indexname::text AS index_name,
        i.indexdef AS index_definition,
        ix.indisunique AS is_unique,
        ix.indisprimary AS is_primary
    FROM pg_indexes i
    JOIN pg_namespace n ON n.nspname = i.schemaname
    JOIN pg_class ic ON ic.relname = i.indexname AND ic.relnamespace = n.oid
    JOIN pg_index ix ON ix.indexrelid = ic.oid
    WHERE i.schemaname = $1
      AND i.tablename = $2
    ORDER BY i.indexname
"#;

const ROW_ESTIMATE_QUERY: &str = r#"
    SELECT (n_tup_ins + n_tup_upd + n_tup_del)::int8 AS estimated_rows
    FROM pg_stat_user_tables
    WHERE schemaname = $1
      AND relname = $2
"#;

const COLUMN_TYPES_QUERY: &str = r#"
    SELECT
        column_name::text AS column_name,
        data_type::text AS data_type,
        udt_schema::text AS udt_schema,
        udt_name::text AS udt_name
    FROM information_schema.columns
    WHERE table_schema = $1
      AND table_name = $2
    ORDER BY ordinal_position
"#;

const SCHEMAS_QUERY: &str = r#"
    SELECT
        pt.schemaname::text AS schema_name,
        pt.tablename::text AS table_name,
        COALESCE(pst.n_tup_ins + pst.n_tup_upd + pst.n_tup_del, 0)::int8 AS estimated_rows
    FROM pg_tables pt
    LEFT JOIN pg_stat_user_tables pst
      ON pt.tablename = pst.relname
      AND pt.schemaname = pst.schemaname
    WHERE pt.schemaname NOT IN ('information_schema', 'pg_catalog', 'pg_toast')
    ORDER BY pt.schemaname, pt.tablename
"#;

/// Reads table metadata through a statement executor
pub struct CatalogIntrospector<'a, E: StatementExecutor> {
    executor: &'a E,
}

impl<'a, E: StatementExecutor> CatalogIntrospector<'a, E> {
    pub fn new(executor: &'a E) -> Self {
        Self { executor }
    }

    fn table_statement(sql: &str, schema: &str, table: &str) -> Statement {
        Statement::with_params(
            sql,
            vec![
                SqlParameter::Text(Some(schema.to_string())),
                SqlParameter::Text(Some(table.to_string())),
            ],
        )
    }

    /// Build the full descriptor of a table
    ///
    /// Columns, foreign keys, indexes and the row estimate are read
    /// concurrently; none depends on another.
    pub async fn table_descriptor(
        &self,
        schema: &str,
        table: &str,
    ) -> Result<TableDescriptor, DatabaseError> {
        let (columns, foreign_keys, indexes, row_count) = tokio::try_join!(
            self.columns(schema, table),
            self.foreign_keys(schema, table),
            self.indexes(schema, table),
            self.estimated_row_count(schema, table),
        )?;

        if columns.is_empty() {
            return Err(DatabaseError::TableNotFound(format!("{}.{}", schema, table)));
        }

        let primary_keys = columns
            .iter()
            .filter(|column| column.is_primary_key)
            .map(|column| column.column_name.clone())
            .collect();

        Ok(TableDescriptor {
            schema_name: schema.to_string(),
            table_name: table.to_string(),
            row_count,
            columns,
            primary_keys,
            foreign_keys,
            indexes,
        })
    }

    /// Column definitions with key metadata, in ordinal order
    pub async fn columns(&self, schema: &str, table: &str) -> Result<Vec<ColumnDescriptor>, DatabaseError> {
        let output = self
            .executor
            .query(&Self::table_statement(COLUMNS_QUERY, schema, table))
            .await?;

        output.rows.iter().map(column_from_row).collect()
    }

    pub async fn foreign_keys(
        &self,
        schema: &str,
        table: &str,
    ) -> Result<Vec<ForeignKeyDescriptor>, DatabaseError> {
        let output = self
            .executor
            .query(&Self::table_statement(FOREIGN_KEYS_QUERY, schema, table))
            .await?;

        output
            .rows
            .iter()
            .map(|row| {
                Ok(ForeignKeyDescriptor {
                    constraint_name: text(row, "constraint_name")?,
                    column_name: text(row, "column_name")?,
                    referenced_schema: text(row, "foreign_table_schema")?,
                    referenced_table: text(row, "foreign_table_name")?,
                    referenced_column: text(row, "foreign_column_name")?,
                })
            })
            .collect()
    }

    pub async fn indexes(&self, schema: &str, table: &str) -> Result<Vec<IndexDescriptor>, DatabaseError> {
        let output = self
            .executor
            .query(&Self::table_statement(INDEXES_QUERY, schema, table))
            .await?;

        output
            .rows
            .iter()
            .map(|row| {
                let definition = text(row, "index_definition")?;
                Ok(IndexDescriptor {
                    index_name: text(row, "index_name")?,
                    columns: extract_index_columns(&definition),
                    is_unique: flag(row, "is_unique"),
                    is_primary: flag(row, "is_primary"),
                })
            })
            .collect()
    }

    /// Row estimate from cumulative insert/update/delete counters
    ///
    /// O(1) but approximate: counters drift from the live count after heavy
    /// updates and deletes. Tables without statistics report 0.
    pub async fn estimated_row_count(&self, schema: &str, table: &str) -> Result<i64, DatabaseError> {
        let output = self
            .executor
            .query(&Self::table_statement(ROW_ESTIMATE_QUERY, schema, table))
            .await?;

        Ok(output
            .rows
            .first()
            .and_then(|row| optional_integer(row, "estimated_rows"))
            .unwrap_or(0))
    }

    /// Cast type of every column, without the rest of the descriptor
    pub async fn column_types(&self, schema: &str, table: &str) -> Result<ColumnTypes, DatabaseError> {
        let output = self
            .executor
            .query(&Self::table_statement(COLUMN_TYPES_QUERY, schema, table))
            .await?;

        if output.rows.is_empty() {
            return Err(DatabaseError::TableNotFound(format!("{}.{}", schema, table)));
        }

        output
            .rows
            .iter()
            .map(|row| {
                let cast = CastType::from_catalog(
                    &text(row, "udt_schema")?,
                    &text(row, "udt_name")?,
                    &text(row, "data_type")?,
                );
                Ok((text(row, "column_name")?, cast))
            })
            .collect()
    }

    /// All user tables grouped by schema, in catalog order
    pub async fn list_schemas(&self) -> Result<Vec<SchemaSummary>, DatabaseError> {
        let output = self.executor.query(&Statement::new(SCHEMAS_QUERY)).await?;

        let mut schemas: Vec<SchemaSummary> = Vec::new();
        for row in &output.rows {
            let schema_name = text(row, "schema_name")?;
            let table = TableSummary {
                table_name: text(row, "table_name")?,
                row_count: optional_integer(row, "estimated_rows").unwrap_or(0),
            };

            match schemas.last_mut() {
                Some(last) if last.schema_name == schema_name => last.tables.push(table),
                _ => schemas.push(SchemaSummary {
                    schema_name,
                    tables: vec![table],
                }),
            }
        }

        Ok(schemas)
    }
}

fn column_from_row(row: &Row) -> Result<ColumnDescriptor, DatabaseError> {
    let data_type = text(row, "data_type")?;
    let default_value = optional_text(row, "column_default");

    let references = match optional_text(row, "foreign_table_name") {
        Some(table) => Some(ForeignKeyReference {
            schema: optional_text(row, "foreign_table_schema").unwrap_or_default(),
            table,
            column: optional_text(row, "foreign_column_name").unwrap_or_default(),
        }),
        None => None,
    };

    // Serial columns are filled by their sequence default
    let is_sequence_backed = default_value
        .as_deref()
        .is_some_and(|default| default.starts_with("nextval("));

    Ok(ColumnDescriptor {
        column_name: text(row, "column_name")?,
        type_family: TypeFamily::from_data_type(&data_type),
        data_type,
        udt_schema: text(row, "udt_schema")?,
        udt_name: text(row, "udt_name")?,
        is_nullable: flag(row, "is_nullable"),
        default_value,
        max_length: optional_integer(row, "max_length"),
        numeric_precision: optional_integer(row, "numeric_precision"),
        numeric_scale: optional_integer(row, "numeric_scale"),
        is_auto_generated: flag(row, "is_auto_generated") || is_sequence_backed,
        is_primary_key: flag(row, "is_primary_key"),
        is_foreign_key: references.is_some(),
        references,
    })
}

/// Recover column names from an index definition
///
/// Takes the text between the first `(` and the next `)`, splits it on
/// commas, trims each part and strips double quotes.
pub fn extract_index_columns(definition: &str) -> Vec<String> {
    let Some(start) = definition.find('(') else {
        return Vec::new();
    };
    let rest = &definition[start + 1..];
    let Some(end) = rest.find(')') else {
        return Vec::new();
    };

    let inner = &rest[..end];
    if inner.is_empty() {
        return Vec::new();
    }

    inner
        .split(',')
        .map(|column| column.trim().replace('"', ""))
        .collect()
}

fn text(row: &Row, key: &str) -> Result<String, DatabaseError> {
    optional_text(row, key)
        .ok_or_else(|| DatabaseError::Execution(format!("Catalog row is missing '{}'", key)))
}

fn optional_text(row: &Row, key: &str) -> Option<String> {
    match row.get(key) {
        Some(Value::String(value)) => Some(value.clone()),
        _ => None,
    }
}

fn optional_integer(row: &Row, key: &str) -> Option<i64> {
    match row.get(key) {
        Some(Value::Number(number)) => number.as_i64(),
        Some(Value::String(text)) => text.parse().ok(),
        _ => None,
    }
}

fn flag(row: &Row, key: &str) -> bool {
    matches!(row.get(key), Some(Value::Bool(true)))
}
