//! Generic CRUD engine
//!
//! Reads and writes rows of any executed, non-system dictionary. Input is
//! validated against the dictionary's columns before any statement is issued,
//! and FK values are checked against their target tables.

use std::collections::{BTreeSet, HashMap};
use std::str::FromStr;

use rust_decimal::Decimal;
use serde_json::{Value, json};
use sqlx::postgres::PgRow;
use sqlx::{Column, PgPool, Row as _, TypeInfo};
use uuid::Uuid;

use crate::error::{DictionaryError, Result};
use crate::metadata::MetadataStore;
use crate::record::{ListParams, ListResult, Pagination, ReferenceLabels, ReferenceOption, Row};
use crate::schema::TableDescriptor;
use crate::sql::PgQuery;
use crate::sql::query::{
    build_list_query, delete_row, exists_by_column, insert_row, reference_labels,
    reference_options, select_by_key, update_row,
};
use crate::types::{ColumnDescriptor, ColumnType};
use crate::validation::{SqlValue, ValidatedRow, build_create_schema, build_update_schema};

/// Row operations over dictionary tables
#[derive(Debug, Clone)]
pub struct CrudEngine {
    pool: PgPool,
    metadata: MetadataStore,
    strict_references: bool,
}

impl CrudEngine {
    pub fn new(pool: PgPool, metadata: MetadataStore, strict_references: bool) -> Self {
        Self {
            pool,
            metadata,
            strict_references,
        }
    }

    /// Descriptor of a table rows may be touched in
    async fn accessible_table(&self, schema: &str, table: &str) -> Result<TableDescriptor> {
        let descriptor = self
            .metadata
            .get_table_meta(schema, table)
            .await?
            .ok_or_else(|| {
                DictionaryError::table_not_accessible(format!("{}.{}", schema, table))
            })?;

        if descriptor.is_system {
            tracing::warn!(schema = %schema, table = %table, "row access to system dictionary refused");
            return Err(DictionaryError::table_not_accessible(format!(
                "{}.{}",
                schema, table
            )));
        }

        Ok(descriptor)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// One page of rows, optionally searched and sorted
    pub async fn list(&self, schema: &str, table: &str, params: &ListParams) -> Result<ListResult> {
        let descriptor = self.accessible_table(schema, table).await?;
        let query = build_list_query(&descriptor, params)?;

        let mut count = sqlx::query_scalar::<_, i64>(&query.count_sql);
        if let Some(pattern) = &query.search_pattern {
            count = count.bind(pattern);
        }
        let total = count
            .fetch_one(&self.pool)
            .await
            .map_err(DictionaryError::sql_failure)?;

        let pagination =
            Pagination::resolve(params.requested_page(), params.effective_page_size(), total);

        let mut select = sqlx::query(&query.select_sql);
        if let Some(pattern) = &query.search_pattern {
            select = select.bind(pattern);
        }
        let rows = select
            .bind(pagination.page_size)
            .bind(pagination.offset)
            .fetch_all(&self.pool)
            .await
            .map_err(DictionaryError::sql_failure)?;

        tracing::debug!(
            table = %descriptor.table_name,
            total,
            page = pagination.page,
            "listed rows"
        );

        Ok(ListResult {
            rows: rows.iter().map(row_to_json).collect(),
            table: descriptor,
            total,
            page: pagination.page,
            page_size: pagination.page_size,
            total_pages: pagination.total_pages,
        })
    }

    /// Row by key; a key that cannot be parsed as the key type finds nothing
    pub async fn get(&self, schema: &str, table: &str, id: &str) -> Result<Option<Row>> {
        let descriptor = self.accessible_table(schema, table).await?;
        self.fetch_by_key(&descriptor, id).await
    }

    async fn fetch_by_key(&self, descriptor: &TableDescriptor, id: &str) -> Result<Option<Row>> {
        let Some(key) = parse_key(descriptor, id) else {
            return Ok(None);
        };

        let sql = select_by_key(descriptor)?;
        let row = bind_value(sqlx::query(&sql), &key)
            .fetch_optional(&self.pool)
            .await
            .map_err(DictionaryError::sql_failure)?;

        Ok(row.as_ref().map(row_to_json))
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Insert a row from form input, returning the stored row
    pub async fn create(&self, schema: &str, table: &str, input: &Row) -> Result<Row> {
        let descriptor = self.accessible_table(schema, table).await?;
        let validated = build_create_schema(&descriptor).validate(input)?;
        self.check_references(&descriptor, &validated).await?;

        let sql = insert_row(&descriptor, validated.fields())?;
        let mut query = sqlx::query(&sql);
        for field in validated.fields() {
            query = bind_value(query, &field.value);
        }

        let row = query
            .fetch_one(&self.pool)
            .await
            .map_err(DictionaryError::sql_failure)?;

        tracing::info!(table = %descriptor.table_name, fields = validated.fields().len(), "row created");
        Ok(row_to_json(&row))
    }

    /// Update the supplied columns of a row
    ///
    /// Returns `None` when no row has the key. Without any recognized field
    /// the current row is returned unchanged.
    pub async fn update(
        &self,
        schema: &str,
        table: &str,
        id: &str,
        input: &Row,
    ) -> Result<Option<Row>> {
        let descriptor = self.accessible_table(schema, table).await?;
        let validated = build_update_schema(&descriptor).validate(input)?;

        if validated.is_empty() {
            return self.fetch_by_key(&descriptor, id).await;
        }

        let Some(key) = parse_key(&descriptor, id) else {
            return Ok(None);
        };

        self.check_references(&descriptor, &validated).await?;

        let sql = update_row(&descriptor, validated.fields())?;
        let mut query = sqlx::query(&sql);
        for field in validated.fields() {
            query = bind_value(query, &field.value);
        }

        let row = bind_value(query, &key)
            .fetch_optional(&self.pool)
            .await
            .map_err(DictionaryError::sql_failure)?;

        if row.is_some() {
            tracing::info!(table = %descriptor.table_name, id = %id, "row updated");
        }
        Ok(row.as_ref().map(row_to_json))
    }

    /// Delete a row; deleting a missing row succeeds
    pub async fn delete(&self, schema: &str, table: &str, id: &str) -> Result<()> {
        let descriptor = self.accessible_table(schema, table).await?;
        let Some(key) = parse_key(&descriptor, id) else {
            return Ok(());
        };

        let sql = delete_row(&descriptor)?;
        let result = bind_value(sqlx::query(&sql), &key)
            .execute(&self.pool)
            .await
            .map_err(DictionaryError::sql_failure)?;

        tracing::info!(
            table = %descriptor.table_name,
            id = %id,
            deleted = result.rows_affected(),
            "row deleted"
        );
        Ok(())
    }

    /// Reject FK values that point at no existing row
    async fn check_references(&self, descriptor: &TableDescriptor, row: &ValidatedRow) -> Result<()> {
        for field in row.fields() {
            if field.column_type != ColumnType::Fk {
                continue;
            }
            let Some(value) = field.value.as_text() else {
                continue;
            };
            let Some(column) = descriptor.column(&field.column) else {
                continue;
            };

            // A deleted target dictionary leaves fk_table_id NULL
            let target = match column.fk_table_id {
                Some(target_id) => self.metadata.get_table_meta_by_id(target_id).await?,
                None => None,
            };
            let Some(target) = target else {
                unresolved_reference(self.strict_references, column)?;
                continue;
            };

            let sql = exists_by_column(&target, column.fk_key_column())?;
            let found: Option<i32> = sqlx::query_scalar(&sql)
                .bind(&value)
                .fetch_optional(&self.pool)
                .await
                .map_err(DictionaryError::sql_failure)?;

            if found.is_none() {
                return Err(DictionaryError::related_record_not_found(&column.label));
            }
        }
        Ok(())
    }

    // =========================================================================
    // References
    // =========================================================================

    /// Choices for every SELECT and FK column, keyed by column name
    ///
    /// FK columns whose target dictionary is missing are left out.
    pub async fn get_reference_options_by_column(
        &self,
        descriptor: &TableDescriptor,
    ) -> Result<HashMap<String, Vec<ReferenceOption>>> {
        let mut options = HashMap::new();

        for column in &descriptor.columns {
            match column.column_type {
                ColumnType::Select => {
                    let choices = column
                        .select_options()
                        .into_iter()
                        .map(|o| ReferenceOption {
                            value: o.value,
                            label: o.label,
                        })
                        .collect();
                    options.insert(column.name.clone(), choices);
                }
                ColumnType::Fk => {
                    let Some(target) = self.reference_target(column).await? else {
                        continue;
                    };
                    let sql = reference_options(
                        &target,
                        column.fk_key_column(),
                        column.fk_display_column(),
                    )?;
                    let rows = sqlx::query(&sql)
                        .fetch_all(&self.pool)
                        .await
                        .map_err(DictionaryError::sql_failure)?;
                    options.insert(column.name.clone(), rows.iter().map(row_to_option).collect());
                }
                _ => {}
            }
        }

        Ok(options)
    }

    /// Display labels for the FK and SELECT values present in `rows`
    pub async fn resolve_reference_labels(
        &self,
        descriptor: &TableDescriptor,
        rows: &[Row],
    ) -> Result<ReferenceLabels> {
        let mut labels = ReferenceLabels::new();

        for column in &descriptor.columns {
            match column.column_type {
                ColumnType::Select => {
                    let map = column
                        .select_options()
                        .into_iter()
                        .map(|o| (o.value, o.label))
                        .collect();
                    labels.insert(column.name.clone(), map);
                }
                ColumnType::Fk => {
                    let Some(target) = self.reference_target(column).await? else {
                        continue;
                    };

                    let values: BTreeSet<&str> = rows
                        .iter()
                        .filter_map(|row| row.get(&column.name).and_then(Value::as_str))
                        .collect();

                    if values.is_empty() {
                        labels.insert(column.name.clone(), HashMap::new());
                        continue;
                    }

                    let sql = reference_labels(
                        &target,
                        column.fk_key_column(),
                        column.fk_display_column(),
                        values.len(),
                    )?;
                    let mut query = sqlx::query(&sql);
                    for value in &values {
                        query = query.bind(*value);
                    }
                    let found = query
                        .fetch_all(&self.pool)
                        .await
                        .map_err(DictionaryError::sql_failure)?;

                    let map = found
                        .iter()
                        .map(row_to_option)
                        .map(|o| (o.value, o.label))
                        .collect();
                    labels.insert(column.name.clone(), map);
                }
                _ => {}
            }
        }

        Ok(labels)
    }

    async fn reference_target(&self, column: &ColumnDescriptor) -> Result<Option<TableDescriptor>> {
        match column.fk_table_id {
            Some(id) => self.metadata.get_table_meta_by_id(id).await,
            None => Ok(None),
        }
    }
}

// ============================================================================
// Binding and row conversion
// ============================================================================

/// Parse a row key as the key column's type
/// An FK column whose target dictionary is unknown
///
/// Strict stores reject the value. Lenient ones skip the check and leave it to
/// the physical constraint.
fn unresolved_reference(strict: bool, column: &ColumnDescriptor) -> Result<()> {
    if strict {
        return Err(DictionaryError::related_record_not_found(&column.label));
    }
    tracing::debug!(column = %column.name, "FK target metadata missing, check skipped");
    Ok(())
}

fn parse_key(descriptor: &TableDescriptor, raw: &str) -> Option<SqlValue> {
    let raw = raw.trim();
    match descriptor.key_type() {
        ColumnType::Uuid | ColumnType::Fk => Uuid::parse_str(raw).ok().map(SqlValue::Uuid),
        ColumnType::Int => raw.parse::<i32>().ok().map(SqlValue::Integer),
        ColumnType::Decimal => Decimal::from_str(raw).ok().map(SqlValue::Decimal),
        ColumnType::Boolean => raw.parse::<bool>().ok().map(SqlValue::Boolean),
        _ if raw.is_empty() => None,
        _ => Some(SqlValue::Text(raw.to_string())),
    }
}

/// Bind a validated value; NULL is bound untyped and typed by the placeholder cast
fn bind_value<'q>(query: PgQuery<'q>, value: &SqlValue) -> PgQuery<'q> {
    match value {
        SqlValue::Text(s) => query.bind(s.clone()),
        SqlValue::Integer(i) => query.bind(*i),
        SqlValue::Decimal(d) => query.bind(*d),
        SqlValue::Boolean(b) => query.bind(*b),
        SqlValue::Uuid(u) => query.bind(*u),
        SqlValue::Null => query.bind(None::<String>),
    }
}

fn row_to_option(row: &PgRow) -> ReferenceOption {
    let value: Option<String> = row.try_get("value").ok().flatten();
    let label: Option<String> = row.try_get("label").ok().flatten();
    let value = value.unwrap_or_default();
    ReferenceOption {
        label: label.unwrap_or_else(|| value.clone()),
        value,
    }
}

/// Convert a physical row to JSON by column type
///
/// Numerics become strings to keep their precision, temporal values use ISO
/// formats. Unreadable values become `null`.
fn row_to_json(row: &PgRow) -> Row {
    let mut map = Row::new();

    for column in row.columns() {
        let name = column.name();

        let value: Option<Value> = match column.type_info().name() {
            "UUID" => row
                .try_get::<Option<Uuid>, _>(name)
                .ok()
                .flatten()
                .map(|u| json!(u.to_string())),
            "TEXT" | "VARCHAR" | "CHAR" | "BPCHAR" | "NAME" => row
                .try_get::<Option<String>, _>(name)
                .ok()
                .flatten()
                .map(|s| json!(s)),
            "INT2" => row
                .try_get::<Option<i16>, _>(name)
                .ok()
                .flatten()
                .map(|i| json!(i)),
            "INT4" => row
                .try_get::<Option<i32>, _>(name)
                .ok()
                .flatten()
                .map(|i| json!(i)),
            "INT8" => row
                .try_get::<Option<i64>, _>(name)
                .ok()
                .flatten()
                .map(|i| json!(i)),
            "FLOAT4" | "FLOAT8" => row
                .try_get::<Option<f64>, _>(name)
                .ok()
                .flatten()
                .map(|f| json!(f)),
            "NUMERIC" => row
                .try_get::<Option<Decimal>, _>(name)
                .ok()
                .flatten()
                .map(|d| json!(d.to_string())),
            "BOOL" => row
                .try_get::<Option<bool>, _>(name)
                .ok()
                .flatten()
                .map(|b| json!(b)),
            "DATE" => row
                .try_get::<Option<chrono::NaiveDate>, _>(name)
                .ok()
                .flatten()
                .map(|d| json!(d.to_string())),
            "TIMESTAMPTZ" => row
                .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(name)
                .ok()
                .flatten()
                .map(|dt| json!(dt.to_rfc3339())),
            "TIMESTAMP" => row
                .try_get::<Option<chrono::NaiveDateTime>, _>(name)
                .ok()
                .flatten()
                .map(|dt| json!(dt.to_string())),
            "JSON" | "JSONB" => row.try_get::<Option<Value>, _>(name).ok().flatten(),
            _ => row.try_get::<Option<String>, _>(name).ok().flatten().map(|s| json!(s)),
        };

        map.insert(name.to_string(), value.unwrap_or(Value::Null));
    }

    map
}
