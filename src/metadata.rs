//! Dictionary metadata store
//!
//! Owns the two metadata tables (one row per dictionary, one row per column)
//! and provides the loader used by the DDL and CRUD engines. Every read goes
//! to the database; nothing is cached.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgExecutor, PgPool, Row};
use uuid::Uuid;

use crate::config::StoreConfig;
use crate::error::{DictionaryError, Result};
use crate::schema::{NewColumn, NewTable, TableDescriptor, TableUpdate};
use crate::sql::PgQuery;
use crate::sql::sanitize::quote_identifier;
use crate::types::{ColumnDescriptor, ColumnFacets, ColumnType};
use crate::validation::{FieldError, ValidationErrors};

const BOOTSTRAP_LOCK: &str = "dictionary_store.bootstrap";

const TABLE_COLUMNS: &str =
    "id, schema_name, name, label, description, is_system, created_at, updated_at, executed_at";

const COLUMN_COLUMNS: &str = "id, table_id, name, label, column_type, required, is_unique, \
     default_value, is_primary_key, length, \"precision\", scale, auto_generate, fk_table_id, \
     fk_column_name, display_field, options_json, sort_order";

/// Reads and writes dictionary metadata
#[derive(Debug, Clone)]
pub struct MetadataStore {
    pool: PgPool,
    /// Quoted name of the dictionary table
    tables: String,
    /// Quoted name of the column table
    columns: String,
}

impl MetadataStore {
    pub fn new(pool: PgPool, config: &StoreConfig) -> Result<Self> {
        Ok(Self {
            pool,
            tables: quote_identifier(&config.tables_table)?,
            columns: quote_identifier(&config.columns_table)?,
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create both metadata tables when missing
    ///
    /// Serialized across processes, concurrent `CREATE EXTENSION` calls race.
    pub async fn ensure_metadata_tables(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(BOOTSTRAP_LOCK)
            .execute(&mut *tx)
            .await?;

        sqlx::query("CREATE EXTENSION IF NOT EXISTS \"pgcrypto\"")
            .execute(&mut *tx)
            .await?;

        let tables_sql = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                schema_name TEXT NOT NULL DEFAULT 'public',
                name TEXT NOT NULL,
                label TEXT NOT NULL,
                description TEXT,
                is_system BOOLEAN NOT NULL DEFAULT FALSE,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                executed_at TIMESTAMPTZ,
                UNIQUE (schema_name, name)
            )
            "#,
            self.tables
        );
        sqlx::query(&tables_sql).execute(&mut *tx).await?;

        let columns_sql = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {columns} (
                id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                table_id UUID NOT NULL REFERENCES {tables} (id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                label TEXT NOT NULL,
                column_type TEXT NOT NULL,
                required BOOLEAN NOT NULL DEFAULT FALSE,
                is_unique BOOLEAN NOT NULL DEFAULT FALSE,
                default_value TEXT,
                is_primary_key BOOLEAN NOT NULL DEFAULT FALSE,
                length INTEGER,
                "precision" INTEGER,
                scale INTEGER,
                auto_generate BOOLEAN NOT NULL DEFAULT FALSE,
                fk_table_id UUID REFERENCES {tables} (id) ON DELETE SET NULL,
                fk_column_name TEXT,
                display_field TEXT,
                options_json TEXT,
                sort_order INTEGER NOT NULL DEFAULT 1,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                UNIQUE (table_id, name)
            )
            "#,
            columns = self.columns,
            tables = self.tables
        );
        sqlx::query(&columns_sql).execute(&mut *tx).await?;

        tx.commit().await?;

        tracing::debug!(tables = %self.tables, columns = %self.columns, "metadata tables ready");
        Ok(())
    }

    // =========================================================================
    // Loader
    // =========================================================================

    /// Descriptor by schema and technical name, with columns in order
    pub async fn get_table_meta(&self, schema: &str, name: &str) -> Result<Option<TableDescriptor>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE schema_name = $1 AND name = $2",
            TABLE_COLUMNS, self.tables
        );
        let row = sqlx::query(&sql)
            .bind(schema)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(self.with_loaded_columns(row_to_table(&row)?).await?)),
            None => Ok(None),
        }
    }

    /// Descriptor by id, with columns in order
    pub async fn get_table_meta_by_id(&self, id: Uuid) -> Result<Option<TableDescriptor>> {
        let sql = format!("SELECT {} FROM {} WHERE id = $1", TABLE_COLUMNS, self.tables);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(self.with_loaded_columns(row_to_table(&row)?).await?)),
            None => Ok(None),
        }
    }

    /// All descriptors ordered by schema, then name
    pub async fn list_tables(&self) -> Result<Vec<TableDescriptor>> {
        let sql = format!(
            "SELECT {} FROM {} ORDER BY schema_name ASC, name ASC",
            TABLE_COLUMNS, self.tables
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        let mut tables = rows
            .iter()
            .map(row_to_table)
            .collect::<Result<Vec<_>>>()?;

        let sql = format!(
            "SELECT {} FROM {} ORDER BY table_id, sort_order ASC, name ASC",
            COLUMN_COLUMNS, self.columns
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;

        let mut by_table: HashMap<Uuid, Vec<ColumnDescriptor>> = HashMap::new();
        for row in &rows {
            let column = row_to_column(row)?;
            by_table.entry(column.table_id).or_default().push(column);
        }

        for table in &mut tables {
            table.columns = by_table.remove(&table.id).unwrap_or_default();
        }

        Ok(tables)
    }

    /// Single column metadata row
    pub async fn get_column(&self, column_id: Uuid) -> Result<Option<ColumnDescriptor>> {
        let sql = format!("SELECT {} FROM {} WHERE id = $1", COLUMN_COLUMNS, self.columns);
        let row = sqlx::query(&sql)
            .bind(column_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_column).transpose()
    }

    async fn with_loaded_columns(&self, mut table: TableDescriptor) -> Result<TableDescriptor> {
        let sql = format!(
            "SELECT {} FROM {} WHERE table_id = $1 ORDER BY sort_order ASC, name ASC",
            COLUMN_COLUMNS, self.columns
        );
        let rows = sqlx::query(&sql)
            .bind(table.id)
            .fetch_all(&self.pool)
            .await?;

        table.columns = rows.iter().map(row_to_column).collect::<Result<Vec<_>>>()?;
        tracing::debug!(
            table = %table.table_name,
            columns = table.columns.len(),
            "loaded dictionary metadata"
        );
        Ok(table)
    }

    // =========================================================================
    // Table writes
    // =========================================================================

    /// Register a new dictionary; the physical table is created on execute
    pub async fn create_table(&self, request: NewTable) -> Result<TableDescriptor> {
        request.validate()?;

        let sql = format!(
            "INSERT INTO {} (schema_name, name, label, description, is_system) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {}",
            self.tables, TABLE_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(&request.schema_name)
            .bind(request.table_name.trim())
            .bind(request.label.trim())
            .bind(non_blank(request.description.as_deref()))
            .bind(request.is_system)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                unique_violation_as(e, "name", "A dictionary with this name already exists.")
            })?;

        let table = row_to_table(&row)?;
        tracing::info!(table_id = %table.id, table = %table.table_name, "dictionary created");
        Ok(table)
    }

    /// Change a dictionary's presentation fields
    pub async fn update_table(&self, id: Uuid, update: TableUpdate) -> Result<TableDescriptor> {
        update.validate()?;

        let (set_description, description) = match &update.description {
            Some(d) => (true, non_blank(d.as_deref())),
            None => (false, None),
        };

        let sql = format!(
            "UPDATE {} SET \
             label = COALESCE($2, label), \
             description = CASE WHEN $3 THEN $4 ELSE description END, \
             is_system = COALESCE($5, is_system), \
             updated_at = NOW() \
             WHERE id = $1",
            self.tables
        );
        let result = sqlx::query(&sql)
            .bind(id)
            .bind(update.label.as_deref().map(str::trim))
            .bind(set_description)
            .bind(description)
            .bind(update.is_system)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DictionaryError::not_found(format!("dictionary {}", id)));
        }

        tracing::info!(table_id = %id, "dictionary updated");
        self.get_table_meta_by_id(id)
            .await?
            .ok_or_else(|| DictionaryError::not_found(format!("dictionary {}", id)))
    }

    /// Remove a dictionary and its column metadata in one transaction
    ///
    /// The physical table is left untouched.
    pub async fn delete_table(&self, id: Uuid) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(&format!("DELETE FROM {} WHERE table_id = $1", self.columns))
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query(&format!("DELETE FROM {} WHERE id = $1", self.tables))
            .bind(id)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(DictionaryError::not_found(format!("dictionary {}", id)));
        }

        tx.commit().await?;
        tracing::info!(table_id = %id, "dictionary deleted");
        Ok(())
    }

    /// Record a successful execution; returns the new `executed_at`
    ///
    /// Takes any executor so the execute transaction can include it.
    pub async fn mark_executed<'e, E>(&self, executor: E, id: Uuid) -> Result<DateTime<Utc>>
    where
        E: PgExecutor<'e>,
    {
        let sql = format!(
            "UPDATE {} SET updated_at = NOW(), executed_at = NOW() WHERE id = $1 RETURNING executed_at",
            self.tables
        );
        let executed_at = sqlx::query_scalar::<_, Option<DateTime<Utc>>>(&sql)
            .bind(id)
            .fetch_optional(executor)
            .await?
            .flatten();

        executed_at.ok_or_else(|| DictionaryError::not_found(format!("dictionary {}", id)))
    }

    // =========================================================================
    // Column writes
    // =========================================================================

    /// Append a column draft to a dictionary
    ///
    /// Without an explicit order the column goes last.
    pub async fn add_column(&self, table_id: Uuid, request: NewColumn) -> Result<ColumnDescriptor> {
        request.validate()?;
        self.ensure_table_exists(table_id).await?;
        self.ensure_reference_target(&request).await?;
        self.ensure_single_primary_key(table_id, None, &request).await?;

        let order = match request.order {
            Some(order) => order,
            None => {
                let sql = format!(
                    "SELECT COALESCE(MAX(sort_order), 0) + 1 FROM {} WHERE table_id = $1",
                    self.columns
                );
                sqlx::query_scalar::<_, i32>(&sql)
                    .bind(table_id)
                    .fetch_one(&self.pool)
                    .await?
            }
        };

        let column = request.into_descriptor(table_id, order);
        let sql = format!(
            "INSERT INTO {} ({}) VALUES \
             ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18) \
             RETURNING {}",
            self.columns, COLUMN_COLUMNS, COLUMN_COLUMNS
        );
        let row = bind_column(sqlx::query(&sql), &column)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                unique_violation_as(e, "name", "A column with this name already exists.")
            })?;

        let column = row_to_column(&row)?;
        tracing::info!(
            table_id = %table_id,
            column = %column.name,
            column_type = %column.column_type,
            "column added"
        );
        Ok(column)
    }

    /// Replace a column draft; order is kept unless the request sets one
    pub async fn update_column(&self, column_id: Uuid, request: NewColumn) -> Result<ColumnDescriptor> {
        request.validate()?;
        let existing = self
            .get_column(column_id)
            .await?
            .ok_or_else(|| DictionaryError::not_found(format!("column {}", column_id)))?;
        self.ensure_reference_target(&request).await?;
        self.ensure_single_primary_key(existing.table_id, Some(existing.id), &request)
            .await?;

        let order = request.order.unwrap_or(existing.order);
        let mut column = request.into_descriptor(existing.table_id, order);
        column.id = existing.id;

        let sql = format!(
            "UPDATE {} SET name = $3, label = $4, column_type = $5, required = $6, \
             is_unique = $7, default_value = $8, is_primary_key = $9, length = $10, \
             \"precision\" = $11, scale = $12, auto_generate = $13, fk_table_id = $14, \
             fk_column_name = $15, display_field = $16, options_json = $17, sort_order = $18, \
             updated_at = NOW() \
             WHERE id = $1 AND table_id = $2 RETURNING {}",
            self.columns, COLUMN_COLUMNS
        );
        let row = bind_column(sqlx::query(&sql), &column)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                unique_violation_as(e, "name", "A column with this name already exists.")
            })?;

        let column = row_to_column(&row)?;
        tracing::info!(column_id = %column_id, column = %column.name, "column updated");
        Ok(column)
    }

    /// Remove a column draft; an existing physical column is kept
    pub async fn delete_column(&self, column_id: Uuid) -> Result<()> {
        let result = sqlx::query(&format!("DELETE FROM {} WHERE id = $1", self.columns))
            .bind(column_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DictionaryError::not_found(format!("column {}", column_id)));
        }

        tracing::info!(column_id = %column_id, "column deleted");
        Ok(())
    }

    /// Assign orders `1..=n` following `ordered_ids`, all or nothing
    pub async fn reorder_columns(&self, table_id: Uuid, ordered_ids: &[Uuid]) -> Result<()> {
        if ordered_ids.is_empty() {
            let mut errors = ValidationErrors::default();
            errors.push(FieldError::required("orderedIds"));
            return Err(errors.into());
        }

        let sql = format!(
            "UPDATE {} SET sort_order = $1, updated_at = NOW() WHERE id = $2 AND table_id = $3",
            self.columns
        );

        let mut tx = self.pool.begin().await?;
        for (index, column_id) in ordered_ids.iter().enumerate() {
            let result = sqlx::query(&sql)
                .bind(index as i32 + 1)
                .bind(column_id)
                .bind(table_id)
                .execute(&mut *tx)
                .await?;

            if result.rows_affected() == 0 {
                tx.rollback().await?;
                return Err(DictionaryError::not_found(format!(
                    "column {} in dictionary {}",
                    column_id, table_id
                )));
            }
        }
        tx.commit().await?;

        tracing::info!(table_id = %table_id, columns = ordered_ids.len(), "columns reordered");
        Ok(())
    }

    async fn ensure_table_exists(&self, id: Uuid) -> Result<()> {
        let sql = format!("SELECT 1 FROM {} WHERE id = $1", self.tables);
        let found: Option<i32> = sqlx::query_scalar(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        found
            .map(|_| ())
            .ok_or_else(|| DictionaryError::not_found(format!("dictionary {}", id)))
    }

    async fn ensure_reference_target(&self, request: &NewColumn) -> Result<()> {
        let Some(target) = request
            .fk_table_id
            .filter(|_| request.column_type == ColumnType::Fk)
        else {
            return Ok(());
        };

        missing_target_as_field_error(self.ensure_table_exists(target).await)
    }

    /// A table has at most one primary-key column; `except` is the column being replaced
    async fn ensure_single_primary_key(
        &self,
        table_id: Uuid,
        except: Option<Uuid>,
        request: &NewColumn,
    ) -> Result<()> {
        if !request.is_primary_key {
            return Ok(());
        }

        let sql = format!(
            "SELECT name FROM {} WHERE table_id = $1 AND is_primary_key AND id <> $2 LIMIT 1",
            self.columns
        );
        let existing: Option<String> = sqlx::query_scalar(&sql)
            .bind(table_id)
            .bind(except.unwrap_or_else(Uuid::nil))
            .fetch_optional(&self.pool)
            .await?;

        match existing {
            Some(name) => {
                tracing::debug!(table_id = %table_id, key = %name, "second primary key rejected");
                let mut errors = ValidationErrors::default();
                errors.push(FieldError::new(
                    "isPrimaryKey",
                    "unique",
                    "The table already has a primary key.",
                ));
                Err(errors.into())
            }
            None => Ok(()),
        }
    }
}

/// Only an unknown dictionary becomes a field error; other failures propagate
fn missing_target_as_field_error(lookup: Result<()>) -> Result<()> {
    match lookup {
        Err(DictionaryError::NotFound(_)) => {
            let mut errors = ValidationErrors::default();
            errors.push(FieldError::new(
                "fkTableId",
                "not_found",
                "Referenced dictionary not found.",
            ));
            Err(errors.into())
        }
        other => other,
    }
}

// ============================================================================
// Row mapping
// ============================================================================

fn row_to_table(row: &PgRow) -> Result<TableDescriptor> {
    Ok(TableDescriptor {
        id: row.try_get("id")?,
        schema_name: row.try_get("schema_name")?,
        table_name: row.try_get("name")?,
        label: row.try_get("label")?,
        description: row.try_get("description")?,
        is_system: row.try_get("is_system")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        executed_at: row.try_get("executed_at")?,
        columns: Vec::new(),
    })
}

fn row_to_column(row: &PgRow) -> Result<ColumnDescriptor> {
    let tag: String = row.try_get("column_type")?;
    let column_type = tag
        .parse::<ColumnType>()
        .map_err(|e| sqlx::Error::Decode(e.into()))?;

    let facet = |name: &str| -> Result<Option<u32>> {
        let value: Option<i32> = row.try_get(name)?;
        Ok(value.and_then(|v| u32::try_from(v).ok()))
    };

    Ok(ColumnDescriptor {
        id: row.try_get("id")?,
        table_id: row.try_get("table_id")?,
        name: row.try_get("name")?,
        label: row.try_get("label")?,
        column_type,
        required: row.try_get("required")?,
        unique: row.try_get("is_unique")?,
        default_value: row.try_get("default_value")?,
        is_primary_key: row.try_get("is_primary_key")?,
        facets: ColumnFacets {
            length: facet("length")?,
            precision: facet("precision")?,
            scale: facet("scale")?,
        },
        auto_generate: row.try_get("auto_generate")?,
        fk_table_id: row.try_get("fk_table_id")?,
        fk_column_name: row.try_get("fk_column_name")?,
        display_field: row.try_get("display_field")?,
        options_json: row.try_get("options_json")?,
        order: row.try_get("sort_order")?,
    })
}

/// Bind a column in `COLUMN_COLUMNS` order
fn bind_column<'q>(query: PgQuery<'q>, column: &'q ColumnDescriptor) -> PgQuery<'q> {
    let facet = |v: Option<u32>| v.and_then(|v| i32::try_from(v).ok());

    query
        .bind(column.id)
        .bind(column.table_id)
        .bind(&column.name)
        .bind(&column.label)
        .bind(column.column_type.as_str())
        .bind(column.required)
        .bind(column.unique)
        .bind(&column.default_value)
        .bind(column.is_primary_key)
        .bind(facet(column.facets.length))
        .bind(facet(column.facets.precision))
        .bind(facet(column.facets.scale))
        .bind(column.auto_generate)
        .bind(column.fk_table_id)
        .bind(&column.fk_column_name)
        .bind(&column.display_field)
        .bind(&column.options_json)
        .bind(column.order)
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Turn a unique violation into a field error, pass anything else through
fn unique_violation_as(err: sqlx::Error, field: &str, message: &'static str) -> DictionaryError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            let mut errors = ValidationErrors::default();
            errors.push(FieldError::new(field, "unique", message));
            return errors.into();
        }
    }
    DictionaryError::Sql(err)
}
