//! DictionaryStore - Main entry point for metadata-driven PostgreSQL tables
//!
//! Bundles the metadata store, the DDL engine and the CRUD engine over one
//! shared connection pool.

use std::collections::HashMap;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

use crate::config::StoreConfig;
use crate::crud::CrudEngine;
use crate::error::{DictionaryError, Result};
use crate::materialize::{ExecutionReport, Materializer};
use crate::metadata::MetadataStore;
use crate::record::{ListParams, ListResult, ReferenceLabels, ReferenceOption, Row};
use crate::schema::{NewColumn, NewTable, TableDescriptor, TableUpdate};
use crate::types::ColumnDescriptor;

/// Metadata-driven PostgreSQL table store
///
/// Dictionary metadata lives in two configurable tables (default:
/// `dictionary_tables` and `dictionary_columns`). Row data lives in the
/// physical tables created by [`DictionaryStore::execute_dictionary`].
#[derive(Debug, Clone)]
pub struct DictionaryStore {
    pool: PgPool,
    config: StoreConfig,
    metadata: MetadataStore,
    materializer: Materializer,
    crud: CrudEngine,
}

impl DictionaryStore {
    /// Connect and make sure the metadata tables exist
    pub async fn new(config: StoreConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.database_url)
            .await
            .map_err(|e| {
                DictionaryError::Connection(format!("Database connection failed: {}", e))
            })?;

        Self::from_pool(pool, config).await
    }

    /// Build on an existing pool
    pub async fn from_pool(pool: PgPool, config: StoreConfig) -> Result<Self> {
        let metadata = MetadataStore::new(pool.clone(), &config)?;
        metadata.ensure_metadata_tables().await?;

        tracing::info!(
            tables = %config.tables_table,
            columns = %config.columns_table,
            strict_references = config.strict_references,
            "dictionary store ready"
        );

        Ok(Self {
            materializer: Materializer::new(pool.clone(), metadata.clone()),
            crud: CrudEngine::new(pool.clone(), metadata.clone(), config.strict_references),
            pool,
            config,
            metadata,
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn metadata(&self) -> &MetadataStore {
        &self.metadata
    }

    pub fn materializer(&self) -> &Materializer {
        &self.materializer
    }

    pub fn crud(&self) -> &CrudEngine {
        &self.crud
    }

    // =========================================================================
    // Dictionaries
    // =========================================================================

    pub async fn list_tables(&self) -> Result<Vec<TableDescriptor>> {
        self.metadata.list_tables().await
    }

    pub async fn get_table_meta(&self, schema: &str, name: &str) -> Result<Option<TableDescriptor>> {
        self.metadata.get_table_meta(schema, name).await
    }

    pub async fn get_table_meta_by_id(&self, id: Uuid) -> Result<Option<TableDescriptor>> {
        self.metadata.get_table_meta_by_id(id).await
    }

    pub async fn create_table(&self, request: NewTable) -> Result<TableDescriptor> {
        self.metadata.create_table(request).await
    }

    pub async fn update_table(&self, id: Uuid, update: TableUpdate) -> Result<TableDescriptor> {
        self.metadata.update_table(id, update).await
    }

    /// Remove a dictionary's metadata; its physical table is kept
    pub async fn delete_table(&self, id: Uuid) -> Result<()> {
        self.metadata.delete_table(id).await
    }

    pub async fn add_column(&self, table_id: Uuid, request: NewColumn) -> Result<ColumnDescriptor> {
        self.metadata.add_column(table_id, request).await
    }

    pub async fn update_column(&self, column_id: Uuid, request: NewColumn) -> Result<ColumnDescriptor> {
        self.metadata.update_column(column_id, request).await
    }

    pub async fn delete_column(&self, column_id: Uuid) -> Result<()> {
        self.metadata.delete_column(column_id).await
    }

    pub async fn reorder_columns(&self, table_id: Uuid, ordered_ids: &[Uuid]) -> Result<()> {
        self.metadata.reorder_columns(table_id, ordered_ids).await
    }

    /// Create or extend the physical table of a dictionary
    pub async fn execute_dictionary(&self, table_id: Uuid) -> Result<ExecutionReport> {
        self.materializer.execute_dictionary(table_id).await
    }

    // =========================================================================
    // Rows
    // =========================================================================

    pub async fn list_rows(&self, schema: &str, table: &str, params: &ListParams) -> Result<ListResult> {
        self.crud.list(schema, table, params).await
    }

    pub async fn get_row(&self, schema: &str, table: &str, id: &str) -> Result<Option<Row>> {
        self.crud.get(schema, table, id).await
    }

    pub async fn create_row(&self, schema: &str, table: &str, input: &Row) -> Result<Row> {
        self.crud.create(schema, table, input).await
    }

    pub async fn update_row(
        &self,
        schema: &str,
        table: &str,
        id: &str,
        input: &Row,
    ) -> Result<Option<Row>> {
        self.crud.update(schema, table, id, input).await
    }

    pub async fn delete_row(&self, schema: &str, table: &str, id: &str) -> Result<()> {
        self.crud.delete(schema, table, id).await
    }

    pub async fn reference_options(
        &self,
        descriptor: &TableDescriptor,
    ) -> Result<HashMap<String, Vec<ReferenceOption>>> {
        self.crud.get_reference_options_by_column(descriptor).await
    }

    pub async fn reference_labels(
        &self,
        descriptor: &TableDescriptor,
        rows: &[Row],
    ) -> Result<ReferenceLabels> {
        self.crud.resolve_reference_labels(descriptor, rows).await
    }
}
