//! # dictionary-store
//!
//! Metadata-driven PostgreSQL tables for admin back offices.
//!
//! Administrators describe tables and columns as metadata ("dictionaries"),
//! execute them to create or extend the physical tables, and then read and
//! write rows through a generic, validated CRUD layer.
//!
//! ## Features
//!
//! - **Dictionary Metadata**: Tables and typed columns stored in two metadata tables
//! - **Additive DDL**: Executing a dictionary only adds missing columns and re-creates foreign keys, all in one transaction
//! - **Runtime Validation**: Row input is checked against the column types before any SQL runs
//! - **Generic CRUD**: Paging, search, sorting, FK checks and reference labels for any executed dictionary
//! - **SQL Injection Prevention**: All identifiers are validated and quoted, all values are bound
//! - **Sanitized Errors**: Failures leave the crate as short, secret-free messages
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dictionary_store::{ColumnType, DictionaryStore, ListParams, NewColumn, NewTable, StoreConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = StoreConfig::builder("postgres://localhost/mydb").build();
//!     let store = DictionaryStore::new(config).await?;
//!
//!     // Describe the table
//!     let table = store.create_table(NewTable::new("customers", "Customers")).await?;
//!     store
//!         .add_column(table.id, NewColumn::new("name", "Name", ColumnType::String).length(120).required())
//!         .await?;
//!     store
//!         .add_column(
//!             table.id,
//!             NewColumn::new("status", "Status", ColumnType::Select)
//!                 .option("open", "Aberto")
//!                 .option("closed", "Fechado"),
//!         )
//!         .await?;
//!
//!     // Create the physical table
//!     store.execute_dictionary(table.id).await?;
//!
//!     // Work with rows
//!     let input = serde_json::json!({ "name": "Ana", "status": "open" });
//!     let row = store
//!         .create_row("public", "customers", input.as_object().unwrap())
//!         .await?;
//!
//!     let page = store
//!         .list_rows("public", "customers", &ListParams::new().search("an"))
//!         .await?;
//!     println!("{} of {} rows, first id {}", page.rows.len(), page.total, row["id"]);
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! ```rust
//! use dictionary_store::StoreConfig;
//!
//! let config = StoreConfig::builder("postgres://localhost/mydb")
//!     .metadata_tables("dictionary_tables", "dictionary_columns") // Defaults
//!     .max_connections(10)                                        // Pool size (default)
//!     .strict_references(true)                                    // Reject FKs into unknown dictionaries (default)
//!     .build();
//! ```
//!
//! `StoreConfig::from_env()` reads `DATABASE_URL` and
//! `DICTIONARY_MAX_CONNECTIONS` instead.
//!
//! ## Logging
//!
//! The crate emits `tracing` events and never installs a subscriber.

pub mod config;
pub mod crud;
pub mod error;
pub mod materialize;
pub mod metadata;
pub mod record;
pub mod schema;
pub mod sql;
pub mod store;
pub mod types;
pub mod validation;

// Re-export main types for convenience
pub use config::{StoreConfig, StoreConfigBuilder};
pub use crud::CrudEngine;
pub use error::{DictionaryError, Failure, Result, sanitize_error, sanitize_sql_error};
pub use materialize::{ExecutionReport, Materializer};
pub use metadata::MetadataStore;
pub use record::{
    ListParams, ListResult, Pagination, ReferenceLabels, ReferenceOption, Row, SortDirection,
};
pub use schema::{NewColumn, NewTable, TableDescriptor, TableUpdate};
pub use store::DictionaryStore;
pub use types::{ColumnDescriptor, ColumnFacets, ColumnType, SelectOption};
pub use validation::{
    FieldError, RowSchema, SqlValue, ValidatedRow, ValidationErrors, build_create_schema,
    build_update_schema,
};

// Re-export SQL utilities for advanced users
pub use sql::ddl::DdlGenerator;
pub use sql::sanitize::{quote_identifier, validate_identifier};
