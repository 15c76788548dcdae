//! SQL utilities for the dictionary store
//!
//! Provides identifier sanitization, type mapping, DDL generation and CRUD
//! statement builders.

pub mod ddl;
pub mod query;
pub mod sanitize;
pub mod type_map;

pub use ddl::DdlGenerator;
pub use sanitize::{
    RESERVED_WORDS, full_table_name, quote_identifier, unquote_identifier, validate_identifier,
    validate_snake_case_identifier,
};
pub use type_map::{map_type_to_sql, placeholder_cast, to_safe_default};

/// A prepared statement with its bound arguments
pub(crate) type PgQuery<'q> = sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>;
