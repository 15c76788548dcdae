//! SQL Identifier Sanitization Utilities
//!
//! Table, schema and column names arrive at runtime and cannot be bound as
//! parameters, so every one of them passes through an allow-list check before
//! it is interpolated into SQL text. Values are always bound, never formatted.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{DictionaryError, Result};

/// Keywords rejected as dynamic identifiers (compared case-insensitively)
pub const RESERVED_WORDS: &[&str] = &[
    "select", "insert", "update", "delete", "drop", "table", "from", "where", "join", "alter",
    "create", "grant", "revoke", "truncate", "schema", "order", "group", "by",
];

static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid identifier regex"));

static SNAKE_CASE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z_][a-z0-9_]*$").expect("valid snake case regex"));

fn is_reserved(name: &str) -> bool {
    let lower = name.to_lowercase();
    RESERVED_WORDS.contains(&lower.as_str())
}

/// Check a schema, table or column name before it is used in SQL
///
/// Rules:
/// - Must start with a letter or underscore
/// - Can only contain letters, numbers, and underscores
/// - Cannot be one of [`RESERVED_WORDS`], in any casing
///
/// # Example
/// ```
/// use dictionary_store::sql::validate_identifier;
///
/// assert!(validate_identifier("customers").is_ok());
/// assert!(validate_identifier("Select").is_err());
/// assert!(validate_identifier("users;drop table").is_err());
/// ```
pub fn validate_identifier(name: &str) -> Result<()> {
    if !IDENTIFIER.is_match(name) {
        return Err(DictionaryError::invalid_identifier(format!(
            "'{}' must start with a letter or underscore and contain only letters, numbers and underscores",
            name
        )));
    }

    if is_reserved(name) {
        return Err(DictionaryError::invalid_identifier(format!(
            "'{}' is a reserved SQL keyword",
            name
        )));
    }

    Ok(())
}

/// Stricter check for names typed into the dictionary by an administrator
///
/// Only lowercase snake_case is accepted so that two names can never differ by
/// case alone.
pub fn validate_snake_case_identifier(name: &str) -> Result<()> {
    if !SNAKE_CASE.is_match(name) {
        return Err(DictionaryError::invalid_identifier(format!(
            "'{}' must use only lowercase letters, numbers and underscores (e.g. field_name)",
            name
        )));
    }

    if is_reserved(name) {
        return Err(DictionaryError::invalid_identifier(format!(
            "'{}' is a reserved SQL keyword",
            name
        )));
    }

    Ok(())
}

/// Validate and quote a SQL identifier
///
/// # Example
/// ```
/// use dictionary_store::sql::quote_identifier;
///
/// assert_eq!(quote_identifier("my_table").unwrap(), "\"my_table\"");
/// assert!(quote_identifier("my table").is_err());
/// ```
pub fn quote_identifier(identifier: &str) -> Result<String> {
    validate_identifier(identifier)?;
    let escaped = identifier.replace('"', "\"\"");
    Ok(format!("\"{}\"", escaped))
}

/// Quote a schema-qualified table reference: `"schema"."table"`
pub fn full_table_name(schema: &str, table: &str) -> Result<String> {
    Ok(format!(
        "{}.{}",
        quote_identifier(schema)?,
        quote_identifier(table)?
    ))
}

/// Reverse [`quote_identifier`]
///
/// Returns `None` when the input is not a single well-formed quoted identifier.
pub fn unquote_identifier(quoted: &str) -> Option<String> {
    let inner = quoted.strip_prefix('"')?.strip_suffix('"')?;

    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '"' {
            // A lone quote would have terminated the identifier
            if chars.next() != Some('"') {
                return None;
            }
        }
        out.push(c);
    }
    Some(out)
}
