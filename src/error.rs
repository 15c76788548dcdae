//! Error types for dictionary operations
//!
//! Also hosts the error sanitizer: every DDL or CRUD failure that reaches an
//! end user goes through [`sanitize_error`] or [`Failure`] first.

use std::collections::BTreeMap;
use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use thiserror::Error;

use crate::validation::ValidationErrors;

/// Generic message used when an error carries no usable text
pub const DEFAULT_FALLBACK: &str = "An error occurred while processing the operation.";

/// Message returned when a dictionary execution is rolled back
pub const EXECUTION_FAILED: &str = "Execution failed. All changes were rolled back.";

/// Message returned when a statement hits a table that was never materialized
pub const MISSING_RELATION: &str =
    "The physical table does not exist yet. Execute the dictionary first, then try again.";

/// Maximum length of a sanitized user-facing message
pub const MAX_ERROR_CHARS: usize = 280;

/// Maximum length of a sanitized raw SQL error
pub const MAX_SQL_ERROR_CHARS: usize = 240;

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid whitespace regex"));

static SECRETS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(password|secret|token)=\S+").expect("valid secret redaction regex")
});

/// Errors that can occur while managing or using dictionaries
#[derive(Debug, Error)]
pub enum DictionaryError {
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Table not allowed in the dictionary: {0}")]
    TableNotAccessible(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(ValidationErrors),

    #[error("Related record not found for {0}")]
    RelatedRecordNotFound(String),

    #[error("{message}")]
    DdlExecutionFailed {
        message: String,
        sql_error: Option<String>,
    },

    #[error("SQL execution failed: {0}")]
    SqlExecutionFailed(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Sql(#[from] sqlx::Error),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DictionaryError {
    pub fn invalid_identifier(msg: impl Into<String>) -> Self {
        Self::InvalidIdentifier(msg.into())
    }

    pub fn table_not_accessible(msg: impl Into<String>) -> Self {
        Self::TableNotAccessible(msg.into())
    }

    pub fn related_record_not_found(label: impl Into<String>) -> Self {
        Self::RelatedRecordNotFound(label.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Wrap a driver error raised by a CRUD statement
    pub fn sql_failure(err: sqlx::Error) -> Self {
        let text = err.to_string();
        if is_missing_relation(&text) {
            return Self::SqlExecutionFailed(MISSING_RELATION.to_string());
        }
        Self::SqlExecutionFailed(sanitize_error(&text, DEFAULT_FALLBACK))
    }

    /// Wrap a driver error raised inside the execute-dictionary transaction
    pub fn ddl_failure(err: sqlx::Error) -> Self {
        let text = err.to_string();
        let message = if is_missing_relation(&text) {
            MISSING_RELATION
        } else {
            EXECUTION_FAILED
        };
        Self::DdlExecutionFailed {
            message: message.to_string(),
            sql_error: sanitize_sql_error(&text),
        }
    }
}

pub type Result<T> = std::result::Result<T, DictionaryError>;

// ============================================================================
// Sanitizer
// ============================================================================

/// Turn any error into text that is safe to show to an end user
///
/// Collapses whitespace, redacts `password=`, `secret=` and `token=` values and
/// truncates to [`MAX_ERROR_CHARS`]. Returns `fallback` when nothing usable is
/// left.
pub fn sanitize_error(error: impl fmt::Display, fallback: &str) -> String {
    sanitize_text(&error.to_string(), MAX_ERROR_CHARS).unwrap_or_else(|| fallback.to_string())
}

/// Like [`sanitize_error`] but with the shorter diagnostic limit and no fallback
pub fn sanitize_sql_error(error: impl fmt::Display) -> Option<String> {
    sanitize_text(&error.to_string(), MAX_SQL_ERROR_CHARS)
}

/// Core of the sanitizer; `None` when the input is blank
pub fn sanitize_text(raw: &str, max_chars: usize) -> Option<String> {
    let collapsed = WHITESPACE.replace_all(raw, " ");
    let redacted = SECRETS.replace_all(&collapsed, "$1=***");
    let trimmed = redacted.trim();

    if trimmed.is_empty() {
        return None;
    }

    if trimmed.chars().count() > max_chars {
        let truncated: String = trimmed.chars().take(max_chars).collect();
        Some(format!("{}...", truncated))
    } else {
        Some(trimmed.to_string())
    }
}

fn is_missing_relation(text: &str) -> bool {
    text.contains("relation") && text.contains("does not exist")
}

// ============================================================================
// Structured failure result
// ============================================================================

/// Failure as handed back to the admin layer
///
/// This is the only shape in which DDL and CRUD errors are meant to leave the
/// crate towards a user interface.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Failure {
    pub form_error: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub field_errors: BTreeMap<String, Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql_error: Option<String>,
}

impl Failure {
    pub fn new(form_error: impl Into<String>) -> Self {
        Self {
            form_error: form_error.into(),
            ..Self::default()
        }
    }
}

impl From<&DictionaryError> for Failure {
    fn from(err: &DictionaryError) -> Self {
        match err {
            DictionaryError::ValidationFailed(errors) => Failure {
                form_error: "Invalid data.".to_string(),
                field_errors: errors.by_field(),
                sql_error: None,
            },
            DictionaryError::TableNotAccessible(_) => {
                Failure::new("Table not allowed in the dictionary.")
            }
            DictionaryError::RelatedRecordNotFound(label) => {
                Failure::new(format!("Related record not found for {}.", label))
            }
            DictionaryError::DdlExecutionFailed { message, sql_error } => Failure {
                form_error: message.clone(),
                field_errors: BTreeMap::new(),
                sql_error: sql_error.clone(),
            },
            DictionaryError::SqlExecutionFailed(message) => Failure::new(message.clone()),
            DictionaryError::Sql(inner) => Failure::new(sanitize_error(inner, DEFAULT_FALLBACK)),
            other => Failure::new(sanitize_error(other, DEFAULT_FALLBACK)),
        }
    }
}

impl From<DictionaryError> for Failure {
    fn from(err: DictionaryError) -> Self {
        Failure::from(&err)
    }
}
