//! Runtime validation of row input
//!
//! A [`RowSchema`] is built from a table descriptor at call time. Each column
//! gets a rule produced by the constructor registered for its type; the rules
//! coerce raw JSON into typed [`SqlValue`]s or report a [`FieldError`].

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{DictionaryError, Result};
use crate::schema::TableDescriptor;
use crate::sql::type_map::DEFAULT_STRING_LENGTH;
use crate::types::{ColumnDescriptor, ColumnType};

// ============================================================================
// Errors
// ============================================================================

/// One problem with one input field
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub code: &'static str,
    pub message: String,
}

impl FieldError {
    pub fn new(
        field: impl Into<String>,
        code: &'static str,
        message: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            field: field.into(),
            code,
            message: message.into().into_owned(),
        }
    }

    pub fn required(field: impl Into<String>) -> Self {
        Self::new(field, "required", "This field is required.")
    }

    /// Field error carrying the text of an identifier check failure
    pub fn invalid_identifier(field: impl Into<String>, err: &DictionaryError) -> Self {
        let message = match err {
            DictionaryError::InvalidIdentifier(msg) => msg.clone(),
            other => other.to_string(),
        };
        Self::new(field, "invalid_identifier", message)
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// All field errors found while validating one input
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationErrors {
    errors: Vec<FieldError>,
}

impl ValidationErrors {
    pub fn push(&mut self, error: FieldError) {
        self.errors.push(error);
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldError> {
        self.errors.iter()
    }

    /// Messages grouped by field, in field name order
    pub fn by_field(&self) -> BTreeMap<String, Vec<String>> {
        let mut map: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for e in &self.errors {
            map.entry(e.field.clone()).or_default().push(e.message.clone());
        }
        map
    }

    /// `Ok(())` when nothing was recorded, else `ValidationFailed`
    pub fn into_result(self) -> Result<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(DictionaryError::ValidationFailed(self))
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.errors.iter().map(|e| e.to_string()).collect();
        f.write_str(&parts.join("; "))
    }
}

impl From<ValidationErrors> for DictionaryError {
    fn from(errors: ValidationErrors) -> Self {
        DictionaryError::ValidationFailed(errors)
    }
}

// ============================================================================
// Typed values
// ============================================================================

/// A validated value ready to be bound to a statement
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// Also used for DATE and DATETIME, cast by the placeholder
    Text(String),
    Integer(i32),
    Decimal(Decimal),
    Boolean(bool),
    Uuid(Uuid),
    Null,
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Text form used when comparing against a key column cast to text
    pub fn as_text(&self) -> Option<String> {
        match self {
            SqlValue::Text(s) => Some(s.clone()),
            SqlValue::Integer(i) => Some(i.to_string()),
            SqlValue::Decimal(d) => Some(d.to_string()),
            SqlValue::Boolean(b) => Some(b.to_string()),
            SqlValue::Uuid(u) => Some(u.to_string()),
            SqlValue::Null => None,
        }
    }
}

/// One accepted input field
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedField {
    pub column: String,
    pub column_type: ColumnType,
    pub value: SqlValue,
}

/// Accepted input, in column order, holding only the fields that were supplied
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidatedRow {
    fields: Vec<ValidatedField>,
}

impl ValidatedRow {
    pub fn fields(&self) -> &[ValidatedField] {
        &self.fields
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.fields
            .iter()
            .find(|f| f.column == column)
            .map(|f| &f.value)
    }
}

// ============================================================================
// Rules
// ============================================================================

type Rule = Box<dyn Fn(&str, &Value) -> std::result::Result<SqlValue, FieldError> + Send + Sync>;

type RuleConstructor = fn(&ColumnDescriptor) -> Rule;

/// Constructor registered for each column type
fn constructor_for(column_type: ColumnType) -> RuleConstructor {
    match column_type {
        ColumnType::String => string_rule,
        ColumnType::Text => text_rule,
        ColumnType::Int => int_rule,
        ColumnType::Decimal => decimal_rule,
        ColumnType::Boolean => boolean_rule,
        ColumnType::Date | ColumnType::DateTime => temporal_rule,
        ColumnType::Uuid | ColumnType::Fk => uuid_rule,
        ColumnType::Select => select_rule,
    }
}

fn invalid(field: &str, code: &'static str, msg: impl Into<Cow<'static, str>>) -> FieldError {
    FieldError::new(field, code, msg)
}

fn expect_str<'v>(field: &str, value: &'v Value) -> std::result::Result<&'v str, FieldError> {
    value
        .as_str()
        .ok_or_else(|| invalid(field, "invalid_type", "Expected text."))
}

fn string_rule(column: &ColumnDescriptor) -> Rule {
    let max = column.facets.length.unwrap_or(DEFAULT_STRING_LENGTH) as usize;
    Box::new(move |field: &str, value: &Value| {
        let s = expect_str(field, value)?;
        if s.chars().count() > max {
            return Err(invalid(
                field,
                "max_chars",
                format!("Ensure this field has at most {max} characters."),
            ));
        }
        Ok(SqlValue::Text(s.to_string()))
    })
}

fn text_rule(_column: &ColumnDescriptor) -> Rule {
    Box::new(|field: &str, value: &Value| {
        Ok(SqlValue::Text(expect_str(field, value)?.to_string()))
    })
}

fn int_rule(_column: &ColumnDescriptor) -> Rule {
    Box::new(|field: &str, value: &Value| {
        let not_int = || invalid(field, "integer", "Enter a whole number.");
        let parsed = match value {
            Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
            Value::String(s) => s.trim().parse::<i64>().ok(),
            _ => None,
        };
        let n = parsed.ok_or_else(not_int)?;
        i32::try_from(n).map(SqlValue::Integer).map_err(|_| {
            invalid(field, "out_of_range", "Number is outside the integer range.")
        })
    })
}

fn decimal_rule(_column: &ColumnDescriptor) -> Rule {
    Box::new(|field: &str, value: &Value| {
        let text = match value {
            Value::Number(n) => n.to_string(),
            Value::String(s) => s.trim().to_string(),
            _ => String::new(),
        };
        Decimal::from_str(&text)
            .or_else(|_| Decimal::from_scientific(&text))
            .map(SqlValue::Decimal)
            .map_err(|_| invalid(field, "decimal", "Enter a number."))
    })
}

fn boolean_rule(_column: &ColumnDescriptor) -> Rule {
    Box::new(|field: &str, value: &Value| {
        let parsed = match value {
            Value::Bool(b) => Some(*b),
            Value::Number(n) => match n.as_i64() {
                Some(1) => Some(true),
                Some(0) => Some(false),
                _ => None,
            },
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => Some(true),
                "false" | "0" | "no" | "off" => Some(false),
                _ => None,
            },
            _ => None,
        };
        parsed
            .map(SqlValue::Boolean)
            .ok_or_else(|| invalid(field, "boolean", "Enter true or false."))
    })
}

fn temporal_rule(_column: &ColumnDescriptor) -> Rule {
    Box::new(|field: &str, value: &Value| {
        let s = expect_str(field, value)?;
        if s.trim().is_empty() {
            return Err(invalid(field, "blank", "This field may not be blank."));
        }
        Ok(SqlValue::Text(s.trim().to_string()))
    })
}

fn uuid_rule(_column: &ColumnDescriptor) -> Rule {
    Box::new(|field: &str, value: &Value| {
        let s = expect_str(field, value)?.trim();
        // Hyphenated form only; braced, urn and simple forms differ in length
        if s.len() != 36 {
            return Err(invalid(field, "uuid", "Enter a valid UUID."));
        }
        Uuid::parse_str(s)
            .map(SqlValue::Uuid)
            .map_err(|_| invalid(field, "uuid", "Enter a valid UUID."))
    })
}

fn select_rule(column: &ColumnDescriptor) -> Rule {
    let allowed: Vec<String> = column
        .select_options()
        .into_iter()
        .map(|o| o.value)
        .collect();
    Box::new(move |field: &str, value: &Value| {
        let s = expect_str(field, value)?;
        if allowed.is_empty() {
            if s.trim().is_empty() {
                return Err(invalid(field, "blank", "This field may not be blank."));
            }
        } else if !allowed.iter().any(|a| a == s) {
            return Err(invalid(
                field,
                "choice",
                format!("Select one of: {}.", allowed.join(", ")),
            ));
        }
        Ok(SqlValue::Text(s.to_string()))
    })
}

// ============================================================================
// Row schema
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaMode {
    /// Required columns must be present
    Create,
    /// Every column is optional
    Update,
}

struct FieldRule {
    column: String,
    column_type: ColumnType,
    required: bool,
    rule: Rule,
}

impl FieldRule {
    fn blank_is_null(&self) -> bool {
        !matches!(self.column_type, ColumnType::String | ColumnType::Text)
    }
}

/// Per-table validator for create or update input
pub struct RowSchema {
    mode: SchemaMode,
    fields: Vec<FieldRule>,
}

impl fmt::Debug for RowSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RowSchema")
            .field("mode", &self.mode)
            .field(
                "fields",
                &self.fields.iter().map(|r| r.column.as_str()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Validator for inserts: required columns must be supplied and non-null
pub fn build_create_schema(table: &TableDescriptor) -> RowSchema {
    build_schema(table, SchemaMode::Create)
}

/// Validator for updates: any subset of columns, required ones still non-null
pub fn build_update_schema(table: &TableDescriptor) -> RowSchema {
    build_schema(table, SchemaMode::Update)
}

fn build_schema(table: &TableDescriptor, mode: SchemaMode) -> RowSchema {
    let fields = table
        .columns
        .iter()
        .filter(|c| !c.is_id_primary_key())
        .map(|c| FieldRule {
            column: c.name.clone(),
            column_type: c.column_type,
            required: c.required,
            rule: constructor_for(c.column_type)(c),
        })
        .collect();

    RowSchema { mode, fields }
}

impl RowSchema {
    pub fn mode(&self) -> SchemaMode {
        self.mode
    }

    /// Names of the columns this schema accepts
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.column.as_str())
    }

    /// Validate raw input; keys that are not columns are ignored
    pub fn validate(&self, input: &Map<String, Value>) -> Result<ValidatedRow> {
        let mut errors = ValidationErrors::default();
        let mut row = ValidatedRow::default();

        for field in &self.fields {
            let Some(raw) = input.get(&field.column) else {
                if field.required && self.mode == SchemaMode::Create {
                    errors.push(FieldError::required(&field.column));
                }
                continue;
            };

            let is_null = match raw {
                Value::Null => true,
                Value::String(s) => s.is_empty() && field.blank_is_null(),
                _ => false,
            };

            if is_null {
                if field.required {
                    errors.push(FieldError::required(&field.column));
                } else {
                    row.fields.push(ValidatedField {
                        column: field.column.clone(),
                        column_type: field.column_type,
                        value: SqlValue::Null,
                    });
                }
                continue;
            }

            match (field.rule)(&field.column, raw) {
                Ok(value) => row.fields.push(ValidatedField {
                    column: field.column.clone(),
                    column_type: field.column_type,
                    value,
                }),
                Err(e) => errors.push(e),
            }
        }

        errors.into_result()?;
        Ok(row)
    }
}
