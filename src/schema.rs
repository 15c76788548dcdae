//! Dictionary table types
//!
//! Includes TableDescriptor and the requests used to write dictionary
//! metadata: NewTable, TableUpdate and NewColumn.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::sql::sanitize::validate_snake_case_identifier;
use crate::types::{ColumnDescriptor, ColumnFacets, ColumnType, SelectOption};
use crate::validation::{FieldError, ValidationErrors};

/// Schema every dictionary table lives in unless told otherwise
pub const DEFAULT_SCHEMA: &str = "public";

/// Dictionary table metadata with its columns ordered by `order`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableDescriptor {
    pub id: Uuid,
    #[serde(rename = "schema")]
    pub schema_name: String,
    #[serde(rename = "name")]
    pub table_name: String,
    pub label: String,
    pub description: Option<String>,
    /// System tables are hidden from the generic CRUD engine
    pub is_system: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Last successful execution against the physical table
    pub executed_at: Option<DateTime<Utc>>,
    pub columns: Vec<ColumnDescriptor>,
}

impl TableDescriptor {
    /// In-memory descriptor with a fresh id; metadata rows are loaded instead
    pub fn new(schema_name: impl Into<String>, table_name: impl Into<String>) -> Self {
        let table_name = table_name.into();
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            schema_name: schema_name.into(),
            label: table_name.clone(),
            table_name,
            description: None,
            is_system: false,
            created_at: now,
            updated_at: now,
            executed_at: None,
            columns: Vec::new(),
        }
    }

    /// Attach columns, stamping them with this table's id
    pub fn with_columns(mut self, columns: Vec<ColumnDescriptor>) -> Self {
        self.columns = columns
            .into_iter()
            .map(|mut c| {
                c.table_id = self.id;
                c
            })
            .collect();
        self.columns.sort_by_key(|c| c.order);
        self
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn primary_key(&self) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.is_primary_key)
    }

    /// Name of the row key column: the declared primary key or the injected `id`
    pub fn key_column(&self) -> &str {
        self.primary_key().map(|c| c.name.as_str()).unwrap_or("id")
    }

    /// Type of the row key column
    pub fn key_type(&self) -> ColumnType {
        self.primary_key()
            .map(|c| c.column_type)
            .unwrap_or(ColumnType::Uuid)
    }

    /// Columns free-text search applies to
    pub fn searchable_columns(&self) -> impl Iterator<Item = &ColumnDescriptor> {
        self.columns.iter().filter(|c| c.column_type.is_searchable())
    }

    pub fn fk_columns(&self) -> impl Iterator<Item = &ColumnDescriptor> {
        self.columns
            .iter()
            .filter(|c| c.column_type == ColumnType::Fk && c.fk_table_id.is_some())
    }
}

// ============================================================================
// Metadata write requests
// ============================================================================

/// Request to create a new dictionary table
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTable {
    #[serde(rename = "schema", default = "default_schema")]
    pub schema_name: String,
    #[serde(rename = "name")]
    pub table_name: String,
    pub label: String,
    pub description: Option<String>,
    #[serde(default)]
    pub is_system: bool,
}

fn default_schema() -> String {
    DEFAULT_SCHEMA.to_string()
}

impl NewTable {
    pub fn new(table_name: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            schema_name: default_schema(),
            table_name: table_name.into(),
            label: label.into(),
            description: None,
            is_system: false,
        }
    }

    pub fn schema(mut self, schema_name: impl Into<String>) -> Self {
        self.schema_name = schema_name.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn system(mut self) -> Self {
        self.is_system = true;
        self
    }

    /// Check the fields an administrator typed in
    pub fn validate(&self) -> Result<()> {
        let mut errors = ValidationErrors::default();

        if self.table_name.trim().is_empty() {
            errors.push(FieldError::required("name"));
        } else if let Err(err) = validate_snake_case_identifier(&self.table_name) {
            errors.push(FieldError::invalid_identifier("name", &err));
        }

        if let Err(err) = validate_snake_case_identifier(&self.schema_name) {
            errors.push(FieldError::invalid_identifier("schema", &err));
        }

        if self.label.trim().is_empty() {
            errors.push(FieldError::required("label"));
        }

        errors.into_result()
    }
}

/// Request to update an existing dictionary table
///
/// The technical name is fixed once created; only presentation fields change.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableUpdate {
    pub label: Option<String>,
    /// `Some(None)` clears the description
    pub description: Option<Option<String>>,
    pub is_system: Option<bool>,
}

impl TableUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn description(mut self, description: Option<String>) -> Self {
        self.description = Some(description);
        self
    }

    pub fn system(mut self, is_system: bool) -> Self {
        self.is_system = Some(is_system);
        self
    }

    pub fn validate(&self) -> Result<()> {
        let mut errors = ValidationErrors::default();
        if matches!(&self.label, Some(l) if l.trim().is_empty()) {
            errors.push(FieldError::required("label"));
        }
        errors.into_result()
    }
}

/// Column definition as submitted by an administrator
///
/// Used both to add a column and to replace an existing column's draft.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewColumn {
    pub name: String,
    pub label: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub unique: bool,
    pub default_value: Option<String>,
    #[serde(default)]
    pub is_primary_key: bool,
    #[serde(flatten)]
    pub facets: ColumnFacets,
    #[serde(default)]
    pub auto_generate: bool,
    pub fk_table_id: Option<Uuid>,
    pub fk_column_name: Option<String>,
    pub display_field: Option<String>,
    #[serde(default)]
    pub options: Vec<SelectOption>,
    /// Position among the table's columns; appended last when absent
    pub order: Option<i32>,
}

impl NewColumn {
    pub fn new(
        name: impl Into<String>,
        label: impl Into<String>,
        column_type: ColumnType,
    ) -> Self {
        Self {
            name: name.into(),
            label: label.into(),
            column_type,
            required: false,
            unique: false,
            default_value: None,
            is_primary_key: false,
            facets: ColumnFacets::default(),
            auto_generate: false,
            fk_table_id: None,
            fk_column_name: None,
            display_field: None,
            options: Vec::new(),
            order: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.is_primary_key = true;
        self
    }

    pub fn default_value(mut self, value: impl Into<String>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    pub fn length(mut self, length: u32) -> Self {
        self.facets.length = Some(length);
        self
    }

    pub fn precision(mut self, precision: u32) -> Self {
        self.facets.precision = Some(precision);
        self
    }

    pub fn scale(mut self, scale: u32) -> Self {
        self.facets.scale = Some(scale);
        self
    }

    pub fn auto_generate(mut self) -> Self {
        self.auto_generate = true;
        self
    }

    pub fn references(mut self, table_id: Uuid) -> Self {
        self.fk_table_id = Some(table_id);
        self
    }

    pub fn fk_column(mut self, column: impl Into<String>) -> Self {
        self.fk_column_name = Some(column.into());
        self
    }

    pub fn display_field(mut self, field: impl Into<String>) -> Self {
        self.display_field = Some(field.into());
        self
    }

    pub fn option(mut self, value: impl Into<String>, label: impl Into<String>) -> Self {
        self.options.push(SelectOption::new(value, label));
        self
    }

    pub fn order(mut self, order: i32) -> Self {
        self.order = Some(order);
        self
    }

    /// Check the edit-boundary invariants of a column definition
    ///
    /// All problems are collected, each keyed by the offending field.
    pub fn validate(&self) -> Result<()> {
        let mut errors = ValidationErrors::default();

        if self.name.trim().is_empty() {
            errors.push(FieldError::required("name"));
        } else if let Err(err) = validate_snake_case_identifier(&self.name) {
            errors.push(FieldError::invalid_identifier("name", &err));
        } else if self.name.trim() == "id" && !self.is_primary_key {
            // `id` is the injected uuid key unless a column claims it as primary key
            errors.push(FieldError::new(
                "name",
                "reserved",
                "The name id is reserved for the primary key.",
            ));
        }

        if self.label.trim().is_empty() {
            errors.push(FieldError::required("label"));
        }

        for (field, value) in [
            ("length", self.facets.length),
            ("precision", self.facets.precision),
        ] {
            if value == Some(0) {
                errors.push(FieldError::new(field, "positive", "Must be greater than zero."));
            }
        }

        if matches!(self.order, Some(o) if o < 1) {
            errors.push(FieldError::new("order", "min", "Order must be at least 1."));
        }

        match self.column_type {
            ColumnType::String if self.facets.length.is_none() => errors.push(FieldError::new(
                "length",
                "required",
                "Length is required for short text columns.",
            )),
            ColumnType::Int | ColumnType::Decimal if self.facets.precision.is_none() => {
                errors.push(FieldError::new(
                    "precision",
                    "required",
                    "Precision is required for numeric columns.",
                ))
            }
            ColumnType::Fk if self.fk_table_id.is_none() => errors.push(FieldError::new(
                "fkTableId",
                "required",
                "Select the referenced table.",
            )),
            ColumnType::Select if self.options.is_empty() => errors.push(FieldError::new(
                "options",
                "required",
                "Add at least one option for a select column.",
            )),
            _ => {}
        }

        if self.column_type == ColumnType::Decimal && self.facets.scale.is_none() {
            errors.push(FieldError::new(
                "scale",
                "required",
                "Scale is required for decimal columns.",
            ));
        }

        if self.options.iter().any(|o| o.value.trim().is_empty()) {
            errors.push(FieldError::new("options", "required", "Option value is required."));
        }
        if self.options.iter().any(|o| o.label.trim().is_empty()) {
            errors.push(FieldError::new("options", "required", "Option label is required."));
        }

        for (field, value) in [
            ("fkColumnName", self.fk_column_name.as_deref()),
            ("displayField", self.display_field.as_deref()),
        ] {
            if let Some(v) = value.filter(|v| !v.is_empty()) {
                if let Err(err) = validate_snake_case_identifier(v) {
                    errors.push(FieldError::invalid_identifier(field, &err));
                }
            }
        }

        errors.into_result()
    }

    /// Descriptor as stored, with facets that do not apply to the type cleared
    pub fn into_descriptor(self, table_id: Uuid, order: i32) -> ColumnDescriptor {
        let t = self.column_type;
        let is_fk = t == ColumnType::Fk;

        ColumnDescriptor {
            id: Uuid::new_v4(),
            table_id,
            name: self.name.trim().to_string(),
            label: self.label.trim().to_string(),
            column_type: t,
            required: self.required,
            unique: self.unique,
            default_value: self
                .default_value
                .map(|d| d.trim().to_string())
                .filter(|d| !d.is_empty()),
            is_primary_key: self.is_primary_key,
            facets: ColumnFacets {
                length: (t == ColumnType::String).then_some(self.facets.length).flatten(),
                precision: matches!(t, ColumnType::Int | ColumnType::Decimal)
                    .then_some(self.facets.precision)
                    .flatten(),
                scale: (t == ColumnType::Decimal).then_some(self.facets.scale).flatten(),
            },
            auto_generate: t == ColumnType::Uuid && self.auto_generate,
            fk_table_id: if is_fk { self.fk_table_id } else { None },
            fk_column_name: is_fk.then(|| non_empty_or_id(self.fk_column_name)),
            display_field: is_fk.then(|| non_empty_or_id(self.display_field)),
            options_json: if t == ColumnType::Select {
                serde_json::to_string(&self.options).ok()
            } else {
                None
            },
            order,
        }
    }
}

fn non_empty_or_id(value: Option<String>) -> String {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| "id".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DictionaryError;

    fn field_errors(result: Result<()>) -> Vec<String> {
        match result {
            Err(DictionaryError::ValidationFailed(errors)) => {
                errors.by_field().into_keys().collect()
            }
            other => panic!("expected validation failure, got {:?}", other),
        }
    }

    // =========================================================================
    // TableDescriptor Tests
    // =========================================================================

    #[test]
    fn test_with_columns_sorts_and_stamps() {
        let table = TableDescriptor::new("public", "customers").with_columns(vec![
            ColumnDescriptor::new("b", ColumnType::Text).order(2),
            ColumnDescriptor::new("a", ColumnType::Text).order(1),
        ]);
        assert_eq!(table.columns[0].name, "a");
        assert!(table.columns.iter().all(|c| c.table_id == table.id));
    }

    #[test]
    fn test_key_column_defaults_to_injected_id() {
        let table = TableDescriptor::new("public", "customers");
        assert_eq!(table.key_column(), "id");
        assert_eq!(table.key_type(), ColumnType::Uuid);

        let table = TableDescriptor::new("public", "codes")
            .with_columns(vec![ColumnDescriptor::new("code", ColumnType::Int).primary_key()]);
        assert_eq!(table.key_column(), "code");
        assert_eq!(table.key_type(), ColumnType::Int);
    }

    #[test]
    fn test_searchable_columns() {
        let table = TableDescriptor::new("public", "t").with_columns(vec![
            ColumnDescriptor::new("name", ColumnType::String),
            ColumnDescriptor::new("age", ColumnType::Int),
            ColumnDescriptor::new("status", ColumnType::Select),
        ]);
        let names: Vec<_> = table.searchable_columns().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["name", "status"]);
    }

    // =========================================================================
    // NewTable Tests
    // =========================================================================

    #[test]
    fn test_new_table_valid() {
        assert!(NewTable::new("customers", "Customers").validate().is_ok());
    }

    #[test]
    fn test_new_table_rejects_bad_name() {
        let keys = field_errors(NewTable::new("Customers", " ").validate());
        assert_eq!(keys, vec!["label", "name"]);

        let keys = field_errors(NewTable::new("select", "Select").validate());
        assert_eq!(keys, vec!["name"]);
    }

    #[test]
    fn test_table_update_rejects_blank_label() {
        assert!(TableUpdate::new().validate().is_ok());
        assert!(TableUpdate::new().label("").validate().is_err());
    }

    // =========================================================================
    // NewColumn Tests
    // =========================================================================

    #[test]
    fn test_string_requires_length() {
        let keys = field_errors(NewColumn::new("name", "Name", ColumnType::String).validate());
        assert_eq!(keys, vec!["length"]);
        assert!(NewColumn::new("name", "Name", ColumnType::String)
            .length(80)
            .validate()
            .is_ok());
    }

    #[test]
    fn test_decimal_requires_precision_and_scale() {
        let keys = field_errors(NewColumn::new("price", "Price", ColumnType::Decimal).validate());
        assert_eq!(keys, vec!["precision", "scale"]);
        assert!(NewColumn::new("price", "Price", ColumnType::Decimal)
            .precision(10)
            .scale(0)
            .validate()
            .is_ok());
    }

    #[test]
    fn test_int_requires_precision() {
        let keys = field_errors(NewColumn::new("qty", "Qty", ColumnType::Int).validate());
        assert_eq!(keys, vec!["precision"]);
    }

    #[test]
    fn test_fk_requires_target() {
        let keys = field_errors(NewColumn::new("owner_id", "Owner", ColumnType::Fk).validate());
        assert_eq!(keys, vec!["fkTableId"]);
    }

    #[test]
    fn test_select_requires_options() {
        let keys = field_errors(NewColumn::new("status", "Status", ColumnType::Select).validate());
        assert_eq!(keys, vec!["options"]);

        let keys = field_errors(
            NewColumn::new("status", "Status", ColumnType::Select)
                .option("", "Empty")
                .validate(),
        );
        assert_eq!(keys, vec!["options"]);
    }

    #[test]
    fn test_column_name_must_be_snake_case() {
        let keys = field_errors(NewColumn::new("FirstName", "First", ColumnType::Text).validate());
        assert_eq!(keys, vec!["name"]);
        let keys = field_errors(NewColumn::new("order", "Order", ColumnType::Text).validate());
        assert_eq!(keys, vec!["name"]);
    }

    #[test]
    fn test_id_reserved_for_primary_key() {
        let keys = field_errors(NewColumn::new("id", "Id", ColumnType::String).length(36).validate());
        assert_eq!(keys, vec!["name"]);

        NewColumn::new("id", "Id", ColumnType::String)
            .length(36)
            .primary_key()
            .validate()
            .unwrap();
    }

    #[test]
    fn test_zero_facets_rejected() {
        let keys = field_errors(
            NewColumn::new("name", "Name", ColumnType::String)
                .length(0)
                .validate(),
        );
        assert_eq!(keys, vec!["length"]);
    }

    #[test]
    fn test_into_descriptor_clears_unrelated_facets() {
        let col = NewColumn::new("qty", "Qty", ColumnType::Int)
            .length(40)
            .precision(10)
            .scale(2)
            .auto_generate()
            .default_value("  ")
            .option("a", "A")
            .into_descriptor(Uuid::nil(), 4);

        assert_eq!(col.facets, ColumnFacets { length: None, precision: Some(10), scale: None });
        assert!(!col.auto_generate);
        assert!(col.default_value.is_none());
        assert!(col.options_json.is_none());
        assert!(col.fk_column_name.is_none());
        assert_eq!(col.order, 4);
    }

    #[test]
    fn test_into_descriptor_fk_defaults() {
        let target = Uuid::new_v4();
        let col = NewColumn::new("owner_id", "Owner", ColumnType::Fk)
            .references(target)
            .into_descriptor(Uuid::nil(), 1);
        assert_eq!(col.fk_table_id, Some(target));
        assert_eq!(col.fk_column_name.as_deref(), Some("id"));
        assert_eq!(col.display_field.as_deref(), Some("id"));
    }

    #[test]
    fn test_into_descriptor_select_options() {
        let col = NewColumn::new("status", "Status", ColumnType::Select)
            .option("open", "Aberto")
            .into_descriptor(Uuid::nil(), 1);
        assert_eq!(col.select_options(), vec![SelectOption::new("open", "Aberto")]);
    }
}
