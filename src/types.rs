//! Core type definitions for dictionaries
//!
//! Includes the column type tag, type facets, select options and the column
//! descriptor.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Column Types
// ============================================================================

/// Abstract column type chosen by the administrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ColumnType {
    /// Short text with a maximum length (varchar)
    String,
    /// Unbounded text
    Text,
    /// 32-bit integer
    Int,
    /// Fixed-point number with precision and scale
    Decimal,
    Boolean,
    Date,
    /// Timestamp with time zone
    DateTime,
    Uuid,
    /// Reference to a row of another dictionary table
    Fk,
    /// Text constrained to a fixed list of options
    Select,
}

impl ColumnType {
    pub const ALL: [ColumnType; 10] = [
        ColumnType::String,
        ColumnType::Text,
        ColumnType::Int,
        ColumnType::Decimal,
        ColumnType::Boolean,
        ColumnType::Date,
        ColumnType::DateTime,
        ColumnType::Uuid,
        ColumnType::Fk,
        ColumnType::Select,
    ];

    /// Tag stored in the metadata tables
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::String => "STRING",
            ColumnType::Text => "TEXT",
            ColumnType::Int => "INT",
            ColumnType::Decimal => "DECIMAL",
            ColumnType::Boolean => "BOOLEAN",
            ColumnType::Date => "DATE",
            ColumnType::DateTime => "DATETIME",
            ColumnType::Uuid => "UUID",
            ColumnType::Fk => "FK",
            ColumnType::Select => "SELECT",
        }
    }

    /// Whether free-text search applies to this column
    pub fn is_searchable(&self) -> bool {
        matches!(
            self,
            ColumnType::String | ColumnType::Text | ColumnType::Select
        )
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ColumnType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ColumnType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("Unknown column type '{}'", s))
    }
}

/// Numeric and length facets that refine a column type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnFacets {
    pub length: Option<u32>,
    pub precision: Option<u32>,
    pub scale: Option<u32>,
}

impl ColumnFacets {
    pub fn length(length: u32) -> Self {
        Self {
            length: Some(length),
            ..Self::default()
        }
    }

    pub fn numeric(precision: u32, scale: u32) -> Self {
        Self {
            length: None,
            precision: Some(precision),
            scale: Some(scale),
        }
    }
}

// ============================================================================
// Select Options
// ============================================================================

/// One allowed value of a SELECT column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectOption {
    pub value: String,
    pub label: String,
}

impl SelectOption {
    pub fn new(value: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            label: label.into(),
        }
    }
}

/// Parse the `optionsJson` wire format
///
/// Never fails: malformed JSON or a non-array yields an empty list, entries
/// without a value are dropped and a missing label falls back to the value.
pub fn parse_select_options(options_json: Option<&str>) -> Vec<SelectOption> {
    let Some(raw) = options_json else {
        return Vec::new();
    };

    let Ok(serde_json::Value::Array(items)) = serde_json::from_str::<serde_json::Value>(raw) else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| {
            let obj = item.as_object()?;
            let value = obj.get("value").map(json_scalar_to_string)?;
            if value.is_empty() {
                return None;
            }
            let label = obj
                .get("label")
                .map(json_scalar_to_string)
                .filter(|l| !l.is_empty())
                .unwrap_or_else(|| value.clone());
            Some(SelectOption { value, label })
        })
        .collect()
}

fn json_scalar_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

// ============================================================================
// Column Descriptor
// ============================================================================

/// One column of a dictionary table, as loaded from the metadata store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnDescriptor {
    pub id: Uuid,
    pub table_id: Uuid,
    pub name: String,
    pub label: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    pub required: bool,
    pub unique: bool,
    pub default_value: Option<String>,
    pub is_primary_key: bool,
    #[serde(flatten)]
    pub facets: ColumnFacets,
    pub auto_generate: bool,
    pub fk_table_id: Option<Uuid>,
    pub fk_column_name: Option<String>,
    pub display_field: Option<String>,
    pub options_json: Option<String>,
    pub order: i32,
}

impl ColumnDescriptor {
    /// Create a descriptor with defaults; mostly useful in tests and tools
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        let name = name.into();
        Self {
            id: Uuid::new_v4(),
            table_id: Uuid::nil(),
            label: name.clone(),
            name,
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
            options_json: None,
            order: 1,
        }
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
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

    pub fn facets(mut self, facets: ColumnFacets) -> Self {
        self.facets = facets;
        self
    }

    pub fn auto_generate(mut self) -> Self {
        self.auto_generate = true;
        self
    }

    pub fn references(mut self, table_id: Uuid, column: impl Into<String>) -> Self {
        self.fk_table_id = Some(table_id);
        self.fk_column_name = Some(column.into());
        self
    }

    pub fn display_field(mut self, field: impl Into<String>) -> Self {
        self.display_field = Some(field.into());
        self
    }

    pub fn options(mut self, options: &[SelectOption]) -> Self {
        self.options_json = serde_json::to_string(options).ok();
        self
    }

    pub fn order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }

    /// Parsed SELECT options (empty for other types or malformed JSON)
    pub fn select_options(&self) -> Vec<SelectOption> {
        parse_select_options(self.options_json.as_deref())
    }

    /// Target key column of an FK column, `id` unless configured
    pub fn fk_key_column(&self) -> &str {
        self.fk_column_name
            .as_deref()
            .filter(|c| !c.is_empty())
            .unwrap_or("id")
    }

    /// Column shown instead of the raw key, falling back to the key column
    pub fn fk_display_column(&self) -> &str {
        self.display_field
            .as_deref()
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| self.fk_key_column())
    }

    /// True for the implicit `id` primary key, which callers never supply
    pub fn is_id_primary_key(&self) -> bool {
        self.is_primary_key && self.name == "id"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // =========================================================================
    // ColumnType Tests
    // =========================================================================

    #[test]
    fn test_column_type_round_trips_through_tag() {
        for t in ColumnType::ALL {
            assert_eq!(t.as_str().parse::<ColumnType>().unwrap(), t);
        }
        assert_eq!("datetime".parse::<ColumnType>().unwrap(), ColumnType::DateTime);
        assert!("BLOB".parse::<ColumnType>().is_err());
    }

    #[test]
    fn test_column_type_serialization_matches_tag() {
        for t in ColumnType::ALL {
            let json = serde_json::to_string(&t).unwrap();
            assert_eq!(json, format!("\"{}\"", t.as_str()));
        }
    }

    #[test]
    fn test_searchable_types() {
        let searchable: Vec<_> = ColumnType::ALL
            .into_iter()
            .filter(|t| t.is_searchable())
            .collect();
        assert_eq!(
            searchable,
            vec![ColumnType::String, ColumnType::Text, ColumnType::Select]
        );
    }

    // =========================================================================
    // Select Option Parsing Tests
    // =========================================================================

    #[test]
    fn test_parse_select_options_valid() {
        let opts = parse_select_options(Some(
            r#"[{"value":"open","label":"Aberto"},{"value":"closed","label":"Closed"}]"#,
        ));
        assert_eq!(
            opts,
            vec![
                SelectOption::new("open", "Aberto"),
                SelectOption::new("closed", "Closed")
            ]
        );
    }

    #[test]
    fn test_parse_select_options_malformed_is_empty() {
        assert!(parse_select_options(None).is_empty());
        assert!(parse_select_options(Some("not json")).is_empty());
        assert!(parse_select_options(Some(r#"{"value":"a"}"#)).is_empty());
        assert!(parse_select_options(Some("")).is_empty());
    }

    #[test]
    fn test_parse_select_options_skips_bad_items() {
        let opts = parse_select_options(Some(
            r#"[{"value":""},{"label":"no value"},3,null,{"value":2},{"value":"x"}]"#,
        ));
        assert_eq!(
            opts,
            vec![SelectOption::new("2", "2"), SelectOption::new("x", "x")]
        );
    }

    // =========================================================================
    // ColumnDescriptor Tests
    // =========================================================================

    #[test]
    fn test_column_descriptor_builder() {
        let target = Uuid::new_v4();
        let col = ColumnDescriptor::new("owner_id", ColumnType::Fk)
            .label("Owner")
            .required()
            .references(target, "id")
            .display_field("name")
            .order(3);

        assert_eq!(col.label, "Owner");
        assert!(col.required);
        assert_eq!(col.fk_table_id, Some(target));
        assert_eq!(col.fk_key_column(), "id");
        assert_eq!(col.fk_display_column(), "name");
        assert_eq!(col.order, 3);
    }

    #[test]
    fn test_fk_columns_default_to_id() {
        let col = ColumnDescriptor::new("owner_id", ColumnType::Fk);
        assert_eq!(col.fk_key_column(), "id");
        assert_eq!(col.fk_display_column(), "id");
    }

    #[test]
    fn test_options_builder_round_trips() {
        let col = ColumnDescriptor::new("status", ColumnType::Select)
            .options(&[SelectOption::new("open", "Aberto")]);
        assert_eq!(col.select_options(), vec![SelectOption::new("open", "Aberto")]);
    }

    #[test]
    fn test_descriptor_serializes_camel_case() {
        let col = ColumnDescriptor::new("price", ColumnType::Decimal)
            .facets(ColumnFacets::numeric(10, 2));
        let json = serde_json::to_value(&col).unwrap();
        assert_eq!(json["type"], "DECIMAL");
        assert_eq!(json["precision"], 10);
        assert_eq!(json["isPrimaryKey"], false);
        assert!(json.get("fkTableId").is_some());
    }
}
