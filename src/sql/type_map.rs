//! Mapping from dictionary column types to PostgreSQL
//!
//! Covers the physical column type, the literal used in a `DEFAULT` clause and
//! the cast applied to bind placeholders.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::types::{ColumnDescriptor, ColumnFacets, ColumnType};

pub const DEFAULT_STRING_LENGTH: u32 = 255;
pub const DEFAULT_DECIMAL_PRECISION: u32 = 12;
pub const DEFAULT_DECIMAL_SCALE: u32 = 2;

static NUMERIC_LITERAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^-?\d+(\.\d+)?$").expect("valid numeric literal regex"));

/// Physical PostgreSQL type for a column
///
/// Missing facets fall back to `varchar(255)` and `numeric(12,2)`.
pub fn map_type_to_sql(column_type: ColumnType, facets: &ColumnFacets) -> String {
    match column_type {
        ColumnType::String => format!(
            "varchar({})",
            facets.length.unwrap_or(DEFAULT_STRING_LENGTH)
        ),
        ColumnType::Text | ColumnType::Select => "text".to_string(),
        ColumnType::Int => "integer".to_string(),
        ColumnType::Decimal => format!(
            "numeric({},{})",
            facets.precision.unwrap_or(DEFAULT_DECIMAL_PRECISION),
            facets.scale.unwrap_or(DEFAULT_DECIMAL_SCALE)
        ),
        ColumnType::Boolean => "boolean".to_string(),
        ColumnType::Date => "date".to_string(),
        ColumnType::DateTime => "timestamp with time zone".to_string(),
        ColumnType::Uuid | ColumnType::Fk => "uuid".to_string(),
    }
}

/// SQL literal for a column's `DEFAULT` clause
///
/// Returns `None` whenever the stored default cannot be expressed safely for
/// the column type. An unusable default is dropped, never reported.
pub fn to_safe_default(column: &ColumnDescriptor) -> Option<String> {
    let raw = column.default_value.as_deref().filter(|d| !d.is_empty());

    let Some(raw) = raw else {
        if column.column_type == ColumnType::Uuid && column.auto_generate {
            return Some("gen_random_uuid()".to_string());
        }
        return None;
    };

    match column.column_type {
        ColumnType::Boolean => match raw {
            "true" | "false" => Some(raw.to_string()),
            _ => None,
        },
        ColumnType::Int | ColumnType::Decimal => {
            NUMERIC_LITERAL.is_match(raw).then(|| raw.to_string())
        }
        ColumnType::String
        | ColumnType::Text
        | ColumnType::Date
        | ColumnType::DateTime
        | ColumnType::Select
        | ColumnType::Uuid
        | ColumnType::Fk => Some(quote_literal(raw)),
    }
}

/// Cast appended to a bind placeholder for this column type
///
/// Text-typed parameters and untyped NULLs need it to land in typed columns.
pub fn placeholder_cast(column_type: ColumnType) -> Option<&'static str> {
    match column_type {
        ColumnType::String | ColumnType::Text | ColumnType::Select => None,
        ColumnType::Int => Some("integer"),
        ColumnType::Decimal => Some("numeric"),
        ColumnType::Boolean => Some("boolean"),
        ColumnType::Date => Some("date"),
        ColumnType::DateTime => Some("timestamptz"),
        ColumnType::Uuid | ColumnType::Fk => Some("uuid"),
    }
}

/// Numbered placeholder with the cast for `column_type`, e.g. `$2::integer`
pub fn placeholder(index: usize, column_type: ColumnType) -> String {
    match placeholder_cast(column_type) {
        Some(cast) => format!("${}::{}", index, cast),
        None => format!("${}", index),
    }
}

fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(ColumnType::String, ColumnFacets::length(80), "varchar(80)")]
    #[case(ColumnType::String, ColumnFacets::default(), "varchar(255)")]
    #[case(ColumnType::Text, ColumnFacets::default(), "text")]
    #[case(ColumnType::Int, ColumnFacets::default(), "integer")]
    #[case(ColumnType::Decimal, ColumnFacets::numeric(10, 2), "numeric(10,2)")]
    #[case(ColumnType::Decimal, ColumnFacets::default(), "numeric(12,2)")]
    #[case(ColumnType::Boolean, ColumnFacets::default(), "boolean")]
    #[case(ColumnType::Date, ColumnFacets::default(), "date")]
    #[case(ColumnType::DateTime, ColumnFacets::default(), "timestamp with time zone")]
    #[case(ColumnType::Uuid, ColumnFacets::default(), "uuid")]
    #[case(ColumnType::Fk, ColumnFacets::default(), "uuid")]
    #[case(ColumnType::Select, ColumnFacets::default(), "text")]
    fn test_map_type_to_sql(
        #[case] column_type: ColumnType,
        #[case] facets: ColumnFacets,
        #[case] expected: &str,
    ) {
        assert_eq!(map_type_to_sql(column_type, &facets), expected);
    }

    #[test]
    fn test_decimal_with_partial_facets() {
        let facets = ColumnFacets {
            precision: Some(8),
            ..ColumnFacets::default()
        };
        assert_eq!(map_type_to_sql(ColumnType::Decimal, &facets), "numeric(8,2)");
    }

    // =========================================================================
    // to_safe_default Tests
    // =========================================================================

    fn with_default(column_type: ColumnType, default: &str) -> ColumnDescriptor {
        ColumnDescriptor::new("col", column_type).default_value(default)
    }

    #[rstest]
    #[case(ColumnType::Boolean, "true", Some("true"))]
    #[case(ColumnType::Boolean, "false", Some("false"))]
    #[case(ColumnType::Boolean, "1", None)]
    #[case(ColumnType::Boolean, "TRUE", None)]
    #[case(ColumnType::Int, "42", Some("42"))]
    #[case(ColumnType::Int, "-7", Some("-7"))]
    #[case(ColumnType::Decimal, "3.14", Some("3.14"))]
    #[case(ColumnType::Decimal, "1e5", None)]
    #[case(ColumnType::Int, "0; DROP TABLE x", None)]
    #[case(ColumnType::Decimal, ".5", None)]
    #[case(ColumnType::String, "open", Some("'open'"))]
    #[case(ColumnType::Text, "it's", Some("'it''s'"))]
    #[case(ColumnType::Select, "open", Some("'open'"))]
    #[case(ColumnType::Date, "2024-01-31", Some("'2024-01-31'"))]
    fn test_to_safe_default(
        #[case] column_type: ColumnType,
        #[case] raw: &str,
        #[case] expected: Option<&str>,
    ) {
        let column = with_default(column_type, raw);
        assert_eq!(to_safe_default(&column).as_deref(), expected);
    }

    #[test]
    fn test_uuid_auto_generate_default() {
        let column = ColumnDescriptor::new("token", ColumnType::Uuid).auto_generate();
        assert_eq!(
            to_safe_default(&column).as_deref(),
            Some("gen_random_uuid()")
        );
    }

    #[test]
    fn test_explicit_uuid_default_wins_over_auto_generate() {
        let column = ColumnDescriptor::new("token", ColumnType::Uuid)
            .auto_generate()
            .default_value("00000000-0000-0000-0000-000000000000");
        assert_eq!(
            to_safe_default(&column).as_deref(),
            Some("'00000000-0000-0000-0000-000000000000'")
        );
    }

    #[test]
    fn test_no_default() {
        let column = ColumnDescriptor::new("name", ColumnType::String);
        assert!(to_safe_default(&column).is_none());
        let empty = with_default(ColumnType::String, "");
        assert!(to_safe_default(&empty).is_none());
    }

    // =========================================================================
    // Placeholder Tests
    // =========================================================================

    #[test]
    fn test_placeholder_casts() {
        assert_eq!(placeholder(1, ColumnType::String), "$1");
        assert_eq!(placeholder(2, ColumnType::Int), "$2::integer");
        assert_eq!(placeholder(3, ColumnType::Fk), "$3::uuid");
        assert_eq!(placeholder(4, ColumnType::DateTime), "$4::timestamptz");
        assert_eq!(placeholder_cast(ColumnType::Select), None);
    }
}
