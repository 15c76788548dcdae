//! Row-level types for the generic CRUD engine
//!
//! Includes Row, ListParams, ListResult, Pagination and ReferenceOption.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::schema::TableDescriptor;

/// A physical row as a JSON object keyed by column name
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Display labels per FK column, keyed by the stored key value
pub type ReferenceLabels = HashMap<String, HashMap<String, String>>;

pub const DEFAULT_PAGE_SIZE: i64 = 10;
pub const MAX_PAGE_SIZE: i64 = 100;

/// Maximum number of rows offered as choices for an FK column
pub const REFERENCE_OPTIONS_LIMIT: i64 = 500;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

/// Listing parameters as requested by a caller; normalized by the engine
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListParams {
    pub page: Option<i64>,
    pub page_size: Option<i64>,
    /// Column to sort by; ignored unless it names a declared column
    pub sort: Option<String>,
    #[serde(default)]
    pub direction: SortDirection,
    /// Case-insensitive substring matched against text columns
    pub search: Option<String>,
}

impl ListParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, page: i64) -> Self {
        self.page = Some(page);
        self
    }

    pub fn page_size(mut self, page_size: i64) -> Self {
        self.page_size = Some(page_size);
        self
    }

    pub fn sort(mut self, column: impl Into<String>, direction: SortDirection) -> Self {
        self.sort = Some(column.into());
        self.direction = direction;
        self
    }

    pub fn search(mut self, term: impl Into<String>) -> Self {
        self.search = Some(term.into());
        self
    }

    /// Search term with surrounding whitespace removed, `None` when blank
    pub fn search_term(&self) -> Option<&str> {
        self.search.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }

    /// Requested page, at least 1
    pub fn requested_page(&self) -> i64 {
        self.page.unwrap_or(1).max(1)
    }

    /// Page size clamped to `1..=100`, default 10
    pub fn effective_page_size(&self) -> i64 {
        self.page_size
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE)
    }

    /// Sort column, falling back to the row key unless a declared column is named
    pub fn sort_column<'a>(&'a self, table: &'a TableDescriptor) -> &'a str {
        match self.sort.as_deref() {
            Some(s) if table.column(s).is_some() => s,
            _ => table.key_column(),
        }
    }
}

/// Resolved page window for a listing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub page: i64,
    pub page_size: i64,
    pub total_pages: i64,
    pub offset: i64,
}

impl Pagination {
    /// Clamp the requested page to the last existing page
    ///
    /// There is always at least one page, even for an empty table.
    pub fn resolve(requested_page: i64, page_size: i64, total: i64) -> Self {
        let page_size = page_size.max(1);
        let total_pages = if total <= 0 {
            1
        } else {
            (total + page_size - 1) / page_size
        };
        let page = requested_page.clamp(1, total_pages);

        Self {
            page,
            page_size,
            total_pages,
            offset: (page - 1) * page_size,
        }
    }
}

/// One page of rows with its metadata
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListResult {
    pub table: TableDescriptor,
    pub rows: Vec<Row>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
    pub total_pages: i64,
}

/// A choice offered for an FK or SELECT column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceOption {
    pub value: String,
    pub label: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ColumnDescriptor, ColumnType};
    use rstest::rstest;

    #[rstest]
    #[case(999, 10, 25, 3, 3, 20)]
    #[case(1, 10, 110, 1, 11, 0)]
    #[case(11, 10, 110, 11, 11, 100)]
    #[case(0, 10, 5, 1, 1, 0)]
    #[case(4, 10, 0, 1, 1, 0)]
    #[case(2, 100, 101, 2, 2, 100)]
    fn test_pagination_resolve(
        #[case] requested: i64,
        #[case] size: i64,
        #[case] total: i64,
        #[case] page: i64,
        #[case] total_pages: i64,
        #[case] offset: i64,
    ) {
        let p = Pagination::resolve(requested, size, total);
        assert_eq!(p.page, page);
        assert_eq!(p.total_pages, total_pages);
        assert_eq!(p.offset, offset);
    }

    #[rstest]
    #[case(None, 10)]
    #[case(Some(0), 1)]
    #[case(Some(-5), 1)]
    #[case(Some(50), 50)]
    #[case(Some(1000), 100)]
    fn test_page_size_clamped(#[case] requested: Option<i64>, #[case] expected: i64) {
        let params = ListParams {
            page_size: requested,
            ..ListParams::default()
        };
        assert_eq!(params.effective_page_size(), expected);
    }

    #[test]
    fn test_requested_page_minimum() {
        assert_eq!(ListParams::new().requested_page(), 1);
        assert_eq!(ListParams::new().page(-3).requested_page(), 1);
        assert_eq!(ListParams::new().page(4).requested_page(), 4);
    }

    #[test]
    fn test_sort_column_falls_back_to_key() {
        let table = TableDescriptor::new("public", "customers")
            .with_columns(vec![ColumnDescriptor::new("name", ColumnType::String)]);

        let params = ListParams::new().sort("name", SortDirection::Desc);
        assert_eq!(params.sort_column(&table), "name");
        assert_eq!(params.direction.as_sql(), "DESC");

        let params = ListParams::new().sort("name; drop table x", SortDirection::Asc);
        assert_eq!(params.sort_column(&table), "id");
        assert_eq!(ListParams::new().sort_column(&table), "id");
    }

    #[test]
    fn test_search_term_ignores_blank() {
        assert_eq!(ListParams::new().search("  ").search_term(), None);
        assert_eq!(ListParams::new().search(" ana ").search_term(), Some("ana"));
    }

    #[test]
    fn test_list_params_deserialize() {
        let params: ListParams =
            serde_json::from_str(r#"{"page":2,"pageSize":25,"direction":"desc"}"#).unwrap();
        assert_eq!(params.requested_page(), 2);
        assert_eq!(params.effective_page_size(), 25);
        assert_eq!(params.direction, SortDirection::Desc);
    }
}
