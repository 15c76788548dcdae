//! Statement builders for the generic CRUD engine
//!
//! Identifiers are validated and quoted here; values are never formatted into
//! the SQL and are bound by the caller in placeholder order.

use crate::error::Result;
use crate::record::{ListParams, REFERENCE_OPTIONS_LIMIT};
use crate::schema::TableDescriptor;
use crate::sql::sanitize::{full_table_name, quote_identifier};
use crate::sql::type_map::placeholder;
use crate::validation::ValidatedField;

/// Count and page statements for one listing request
#[derive(Debug, Clone, PartialEq)]
pub struct ListQuery {
    /// `SELECT COUNT(*)`, binds the search pattern when present
    pub count_sql: String,
    /// Page select; binds the search pattern when present, then limit, offset
    pub select_sql: String,
    /// `%term%` pattern, only set when a search clause was generated
    pub search_pattern: Option<String>,
}

/// Build the count and page statements for a listing
///
/// The search term is ORed across STRING, TEXT and SELECT columns with
/// `ILIKE`. Without such columns the term is ignored.
pub fn build_list_query(table: &TableDescriptor, params: &ListParams) -> Result<ListQuery> {
    let table_ref = full_table_name(&table.schema_name, &table.table_name)?;

    let mut where_clause = String::new();
    let mut search_pattern = None;

    if let Some(term) = params.search_term() {
        let predicates = table
            .searchable_columns()
            .map(|c| -> Result<String> {
                Ok(format!("{} ILIKE $1", quote_identifier(&c.name)?))
            })
            .collect::<Result<Vec<_>>>()?;

        if !predicates.is_empty() {
            where_clause = format!(" WHERE ({})", predicates.join(" OR "));
            search_pattern = Some(format!("%{}%", term));
        }
    }

    let next = if search_pattern.is_some() { 2 } else { 1 };

    let count_sql = format!("SELECT COUNT(*) AS count FROM {}{}", table_ref, where_clause);
    let select_sql = format!(
        "SELECT * FROM {}{} ORDER BY {} {} LIMIT ${} OFFSET ${}",
        table_ref,
        where_clause,
        quote_identifier(params.sort_column(table))?,
        params.direction.as_sql(),
        next,
        next + 1
    );

    Ok(ListQuery {
        count_sql,
        select_sql,
        search_pattern,
    })
}

fn key_predicate(table: &TableDescriptor, index: usize) -> Result<String> {
    Ok(format!(
        "{} = {}",
        quote_identifier(table.key_column())?,
        placeholder(index, table.key_type())
    ))
}

/// `SELECT * ... WHERE key = $1 LIMIT 1`
pub fn select_by_key(table: &TableDescriptor) -> Result<String> {
    Ok(format!(
        "SELECT * FROM {} WHERE {} LIMIT 1",
        full_table_name(&table.schema_name, &table.table_name)?,
        key_predicate(table, 1)?
    ))
}

/// `INSERT` of the supplied fields, `DEFAULT VALUES` when there are none
pub fn insert_row(table: &TableDescriptor, fields: &[ValidatedField]) -> Result<String> {
    let table_ref = full_table_name(&table.schema_name, &table.table_name)?;

    if fields.is_empty() {
        return Ok(format!("INSERT INTO {} DEFAULT VALUES RETURNING *", table_ref));
    }

    let columns = fields
        .iter()
        .map(|f| quote_identifier(&f.column))
        .collect::<Result<Vec<_>>>()?;
    let values: Vec<String> = fields
        .iter()
        .enumerate()
        .map(|(i, f)| placeholder(i + 1, f.column_type))
        .collect();

    Ok(format!(
        "INSERT INTO {} ({}) VALUES ({}) RETURNING *",
        table_ref,
        columns.join(", "),
        values.join(", ")
    ))
}

/// `UPDATE ... SET` of the supplied fields; the key binds last
pub fn update_row(table: &TableDescriptor, fields: &[ValidatedField]) -> Result<String> {
    let sets = fields
        .iter()
        .enumerate()
        .map(|(i, f)| -> Result<String> {
            Ok(format!(
                "{} = {}",
                quote_identifier(&f.column)?,
                placeholder(i + 1, f.column_type)
            ))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(format!(
        "UPDATE {} SET {} WHERE {} RETURNING *",
        full_table_name(&table.schema_name, &table.table_name)?,
        sets.join(", "),
        key_predicate(table, fields.len() + 1)?
    ))
}

/// `DELETE ... WHERE key = $1`
pub fn delete_row(table: &TableDescriptor) -> Result<String> {
    Ok(format!(
        "DELETE FROM {} WHERE {}",
        full_table_name(&table.schema_name, &table.table_name)?,
        key_predicate(table, 1)?
    ))
}

/// Existence check for an FK target, comparing as text
pub fn exists_by_column(target: &TableDescriptor, key_column: &str) -> Result<String> {
    Ok(format!(
        "SELECT 1 FROM {} WHERE {}::text = $1 LIMIT 1",
        full_table_name(&target.schema_name, &target.table_name)?,
        quote_identifier(key_column)?
    ))
}

fn value_label_projection(key_column: &str, display_column: &str) -> Result<String> {
    Ok(format!(
        "{}::text AS value, {}::text AS label",
        quote_identifier(key_column)?,
        quote_identifier(display_column)?
    ))
}

/// Up to 500 `{value, label}` pairs of an FK target, ordered by label
pub fn reference_options(
    target: &TableDescriptor,
    key_column: &str,
    display_column: &str,
) -> Result<String> {
    Ok(format!(
        "SELECT {} FROM {} ORDER BY {} ASC LIMIT {}",
        value_label_projection(key_column, display_column)?,
        full_table_name(&target.schema_name, &target.table_name)?,
        quote_identifier(display_column)?,
        REFERENCE_OPTIONS_LIMIT
    ))
}

/// `{value, label}` pairs for the given key values, one placeholder each
pub fn reference_labels(
    target: &TableDescriptor,
    key_column: &str,
    display_column: &str,
    value_count: usize,
) -> Result<String> {
    let placeholders: Vec<String> = (1..=value_count).map(|i| format!("${}", i)).collect();

    Ok(format!(
        "SELECT {} FROM {} WHERE {}::text IN ({})",
        value_label_projection(key_column, display_column)?,
        full_table_name(&target.schema_name, &target.table_name)?,
        quote_identifier(key_column)?,
        placeholders.join(", ")
    ))
}
