//! DDL Generation for Dictionary Tables
//!
//! Builds the PostgreSQL statements that project a [`TableDescriptor`] onto a
//! physical table. Every statement is additive and safe to repeat: tables and
//! columns are created only when missing and foreign keys are dropped before
//! being re-added.

use crate::error::Result;
use crate::schema::TableDescriptor;
use crate::sql::sanitize::{full_table_name, quote_identifier};
use crate::sql::type_map::{map_type_to_sql, to_safe_default};
use crate::types::ColumnDescriptor;

/// Column injected when a dictionary declares no primary key
pub const INJECTED_ID_COLUMN: &str = "\"id\" uuid primary key default gen_random_uuid()";

/// DDL Generator for one dictionary table
pub struct DdlGenerator<'a> {
    table: &'a TableDescriptor,
}

impl<'a> DdlGenerator<'a> {
    pub fn new(table: &'a TableDescriptor) -> Self {
        Self { table }
    }

    /// `CREATE EXTENSION IF NOT EXISTS "pgcrypto"`, needed by `gen_random_uuid()`
    pub fn ensure_pgcrypto() -> &'static str {
        "CREATE EXTENSION IF NOT EXISTS \"pgcrypto\""
    }

    /// Quoted `"schema"."table"` reference
    pub fn table_ref(&self) -> Result<String> {
        full_table_name(&self.table.schema_name, &self.table.table_name)
    }

    /// `CREATE TABLE IF NOT EXISTS` with every declared column
    ///
    /// Prepends the injected `id` column when no column is a primary key.
    pub fn create_table(&self) -> Result<String> {
        let mut column_defs = Vec::with_capacity(self.table.columns.len() + 1);

        if self.table.primary_key().is_none() {
            column_defs.push(INJECTED_ID_COLUMN.to_string());
        }

        for column in &self.table.columns {
            column_defs.push(Self::column_definition(column)?);
        }

        Ok(format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            self.table_ref()?,
            column_defs.join(", ")
        ))
    }

    /// `CREATE TABLE IF NOT EXISTS` with the primary key column only
    ///
    /// The remaining columns are added one by one afterwards so that an
    /// existing table and a fresh one converge through the same path.
    pub fn create_table_stub(&self) -> Result<String> {
        let key = match self.table.primary_key() {
            Some(pk) => Self::column_definition(pk)?,
            None => INJECTED_ID_COLUMN.to_string(),
        };

        Ok(format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            self.table_ref()?,
            key
        ))
    }

    /// `ALTER TABLE ... ADD COLUMN IF NOT EXISTS` for one column
    pub fn add_column(&self, column: &ColumnDescriptor) -> Result<String> {
        Ok(format!(
            "ALTER TABLE {} ADD COLUMN IF NOT EXISTS {}",
            self.table_ref()?,
            Self::column_definition(column)?
        ))
    }

    /// Name of the foreign key constraint owned by an FK column
    pub fn fk_constraint_name(&self, column: &ColumnDescriptor) -> String {
        format!("{}_{}_fkey", self.table.table_name, column.name)
    }

    /// `ALTER TABLE ... DROP CONSTRAINT IF EXISTS` for a column's foreign key
    pub fn drop_foreign_key(&self, column: &ColumnDescriptor) -> Result<String> {
        Ok(format!(
            "ALTER TABLE {} DROP CONSTRAINT IF EXISTS {}",
            self.table_ref()?,
            quote_identifier(&self.fk_constraint_name(column))?
        ))
    }

    /// `ALTER TABLE ... ADD CONSTRAINT ... FOREIGN KEY` pointing at `target`
    pub fn add_foreign_key(
        &self,
        column: &ColumnDescriptor,
        target: &TableDescriptor,
    ) -> Result<String> {
        Ok(format!(
            "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({})",
            self.table_ref()?,
            quote_identifier(&self.fk_constraint_name(column))?,
            quote_identifier(&column.name)?,
            full_table_name(&target.schema_name, &target.table_name)?,
            quote_identifier(column.fk_key_column())?
        ))
    }

    /// Format a single column definition for CREATE TABLE or ADD COLUMN
    ///
    /// Order: name, type, `NOT NULL` (required or primary key), `UNIQUE`
    /// (unique and not primary key), `DEFAULT`, `PRIMARY KEY`.
    pub fn column_definition(column: &ColumnDescriptor) -> Result<String> {
        let mut parts = vec![
            quote_identifier(&column.name)?,
            map_type_to_sql(column.column_type, &column.facets),
        ];

        if column.required || column.is_primary_key {
            parts.push("NOT NULL".to_string());
        }

        if column.unique && !column.is_primary_key {
            parts.push("UNIQUE".to_string());
        }

        if let Some(default) = to_safe_default(column) {
            parts.push(format!("DEFAULT {}", default));
        }

        if column.is_primary_key {
            parts.push("PRIMARY KEY".to_string());
        }

        Ok(parts.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DictionaryError;
    use crate::types::{ColumnFacets, ColumnType};
    use uuid::Uuid;

    // ==================== Test Helpers ====================

    fn customers() -> TableDescriptor {
        TableDescriptor::new("public", "customers").with_columns(vec![
            ColumnDescriptor::new("name", ColumnType::String)
                .required()
                .facets(ColumnFacets::length(120)),
            ColumnDescriptor::new("balance", ColumnType::Decimal)
                .facets(ColumnFacets::numeric(10, 2))
                .default_value("0"),
        ])
    }

    fn with_uuid_pk() -> TableDescriptor {
        TableDescriptor::new("public", "tokens").with_columns(vec![
            ColumnDescriptor::new("token", ColumnType::Uuid)
                .primary_key()
                .unique()
                .auto_generate(),
            ColumnDescriptor::new("note", ColumnType::Text),
        ])
    }

    // ==================== CREATE TABLE Tests ====================

    #[test]
    fn test_create_table_injects_id() {
        let table = customers();
        let ddl = DdlGenerator::new(&table).create_table().unwrap();

        assert_eq!(
            ddl,
            "CREATE TABLE IF NOT EXISTS \"public\".\"customers\" (\
             \"id\" uuid primary key default gen_random_uuid(), \
             \"name\" varchar(120) NOT NULL, \
             \"balance\" numeric(10,2) DEFAULT 0)"
        );
    }

    #[test]
    fn test_create_table_with_declared_primary_key() {
        let table = with_uuid_pk();
        let ddl = DdlGenerator::new(&table).create_table().unwrap();

        assert!(!ddl.contains("\"id\""));
        assert!(ddl.contains(
            "\"token\" uuid NOT NULL DEFAULT gen_random_uuid() PRIMARY KEY"
        ));
        assert!(!ddl.contains("UNIQUE"));
    }

    #[test]
    fn test_create_table_without_columns() {
        let table = TableDescriptor::new("public", "empty");
        let ddl = DdlGenerator::new(&table).create_table().unwrap();
        assert_eq!(
            ddl,
            "CREATE TABLE IF NOT EXISTS \"public\".\"empty\" (\"id\" uuid primary key default gen_random_uuid())"
        );
    }

    #[test]
    fn test_create_table_rejects_bad_names() {
        let table = TableDescriptor::new("public", "drop");
        let err = DdlGenerator::new(&table).create_table().unwrap_err();
        assert!(matches!(err, DictionaryError::InvalidIdentifier(_)));

        let table = TableDescriptor::new("public", "customers")
            .with_columns(vec![ColumnDescriptor::new("a;b", ColumnType::Text)]);
        assert!(DdlGenerator::new(&table).create_table().is_err());
    }

    #[test]
    fn test_create_table_stub() {
        let table = customers();
        assert_eq!(
            DdlGenerator::new(&table).create_table_stub().unwrap(),
            "CREATE TABLE IF NOT EXISTS \"public\".\"customers\" (\"id\" uuid primary key default gen_random_uuid())"
        );

        let table = with_uuid_pk();
        let stub = DdlGenerator::new(&table).create_table_stub().unwrap();
        assert!(stub.ends_with("(\"token\" uuid NOT NULL DEFAULT gen_random_uuid() PRIMARY KEY)"));
    }

    // ==================== ADD COLUMN Tests ====================

    #[test]
    fn test_add_column() {
        let table = customers();
        let column = ColumnDescriptor::new("active", ColumnType::Boolean)
            .required()
            .default_value("true");
        let ddl = DdlGenerator::new(&table).add_column(&column).unwrap();
        assert_eq!(
            ddl,
            "ALTER TABLE \"public\".\"customers\" ADD COLUMN IF NOT EXISTS \"active\" boolean NOT NULL DEFAULT true"
        );
    }

    #[test]
    fn test_add_column_drops_unsafe_default() {
        let table = customers();
        let column = ColumnDescriptor::new("active", ColumnType::Boolean).default_value("1");
        let ddl = DdlGenerator::new(&table).add_column(&column).unwrap();
        assert!(ddl.ends_with("\"active\" boolean"));
    }

    // ==================== Foreign Key Tests ====================

    #[test]
    fn test_foreign_key_statements() {
        let target = TableDescriptor::new("public", "customers");
        let orders = TableDescriptor::new("public", "orders");
        let column = ColumnDescriptor::new("customer_id", ColumnType::Fk)
            .references(Uuid::new_v4(), "id");
        let generator = DdlGenerator::new(&orders);

        assert_eq!(generator.fk_constraint_name(&column), "orders_customer_id_fkey");
        assert_eq!(
            generator.drop_foreign_key(&column).unwrap(),
            "ALTER TABLE \"public\".\"orders\" DROP CONSTRAINT IF EXISTS \"orders_customer_id_fkey\""
        );
        assert_eq!(
            generator.add_foreign_key(&column, &target).unwrap(),
            "ALTER TABLE \"public\".\"orders\" ADD CONSTRAINT \"orders_customer_id_fkey\" \
             FOREIGN KEY (\"customer_id\") REFERENCES \"public\".\"customers\" (\"id\")"
        );
    }

    #[test]
    fn test_foreign_key_defaults_to_id_column() {
        let target = TableDescriptor::new("crm", "accounts");
        let orders = TableDescriptor::new("public", "orders");
        let mut column = ColumnDescriptor::new("account_id", ColumnType::Fk);
        column.fk_table_id = Some(Uuid::new_v4());

        let ddl = DdlGenerator::new(&orders)
            .add_foreign_key(&column, &target)
            .unwrap();
        assert!(ddl.ends_with("REFERENCES \"crm\".\"accounts\" (\"id\")"));
    }

    // ==================== column_definition Tests ====================

    #[test]
    fn test_column_definition_unique() {
        let column = ColumnDescriptor::new("email", ColumnType::String).unique();
        assert_eq!(
            DdlGenerator::column_definition(&column).unwrap(),
            "\"email\" varchar(255) UNIQUE"
        );
    }

    #[test]
    fn test_column_definition_escapes_text_default() {
        let column = ColumnDescriptor::new("motto", ColumnType::Text).default_value("it's");
        assert_eq!(
            DdlGenerator::column_definition(&column).unwrap(),
            "\"motto\" text DEFAULT 'it''s'"
        );
    }

    #[test]
    fn test_column_definition_primary_key_order() {
        let column = ColumnDescriptor::new("code", ColumnType::Int).primary_key().unique();
        assert_eq!(
            DdlGenerator::column_definition(&column).unwrap(),
            "\"code\" integer NOT NULL PRIMARY KEY"
        );
    }
}
