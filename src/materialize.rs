//! DDL engine
//!
//! Projects dictionary metadata onto physical PostgreSQL tables. Executing a
//! dictionary is additive and idempotent: missing columns are added, foreign
//! keys are recreated, nothing is ever dropped or altered in place.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{DictionaryError, Result};
use crate::metadata::MetadataStore;
use crate::schema::TableDescriptor;
use crate::sql::ddl::DdlGenerator;
use crate::types::ColumnDescriptor;

/// Outcome of a successful execute
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionReport {
    pub table_id: Uuid,
    /// Columns that did not exist before this run
    pub added_columns: Vec<String>,
    /// Foreign key constraints dropped and re-added
    pub foreign_keys: Vec<String>,
    pub executed_at: DateTime<Utc>,
}

/// Statements for one execute, built before the transaction opens
#[derive(Debug)]
struct ExecutionPlan {
    stub: String,
    /// (column name, `ADD COLUMN` statement) in column order
    columns: Vec<(String, String)>,
    foreign_keys: Vec<ForeignKeyStep>,
}

#[derive(Debug)]
struct ForeignKeyStep {
    constraint: String,
    drop: String,
    add: String,
}

impl ExecutionPlan {
    fn build(table: &TableDescriptor, targets: &[(&ColumnDescriptor, TableDescriptor)]) -> Result<Self> {
        let ddl = DdlGenerator::new(table);

        let columns = table
            .columns
            .iter()
            .map(|c| -> Result<(String, String)> { Ok((c.name.clone(), ddl.add_column(c)?)) })
            .collect::<Result<Vec<_>>>()?;

        let foreign_keys = targets
            .iter()
            .map(|(column, target)| -> Result<ForeignKeyStep> {
                Ok(ForeignKeyStep {
                    constraint: ddl.fk_constraint_name(column),
                    drop: ddl.drop_foreign_key(column)?,
                    add: ddl.add_foreign_key(column, target)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            stub: ddl.create_table_stub()?,
            columns,
            foreign_keys,
        })
    }
}

/// Applies dictionary metadata to the database
#[derive(Debug, Clone)]
pub struct Materializer {
    pool: PgPool,
    metadata: MetadataStore,
}

impl Materializer {
    pub fn new(pool: PgPool, metadata: MetadataStore) -> Self {
        Self { pool, metadata }
    }

    /// Create the physical table with every declared column
    pub async fn create_physical_table(&self, table: &TableDescriptor) -> Result<()> {
        let sql = DdlGenerator::new(table).create_table()?;

        sqlx::query(DdlGenerator::ensure_pgcrypto())
            .execute(&self.pool)
            .await
            .map_err(DictionaryError::ddl_failure)?;
        sqlx::query(&sql)
            .execute(&self.pool)
            .await
            .map_err(DictionaryError::ddl_failure)?;

        tracing::info!(
            schema = %table.schema_name,
            table = %table.table_name,
            "physical table created"
        );
        Ok(())
    }

    /// Add one column to an existing physical table, if missing
    pub async fn add_column(&self, table: &TableDescriptor, column: &ColumnDescriptor) -> Result<()> {
        let sql = DdlGenerator::new(table).add_column(column)?;

        sqlx::query(&sql)
            .execute(&self.pool)
            .await
            .map_err(DictionaryError::ddl_failure)?;

        tracing::info!(table = %table.table_name, column = %column.name, "column materialized");
        Ok(())
    }

    /// Bring the physical table in line with the dictionary's metadata
    ///
    /// Runs in a single transaction holding an advisory lock on the table id,
    /// so concurrent executes of one dictionary are serialized. Any failure
    /// rolls back every statement of the run.
    pub async fn execute_dictionary(&self, table_id: Uuid) -> Result<ExecutionReport> {
        let table = self
            .metadata
            .get_table_meta_by_id(table_id)
            .await?
            .ok_or_else(|| {
                DictionaryError::table_not_accessible(format!("dictionary {}", table_id))
            })?;

        let targets = self.resolve_targets(&table).await?;
        let plan = ExecutionPlan::build(&table, &targets)?;

        tracing::info!(
            table_id = %table_id,
            table = %table.table_name,
            columns = plan.columns.len(),
            foreign_keys = plan.foreign_keys.len(),
            "executing dictionary"
        );

        match self.apply(&table, &plan).await {
            Ok(report) => {
                tracing::info!(
                    table_id = %table_id,
                    added = report.added_columns.len(),
                    "dictionary executed"
                );
                Ok(report)
            }
            Err(err) => {
                tracing::error!(table_id = %table_id, error = %err, "dictionary execution rolled back");
                Err(err)
            }
        }
    }

    /// FK columns paired with their target descriptors
    ///
    /// Columns whose target dictionary no longer exists get no constraint.
    async fn resolve_targets<'t>(
        &self,
        table: &'t TableDescriptor,
    ) -> Result<Vec<(&'t ColumnDescriptor, TableDescriptor)>> {
        let mut targets = Vec::new();

        for column in table.fk_columns() {
            let Some(target_id) = column.fk_table_id else {
                continue;
            };
            match self.metadata.get_table_meta_by_id(target_id).await? {
                Some(target) => targets.push((column, target)),
                None => tracing::warn!(
                    table = %table.table_name,
                    column = %column.name,
                    target_id = %target_id,
                    "referenced dictionary missing, constraint skipped"
                ),
            }
        }

        Ok(targets)
    }

    async fn apply(&self, table: &TableDescriptor, plan: &ExecutionPlan) -> Result<ExecutionReport> {
        let mut tx = self.pool.begin().await.map_err(DictionaryError::ddl_failure)?;

        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(table.id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(DictionaryError::ddl_failure)?;

        sqlx::query(DdlGenerator::ensure_pgcrypto())
            .execute(&mut *tx)
            .await
            .map_err(DictionaryError::ddl_failure)?;

        sqlx::query(&plan.stub)
            .execute(&mut *tx)
            .await
            .map_err(DictionaryError::ddl_failure)?;

        let existing: HashSet<String> = sqlx::query_scalar::<_, String>(
            "SELECT column_name::text FROM information_schema.columns \
             WHERE table_schema = $1 AND table_name = $2",
        )
        .bind(&table.schema_name)
        .bind(&table.table_name)
        .fetch_all(&mut *tx)
        .await
        .map_err(DictionaryError::ddl_failure)?
        .into_iter()
        .collect();

        let mut added_columns = Vec::new();
        for (name, statement) in &plan.columns {
            if existing.contains(name) {
                continue;
            }
            sqlx::query(statement)
                .execute(&mut *tx)
                .await
                .map_err(DictionaryError::ddl_failure)?;
            tracing::debug!(table = %table.table_name, column = %name, "column added");
            added_columns.push(name.clone());
        }

        let mut foreign_keys = Vec::with_capacity(plan.foreign_keys.len());
        for step in &plan.foreign_keys {
            sqlx::query(&step.drop)
                .execute(&mut *tx)
                .await
                .map_err(DictionaryError::ddl_failure)?;
            sqlx::query(&step.add)
                .execute(&mut *tx)
                .await
                .map_err(DictionaryError::ddl_failure)?;
            foreign_keys.push(step.constraint.clone());
        }

        let executed_at = self
            .metadata
            .mark_executed(&mut *tx, table.id)
            .await
            .map_err(|e| match e {
                DictionaryError::Sql(e) => DictionaryError::ddl_failure(e),
                other => other,
            })?;

        tx.commit().await.map_err(DictionaryError::ddl_failure)?;

        Ok(ExecutionReport {
            table_id: table.id,
            added_columns,
            foreign_keys,
            executed_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ColumnType;

    fn orders(customers: &TableDescriptor) -> TableDescriptor {
        TableDescriptor::new("public", "orders").with_columns(vec![
            ColumnDescriptor::new("total", ColumnType::Decimal).order(1),
            ColumnDescriptor::new("customer_id", ColumnType::Fk)
                .references(customers.id, "id")
                .order(2),
        ])
    }

    #[test]
    fn test_plan_lists_every_column_in_order() {
        let customers = TableDescriptor::new("public", "customers");
        let table = orders(&customers);
        let fk = table.column("customer_id").unwrap();

        let plan = ExecutionPlan::build(&table, &[(fk, customers.clone())]).unwrap();

        assert_eq!(
            plan.stub,
            "CREATE TABLE IF NOT EXISTS \"public\".\"orders\" (\"id\" uuid primary key default gen_random_uuid())"
        );
        let names: Vec<&str> = plan.columns.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, ["total", "customer_id"]);
        assert!(plan.columns[0].1.contains("ADD COLUMN IF NOT EXISTS \"total\" numeric(12,2)"));

        assert_eq!(plan.foreign_keys.len(), 1);
        let step = &plan.foreign_keys[0];
        assert_eq!(step.constraint, "orders_customer_id_fkey");
        assert!(step.drop.ends_with("DROP CONSTRAINT IF EXISTS \"orders_customer_id_fkey\""));
        assert!(step.add.ends_with("REFERENCES \"public\".\"customers\" (\"id\")"));
    }

    #[test]
    fn test_plan_without_resolved_targets_has_no_constraints() {
        let customers = TableDescriptor::new("public", "customers");
        let plan = ExecutionPlan::build(&orders(&customers), &[]).unwrap();
        assert!(plan.foreign_keys.is_empty());
        assert_eq!(plan.columns.len(), 2);
    }

    #[test]
    fn test_plan_rejects_bad_identifiers() {
        let table = TableDescriptor::new("public", "orders")
            .with_columns(vec![ColumnDescriptor::new("select", ColumnType::Text)]);
        let err = ExecutionPlan::build(&table, &[]).unwrap_err();
        assert!(matches!(err, DictionaryError::InvalidIdentifier(_)));
    }

    #[test]
    fn test_report_serializes_camel_case() {
        let report = ExecutionReport {
            table_id: Uuid::nil(),
            added_columns: vec!["total".into()],
            foreign_keys: vec![],
            executed_at: DateTime::<Utc>::UNIX_EPOCH,
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["addedColumns"][0], "total");
        assert!(json.get("foreignKeys").is_some());
        assert!(json.get("executedAt").is_some());
    }
}
