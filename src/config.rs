//! Configuration for DictionaryStore
//!
//! Provides a builder pattern and environment loading for the dictionary store.

use crate::error::{DictionaryError, Result};

pub const DEFAULT_TABLES_TABLE: &str = "dictionary_tables";
pub const DEFAULT_COLUMNS_TABLE: &str = "dictionary_columns";
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;

/// Configuration for the dictionary store
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// PostgreSQL database URL
    pub database_url: String,
    /// Metadata table holding one row per dictionary (default: "dictionary_tables")
    pub tables_table: String,
    /// Metadata table holding one row per column (default: "dictionary_columns")
    pub columns_table: String,
    /// Upper bound of the connection pool
    pub max_connections: u32,
    /// Reject FK values whose target dictionary has no metadata (default: true)
    ///
    /// When false such values are accepted without an existence check.
    pub strict_references: bool,
}

impl StoreConfig {
    /// Create a new configuration builder
    pub fn builder(database_url: impl Into<String>) -> StoreConfigBuilder {
        StoreConfigBuilder::new(database_url)
    }

    /// Load from `DATABASE_URL` and `DICTIONARY_MAX_CONNECTIONS`
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from any key/value source, e.g. a test map instead of the process env
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL")
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| DictionaryError::config("DATABASE_URL is not set"))?;

        let mut builder = StoreConfigBuilder::new(database_url);

        if let Some(raw) = lookup("DICTIONARY_MAX_CONNECTIONS") {
            let max = raw
                .trim()
                .parse::<u32>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| {
                    DictionaryError::config(format!(
                        "DICTIONARY_MAX_CONNECTIONS must be a positive integer, got '{}'",
                        raw
                    ))
                })?;
            builder = builder.max_connections(max);
        }

        Ok(builder.build())
    }
}

/// Builder for StoreConfig
#[derive(Debug)]
pub struct StoreConfigBuilder {
    database_url: String,
    tables_table: String,
    columns_table: String,
    max_connections: u32,
    strict_references: bool,
}

impl StoreConfigBuilder {
    /// Create a new builder with the database URL
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            tables_table: DEFAULT_TABLES_TABLE.to_string(),
            columns_table: DEFAULT_COLUMNS_TABLE.to_string(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            strict_references: true,
        }
    }

    /// Set the metadata table names
    pub fn metadata_tables(
        mut self,
        tables_table: impl Into<String>,
        columns_table: impl Into<String>,
    ) -> Self {
        self.tables_table = tables_table.into();
        self.columns_table = columns_table.into();
        self
    }

    /// Set the connection pool size (default: 10)
    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    /// Enable or disable strict FK target checks (default: true)
    pub fn strict_references(mut self, enabled: bool) -> Self {
        self.strict_references = enabled;
        self
    }

    /// Build the configuration
    pub fn build(self) -> StoreConfig {
        StoreConfig {
            database_url: self.database_url,
            tables_table: self.tables_table,
            columns_table: self.columns_table,
            max_connections: self.max_connections,
            strict_references: self.strict_references,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    // =========================================================================
    // Builder Tests
    // =========================================================================

    #[test]
    fn test_default_config() {
        let config = StoreConfig::builder("postgres://localhost/test").build();

        assert_eq!(config.database_url, "postgres://localhost/test");
        assert_eq!(config.tables_table, "dictionary_tables");
        assert_eq!(config.columns_table, "dictionary_columns");
        assert_eq!(config.max_connections, 10);
        assert!(config.strict_references);
    }

    #[test]
    fn test_builder_accepts_string() {
        let config = StoreConfig::builder(String::from("postgres://localhost/db")).build();
        assert_eq!(config.database_url, "postgres://localhost/db");
    }

    #[test]
    fn test_custom_metadata_tables() {
        let config = StoreConfig::builder("postgres://localhost/test")
            .metadata_tables("t_tables", String::from("t_columns"))
            .build();

        assert_eq!(config.tables_table, "t_tables");
        assert_eq!(config.columns_table, "t_columns");
    }

    #[test]
    fn test_lenient_references() {
        let config = StoreConfig::builder("postgres://localhost/test")
            .strict_references(false)
            .max_connections(3)
            .build();

        assert!(!config.strict_references);
        assert_eq!(config.max_connections, 3);
    }

    // =========================================================================
    // Environment Tests
    // =========================================================================

    #[test]
    fn test_from_lookup_reads_url_and_pool_size() {
        let config = StoreConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://db/app"),
            ("DICTIONARY_MAX_CONNECTIONS", " 25 "),
        ]))
        .unwrap();

        assert_eq!(config.database_url, "postgres://db/app");
        assert_eq!(config.max_connections, 25);
        assert!(config.strict_references);
    }

    #[test]
    fn test_from_lookup_defaults_pool_size() {
        let config = StoreConfig::from_lookup(lookup(&[("DATABASE_URL", "postgres://db/app")]))
            .unwrap();
        assert_eq!(config.max_connections, DEFAULT_MAX_CONNECTIONS);
    }

    #[test]
    fn test_from_lookup_requires_url() {
        let err = StoreConfig::from_lookup(lookup(&[])).unwrap_err();
        assert!(matches!(err, DictionaryError::Config(_)));

        let err = StoreConfig::from_lookup(lookup(&[("DATABASE_URL", "  ")])).unwrap_err();
        assert!(err.to_string().contains("DATABASE_URL"));
    }

    #[test]
    fn test_from_lookup_rejects_bad_pool_size() {
        for bad in ["0", "-1", "many"] {
            let err = StoreConfig::from_lookup(lookup(&[
                ("DATABASE_URL", "postgres://db/app"),
                ("DICTIONARY_MAX_CONNECTIONS", bad),
            ]))
            .unwrap_err();
            assert!(err.to_string().contains("DICTIONARY_MAX_CONNECTIONS"));
        }
    }
}
