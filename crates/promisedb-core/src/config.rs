//! Database and table configuration

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Database name used when none is given.
pub const DEFAULT_NAME: &str = "PromiseDB";

/// Which database to open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbConfig {
    /// Database name
    pub name: String,
    /// Schema version; `None` opens whatever version exists (1 for a new database)
    #[serde(default)]
    pub version: Option<u32>,
}

impl DbConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
        }
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.version = Some(version);
        self
    }

    /// Parse from JSON, e.g. `{"name": "app", "version": 2}`.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

impl Default for DbConfig {
    fn default() -> Self {
        Self::new(DEFAULT_NAME)
    }
}

/// Shape of one table (object store).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TableSchema {
    /// Object store name
    pub name: String,
    /// Primary key path; `None` creates a store without a key path
    #[serde(default)]
    pub primary_key: Option<String>,
    /// Fields indexed by an index of the same name
    #[serde(default)]
    pub indexes: Vec<String>,
}

impl TableSchema {
    pub fn new(name: impl Into<String>, primary_key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            primary_key: Some(primary_key.into()),
            indexes: Vec::new(),
        }
    }

    /// Build from an ordered field list: the first field is the primary key
    /// path, every remaining field gets an index.
    pub fn from_fields<I, S>(name: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut fields = fields.into_iter().map(Into::into);
        Self {
            name: name.into(),
            primary_key: fields.next(),
            indexes: fields.collect(),
        }
    }

    /// Add a secondary index over `field`.
    pub fn index(mut self, field: impl Into<String>) -> Self {
        self.indexes.push(field.into());
        self
    }

    /// Parse from JSON, e.g. `{"name": "logs", "primary_key": "id", "indexes": ["size"]}`.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_from_fields() {
        let schema = TableSchema::from_fields("testTable", ["id", "log", "size", "expires"]);
        assert_eq!(schema.name, "testTable");
        assert_eq!(schema.primary_key.as_deref(), Some("id"));
        assert_eq!(schema.indexes, vec!["log", "size", "expires"]);
    }

    #[test]
    fn test_from_empty_fields() {
        let schema = TableSchema::from_fields("bare", Vec::<String>::new());
        assert_eq!(schema.primary_key, None);
        assert!(schema.indexes.is_empty());
    }

    #[test]
    fn test_builder_matches_fields() {
        let built = TableSchema::new("logs", "id").index("size");
        assert_eq!(built, TableSchema::from_fields("logs", ["id", "size"]));
    }

    #[test]
    fn test_default_config() {
        let config = DbConfig::default();
        assert_eq!(config.name, "PromiseDB");
        assert_eq!(config.version, None);
    }

    #[test]
    fn test_json_config() {
        let config = DbConfig::from_json(r#"{"name": "app"}"#).unwrap();
        assert_eq!(config, DbConfig::new("app"));

        let config = DbConfig::from_json(r#"{"name": "app", "version": 3}"#).unwrap();
        assert_eq!(config.version, Some(3));

        let schema =
            TableSchema::from_json(r#"{"name": "logs", "primary_key": "id", "indexes": ["size"]}"#)
                .unwrap();
        assert_eq!(schema, TableSchema::new("logs", "id").index("size"));

        assert!(DbConfig::from_json("{}").is_err());
    }
}
