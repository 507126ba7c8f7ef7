use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use traced_store::{MemoryStore, SqliteStore, StoreError, TraceStore};

// ─────────────────────────────────────────────────────────────────────────────
// Error
// ─────────────────────────────────────────────────────────────────────────────

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Unknown storage type: {0}")]
    UnknownStorageType(String),

    #[error("Storage backend not compiled in: {0}")]
    BackendUnavailable(String),

    #[error("Failed to open trace store: {0}")]
    Store(#[from] StoreError),
}

// ─────────────────────────────────────────────────────────────────────────────
// Defaults
// ─────────────────────────────────────────────────────────────────────────────

pub const DEFAULT_SQLITE_PATH: &str = "traces.db";
pub const DEFAULT_MONGODB_URI: &str = "mongodb://localhost:27017/";
pub const DEFAULT_MONGODB_DATABASE: &str = "traced";

const STORAGE_TYPES: &[&str] = &["memory", "sql", "sqlite", "mongodb"];

fn default_connection_string() -> String {
    DEFAULT_SQLITE_PATH.to_string()
}

fn default_mongodb_uri() -> String {
    DEFAULT_MONGODB_URI.to_string()
}

fn default_mongodb_database() -> String {
    DEFAULT_MONGODB_DATABASE.to_string()
}

fn default_traces_collection() -> String {
    "traces".to_string()
}

fn default_spans_collection() -> String {
    "trace_spans".to_string()
}

fn default_events_collection() -> String {
    "trace_events".to_string()
}

fn default_artifacts_collection() -> String {
    "trace_artifacts".to_string()
}

// ─────────────────────────────────────────────────────────────────────────────
// Config Structs
// ─────────────────────────────────────────────────────────────────────────────

/// Which backend to persist traces to, with its connection settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "storage_type", rename_all = "lowercase")]
pub enum StorageConfig {
    #[default]
    Memory,
    #[serde(alias = "sqlite")]
    Sql {
        /// A file path, `sqlite://<path>`, or `:memory:`.
        #[serde(default = "default_connection_string")]
        connection_string: String,
    },
    Mongodb {
        #[serde(default = "default_mongodb_uri")]
        uri: String,
        #[serde(default = "default_mongodb_database")]
        database: String,
        #[serde(default = "default_traces_collection")]
        traces_collection: String,
        #[serde(default = "default_spans_collection")]
        spans_collection: String,
        #[serde(default = "default_events_collection")]
        events_collection: String,
        #[serde(default = "default_artifacts_collection")]
        artifacts_collection: String,
    },
}

impl StorageConfig {
    pub fn sql(connection_string: impl Into<String>) -> Self {
        StorageConfig::Sql {
            connection_string: connection_string.into(),
        }
    }

    /// MongoDB settings with default collection names.
    pub fn mongodb(uri: impl Into<String>, database: impl Into<String>) -> Self {
        StorageConfig::Mongodb {
            uri: uri.into(),
            database: database.into(),
            traces_collection: default_traces_collection(),
            spans_collection: default_spans_collection(),
            events_collection: default_events_collection(),
            artifacts_collection: default_artifacts_collection(),
        }
    }

    pub fn storage_type(&self) -> &'static str {
        match self {
            StorageConfig::Memory => "memory",
            StorageConfig::Sql { .. } => "sql",
            StorageConfig::Mongodb { .. } => "mongodb",
        }
    }
}

/// Input of the process-wide tracing configuration call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TracingConfig {
    pub storage: StorageConfig,
}

impl From<StorageConfig> for TracingConfig {
    fn from(storage: StorageConfig) -> Self {
        Self { storage }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Loading
// ─────────────────────────────────────────────────────────────────────────────

impl TracingConfig {
    pub fn memory() -> Self {
        StorageConfig::Memory.into()
    }

    pub fn from_json_str(content: &str) -> Result<Self, ConfigError> {
        let value: Value = serde_json::from_str(content)?;
        if let Some(kind) = value.get("storage_type").and_then(Value::as_str) {
            check_storage_type(kind)?;
        }
        Ok(serde_json::from_value(value)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    /// Reads `TRACED_*` environment variables; memory storage when unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok(), StorageConfig::Memory)
    }

    /// Like [`TracingConfig::from_env`] but with a caller-chosen fallback
    /// when `TRACED_STORAGE_TYPE` is unset.
    pub fn from_env_or(fallback: StorageConfig) -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok(), fallback)
    }

    pub fn from_lookup<F>(lookup: F, fallback: StorageConfig) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let Some(kind) = lookup("TRACED_STORAGE_TYPE") else {
            return Ok(fallback.into());
        };
        check_storage_type(&kind)?;

        let storage = match kind.as_str() {
            "memory" => StorageConfig::Memory,
            "sql" | "sqlite" => StorageConfig::sql(
                lookup("TRACED_CONNECTION_STRING")
                    .or_else(|| lookup("TRACED_DB_PATH"))
                    .unwrap_or_else(default_connection_string),
            ),
            _ => {
                let mut storage = StorageConfig::mongodb(
                    lookup("TRACED_MONGODB_URI").unwrap_or_else(default_mongodb_uri),
                    lookup("TRACED_MONGODB_DATABASE").unwrap_or_else(default_mongodb_database),
                );
                if let StorageConfig::Mongodb {
                    ref mut events_collection,
                    ref mut artifacts_collection,
                    ..
                } = storage
                {
                    if let Some(name) = lookup("TRACED_EVENTS_COLLECTION") {
                        *events_collection = name;
                    }
                    if let Some(name) = lookup("TRACED_ARTIFACTS_COLLECTION") {
                        *artifacts_collection = name;
                    }
                }
                storage
            }
        };
        Ok(storage.into())
    }

    /// Opens the configured backend.
    pub fn open_store(&self) -> Result<Arc<dyn TraceStore>, ConfigError> {
        let store: Arc<dyn TraceStore> = match self.storage {
            StorageConfig::Memory => Arc::new(MemoryStore::new()),
            StorageConfig::Sql {
                ref connection_string,
            } => match sqlite_path(connection_string) {
                ":memory:" => Arc::new(SqliteStore::in_memory()?),
                path => Arc::new(SqliteStore::open(path)?),
            },
            StorageConfig::Mongodb { .. } => self.open_mongodb()?,
        };
        tracing::info!("Configured tracing with storage type: {}", self.storage.storage_type());
        Ok(store)
    }

    #[cfg(feature = "mongodb")]
    fn open_mongodb(&self) -> Result<Arc<dyn TraceStore>, ConfigError> {
        use traced_store::{MongoCollections, MongoStore};

        let StorageConfig::Mongodb {
            ref uri,
            ref database,
            ref traces_collection,
            ref spans_collection,
            ref events_collection,
            ref artifacts_collection,
        } = self.storage
        else {
            return Err(ConfigError::UnknownStorageType(
                self.storage.storage_type().to_string(),
            ));
        };
        let collections = MongoCollections {
            traces: traces_collection.clone(),
            spans: spans_collection.clone(),
            events: events_collection.clone(),
            artifacts: artifacts_collection.clone(),
        };
        Ok(Arc::new(MongoStore::connect(uri, database, &collections)?))
    }

    #[cfg(not(feature = "mongodb"))]
    fn open_mongodb(&self) -> Result<Arc<dyn TraceStore>, ConfigError> {
        Err(ConfigError::BackendUnavailable("mongodb".to_string()))
    }
}

fn check_storage_type(kind: &str) -> Result<(), ConfigError> {
    if STORAGE_TYPES.contains(&kind) {
        Ok(())
    } else {
        Err(ConfigError::UnknownStorageType(kind.to_string()))
    }
}

fn sqlite_path(connection_string: &str) -> &str {
    connection_string
        .strip_prefix("sqlite://")
        .unwrap_or(connection_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_parse_memory() {
        let config = TracingConfig::from_json_str(r#"{"storage_type": "memory"}"#).unwrap();
        assert_eq!(config, TracingConfig::memory());
    }

    #[test]
    fn test_parse_sqlite_alias_and_default_path() {
        let config = TracingConfig::from_json_str(r#"{"storage_type": "sqlite"}"#).unwrap();
        assert_eq!(config.storage, StorageConfig::sql("traces.db"));

        let config = TracingConfig::from_json_str(
            r#"{"storage_type": "sql", "connection_string": "sqlite:///tmp/t.db"}"#,
        )
        .unwrap();
        assert_eq!(config.storage, StorageConfig::sql("sqlite:///tmp/t.db"));
    }

    #[test]
    fn test_parse_mongodb_defaults() {
        let config = TracingConfig::from_json_str(
            r#"{"storage_type": "mongodb", "events_collection": "ev"}"#,
        )
        .unwrap();
        let StorageConfig::Mongodb {
            uri,
            database,
            events_collection,
            artifacts_collection,
            ..
        } = config.storage
        else {
            panic!("expected mongodb config");
        };
        assert_eq!(uri, "mongodb://localhost:27017/");
        assert_eq!(database, "traced");
        assert_eq!(events_collection, "ev");
        assert_eq!(artifacts_collection, "trace_artifacts");
    }

    #[test]
    fn test_unknown_storage_type() {
        let err = TracingConfig::from_json_str(r#"{"storage_type": "redis"}"#).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownStorageType(ref t) if t == "redis"));

        let err = TracingConfig::from_lookup(
            lookup(&[("TRACED_STORAGE_TYPE", "file")]),
            StorageConfig::Memory,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownStorageType(_)));
    }

    #[test]
    fn test_from_lookup() {
        let config = TracingConfig::from_lookup(lookup(&[]), StorageConfig::sql("/data/traces.db")).unwrap();
        assert_eq!(config.storage, StorageConfig::sql("/data/traces.db"));

        let config = TracingConfig::from_lookup(
            lookup(&[("TRACED_STORAGE_TYPE", "sqlite"), ("TRACED_DB_PATH", "x.db")]),
            StorageConfig::Memory,
        )
        .unwrap();
        assert_eq!(config.storage, StorageConfig::sql("x.db"));

        let config = TracingConfig::from_lookup(
            lookup(&[
                ("TRACED_STORAGE_TYPE", "mongodb"),
                ("TRACED_MONGODB_DATABASE", "prod"),
                ("TRACED_ARTIFACTS_COLLECTION", "arts"),
            ]),
            StorageConfig::Memory,
        )
        .unwrap();
        let StorageConfig::Mongodb {
            database,
            artifacts_collection,
            ..
        } = config.storage
        else {
            panic!("expected mongodb config");
        };
        assert_eq!(database, "prod");
        assert_eq!(artifacts_collection, "arts");
    }

    #[test]
    fn test_load_and_open_sqlite() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("nested").join("traces.db");
        let config_path = dir.path().join("tracing.json");
        let content = serde_json::json!({
            "storage_type": "sql",
            "connection_string": format!("sqlite://{}", db_path.display()),
        });
        fs::write(&config_path, content.to_string()).unwrap();

        let config = TracingConfig::load(&config_path).unwrap();
        let store = config.open_store().unwrap();
        assert_eq!(store.backend(), "sqlite");
        assert!(db_path.exists());
    }

    #[test]
    fn test_open_in_memory_backends() {
        assert_eq!(TracingConfig::memory().open_store().unwrap().backend(), "memory");
        let config: TracingConfig = StorageConfig::sql(":memory:").into();
        assert_eq!(config.open_store().unwrap().backend(), "sqlite");
    }

    #[test]
    fn test_load_missing_file() {
        let err = TracingConfig::load(Path::new("/nonexistent/tracing.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
