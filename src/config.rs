//! Indexer configuration.
//!
//! Every field has a default, so a JSON document only needs the values it
//! changes:
//!
//! ```
//! use vfs_search::config::IndexerConfig;
//! use vfs_search::storage::StorageConfig;
//!
//! let config = IndexerConfig::from_json_str(r#"{
//!     "name": "private_user1",
//!     "storage": {"type": "file", "path": "/var/lib/vfs-search"},
//!     "backfill_depth": 8
//! }"#).unwrap();
//!
//! assert_eq!(config.name, "private_user1");
//! assert!(matches!(config.storage, StorageConfig::File(_)));
//! assert_eq!(config.change_depth, 1);
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SearchError};
use crate::index::extract::DEFAULT_MARKUP_EXTENSIONS;
use crate::storage::StorageConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    /// Instance name. Namespaces the durable state inside `storage`.
    pub name: String,

    /// Where the durable state lives.
    pub storage: StorageConfig,

    /// How deep a single filesystem change is indexed. 1 is the changed
    /// entry only.
    pub change_depth: usize,

    /// How deep a pinned TLF is traversed once fully synced.
    pub backfill_depth: usize,

    /// Files above this size are indexed by name only.
    pub max_content_bytes: u64,

    /// Capacity of the worker queue. Event delivery blocks when it is full.
    pub queue_capacity: usize,

    /// Log records before the key/value store is compacted.
    pub kv_compaction_threshold: usize,

    /// File extensions whose content is stripped of markup.
    pub markup_extensions: Vec<String>,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        IndexerConfig {
            name: "default".to_string(),
            storage: StorageConfig::default(),
            change_depth: 1,
            backfill_depth: 32,
            max_content_bytes: 10 * 1024 * 1024,
            queue_capacity: 1024,
            kv_compaction_threshold: 256,
            markup_extensions: DEFAULT_MARKUP_EXTENSIONS
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
        }
    }
}

impl IndexerConfig {
    pub fn with_name(name: impl Into<String>) -> Self {
        IndexerConfig {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: IndexerConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(SearchError::invalid_config("name must not be empty"));
        }
        if self.name.contains("..") {
            return Err(SearchError::invalid_config(format!(
                "name {:?} must not contain '..'",
                self.name
            )));
        }
        if self.queue_capacity == 0 {
            return Err(SearchError::invalid_config("queue_capacity must be positive"));
        }
        if self.kv_compaction_threshold == 0 {
            return Err(SearchError::invalid_config(
                "kv_compaction_threshold must be positive",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = IndexerConfig::default();
        assert_eq!(config.backfill_depth, 32);
        assert_eq!(config.max_content_bytes, 10 * 1024 * 1024);
        assert!(config.markup_extensions.contains(&"html".to_string()));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        assert!(IndexerConfig::from_json_str(r#"{"name": " "}"#).is_err());
        assert!(IndexerConfig::from_json_str(r#"{"queue_capacity": 0}"#).is_err());
        assert!(IndexerConfig::from_json_str(r#"{"name": "../x"}"#).is_err());
        assert!(IndexerConfig::from_json_str("not json").is_err());
    }

    #[test]
    fn test_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("indexer.json");
        std::fs::write(&path, r#"{"name": "from_file", "change_depth": 2}"#).unwrap();

        let config = IndexerConfig::from_json_file(&path).unwrap();
        assert_eq!(config.name, "from_file");
        assert_eq!(config.change_depth, 2);
        assert_eq!(config.queue_capacity, 1024);
    }
}
