//! Storage abstraction layer.
//!
//! The durable state of an index instance (document id counter, block
//! pointer mappings, per-TLF progress) lives in a [`kv::KvStore`], which in
//! turn writes its log and snapshot files through the [`Storage`] facade
//! defined here. File and memory backends can be swapped without touching
//! the indexer.
//!
//! # Storage Types
//!
//! - [`file::FileStorage`]: files under a root directory, optionally synced
//!   on every write.
//! - [`memory::MemoryStorage`]: in-memory files for tests and throwaway
//!   instances. Survives "restarts" as long as the same instance is reused.
//! - [`prefixed::PrefixedStorage`]: a namespaced view over another backend,
//!   used to give every index instance its own directory.
//!
//! # Example
//!
//! ```
//! use vfs_search::storage::{StorageConfig, StorageFactory};
//! use vfs_search::storage::memory::MemoryStorageConfig;
//!
//! # fn main() -> vfs_search::error::Result<()> {
//! let storage = StorageFactory::create(StorageConfig::Memory(MemoryStorageConfig::default()))?;
//! assert!(!storage.file_exists("kv.log"));
//! # Ok(())
//! # }
//! ```

use std::io::{Read, Seek, Write};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SearchError};

pub mod file;
pub mod kv;
pub mod memory;
pub mod prefixed;

/// A trait for storage backends that can store and retrieve named files.
pub trait Storage: Send + Sync + std::fmt::Debug {
    /// Open an existing file for reading.
    fn open_input(&self, name: &str) -> Result<Box<dyn StorageInput>>;

    /// Create a file for writing, truncating any existing content.
    ///
    /// The content becomes visible to readers once the output is closed.
    fn create_output(&self, name: &str) -> Result<Box<dyn StorageOutput>>;

    /// Open a file for appending, creating it if needed.
    fn create_output_append(&self, name: &str) -> Result<Box<dyn StorageOutput>>;

    /// Check if a file exists.
    fn file_exists(&self, name: &str) -> bool;

    /// Delete a file. Deleting a missing file is not an error.
    fn delete_file(&self, name: &str) -> Result<()>;

    /// Atomically replace `new_name` with `old_name`.
    fn rename_file(&self, old_name: &str, new_name: &str) -> Result<()>;

    /// Make all closed outputs durable.
    fn sync(&self) -> Result<()>;

    /// Close the storage. Later calls fail with [`StorageError::StorageClosed`].
    fn close(&self) -> Result<()>;
}

/// A readable file handle.
pub trait StorageInput: Read + Seek + Send + std::fmt::Debug {
    fn size(&self) -> Result<u64>;
}

/// A writable file handle.
pub trait StorageOutput: Write + Send + std::fmt::Debug {
    /// Flush buffers and, where the backend supports it, fsync.
    fn flush_and_sync(&mut self) -> Result<()>;

    /// Bytes written so far, including pre-existing content in append mode.
    fn position(&self) -> Result<u64>;

    /// Publish the written content and release the handle.
    fn close(&mut self) -> Result<()>;
}

/// Configuration for the supported storage backends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StorageConfig {
    File(file::FileStorageConfig),

    Memory(memory::MemoryStorageConfig),
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Memory(memory::MemoryStorageConfig::default())
    }
}

/// Helper for constructing storage backends from configuration.
pub struct StorageFactory;

impl StorageFactory {
    pub fn create(config: StorageConfig) -> Result<Arc<dyn Storage>> {
        match config {
            StorageConfig::Memory(mem_config) => {
                let storage = memory::MemoryStorage::new(mem_config);
                Ok(Arc::new(storage))
            }
            StorageConfig::File(file_config) => {
                let path = file_config.path.clone();
                let storage = file::FileStorage::new(&path, file_config)?;
                Ok(Arc::new(storage))
            }
        }
    }
}

/// Low-level storage failures.
#[derive(Debug, Clone)]
pub enum StorageError {
    FileNotFound(String),

    IoError(String),

    Corrupt(String),

    StorageClosed,

    InvalidOperation(String),
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageError::FileNotFound(name) => write!(f, "File not found: {name}"),
            StorageError::IoError(msg) => write!(f, "I/O error: {msg}"),
            StorageError::Corrupt(msg) => write!(f, "Corrupt data: {msg}"),
            StorageError::StorageClosed => write!(f, "Storage is closed"),
            StorageError::InvalidOperation(msg) => write!(f, "Invalid operation: {msg}"),
        }
    }
}

impl std::error::Error for StorageError {}

impl From<StorageError> for SearchError {
    fn from(err: StorageError) -> Self {
        SearchError::storage(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::file::FileStorageConfig;
    use crate::storage::memory::MemoryStorageConfig;

    #[test]
    fn test_storage_config_default() {
        match StorageConfig::default() {
            StorageConfig::Memory(mem_config) => {
                assert_eq!(mem_config.initial_capacity, 16);
            }
            _ => panic!("Expected Memory config"),
        }
    }

    #[test]
    fn test_storage_config_json() {
        let json = r#"{"type":"file","path":"/tmp/idx","sync_writes":true}"#;
        let config: StorageConfig = serde_json::from_str(json).unwrap();
        match config {
            StorageConfig::File(file_config) => {
                assert_eq!(file_config.path, std::path::PathBuf::from("/tmp/idx"));
                assert!(file_config.sync_writes);
                assert_eq!(file_config.buffer_size, 65536);
            }
            _ => panic!("Expected File config"),
        }
    }

    #[test]
    fn test_storage_error_display() {
        let err = StorageError::FileNotFound("kv.log".to_string());
        assert_eq!(err.to_string(), "File not found: kv.log");

        let err = StorageError::Corrupt("bad crc".to_string());
        assert_eq!(err.to_string(), "Corrupt data: bad crc");

        let err = StorageError::StorageClosed;
        assert_eq!(err.to_string(), "Storage is closed");

        let err: SearchError = StorageError::IoError("disk full".to_string()).into();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_storage_factory_memory() {
        let config = StorageConfig::Memory(MemoryStorageConfig::default());
        let storage = StorageFactory::create(config).unwrap();
        assert!(!storage.file_exists("test.txt"));
    }

    #[test]
    fn test_storage_factory_file() {
        use tempfile::TempDir;

        let temp_dir = TempDir::new().unwrap();
        let config = StorageConfig::File(FileStorageConfig::new(temp_dir.path()));
        let storage = StorageFactory::create(config).unwrap();

        let mut output = storage.create_output("test.txt").unwrap();
        output.write_all(b"Hello, Factory!").unwrap();
        output.close().unwrap();

        let mut input = storage.open_input("test.txt").unwrap();
        let mut buffer = Vec::new();
        input.read_to_end(&mut buffer).unwrap();
        assert_eq!(buffer, b"Hello, Factory!");
    }
}
