//! Error types for vfs-search.
//!
//! All fallible operations in this crate return [`SearchError`] through the
//! [`Result`] alias. The variants line up with how callers are expected to
//! react:
//!
//! - [`SearchError::Storage`] is fatal to an index instance; it has to be
//!   reopened.
//! - [`SearchError::NotFound`] asks the caller to pick a different operation
//!   (for example `index_child` instead of `update_child`).
//! - [`SearchError::Cancelled`] may be retried.
//! - [`SearchError::Closed`] means the instance was shut down.
//!
//! # Examples
//!
//! ```
//! use vfs_search::error::{Result, SearchError};
//!
//! fn lookup() -> Result<()> {
//!     Err(SearchError::not_found("block 0x2a"))
//! }
//!
//! let err = lookup().unwrap_err();
//! assert!(err.is_not_found());
//! assert_eq!(err.to_string(), "Not found: block 0x2a");
//! ```

use std::io;

use anyhow;
use thiserror::Error;

/// The main error type for vfs-search operations.
#[derive(Error, Debug)]
pub enum SearchError {
    /// I/O errors (file operations)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Durable store unreachable or corrupt
    #[error("Storage error: {0}")]
    Storage(String),

    /// Operation referenced an unmapped pointer, document or entry
    #[error("Not found: {0}")]
    NotFound(String),

    /// A wait or shutdown was cancelled or hit its deadline
    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    /// Operation invoked after shutdown
    #[error("Indexer is closed")]
    Closed,

    /// Content could not be turned into searchable text
    #[error("Extraction error: {0}")]
    Extraction(String),

    /// Filesystem collaborator failure
    #[error("Filesystem error: {0}")]
    FileSystem(String),

    /// Analysis-related errors (tokenization, filtering, etc.)
    #[error("Analysis error: {0}")]
    Analysis(String),

    /// Invalid argument or configuration
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error for other cases
    #[error("Error: {0}")]
    Other(String),

    /// Generic anyhow error
    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
}

/// Result type alias for operations that may fail with SearchError.
pub type Result<T> = std::result::Result<T, SearchError>;

impl SearchError {
    /// Create a new storage error.
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        SearchError::Storage(msg.into())
    }

    /// Create a new not found error.
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        SearchError::NotFound(msg.into())
    }

    /// Create a new cancelled error.
    pub fn cancelled<S: Into<String>>(msg: S) -> Self {
        SearchError::Cancelled(msg.into())
    }

    /// Create a new extraction error.
    pub fn extraction<S: Into<String>>(msg: S) -> Self {
        SearchError::Extraction(msg.into())
    }

    /// Create a new filesystem error.
    pub fn file_system<S: Into<String>>(msg: S) -> Self {
        SearchError::FileSystem(msg.into())
    }

    /// Create a new analysis error.
    pub fn analysis<S: Into<String>>(msg: S) -> Self {
        SearchError::Analysis(msg.into())
    }

    /// Create a new invalid argument error.
    pub fn invalid_argument<S: Into<String>>(msg: S) -> Self {
        SearchError::InvalidArgument(msg.into())
    }

    /// Create a new invalid config error.
    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        SearchError::InvalidArgument(format!("invalid configuration: {}", msg.into()))
    }

    /// Create a new serialization error.
    pub fn serialization<S: Into<String>>(msg: S) -> Self {
        SearchError::Serialization(msg.into())
    }

    /// Create a new generic error.
    pub fn other<S: Into<String>>(msg: S) -> Self {
        SearchError::Other(msg.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, SearchError::NotFound(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, SearchError::Cancelled(_))
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, SearchError::Closed)
    }

    /// Whether this error poisons the index instance that raised it.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SearchError::Storage(_))
    }
}

impl From<bincode::Error> for SearchError {
    fn from(err: bincode::Error) -> Self {
        SearchError::Serialization(err.to_string())
    }
}
