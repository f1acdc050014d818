//! # vfs-search
//!
//! Incremental full-text indexing of a versioned, content-addressed virtual
//! filesystem.
//!
//! ## Features
//!
//! - Documents keyed by durable ids, mapped from content block pointers
//! - Local edits indexed only after a full sync round-trip
//! - Backfill of pinned folders once they are fully synced
//! - Markup-aware content extraction
//! - Pluggable storage backends and search engines
//! - Cancellable waits and shutdown

pub mod analysis;
pub mod config;
pub mod engine;
pub mod error;
pub mod fs;
pub mod index;
pub mod storage;

pub mod prelude {
    pub use crate::config::IndexerConfig;
    pub use crate::engine::{Document, SearchEngine, SearchRequest, SearchResults};
    pub use crate::error::{Result, SearchError};
    pub use crate::fs::{BlockPointer, FileSystem, FsEvent, FsPath, TlfId};
    pub use crate::index::{CancelToken, DocumentId, IndexStatus, Indexer};
}

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
