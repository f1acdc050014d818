//! Incremental indexing of a versioned filesystem.
//!
//! The pieces, leaves first:
//!
//! - [`doc_id`]: durable, monotonically increasing document identities.
//! - [`refs`]: which document each live block pointer belongs to.
//! - [`progress`]: the last revision indexed per TLF.
//! - [`extract`]: turning file bytes into searchable text.
//! - [`sync_gate`]: holding back changes until they are durable.
//! - [`cancel`]: cancellation tokens for blocking calls.
//! - `indexing`: the operations that turn filesystem entries into documents.
//! - `worker`: the single thread that runs them.
//! - [`indexer`]: the public handle tying everything together.

pub mod cancel;
pub mod doc_id;
pub mod extract;
pub mod indexer;
mod indexing;
pub mod progress;
pub mod refs;
pub mod sync_gate;
mod worker;

pub use cancel::CancelToken;
pub use doc_id::{DocIdAllocator, DocIdRange, DocumentId};
pub use extract::{ContentKind, Extractor};
pub use indexer::{IndexStatus, Indexer};
