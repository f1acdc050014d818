//! Document identity allocation.
//!
//! Identities are handed out in reserved ranges. The persisted counter is
//! advanced past a range before any identity in it is returned, so a crash
//! can waste identities but never hand one out twice.

use std::fmt;
use std::sync::Arc;

use log::debug;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::storage::kv::{KvStore, WriteBatch, decode_u64, encode_u64};

const NEXT_ID_KEY: &[u8] = b"doc_id/next";

/// Durable identity of one index document. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentId(u64);

impl DocumentId {
    pub fn new(value: u64) -> Self {
        DocumentId(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A half-open range of reserved identities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DocIdRange {
    start: u64,
    end: u64,
}

impl DocIdRange {
    pub fn empty() -> Self {
        DocIdRange { start: 0, end: 0 }
    }

    pub fn len(&self) -> usize {
        (self.end - self.start) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn first(&self) -> Option<DocumentId> {
        (!self.is_empty()).then_some(DocumentId(self.start))
    }

    pub fn contains(&self, id: DocumentId) -> bool {
        (self.start..self.end).contains(&id.0)
    }
}

impl Iterator for DocIdRange {
    type Item = DocumentId;

    fn next(&mut self) -> Option<DocumentId> {
        if self.start < self.end {
            let id = DocumentId(self.start);
            self.start += 1;
            Some(id)
        } else {
            None
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.len(), Some(self.len()))
    }
}

impl ExactSizeIterator for DocIdRange {}

/// Hands out [`DocumentId`]s backed by a counter in the [`KvStore`].
#[derive(Debug)]
pub struct DocIdAllocator {
    store: Arc<KvStore>,
    /// Next unreserved id, mirrored from the store.
    next: Mutex<u64>,
}

impl DocIdAllocator {
    /// Load the persisted counter. Identities start at 1.
    pub fn open(store: Arc<KvStore>) -> Result<Self> {
        let next = match store.get(NEXT_ID_KEY)? {
            Some(bytes) => decode_u64(&bytes)?,
            None => 1,
        };
        debug!("document id allocator resumes at {next}");
        Ok(DocIdAllocator {
            store,
            next: Mutex::new(next),
        })
    }

    /// Reserve `count` consecutive identities.
    pub fn reserve(&self, count: usize) -> Result<DocIdRange> {
        if count == 0 {
            return Ok(DocIdRange::empty());
        }

        let mut next = self.next.lock();
        let start = *next;
        let end = start + count as u64;

        let mut batch = WriteBatch::new();
        batch.put(NEXT_ID_KEY, encode_u64(end));
        self.store.write(batch)?;

        *next = end;
        Ok(DocIdRange { start, end })
    }

    pub fn reserve_one(&self) -> Result<DocumentId> {
        let range = self.reserve(1)?;
        Ok(DocumentId(range.start))
    }

    /// The next identity that would be reserved.
    pub fn peek_next(&self) -> DocumentId {
        DocumentId(*self.next.lock())
    }

    pub fn flush(&self) -> Result<()> {
        self.store.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Storage;
    use crate::storage::kv::KvConfig;
    use crate::storage::memory::MemoryStorage;

    fn open_store(storage: &Arc<MemoryStorage>) -> Arc<KvStore> {
        let storage: Arc<dyn Storage> = storage.clone();
        Arc::new(KvStore::open(storage, KvConfig::default()).unwrap())
    }

    #[test]
    fn test_reserve_ranges_do_not_overlap() {
        let storage = Arc::new(MemoryStorage::new_default());
        let allocator = DocIdAllocator::open(open_store(&storage)).unwrap();

        let a = allocator.reserve(3).unwrap();
        let b = allocator.reserve(2).unwrap();
        assert_eq!(a.len(), 3);
        assert_eq!(a.first(), Some(DocumentId::new(1)));
        assert_eq!(b.first(), Some(DocumentId::new(4)));
        assert!(!a.contains(DocumentId::new(4)));

        let ids: Vec<_> = b.collect();
        assert_eq!(ids, vec![DocumentId::new(4), DocumentId::new(5)]);
    }

    #[test]
    fn test_zero_reservation_touches_nothing() {
        let storage = Arc::new(MemoryStorage::new_default());
        let allocator = DocIdAllocator::open(open_store(&storage)).unwrap();

        assert!(allocator.reserve(0).unwrap().is_empty());
        assert_eq!(storage.file_count(), 0);
        assert_eq!(allocator.peek_next(), DocumentId::new(1));
    }

    #[test]
    fn test_counter_survives_reopen() {
        let storage = Arc::new(MemoryStorage::new_default());
        {
            let allocator = DocIdAllocator::open(open_store(&storage)).unwrap();
            allocator.reserve(10).unwrap();
            allocator.reserve_one().unwrap();
        }

        let allocator = DocIdAllocator::open(open_store(&storage)).unwrap();
        assert_eq!(allocator.reserve_one().unwrap(), DocumentId::new(12));
    }
}
