//! Block pointer to document mapping.
//!
//! Keys are `refs/<tlf>/<pointer as 16 hex digits>`, values the encoded
//! [`DocumentId`]. Each live pointer maps to at most one document; a mapping
//! is only erased when the pointer is reported unreferenced or replaced by a
//! content update.

use std::sync::Arc;

use crate::error::Result;
use crate::fs::{BlockPointer, TlfId};
use crate::index::doc_id::DocumentId;
use crate::storage::kv::{KvStore, WriteBatch, decode_u64, encode_u64};

#[derive(Debug, Clone)]
pub struct ReferenceTracker {
    store: Arc<KvStore>,
}

fn tlf_prefix(tlf: &TlfId) -> Vec<u8> {
    format!("refs/{tlf}/").into_bytes()
}

fn ref_key(tlf: &TlfId, pointer: BlockPointer) -> Vec<u8> {
    format!("refs/{tlf}/{pointer}").into_bytes()
}

impl ReferenceTracker {
    pub fn new(store: Arc<KvStore>) -> Self {
        ReferenceTracker { store }
    }

    pub fn get(&self, tlf: &TlfId, pointer: BlockPointer) -> Result<Option<DocumentId>> {
        match self.store.get(&ref_key(tlf, pointer))? {
            Some(bytes) => Ok(Some(DocumentId::new(decode_u64(&bytes)?))),
            None => Ok(None),
        }
    }

    pub fn insert(&self, tlf: &TlfId, pointer: BlockPointer, id: DocumentId) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.put(ref_key(tlf, pointer), encode_u64(id.value()));
        self.store.write(batch)
    }

    /// Move `id` from `old` to `new` in one atomic batch.
    ///
    /// Returns the document `new` was mapped to when that was another one.
    /// The caller owns deleting it: after the swap nothing maps to it.
    pub fn swap(
        &self,
        tlf: &TlfId,
        old: BlockPointer,
        new: BlockPointer,
        id: DocumentId,
    ) -> Result<Option<DocumentId>> {
        let displaced = self.get(tlf, new)?.filter(|other| *other != id);
        let mut batch = WriteBatch::new();
        if old != new {
            batch.delete(ref_key(tlf, old));
        }
        batch.put(ref_key(tlf, new), encode_u64(id.value()));
        self.store.write(batch)?;
        Ok(displaced)
    }

    pub fn remove(&self, tlf: &TlfId, pointer: BlockPointer) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.delete(ref_key(tlf, pointer));
        self.store.write(batch)
    }

    /// Number of mapped pointers in `tlf`.
    pub fn len(&self, tlf: &TlfId) -> Result<usize> {
        Ok(self.store.scan_prefix(&tlf_prefix(tlf))?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::kv::KvConfig;
    use crate::storage::memory::MemoryStorage;

    fn tracker() -> ReferenceTracker {
        let store = KvStore::open(
            Arc::new(MemoryStorage::new_default()),
            KvConfig::default(),
        )
        .unwrap();
        ReferenceTracker::new(Arc::new(store))
    }

    #[test]
    fn test_insert_get_remove() {
        let refs = tracker();
        let tlf = TlfId::new("user1");
        let ptr = BlockPointer::new(7);

        assert_eq!(refs.get(&tlf, ptr).unwrap(), None);
        refs.insert(&tlf, ptr, DocumentId::new(3)).unwrap();
        assert_eq!(refs.get(&tlf, ptr).unwrap(), Some(DocumentId::new(3)));

        refs.remove(&tlf, ptr).unwrap();
        assert_eq!(refs.get(&tlf, ptr).unwrap(), None);
        refs.remove(&tlf, ptr).unwrap();
    }

    #[test]
    fn test_swap_moves_mapping() {
        let refs = tracker();
        let tlf = TlfId::new("user1");
        let old = BlockPointer::new(1);
        let new = BlockPointer::new(2);

        refs.insert(&tlf, old, DocumentId::new(9)).unwrap();
        assert_eq!(refs.swap(&tlf, old, new, DocumentId::new(9)).unwrap(), None);

        assert_eq!(refs.get(&tlf, old).unwrap(), None);
        assert_eq!(refs.get(&tlf, new).unwrap(), Some(DocumentId::new(9)));
        assert_eq!(refs.len(&tlf).unwrap(), 1);
    }

    #[test]
    fn test_swap_reports_displaced_document() {
        let refs = tracker();
        let tlf = TlfId::new("user1");
        let old = BlockPointer::new(1);
        let new = BlockPointer::new(2);

        refs.insert(&tlf, old, DocumentId::new(1)).unwrap();
        refs.insert(&tlf, new, DocumentId::new(2)).unwrap();
        let displaced = refs.swap(&tlf, old, new, DocumentId::new(1)).unwrap();

        assert_eq!(displaced, Some(DocumentId::new(2)));
        assert_eq!(refs.get(&tlf, new).unwrap(), Some(DocumentId::new(1)));
        assert_eq!(refs.len(&tlf).unwrap(), 1);
        // Swapping onto itself keeps the mapping.
        assert_eq!(refs.swap(&tlf, new, new, DocumentId::new(1)).unwrap(), None);
        assert_eq!(refs.get(&tlf, new).unwrap(), Some(DocumentId::new(1)));
    }

    #[test]
    fn test_tlfs_are_separate() {
        let refs = tracker();
        let ptr = BlockPointer::new(1);
        refs.insert(&TlfId::new("a"), ptr, DocumentId::new(1)).unwrap();
        refs.insert(&TlfId::new("ab"), ptr, DocumentId::new(2)).unwrap();

        assert_eq!(refs.len(&TlfId::new("a")).unwrap(), 1);
        assert_eq!(
            refs.get(&TlfId::new("ab"), ptr).unwrap(),
            Some(DocumentId::new(2))
        );
    }
}
