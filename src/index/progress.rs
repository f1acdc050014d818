//! Last indexed revision per TLF.
//!
//! Changes at or below the recorded revision have already been applied and
//! are skipped when they are replayed after a restart.

use std::sync::Arc;

use crate::error::Result;
use crate::fs::TlfId;
use crate::storage::kv::{KvStore, WriteBatch, decode_u64, encode_u64};

#[derive(Debug, Clone)]
pub struct TlfProgress {
    store: Arc<KvStore>,
}

fn revision_key(tlf: &TlfId) -> Vec<u8> {
    format!("tlf/{tlf}/revision").into_bytes()
}

impl TlfProgress {
    pub fn new(store: Arc<KvStore>) -> Self {
        TlfProgress { store }
    }

    /// Zero when nothing was indexed yet.
    pub fn indexed_revision(&self, tlf: &TlfId) -> Result<u64> {
        match self.store.get(&revision_key(tlf))? {
            Some(bytes) => decode_u64(&bytes),
            None => Ok(0),
        }
    }

    /// Record `revision` as indexed. Lower revisions never move the mark back.
    pub fn record(&self, tlf: &TlfId, revision: u64) -> Result<()> {
        if revision <= self.indexed_revision(tlf)? {
            return Ok(());
        }
        let mut batch = WriteBatch::new();
        batch.put(revision_key(tlf), encode_u64(revision));
        self.store.write(batch)
    }
}
