//! Durable key/value store backed by a write-ahead log.
//!
//! The store keeps its whole keyspace in memory and persists it as two
//! files inside a [`Storage`]:
//!
//! - `kv.log`: one framed record per [`WriteBatch`], appended and synced
//!   before the batch is applied in memory.
//! - `kv.snapshot`: a framed dump of the keyspace, written by compaction.
//!
//! Every frame is `[len: u32 LE][crc32: u32 LE][payload]`, the payload being
//! bincode. On open the snapshot is loaded and the log replayed. A frame cut
//! short at the end of the log (crash during append) is discarded and the
//! log rewritten without it; a complete frame whose checksum does not match
//! is reported as corruption.
//!
//! Any failed append poisons the store: the log may end in a partial frame,
//! so no further records are written until the store is reopened.

use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use log::{debug, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SearchError};
use crate::storage::{Storage, StorageError};

const LOG_FILE: &str = "kv.log";
const SNAPSHOT_FILE: &str = "kv.snapshot";
const SNAPSHOT_TMP_FILE: &str = "kv.snapshot.tmp";
const FRAME_HEADER_LEN: usize = 8;

/// A single mutation inside a [`WriteBatch`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BatchOp {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

/// A group of mutations applied atomically.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> &mut Self {
        self.ops.push(BatchOp::Put {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    pub fn delete(&mut self, key: impl Into<Vec<u8>>) -> &mut Self {
        self.ops.push(BatchOp::Delete { key: key.into() });
        self
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }
}

/// Configuration for [`KvStore`].
#[derive(Debug, Clone)]
pub struct KvConfig {
    /// Number of log records after which the log is folded into a snapshot.
    pub compaction_threshold: usize,
}

impl Default for KvConfig {
    fn default() -> Self {
        KvConfig {
            compaction_threshold: 256,
        }
    }
}

#[derive(Debug, Default)]
struct KvState {
    entries: BTreeMap<Vec<u8>, Vec<u8>>,
    log_records: usize,
    closed: bool,
    poisoned: Option<String>,
}

impl KvState {
    fn check_usable(&self) -> Result<()> {
        if self.closed {
            return Err(StorageError::StorageClosed.into());
        }
        if let Some(reason) = &self.poisoned {
            return Err(SearchError::storage(format!(
                "store is unusable after a failed write: {reason}"
            )));
        }
        Ok(())
    }

    fn apply(&mut self, ops: Vec<BatchOp>) {
        for op in ops {
            match op {
                BatchOp::Put { key, value } => {
                    self.entries.insert(key, value);
                }
                BatchOp::Delete { key } => {
                    self.entries.remove(&key);
                }
            }
        }
    }
}

/// Write-ahead-logged key/value store.
#[derive(Debug)]
pub struct KvStore {
    storage: Arc<dyn Storage>,
    config: KvConfig,
    state: Mutex<KvState>,
}

impl KvStore {
    /// Open (or create) the store kept in `storage`.
    pub fn open(storage: Arc<dyn Storage>, config: KvConfig) -> Result<Self> {
        let mut state = KvState::default();

        if storage.file_exists(SNAPSHOT_TMP_FILE) {
            debug!("removing stale snapshot temp file");
            storage.delete_file(SNAPSHOT_TMP_FILE)?;
        }

        if storage.file_exists(SNAPSHOT_FILE) {
            let data = read_all(storage.as_ref(), SNAPSHOT_FILE)?;
            let (frames, valid_len) = decode_frames(&data)?;
            if frames.len() != 1 || valid_len != data.len() {
                return Err(StorageError::Corrupt("snapshot is truncated".to_string()).into());
            }
            let pairs: Vec<(Vec<u8>, Vec<u8>)> = bincode::deserialize(frames[0])
                .map_err(|e| StorageError::Corrupt(format!("snapshot payload: {e}")))?;
            state.entries.extend(pairs);
        }

        if storage.file_exists(LOG_FILE) {
            let data = read_all(storage.as_ref(), LOG_FILE)?;
            let (frames, valid_len) = decode_frames(&data)?;
            for payload in &frames {
                let ops: Vec<BatchOp> = bincode::deserialize(payload)
                    .map_err(|e| StorageError::Corrupt(format!("log payload: {e}")))?;
                state.apply(ops);
            }
            state.log_records = frames.len();

            if valid_len < data.len() {
                warn!(
                    "discarding {} bytes of torn log tail",
                    data.len() - valid_len
                );
                let mut output = storage.create_output(LOG_FILE)?;
                output.write_all(&data[..valid_len]).map_err(io_to_storage)?;
                output.flush_and_sync()?;
                output.close()?;
            }
        }

        debug!(
            "opened kv store with {} keys, {} log records",
            state.entries.len(),
            state.log_records
        );

        Ok(KvStore {
            storage,
            config,
            state: Mutex::new(state),
        })
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let state = self.state.lock();
        state.check_usable()?;
        Ok(state.entries.get(key).cloned())
    }

    /// All entries whose key starts with `prefix`, in key order.
    pub fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let state = self.state.lock();
        state.check_usable()?;
        Ok(state
            .entries
            .range(prefix.to_vec()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Apply `batch` atomically: either every op is durable and visible, or
    /// none is.
    pub fn write(&self, batch: WriteBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut state = self.state.lock();
        state.check_usable()?;

        let payload = bincode::serialize(&batch.ops)?;
        if let Err(e) = self.append_frame(&payload) {
            state.poisoned = Some(e.to_string());
            return Err(e);
        }

        state.apply(batch.ops);
        state.log_records += 1;

        if state.log_records >= self.config.compaction_threshold {
            self.compact_locked(&mut state)?;
        }
        Ok(())
    }

    /// Fold the log into a fresh snapshot.
    pub fn compact(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.check_usable()?;
        self.compact_locked(&mut state)
    }

    pub fn flush(&self) -> Result<()> {
        let state = self.state.lock();
        state.check_usable()?;
        self.storage.sync()
    }

    /// Flush and close. Idempotent.
    pub fn close(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Ok(());
        }
        if state.poisoned.is_none() {
            self.storage.sync()?;
        }
        state.closed = true;
        Ok(())
    }

    fn append_frame(&self, payload: &[u8]) -> Result<()> {
        let mut output = self.storage.create_output_append(LOG_FILE)?;
        write_frame(&mut output, payload)?;
        output.flush_and_sync()?;
        output.close()
    }

    fn compact_locked(&self, state: &mut KvState) -> Result<()> {
        let pairs: Vec<(&Vec<u8>, &Vec<u8>)> = state.entries.iter().collect();
        let payload = bincode::serialize(&pairs)?;

        let result = (|| -> Result<()> {
            let mut output = self.storage.create_output(SNAPSHOT_TMP_FILE)?;
            write_frame(&mut output, &payload)?;
            output.flush_and_sync()?;
            output.close()?;
            self.storage.rename_file(SNAPSHOT_TMP_FILE, SNAPSHOT_FILE)?;

            let mut log = self.storage.create_output(LOG_FILE)?;
            log.flush_and_sync()?;
            log.close()
        })();

        match result {
            Ok(()) => {
                debug!(
                    "compacted {} log records into snapshot of {} keys",
                    state.log_records,
                    state.entries.len()
                );
                state.log_records = 0;
                Ok(())
            }
            Err(e) => {
                state.poisoned = Some(e.to_string());
                Err(e)
            }
        }
    }
}

/// Encode a counter or identifier value.
pub fn encode_u64(value: u64) -> Vec<u8> {
    let mut buf = vec![0u8; 8];
    LittleEndian::write_u64(&mut buf, value);
    buf
}

/// Decode a value written by [`encode_u64`].
pub fn decode_u64(bytes: &[u8]) -> Result<u64> {
    if bytes.len() != 8 {
        return Err(StorageError::Corrupt(format!(
            "expected 8-byte integer, found {} bytes",
            bytes.len()
        ))
        .into());
    }
    Ok(LittleEndian::read_u64(bytes))
}

fn io_to_storage(e: std::io::Error) -> SearchError {
    StorageError::IoError(e.to_string()).into()
}

fn read_all(storage: &dyn Storage, name: &str) -> Result<Vec<u8>> {
    let mut input = storage.open_input(name)?;
    let mut data = Vec::with_capacity(input.size()? as usize);
    input.read_to_end(&mut data).map_err(io_to_storage)?;
    Ok(data)
}

fn write_frame<W: Write + ?Sized>(out: &mut W, payload: &[u8]) -> Result<()> {
    let len = u32::try_from(payload.len())
        .map_err(|_| SearchError::storage("record exceeds 4 GiB"))?;
    out.write_u32::<LittleEndian>(len).map_err(io_to_storage)?;
    out.write_u32::<LittleEndian>(crc32fast::hash(payload))
        .map_err(io_to_storage)?;
    out.write_all(payload).map_err(io_to_storage)?;
    Ok(())
}

/// Split `data` into frame payloads. Returns the payloads and the length of
/// the prefix made of complete frames.
fn decode_frames(data: &[u8]) -> Result<(Vec<&[u8]>, usize)> {
    let mut frames = Vec::new();
    let mut offset = 0;

    while data.len() - offset >= FRAME_HEADER_LEN {
        let len = LittleEndian::read_u32(&data[offset..offset + 4]) as usize;
        let crc = LittleEndian::read_u32(&data[offset + 4..offset + 8]);
        let start = offset + FRAME_HEADER_LEN;
        let end = start + len;
        if end > data.len() {
            break;
        }

        let payload = &data[start..end];
        if crc32fast::hash(payload) != crc {
            return Err(StorageError::Corrupt(format!(
                "checksum mismatch in record at offset {offset}"
            ))
            .into());
        }
        frames.push(payload);
        offset = end;
    }

    Ok((frames, offset))
}
