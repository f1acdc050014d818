//! The public indexer handle.
//!
//! An [`Indexer`] owns one index instance: its durable key/value store, the
//! document id allocator, the sync gate and the worker thread. It registers
//! itself as an observer of the filesystem on open and unregisters on
//! [`Indexer::shutdown`].
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use vfs_search::config::IndexerConfig;
//! use vfs_search::engine::SearchRequest;
//! use vfs_search::engine::memory::MemoryIndex;
//! use vfs_search::fs::memory::MemoryFs;
//! use vfs_search::index::{CancelToken, Indexer};
//!
//! let fs = Arc::new(MemoryFs::new());
//! let engine = Arc::new(MemoryIndex::new().unwrap());
//! let indexer = Indexer::open(IndexerConfig::with_name("docs"), fs, engine).unwrap();
//!
//! indexer.wait_for_syncs(&CancelToken::new()).unwrap();
//! let results = indexer.search(&SearchRequest::new("dolor")).unwrap();
//! println!("{} hits", results.total_hits);
//!
//! indexer.shutdown(&CancelToken::new()).unwrap();
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;

use ahash::AHashSet;
use chrono::{DateTime, Utc};
use crossbeam_channel::{Receiver, Sender, bounded};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::config::IndexerConfig;
use crate::engine::{SearchEngine, SearchRequest, SearchResults};
use crate::error::{Result, SearchError};
use crate::fs::{BlockPointer, FileSystem, FsEvent, FsObserver, FsPath, ObserverId, TlfId};
use crate::index::cancel::CancelToken;
use crate::index::doc_id::{DocIdAllocator, DocIdRange, DocumentId};
use crate::index::extract::Extractor;
use crate::index::indexing::IndexCore;
use crate::index::progress::TlfProgress;
use crate::index::refs::ReferenceTracker;
use crate::index::sync_gate::SyncGate;
use crate::index::worker::{self, Task, WorkerShared};
use crate::storage::kv::{KvConfig, KvStore};
use crate::storage::prefixed::PrefixedStorage;
use crate::storage::{Storage, StorageFactory};

/// Point-in-time view of an index instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexStatus {
    pub name: String,
    pub closed: bool,
    /// Tasks waiting for the worker.
    pub queued_tasks: usize,
    /// TLFs with changes held back by the sync gate.
    pub pending_sync_tlfs: Vec<TlfId>,
    pub staged_changes: usize,
    pub indexed_documents: usize,
    pub processed_tasks: u64,
    pub next_document_id: DocumentId,
    pub last_indexed_at: Option<DateTime<Utc>>,
    pub fatal_error: Option<String>,
}

struct Inner {
    name: String,
    fs: Arc<dyn FileSystem>,
    engine: Arc<dyn SearchEngine>,
    store: Arc<KvStore>,
    allocator: Arc<DocIdAllocator>,
    gate: SyncGate,
    queue: Mutex<Option<Sender<Task>>>,
    shared: Arc<WorkerShared>,
    worker: Mutex<Option<(JoinHandle<()>, Receiver<()>)>>,
    observer: Mutex<Option<ObserverId>>,
    closed: AtomicBool,
}

impl Inner {
    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SearchError::Closed);
        }
        match self.shared.fatal_error() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn enqueue(&self, task: Task) -> Result<()> {
        let sender = self.queue.lock().clone().ok_or(SearchError::Closed)?;
        self.shared.task_queued();
        sender.send(task).map_err(|_| {
            self.shared.task_rejected();
            SearchError::Closed
        })
    }

    /// Like [`Inner::enqueue`], but gives up waiting for room in a full
    /// queue once `token` fires.
    fn enqueue_until(&self, task: Task, token: &CancelToken) -> Result<()> {
        let sender = self.queue.lock().clone().ok_or(SearchError::Closed)?;
        self.shared.task_queued();
        token
            .send_on(&sender, task)
            .inspect_err(|_| self.shared.task_rejected())
    }

    /// Run `op` on the worker and wait for its result.
    fn call<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut IndexCore) -> Result<T> + Send + 'static,
    {
        self.check_open()?;
        let (reply_tx, reply_rx) = bounded(1);
        self.enqueue(Task::Call(Box::new(move |core| {
            let result = op(core);
            if let Err(err) = &result {
                if err.is_fatal() {
                    core.note_failure("indexing call", err);
                }
            }
            let _ = reply_tx.send(result);
        })))?;
        reply_rx.recv().map_err(|_| SearchError::Closed)?
    }

    fn handle_event(&self, event: &FsEvent) -> Result<()> {
        self.check_open()?;
        match event {
            FsEvent::Unreferenced { tlf, pointers } => self.enqueue(Task::Unrefs {
                tlf: tlf.clone(),
                pointers: pointers.clone(),
            }),
            _ => self
                .gate
                .observe(event, |admission| self.enqueue(admission.into())),
        }
    }

    fn wait_for_index(&self, token: &CancelToken) -> Result<()> {
        self.check_open()?;
        let (done_tx, done_rx) = bounded(1);
        self.enqueue_until(Task::Barrier(done_tx), token)?;
        token.wait_on(&done_rx)?;
        match self.shared.fatal_error() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Forwards filesystem events to a live instance.
struct EventForwarder {
    inner: Weak<Inner>,
}

impl FsObserver for EventForwarder {
    fn on_event(&self, event: &FsEvent) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        match inner.handle_event(event) {
            Ok(()) => {}
            Err(SearchError::Closed) => {}
            Err(err) => warn!("{}: dropping event for {}: {err}", inner.name, event.tlf()),
        }
    }
}

/// Handle to one index instance. Dropping it shuts the instance down.
pub struct Indexer {
    inner: Arc<Inner>,
}

impl Indexer {
    /// Open an instance on the storage described by `config.storage`.
    pub fn open(
        config: IndexerConfig,
        fs: Arc<dyn FileSystem>,
        engine: Arc<dyn SearchEngine>,
    ) -> Result<Self> {
        config.validate()?;
        let storage = StorageFactory::create(config.storage.clone())?;
        Self::open_with_storage(config, storage, fs, engine)
    }

    /// Open an instance inside `storage`, namespaced by the instance name.
    pub fn open_with_storage(
        config: IndexerConfig,
        storage: Arc<dyn Storage>,
        fs: Arc<dyn FileSystem>,
        engine: Arc<dyn SearchEngine>,
    ) -> Result<Self> {
        config.validate()?;

        let storage: Arc<dyn Storage> = Arc::new(PrefixedStorage::new(config.name.clone(), storage));
        let store = Arc::new(KvStore::open(
            storage,
            KvConfig {
                compaction_threshold: config.kv_compaction_threshold,
            },
        )?);
        let allocator = Arc::new(DocIdAllocator::open(store.clone())?);
        let shared = Arc::new(WorkerShared::default());

        let core = IndexCore {
            fs: fs.clone(),
            engine: engine.clone(),
            allocator: allocator.clone(),
            refs: ReferenceTracker::new(store.clone()),
            progress: TlfProgress::new(store.clone()),
            extractor: Extractor::new(&config.markup_extensions, config.max_content_bytes)?,
            change_depth: config.change_depth,
            backfill_depth: config.backfill_depth,
            shared: shared.clone(),
            stale: AHashSet::new(),
        };

        let (sender, receiver) = bounded(config.queue_capacity);
        let worker = worker::spawn(&config.name, core, receiver)?;

        let inner = Arc::new(Inner {
            name: config.name.clone(),
            fs,
            engine,
            store,
            allocator,
            gate: SyncGate::new(),
            queue: Mutex::new(Some(sender)),
            shared,
            worker: Mutex::new(Some(worker)),
            observer: Mutex::new(None),
            closed: AtomicBool::new(false),
        });

        let forwarder = Arc::new(EventForwarder {
            inner: Arc::downgrade(&inner),
        });
        let observer = inner.fs.register_observer(forwarder);
        *inner.observer.lock() = Some(observer);

        info!(
            "opened index {} (next document id {})",
            inner.name,
            inner.allocator.peek_next()
        );
        Ok(Indexer { inner })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Index `name` under `parent`, consuming `candidate` unless the entry
    /// is already indexed. Returns whether `candidate` was used.
    pub fn index_child(
        &self,
        parent: &FsPath,
        name: &str,
        candidate: DocumentId,
        depth: usize,
    ) -> Result<bool> {
        let parent = parent.clone();
        let name = name.to_string();
        self.inner
            .call(move |core| core.index_child(&parent, &name, Some(candidate), depth))
    }

    /// Refresh the document previously stored for block `previous`.
    pub fn update_child(
        &self,
        parent: &FsPath,
        name: &str,
        previous: BlockPointer,
        depth: usize,
    ) -> Result<()> {
        let parent = parent.clone();
        let name = name.to_string();
        self.inner
            .call(move |core| core.update_child(&parent, &name, previous, depth))
    }

    pub fn rename_child(
        &self,
        old_parent: &FsPath,
        new_parent: &FsPath,
        new_name: &str,
        depth: usize,
    ) -> Result<()> {
        let old_parent = old_parent.clone();
        let new_parent = new_parent.clone();
        let new_name = new_name.to_string();
        self.inner.call(move |core| {
            core.rename_child(&old_parent, &new_parent, &new_name, depth)
        })
    }

    /// Delete the documents of blocks no revision references any more.
    pub fn delete_from_unrefs(&self, tlf: &TlfId, pointers: &[BlockPointer]) -> Result<usize> {
        let tlf = tlf.clone();
        let pointers = pointers.to_vec();
        self.inner
            .call(move |core| core.delete_from_unrefs(&tlf, &pointers))
    }

    /// Block until every task queued before this call has run.
    pub fn wait_for_index(&self, token: &CancelToken) -> Result<()> {
        self.inner.wait_for_index(token)
    }

    /// Block until no change is held back by the sync gate and everything
    /// it admitted has been indexed.
    pub fn wait_for_syncs(&self, token: &CancelToken) -> Result<()> {
        self.inner.check_open()?;
        let quiescent = self.inner.gate.subscribe();
        token.wait_on(&quiescent)?;
        self.inner.wait_for_index(token)
    }

    pub fn search(&self, request: &SearchRequest) -> Result<SearchResults> {
        self.inner.check_open()?;
        self.inner.engine.search(request)
    }

    /// Reserve `count` document ids for use with [`Indexer::index_child`].
    pub fn reserve_doc_ids(&self, count: usize) -> Result<DocIdRange> {
        self.inner.check_open()?;
        self.inner.allocator.reserve(count).inspect_err(|err| {
            if err.is_fatal() {
                error!("{}: reserving document ids failed: {err}", self.inner.name);
                self.inner.shared.record_fatal(err);
            }
        })
    }

    /// Feed a filesystem event by hand. Events from the filesystem the
    /// instance was opened on arrive here on their own.
    pub fn handle_event(&self, event: &FsEvent) -> Result<()> {
        self.inner.handle_event(event)
    }

    pub fn status(&self) -> IndexStatus {
        let inner = &self.inner;
        IndexStatus {
            name: inner.name.clone(),
            closed: inner.closed.load(Ordering::Acquire),
            queued_tasks: inner.shared.pending(),
            pending_sync_tlfs: inner.gate.pending_tlfs(),
            staged_changes: inner.gate.staged_count(),
            indexed_documents: inner.engine.doc_count(),
            processed_tasks: inner.shared.processed(),
            next_document_id: inner.allocator.peek_next(),
            last_indexed_at: inner.shared.last_indexed_at(),
            fatal_error: inner.shared.fatal(),
        }
    }

    /// Close the instance.
    ///
    /// Queued work is drained unless `token` fires first, in which case the
    /// remaining tasks are dropped and `Cancelled` is returned. Storage is
    /// released either way. Later calls return `Ok(())`.
    pub fn shutdown(&self, token: &CancelToken) -> Result<()> {
        let inner = &self.inner;
        if inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        info!("shutting down index {}", inner.name);

        if let Some(observer) = inner.observer.lock().take() {
            inner.fs.unregister_observer(observer);
        }
        inner.gate.close();
        drop(inner.queue.lock().take());

        let mut first_error = None;
        let worker = inner.worker.lock().take();
        if let Some((handle, exited)) = worker {
            match token.wait_on(&exited) {
                Ok(()) | Err(SearchError::Closed) => {}
                Err(err) => {
                    warn!(
                        "{}: shutdown interrupted, dropping {} queued tasks",
                        inner.name,
                        inner.shared.pending()
                    );
                    inner.shared.abort();
                    first_error = Some(err);
                }
            }
            if handle.join().is_err() {
                error!("{}: indexing worker panicked", inner.name);
                first_error.get_or_insert(SearchError::other("indexing worker panicked"));
            }
        }

        match inner.shared.fatal_error() {
            Some(fatal) => {
                first_error.get_or_insert(fatal);
            }
            None => {
                if let Err(err) = inner.allocator.flush() {
                    first_error.get_or_insert(err);
                }
            }
        }
        if let Err(err) = inner.store.close() {
            first_error.get_or_insert(err);
        }

        debug!("index {} closed", inner.name);
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Drop for Indexer {
    fn drop(&mut self) {
        if !self.inner.closed.load(Ordering::Acquire) {
            if let Err(err) = self.shutdown(&CancelToken::new()) {
                warn!("{}: shutdown on drop failed: {err}", self.inner.name);
            }
        }
    }
}

impl std::fmt::Debug for Indexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Indexer")
            .field("name", &self.inner.name)
            .field("closed", &self.inner.closed.load(Ordering::Acquire))
            .finish()
    }
}
