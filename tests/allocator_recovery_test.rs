use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use vfs_search::config::IndexerConfig;
use vfs_search::engine::memory::MemoryIndex;
use vfs_search::engine::{SearchEngine, SearchRequest};
use vfs_search::error::Result;
use vfs_search::fs::memory::MemoryFs;
use vfs_search::fs::{EntryChange, FsEvent, FsPath, TlfId};
use vfs_search::index::{CancelToken, DocumentId, Indexer};
use vfs_search::storage::Storage;
use vfs_search::storage::StorageConfig;
use vfs_search::storage::file::FileStorageConfig;
use vfs_search::storage::memory::MemoryStorage;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn token() -> CancelToken {
    CancelToken::with_timeout(Duration::from_secs(10))
}

fn open_on(storage: &Arc<dyn Storage>, name: &str, fs: &Arc<MemoryFs>) -> Result<Indexer> {
    Indexer::open_with_storage(
        IndexerConfig::with_name(name),
        storage.clone(),
        fs.clone(),
        Arc::new(MemoryIndex::new()?),
    )
}

#[test]
fn test_concurrent_reservations_never_overlap() -> Result<()> {
    init_logging();
    let fs = Arc::new(MemoryFs::new());
    let indexer = Arc::new(Indexer::open(
        IndexerConfig::with_name("concurrent"),
        fs,
        Arc::new(MemoryIndex::new()?),
    )?);

    let handles: Vec<_> = (0..8)
        .map(|worker| {
            let indexer = indexer.clone();
            thread::spawn(move || -> Result<Vec<DocumentId>> {
                let mut ids = Vec::new();
                for round in 0..50 {
                    ids.extend(indexer.reserve_doc_ids(1 + (worker + round) % 4)?);
                }
                Ok(ids)
            })
        })
        .collect();

    let mut seen = HashSet::new();
    let mut total = 0;
    for handle in handles {
        let ids = handle.join().expect("reserver panicked")?;
        total += ids.len();
        seen.extend(ids);
    }
    assert_eq!(seen.len(), total);
    assert_eq!(
        indexer.status().next_document_id,
        DocumentId::new(total as u64 + 1)
    );

    indexer.shutdown(&token())
}

#[test]
fn test_reservations_survive_reopen() -> Result<()> {
    init_logging();
    let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new_default());
    let fs = Arc::new(MemoryFs::new());

    let first = {
        let indexer = open_on(&storage, "reopen", &fs)?;
        let range = indexer.reserve_doc_ids(5)?;
        indexer.shutdown(&token())?;
        range
    };
    assert_eq!(first.len(), 5);

    let indexer = open_on(&storage, "reopen", &fs)?;
    let next = indexer.reserve_doc_ids(1)?.first();
    assert_eq!(next, Some(DocumentId::new(6)));

    // Another instance on the same storage has its own counter.
    let other = open_on(&storage, "other", &fs)?;
    assert_eq!(other.reserve_doc_ids(1)?.first(), Some(DocumentId::new(1)));

    other.shutdown(&token())?;
    indexer.shutdown(&token())
}

#[test]
fn test_reservations_survive_crash() -> Result<()> {
    init_logging();
    let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new_default());
    let fs = Arc::new(MemoryFs::new());

    let crashed = open_on(&storage, "crash", &fs)?;
    let issued: Vec<DocumentId> = crashed.reserve_doc_ids(3)?.collect();
    // No shutdown, no flush.
    std::mem::forget(crashed);

    let fresh_fs = Arc::new(MemoryFs::new());
    let indexer = open_on(&storage, "crash", &fresh_fs)?;
    let after: Vec<DocumentId> = indexer.reserve_doc_ids(3)?.collect();
    assert!(after.iter().all(|id| !issued.contains(id)));
    assert!(after[0] > issued[2]);

    indexer.shutdown(&token())
}

#[test]
fn test_file_storage_round_trip() -> Result<()> {
    init_logging();
    let dir = tempfile::tempdir()?;
    let config = IndexerConfig {
        name: "on_disk".to_string(),
        storage: StorageConfig::File(FileStorageConfig::new(dir.path())),
        ..IndexerConfig::default()
    };
    let tlf = TlfId::new("user1");
    let fs = Arc::new(MemoryFs::new());

    let doc_id = {
        let engine = Arc::new(MemoryIndex::new()?);
        let indexer = Indexer::open(config.clone(), fs.clone(), engine)?;
        fs.remote()
            .create_file(&FsPath::parse(tlf.clone(), "a"), b"dolor")?;
        indexer.wait_for_index(&token())?;

        let hits = indexer.search(&SearchRequest::new("dolor"))?.hits;
        assert_eq!(hits.len(), 1);
        // Dropping the handle shuts the instance down.
        hits[0].doc_id
    };
    assert!(dir.path().join("on_disk").is_dir());

    let engine = Arc::new(MemoryIndex::new()?);
    let indexer = Indexer::open(config, fs.clone(), engine.clone())?;
    assert!(indexer.reserve_doc_ids(1)?.first() > Some(doc_id));

    // Replayed changes the previous run already applied are skipped.
    let replay = FsEvent::Remote {
        tlf: tlf.clone(),
        revision: 1,
        change: EntryChange::Created {
            parent: FsPath::root(tlf.clone()),
            name: "a".to_string(),
        },
    };
    indexer.handle_event(&replay)?;
    indexer.wait_for_index(&token())?;
    assert_eq!(engine.doc_count(), 0);

    // A newer change reuses the persisted mapping and its document id.
    fs.remote()
        .create_file(&FsPath::parse(tlf.clone(), "b"), b"tortor")?;
    indexer.handle_event(&FsEvent::Remote {
        tlf: tlf.clone(),
        revision: 3,
        change: EntryChange::Created {
            parent: FsPath::root(tlf.clone()),
            name: "a".to_string(),
        },
    })?;
    indexer.wait_for_index(&token())?;
    let hits = indexer.search(&SearchRequest::new("dolor"))?.hits;
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].doc_id, doc_id);

    indexer.shutdown(&token())
}
