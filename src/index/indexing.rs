//! The indexing operations proper.
//!
//! [`IndexCore`] is owned by the worker thread; nothing else mutates the
//! search engine, the reference tracker or the progress marks, so the
//! read-check-write sequences below never race.
//!
//! Reverse mappings are written before the engine. A crash in between
//! leaves a mapping whose document is missing or stale, which the next
//! change of that entry repairs in place under the same id.

use std::sync::Arc;

use ahash::AHashSet;
use log::{debug, error, warn};

use crate::engine::{Document, FIELD_CONTENT, FIELD_NAME, FIELD_PATH, FIELD_TLF, SearchEngine};
use crate::error::{Result, SearchError};
use crate::fs::{BlockPointer, EntryChange, EntryInfo, EntryKind, FileSystem, FsPath, TlfId};
use crate::index::doc_id::{DocIdAllocator, DocumentId};
use crate::index::extract::Extractor;
use crate::index::progress::TlfProgress;
use crate::index::refs::ReferenceTracker;
use crate::index::worker::WorkerShared;

pub(crate) struct IndexCore {
    pub(crate) fs: Arc<dyn FileSystem>,
    pub(crate) engine: Arc<dyn SearchEngine>,
    pub(crate) allocator: Arc<DocIdAllocator>,
    pub(crate) refs: ReferenceTracker,
    pub(crate) progress: TlfProgress,
    pub(crate) extractor: Extractor,
    pub(crate) change_depth: usize,
    pub(crate) backfill_depth: usize,
    pub(crate) shared: Arc<WorkerShared>,
    /// Blocks whose mapping moved to them while their entry could not be
    /// read at the written path. Their document still holds older content.
    pub(crate) stale: AHashSet<(TlfId, BlockPointer)>,
}

impl IndexCore {
    /// Index the entry `name` under `parent`.
    ///
    /// Returns `true` when `candidate` (or a freshly reserved id when `None`)
    /// was consumed, `false` when the entry's block already had a document,
    /// which is then refreshed in place.
    pub(crate) fn index_child(
        &mut self,
        parent: &FsPath,
        name: &str,
        candidate: Option<DocumentId>,
        depth: usize,
    ) -> Result<bool> {
        if depth == 0 {
            return Ok(false);
        }

        let path = parent.join(name);
        let info = self.fs.lookup(&path)?;
        let tlf = path.tlf();

        let existing = self.refs.get(tlf, info.pointer)?;
        let document = self.build_document(&path, &info)?;

        let used_new = match existing {
            Some(id) => {
                self.engine.upsert(id, document)?;
                debug!("{path} already indexed as document {id}");
                false
            }
            None => {
                let id = match candidate {
                    Some(id) => id,
                    None => self.allocator.reserve_one()?,
                };
                self.refs.insert(tlf, info.pointer, id)?;
                self.engine.upsert(id, document)?;
                debug!("indexed {path} as document {id}");
                true
            }
        };
        self.stale.remove(&(tlf.clone(), info.pointer));

        if info.kind == EntryKind::Directory && depth > 1 {
            self.index_children(&path, depth - 1)?;
        }
        Ok(used_new)
    }

    /// Re-extract the entry whose content used to live in `previous`,
    /// keeping its document id.
    pub(crate) fn update_child(
        &mut self,
        parent: &FsPath,
        name: &str,
        previous: BlockPointer,
        depth: usize,
    ) -> Result<()> {
        if depth == 0 {
            return Ok(());
        }

        let path = parent.join(name);
        let info = self.fs.lookup(&path)?;
        let tlf = path.tlf();

        let id = self.refs.get(tlf, previous)?.ok_or_else(|| {
            SearchError::not_found(format!("no document for block {previous} of {path}"))
        })?;

        let document = self.build_document(&path, &info)?;
        self.move_mapping(tlf, previous, info.pointer, id)?;
        self.engine.upsert(id, document)?;
        self.stale.remove(&(tlf.clone(), info.pointer));
        debug!("updated {path} in document {id}");

        if info.kind == EntryKind::Directory && depth > 1 {
            self.index_children(&path, depth - 1)?;
        }
        Ok(())
    }

    /// Point the document of a moved entry at its new name and path.
    ///
    /// `depth` counts from the new position: with `depth > 1` the stored
    /// path of mapped descendants is refreshed `depth - 1` levels down.
    pub(crate) fn rename_child(
        &mut self,
        old_parent: &FsPath,
        new_parent: &FsPath,
        new_name: &str,
        depth: usize,
    ) -> Result<()> {
        if depth == 0 {
            return Ok(());
        }

        let path = new_parent.join(new_name);
        let info = self.fs.lookup(&path)?;
        let id = self
            .refs
            .get(path.tlf(), info.pointer)?
            .ok_or_else(|| SearchError::not_found(format!("no document for {path}")))?;

        self.rename_document(id, &path, Some(&info), false, depth)?;
        debug!("renamed document {id} from {old_parent} to {path}");
        Ok(())
    }

    /// Delete the documents of unreferenced blocks. Unmapped pointers are
    /// skipped.
    pub(crate) fn delete_from_unrefs(
        &mut self,
        tlf: &TlfId,
        pointers: &[BlockPointer],
    ) -> Result<usize> {
        let mut deleted = 0;
        for &pointer in pointers {
            self.stale.remove(&(tlf.clone(), pointer));
            let Some(id) = self.refs.get(tlf, pointer)? else {
                continue;
            };
            self.engine.delete(id)?;
            self.refs.remove(tlf, pointer)?;
            deleted += 1;
        }
        if deleted > 0 {
            debug!(
                "deleted {deleted} documents for {} unreferenced blocks in {tlf}",
                pointers.len()
            );
        }
        Ok(deleted)
    }

    /// Apply one admitted filesystem change.
    ///
    /// Identity follows the pointers carried by the change, not the entry's
    /// current pointer: changes of one TLF may be applied after later
    /// renames or writes of the same entry.
    pub(crate) fn apply_change(&mut self, change: &EntryChange) -> Result<()> {
        let depth = self.change_depth;
        match change {
            EntryChange::Created { parent, name } => {
                self.index_child(parent, name, None, depth).map(|_| ())
            }
            EntryChange::Written {
                parent,
                name,
                previous,
                pointer,
            } => self.apply_write(parent, name, *previous, *pointer, depth),
            EntryChange::Renamed {
                old_parent,
                new_parent,
                new_name,
                pointer,
                ..
            } => self.apply_rename(old_parent, new_parent, new_name, *pointer, depth),
            EntryChange::Removed { parent, name } => {
                debug!(
                    "{} removed; its document stays until the block is unreferenced",
                    parent.join(name)
                );
                Ok(())
            }
        }
    }

    fn apply_write(
        &mut self,
        parent: &FsPath,
        name: &str,
        previous: BlockPointer,
        pointer: BlockPointer,
        depth: usize,
    ) -> Result<()> {
        if depth == 0 {
            return Ok(());
        }
        let path = parent.join(name);
        let tlf = path.tlf();

        let Some(id) = self.refs.get(tlf, previous)? else {
            // The previous content was never indexed.
            return self.index_child(parent, name, None, depth).map(|_| ());
        };

        self.move_mapping(tlf, previous, pointer, id)?;
        match self.entry_holding(&path, pointer)? {
            Some(info) => {
                let document = self.build_document(&path, &info)?;
                self.engine.upsert(id, document)?;
                self.stale.remove(&(tlf.clone(), pointer));
                debug!("updated {path} in document {id}");
                if info.kind == EntryKind::Directory && depth > 1 {
                    self.index_children(&path, depth - 1)?;
                }
            }
            None => {
                debug!("{path} changed again since, document {id} follows it");
                self.stale.insert((tlf.clone(), pointer));
            }
        }
        Ok(())
    }

    fn apply_rename(
        &mut self,
        old_parent: &FsPath,
        new_parent: &FsPath,
        new_name: &str,
        pointer: BlockPointer,
        depth: usize,
    ) -> Result<()> {
        if depth == 0 {
            return Ok(());
        }
        let path = new_parent.join(new_name);
        let tlf = path.tlf();

        let Some(id) = self.refs.get(tlf, pointer)? else {
            // Never indexed under its old name.
            return match self.rename_child(old_parent, new_parent, new_name, depth) {
                Err(e) if e.is_not_found() => {
                    self.index_child(new_parent, new_name, None, depth).map(|_| ())
                }
                other => other,
            };
        };

        let current = self.entry_holding(&path, pointer)?;
        let refresh = self.stale.contains(&(tlf.clone(), pointer));
        self.rename_document(id, &path, current.as_ref(), refresh, depth)?;
        if refresh && current.is_some() {
            self.stale.remove(&(tlf.clone(), pointer));
        }
        debug!("renamed document {id} from {old_parent} to {path}");
        Ok(())
    }

    /// Install `id` on `new` in place of `previous`, deleting whatever
    /// document `new` was mapped to before.
    fn move_mapping(
        &mut self,
        tlf: &TlfId,
        previous: BlockPointer,
        new: BlockPointer,
        id: DocumentId,
    ) -> Result<()> {
        if let Some(displaced) = self.refs.swap(tlf, previous, new, id)? {
            warn!("block {new} of {tlf} was indexed twice, dropping document {displaced}");
            self.engine.delete(displaced)?;
        }
        if self.stale.remove(&(tlf.clone(), previous)) {
            self.stale.insert((tlf.clone(), new));
        }
        Ok(())
    }

    /// The entry at `path` if it still holds block `pointer`.
    fn entry_holding(&self, path: &FsPath, pointer: BlockPointer) -> Result<Option<EntryInfo>> {
        match self.fs.lookup(path) {
            Ok(info) if info.pointer == pointer => Ok(Some(info)),
            Ok(_) => Ok(None),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Store the new name and path of document `id`. With `current` known,
    /// the whole document is rebuilt when `refresh` is set or the engine lost
    /// it; otherwise its content is left alone.
    fn rename_document(
        &mut self,
        id: DocumentId,
        path: &FsPath,
        current: Option<&EntryInfo>,
        refresh: bool,
        depth: usize,
    ) -> Result<()> {
        let patched = if refresh && current.is_some() {
            Err(SearchError::not_found(format!("document {id} is stale")))
        } else {
            self.engine.patch(
                id,
                Document::new()
                    .with_field(FIELD_NAME, path.name().unwrap_or_default())
                    .with_field(FIELD_PATH, path.path_string()),
            )
        };

        match (patched, current) {
            (Ok(()), _) => {}
            (Err(e), Some(info)) if e.is_not_found() => {
                let document = self.build_document(path, info)?;
                self.engine.upsert(id, document)?;
            }
            (Err(e), None) if e.is_not_found() => {
                debug!("{path} changed again, document {id} waits for a later change");
            }
            (Err(e), _) => return Err(e),
        }

        if let Some(info) = current {
            if info.kind == EntryKind::Directory && depth > 1 {
                self.refresh_paths(path, depth - 1)?;
            }
        }
        Ok(())
    }

    /// Index everything in `tlf` down to the backfill depth.
    pub(crate) fn backfill(&mut self, tlf: &TlfId) -> Result<usize> {
        let root = FsPath::root(tlf.clone());
        let indexed = self.index_children(&root, self.backfill_depth)?;
        debug!("backfilled {indexed} entries of {tlf}");
        Ok(indexed)
    }

    /// Index every child of `dir` with `depth`. Ids for unmapped children
    /// are reserved in one batch. A failing child is logged and skipped.
    fn index_children(&mut self, dir: &FsPath, depth: usize) -> Result<usize> {
        if depth == 0 {
            return Ok(0);
        }

        let entries = self.fs.list_dir(dir)?;
        let mut unmapped = Vec::with_capacity(entries.len());
        for entry in &entries {
            unmapped.push(self.refs.get(dir.tlf(), entry.info.pointer)?.is_none());
        }
        let mut ids = self
            .allocator
            .reserve(unmapped.iter().filter(|u| **u).count())?;

        let mut indexed = 0;
        for (entry, is_unmapped) in entries.iter().zip(unmapped) {
            let candidate = if is_unmapped { ids.next() } else { None };
            match self.index_child(dir, &entry.name, candidate, depth) {
                Ok(_) => indexed += 1,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => warn!("skipping {}: {e}", dir.join(&entry.name)),
            }
        }
        Ok(indexed)
    }

    fn refresh_paths(&mut self, dir: &FsPath, levels: usize) -> Result<()> {
        for entry in self.fs.list_dir(dir)? {
            let path = dir.join(&entry.name);
            if let Some(id) = self.refs.get(path.tlf(), entry.info.pointer)? {
                let patch = Document::new().with_field(FIELD_PATH, path.path_string());
                match self.engine.patch(id, patch) {
                    Ok(()) => {}
                    Err(e) if e.is_not_found() => {
                        warn!("document {id} for {path} is missing from the engine")
                    }
                    Err(e) => return Err(e),
                }
            }
            if entry.info.kind == EntryKind::Directory && levels > 1 {
                self.refresh_paths(&path, levels - 1)?;
            }
        }
        Ok(())
    }

    fn build_document(&self, path: &FsPath, info: &EntryInfo) -> Result<Document> {
        let extracted = self.extractor.extract(self.fs.as_ref(), path, info)?;
        Ok(Document::new()
            .with_field(FIELD_NAME, path.name().unwrap_or_default())
            .with_field(FIELD_CONTENT, extracted.text)
            .with_field(FIELD_PATH, path.path_string())
            .with_field(FIELD_TLF, path.tlf().as_str()))
    }

    /// Log a failed operation and remember it when it is fatal.
    pub(crate) fn note_failure(&self, what: &str, err: &SearchError) {
        if err.is_fatal() {
            error!("{what} failed, index is unusable until reopened: {err}");
            self.shared.record_fatal(err);
        } else if err.is_not_found() {
            debug!("{what}: {err}");
        } else {
            warn!("{what} failed: {err}");
        }
    }
}
