//! In-memory versioned filesystem.
//!
//! Every mutation bumps the TLF revision and is reported to observers as a
//! [`FsEvent::Local`] (or [`FsEvent::Remote`] when made through
//! [`MemoryFs::remote`]). Local revisions become durable in two steps, as in
//! a real journaled client: [`MemoryFs::sync_all`] flushes them and
//! [`MemoryFs::sync_from_server`] completes the round-trip and emits
//! [`FsEvent::Synced`].
//!
//! Directories keep their block pointer for their whole lifetime. Every file
//! write mints a new pointer; the replaced one, and every pointer under a
//! removed entry, becomes garbage that [`MemoryFs::collect_garbage`] reports
//! through [`FsEvent::Unreferenced`] once its revision is synced.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use log::debug;
use parking_lot::Mutex;

use crate::error::{Result, SearchError};
use crate::fs::{
    BlockPointer, DirEntry, EntryChange, EntryInfo, EntryKind, FileSystem, FsEvent, FsObserver,
    FsPath, ObserverId, SyncMode, TlfId,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Local,
    Remote,
}

#[derive(Debug)]
enum NodeData {
    File(Vec<u8>),
    Dir(BTreeMap<String, Node>),
}

#[derive(Debug)]
struct Node {
    pointer: BlockPointer,
    data: NodeData,
}

impl Node {
    fn dir(pointer: BlockPointer) -> Self {
        Node {
            pointer,
            data: NodeData::Dir(BTreeMap::new()),
        }
    }

    fn info(&self) -> EntryInfo {
        match &self.data {
            NodeData::File(bytes) => EntryInfo {
                kind: EntryKind::File,
                pointer: self.pointer,
                size: bytes.len() as u64,
            },
            NodeData::Dir(children) => EntryInfo {
                kind: EntryKind::Directory,
                pointer: self.pointer,
                size: children.len() as u64,
            },
        }
    }

    fn get(&self, components: &[String]) -> Option<&Node> {
        match components.split_first() {
            None => Some(self),
            Some((first, rest)) => match &self.data {
                NodeData::Dir(children) => children.get(first)?.get(rest),
                NodeData::File(_) => None,
            },
        }
    }

    fn children_mut(&mut self, components: &[String]) -> Result<&mut BTreeMap<String, Node>> {
        match components.split_first() {
            None => match &mut self.data {
                NodeData::Dir(children) => Ok(children),
                NodeData::File(_) => Err(SearchError::file_system("not a directory")),
            },
            Some((first, rest)) => match &mut self.data {
                NodeData::Dir(children) => children
                    .get_mut(first)
                    .ok_or_else(|| SearchError::not_found(first.clone()))?
                    .children_mut(rest),
                NodeData::File(_) => Err(SearchError::file_system("not a directory")),
            },
        }
    }

    fn collect_pointers(&self, out: &mut Vec<BlockPointer>) {
        out.push(self.pointer);
        if let NodeData::Dir(children) = &self.data {
            for child in children.values() {
                child.collect_pointers(out);
            }
        }
    }
}

#[derive(Debug)]
struct TlfState {
    root: Node,
    revision: u64,
    flushed: u64,
    synced: u64,
    mode: SyncMode,
    /// (revision that dropped the reference, pointer)
    garbage: Vec<(u64, BlockPointer)>,
}

impl TlfState {
    fn retire(&mut self, pointers: impl IntoIterator<Item = BlockPointer>) {
        let revision = self.revision + 1;
        self.garbage
            .extend(pointers.into_iter().map(|pointer| (revision, pointer)));
    }

    fn parent_children(&mut self, path: &FsPath) -> Result<(&mut BTreeMap<String, Node>, String)> {
        let (name, parent) = path
            .components()
            .split_last()
            .ok_or_else(|| SearchError::invalid_argument("operation not allowed on TLF root"))?;
        Ok((self.root.children_mut(parent)?, name.clone()))
    }
}

#[derive(Default)]
struct FsState {
    tlfs: BTreeMap<TlfId, TlfState>,
    next_pointer: u64,
    observers: Vec<(ObserverId, Arc<dyn FsObserver>)>,
    next_observer: u64,
}

impl FsState {
    fn mint(&mut self) -> BlockPointer {
        self.next_pointer += 1;
        BlockPointer::new(self.next_pointer)
    }

    fn tlf_mut(&mut self, tlf: &TlfId) -> &mut TlfState {
        let next_pointer = &mut self.next_pointer;
        self.tlfs.entry(tlf.clone()).or_insert_with(|| {
            *next_pointer += 1;
            TlfState {
                root: Node::dir(BlockPointer::new(*next_pointer)),
                revision: 0,
                flushed: 0,
                synced: 0,
                mode: SyncMode::Partial,
                garbage: Vec::new(),
            }
        })
    }

    fn tlf(&self, tlf: &TlfId) -> Result<&TlfState> {
        self.tlfs
            .get(tlf)
            .ok_or_else(|| SearchError::not_found(format!("tlf {tlf}")))
    }

    fn node(&self, path: &FsPath) -> Result<&Node> {
        self.tlf(path.tlf())?
            .root
            .get(path.components())
            .ok_or_else(|| SearchError::not_found(path.to_string()))
    }
}

/// In-memory [`FileSystem`] with journaled local writes and garbage
/// collection.
#[derive(Default)]
pub struct MemoryFs {
    state: Mutex<FsState>,
    /// Serializes mutate-then-notify so observers see events in order.
    dispatch: Mutex<()>,
}

impl MemoryFs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mutations made through the returned handle are reported as remote.
    pub fn remote(&self) -> RemoteChanges<'_> {
        RemoteChanges { fs: self }
    }

    pub fn create_dir(&self, path: &FsPath) -> Result<BlockPointer> {
        self.create_dir_as(Origin::Local, path)
    }

    pub fn create_file(&self, path: &FsPath, data: &[u8]) -> Result<BlockPointer> {
        self.create_file_as(Origin::Local, path, data)
    }

    /// Replace a file's content. Returns the new block pointer.
    pub fn write_file(&self, path: &FsPath, data: &[u8]) -> Result<BlockPointer> {
        self.write_file_as(Origin::Local, path, data)
    }

    pub fn rename(&self, from: &FsPath, to: &FsPath) -> Result<()> {
        self.rename_as(Origin::Local, from, to)
    }

    pub fn remove_entry(&self, path: &FsPath) -> Result<()> {
        self.remove_entry_as(Origin::Local, path)
    }

    /// Flush local revisions to the server. Returns the flushed revision.
    pub fn sync_all(&self, tlf: &TlfId) -> u64 {
        let mut state = self.state.lock();
        let tlf_state = state.tlf_mut(tlf);
        tlf_state.flushed = tlf_state.revision;
        tlf_state.flushed
    }

    /// Complete the round-trip for flushed revisions and emit
    /// [`FsEvent::Synced`].
    pub fn sync_from_server(&self, tlf: &TlfId) -> u64 {
        let _dispatch = self.dispatch.lock();
        let (revision, observers) = {
            let mut state = self.state.lock();
            let tlf_state = state.tlf_mut(tlf);
            tlf_state.synced = tlf_state.flushed;
            let revision = tlf_state.synced;
            (revision, state.observers.clone())
        };
        notify(
            &observers,
            &[FsEvent::Synced {
                tlf: tlf.clone(),
                revision,
            }],
        );
        revision
    }

    /// Emits [`FsEvent::SyncModeChanged`], followed by
    /// [`FsEvent::FullySynced`] once a pinned TLF is entirely local.
    pub fn set_sync_mode(&self, tlf: &TlfId, mode: SyncMode) {
        let _dispatch = self.dispatch.lock();
        let observers = {
            let mut state = self.state.lock();
            state.tlf_mut(tlf).mode = mode;
            state.observers.clone()
        };

        let mut events = vec![FsEvent::SyncModeChanged {
            tlf: tlf.clone(),
            mode,
        }];
        if mode == SyncMode::Pinned {
            events.push(FsEvent::FullySynced { tlf: tlf.clone() });
        }
        notify(&observers, &events);
    }

    pub fn sync_mode(&self, tlf: &TlfId) -> SyncMode {
        self.state
            .lock()
            .tlfs
            .get(tlf)
            .map_or(SyncMode::Partial, |t| t.mode)
    }

    pub fn revision(&self, tlf: &TlfId) -> u64 {
        self.state.lock().tlfs.get(tlf).map_or(0, |t| t.revision)
    }

    /// Report every synced garbage pointer as unreferenced. Returns how many
    /// were reported.
    pub fn collect_garbage(&self, tlf: &TlfId) -> usize {
        let _dispatch = self.dispatch.lock();
        let (pointers, observers) = {
            let mut state = self.state.lock();
            let tlf_state = state.tlf_mut(tlf);
            let synced = tlf_state.synced;
            let (released, kept): (Vec<_>, Vec<_>) = tlf_state
                .garbage
                .drain(..)
                .partition(|(revision, _)| *revision <= synced);
            tlf_state.garbage = kept;
            let pointers: Vec<BlockPointer> = released.into_iter().map(|(_, p)| p).collect();
            (pointers, state.observers.clone())
        };

        let count = pointers.len();
        if count > 0 {
            debug!("collected {count} unreferenced blocks in {tlf}");
            notify(
                &observers,
                &[FsEvent::Unreferenced {
                    tlf: tlf.clone(),
                    pointers,
                }],
            );
        }
        count
    }

    pub fn observer_count(&self) -> usize {
        self.state.lock().observers.len()
    }

    fn create_dir_as(&self, origin: Origin, path: &FsPath) -> Result<BlockPointer> {
        self.mutate(origin, path.tlf(), |state| {
            let pointer = state.mint();
            let tlf_state = state.tlf_mut(path.tlf());
            let (children, name) = tlf_state.parent_children(path)?;
            if children.contains_key(&name) {
                return Err(SearchError::file_system(format!("{path} already exists")));
            }
            children.insert(name.clone(), Node::dir(pointer));
            Ok((pointer, created(path, name)))
        })
    }

    fn create_file_as(&self, origin: Origin, path: &FsPath, data: &[u8]) -> Result<BlockPointer> {
        self.mutate(origin, path.tlf(), |state| {
            let pointer = state.mint();
            let tlf_state = state.tlf_mut(path.tlf());
            let (children, name) = tlf_state.parent_children(path)?;
            if children.contains_key(&name) {
                return Err(SearchError::file_system(format!("{path} already exists")));
            }
            children.insert(
                name.clone(),
                Node {
                    pointer,
                    data: NodeData::File(data.to_vec()),
                },
            );
            Ok((pointer, created(path, name)))
        })
    }

    fn write_file_as(&self, origin: Origin, path: &FsPath, data: &[u8]) -> Result<BlockPointer> {
        self.mutate(origin, path.tlf(), |state| {
            let pointer = state.mint();
            let tlf_state = state.tlf_mut(path.tlf());
            let (children, name) = tlf_state.parent_children(path)?;
            let node = children
                .get_mut(&name)
                .ok_or_else(|| SearchError::not_found(path.to_string()))?;
            let NodeData::File(bytes) = &mut node.data else {
                return Err(SearchError::file_system(format!("{path} is a directory")));
            };
            *bytes = data.to_vec();
            let previous = std::mem::replace(&mut node.pointer, pointer);
            tlf_state.retire([previous]);

            let parent = path.parent().unwrap_or_else(|| FsPath::root(path.tlf().clone()));
            Ok((
                pointer,
                EntryChange::Written {
                    parent,
                    name,
                    previous,
                    pointer,
                },
            ))
        })
    }

    fn rename_as(&self, origin: Origin, from: &FsPath, to: &FsPath) -> Result<()> {
        if from.tlf() != to.tlf() {
            return Err(SearchError::invalid_argument("rename across TLFs"));
        }
        if to.components().starts_with(from.components()) {
            return Err(SearchError::invalid_argument(format!(
                "cannot move {from} into itself"
            )));
        }

        self.mutate(origin, from.tlf(), |state| {
            let tlf_state = state.tlf_mut(from.tlf());

            // Validate the destination before detaching the source.
            tlf_state.parent_children(to)?;
            let (children, old_name) = tlf_state.parent_children(from)?;
            let node = children
                .remove(&old_name)
                .ok_or_else(|| SearchError::not_found(from.to_string()))?;

            let pointer = node.pointer;
            let (children, new_name) = tlf_state.parent_children(to)?;
            let replaced = children.insert(new_name.clone(), node);
            if let Some(replaced) = replaced {
                let mut pointers = Vec::new();
                replaced.collect_pointers(&mut pointers);
                tlf_state.retire(pointers);
            }

            let root = FsPath::root(from.tlf().clone());
            Ok((
                (),
                EntryChange::Renamed {
                    old_parent: from.parent().unwrap_or_else(|| root.clone()),
                    old_name,
                    new_parent: to.parent().unwrap_or(root),
                    new_name,
                    pointer,
                },
            ))
        })
    }

    fn remove_entry_as(&self, origin: Origin, path: &FsPath) -> Result<()> {
        self.mutate(origin, path.tlf(), |state| {
            let tlf_state = state.tlf_mut(path.tlf());
            let (children, name) = tlf_state.parent_children(path)?;
            let node = children
                .remove(&name)
                .ok_or_else(|| SearchError::not_found(path.to_string()))?;

            let mut pointers = Vec::new();
            node.collect_pointers(&mut pointers);
            tlf_state.retire(pointers);

            let parent = path.parent().unwrap_or_else(|| FsPath::root(path.tlf().clone()));
            Ok(((), EntryChange::Removed { parent, name }))
        })
    }

    fn mutate<T>(
        &self,
        origin: Origin,
        tlf: &TlfId,
        op: impl FnOnce(&mut FsState) -> Result<(T, EntryChange)>,
    ) -> Result<T> {
        let _dispatch = self.dispatch.lock();
        let (value, event, observers) = {
            let mut state = self.state.lock();
            let (value, change) = op(&mut *state)?;

            let tlf_state = state.tlf_mut(tlf);
            tlf_state.revision += 1;
            let revision = tlf_state.revision;

            let event = match origin {
                Origin::Local => FsEvent::Local {
                    tlf: tlf.clone(),
                    revision,
                    change,
                },
                Origin::Remote => {
                    // Remote revisions are durable already; they only
                    // advance the synced mark when nothing local is pending.
                    if tlf_state.synced == revision - 1 {
                        tlf_state.flushed = revision;
                        tlf_state.synced = revision;
                    }
                    FsEvent::Remote {
                        tlf: tlf.clone(),
                        revision,
                        change,
                    }
                }
            };
            (value, event, state.observers.clone())
        };

        notify(&observers, &[event]);
        Ok(value)
    }
}

fn created(path: &FsPath, name: String) -> EntryChange {
    EntryChange::Created {
        parent: path.parent().unwrap_or_else(|| FsPath::root(path.tlf().clone())),
        name,
    }
}

fn notify(observers: &[(ObserverId, Arc<dyn FsObserver>)], events: &[FsEvent]) {
    for event in events {
        for (_, observer) in observers {
            observer.on_event(event);
        }
    }
}

impl FileSystem for MemoryFs {
    fn lookup(&self, path: &FsPath) -> Result<EntryInfo> {
        Ok(self.state.lock().node(path)?.info())
    }

    fn read_file(&self, path: &FsPath) -> Result<Vec<u8>> {
        let state = self.state.lock();
        match &state.node(path)?.data {
            NodeData::File(bytes) => Ok(bytes.clone()),
            NodeData::Dir(_) => Err(SearchError::file_system(format!("{path} is a directory"))),
        }
    }

    fn list_dir(&self, path: &FsPath) -> Result<Vec<DirEntry>> {
        let state = self.state.lock();
        match &state.node(path)?.data {
            NodeData::Dir(children) => Ok(children
                .iter()
                .map(|(name, node)| DirEntry {
                    name: name.clone(),
                    info: node.info(),
                })
                .collect()),
            NodeData::File(_) => Err(SearchError::file_system(format!("{path} is not a directory"))),
        }
    }

    fn register_observer(&self, observer: Arc<dyn FsObserver>) -> ObserverId {
        let mut state = self.state.lock();
        state.next_observer += 1;
        let id = ObserverId(state.next_observer);
        state.observers.push((id, observer));
        id
    }

    fn unregister_observer(&self, id: ObserverId) {
        self.state.lock().observers.retain(|(observer, _)| *observer != id);
    }
}

impl fmt::Debug for MemoryFs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MemoryFs")
            .field("tlfs", &state.tlfs.keys().collect::<Vec<_>>())
            .field("observers", &state.observers.len())
            .finish()
    }
}

/// Handle whose mutations are reported as [`FsEvent::Remote`].
#[derive(Debug)]
pub struct RemoteChanges<'a> {
    fs: &'a MemoryFs,
}

impl RemoteChanges<'_> {
    pub fn create_dir(&self, path: &FsPath) -> Result<BlockPointer> {
        self.fs.create_dir_as(Origin::Remote, path)
    }

    pub fn create_file(&self, path: &FsPath, data: &[u8]) -> Result<BlockPointer> {
        self.fs.create_file_as(Origin::Remote, path, data)
    }

    pub fn write_file(&self, path: &FsPath, data: &[u8]) -> Result<BlockPointer> {
        self.fs.write_file_as(Origin::Remote, path, data)
    }

    pub fn rename(&self, from: &FsPath, to: &FsPath) -> Result<()> {
        self.fs.rename_as(Origin::Remote, from, to)
    }

    pub fn remove_entry(&self, path: &FsPath) -> Result<()> {
        self.fs.remove_entry_as(Origin::Remote, path)
    }
}
