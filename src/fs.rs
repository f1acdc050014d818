//! Filesystem seam.
//!
//! The indexer reads entries through a [`FileSystem`] and learns about
//! mutations through an [`FsObserver`]. Observer callbacks are synchronous:
//! an event is fully handed to the indexer before the filesystem moves on,
//! so events of one TLF arrive in revision order.
//!
//! [`memory::MemoryFs`] is the in-process implementation used by tests and
//! benches.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Result;

pub mod memory;

/// Top-level folder identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TlfId(String);

impl TlfId {
    pub fn new(id: impl Into<String>) -> Self {
        TlfId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TlfId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque handle of an immutable content block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockPointer(u64);

impl BlockPointer {
    pub fn new(value: u64) -> Self {
        BlockPointer(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for BlockPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// A path inside one TLF. The empty path is the TLF root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FsPath {
    tlf: TlfId,
    components: Vec<String>,
}

impl FsPath {
    pub fn root(tlf: TlfId) -> Self {
        FsPath {
            tlf,
            components: Vec::new(),
        }
    }

    /// Parse a `/`-separated path. Empty components are ignored.
    pub fn parse(tlf: TlfId, path: &str) -> Self {
        FsPath {
            tlf,
            components: path
                .split('/')
                .filter(|c| !c.is_empty())
                .map(String::from)
                .collect(),
        }
    }

    pub fn tlf(&self) -> &TlfId {
        &self.tlf
    }

    pub fn components(&self) -> &[String] {
        &self.components
    }

    pub fn is_root(&self) -> bool {
        self.components.is_empty()
    }

    pub fn join(&self, name: &str) -> Self {
        let mut components = self.components.clone();
        components.push(name.to_string());
        FsPath {
            tlf: self.tlf.clone(),
            components,
        }
    }

    pub fn parent(&self) -> Option<Self> {
        let (_, rest) = self.components.split_last()?;
        Some(FsPath {
            tlf: self.tlf.clone(),
            components: rest.to_vec(),
        })
    }

    pub fn name(&self) -> Option<&str> {
        self.components.last().map(String::as_str)
    }

    /// The path within the TLF, always starting with `/`.
    pub fn path_string(&self) -> String {
        format!("/{}", self.components.join("/"))
    }
}

impl fmt::Display for FsPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.tlf, self.path_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryKind {
    File,
    Directory,
    Symlink,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryInfo {
    pub kind: EntryKind,
    pub pointer: BlockPointer,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    pub name: String,
    pub info: EntryInfo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncMode {
    /// Blocks are fetched on demand.
    Partial,
    /// The whole TLF is kept locally.
    Pinned,
}

/// What happened to one entry.
///
/// Pointers are the ones the entry had at the revision of the change. Later
/// changes may already have moved or rewritten the entry by the time the
/// change is indexed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryChange {
    Created {
        parent: FsPath,
        name: String,
    },
    Written {
        parent: FsPath,
        name: String,
        previous: BlockPointer,
        pointer: BlockPointer,
    },
    Renamed {
        old_parent: FsPath,
        old_name: String,
        new_parent: FsPath,
        new_name: String,
        pointer: BlockPointer,
    },
    Removed {
        parent: FsPath,
        name: String,
    },
}

/// Notifications delivered to observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FsEvent {
    /// A change made on this device, not yet durable on the server.
    Local {
        tlf: TlfId,
        revision: u64,
        change: EntryChange,
    },
    /// A change observed from the server.
    Remote {
        tlf: TlfId,
        revision: u64,
        change: EntryChange,
    },
    /// Local revisions up to `revision` completed the round-trip.
    Synced { tlf: TlfId, revision: u64 },
    SyncModeChanged { tlf: TlfId, mode: SyncMode },
    /// A pinned TLF has every block available locally.
    FullySynced { tlf: TlfId },
    /// Blocks no longer referenced by any revision.
    Unreferenced {
        tlf: TlfId,
        pointers: Vec<BlockPointer>,
    },
}

impl FsEvent {
    pub fn tlf(&self) -> &TlfId {
        match self {
            FsEvent::Local { tlf, .. }
            | FsEvent::Remote { tlf, .. }
            | FsEvent::Synced { tlf, .. }
            | FsEvent::SyncModeChanged { tlf, .. }
            | FsEvent::FullySynced { tlf }
            | FsEvent::Unreferenced { tlf, .. } => tlf,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(pub(crate) u64);

pub trait FsObserver: Send + Sync {
    fn on_event(&self, event: &FsEvent);
}

pub trait FileSystem: Send + Sync + fmt::Debug {
    /// Fails with `NotFound` for a missing entry.
    fn lookup(&self, path: &FsPath) -> Result<EntryInfo>;

    fn read_file(&self, path: &FsPath) -> Result<Vec<u8>>;

    /// Entries sorted by name.
    fn list_dir(&self, path: &FsPath) -> Result<Vec<DirEntry>>;

    fn register_observer(&self, observer: Arc<dyn FsObserver>) -> ObserverId;

    fn unregister_observer(&self, id: ObserverId);
}
