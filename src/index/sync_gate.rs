//! Admission control for filesystem changes.
//!
//! Local edits may still be rolled back by conflict resolution until they
//! complete a full local -> server -> local round-trip, so they are staged
//! per TLF and only admitted once an [`FsEvent::Synced`] covers their
//! revision. Remote changes are durable when observed and are admitted right
//! away, unless older local edits of the same TLF are still staged: changes
//! of one TLF are always admitted in revision order.
//!
//! A TLF switched to [`SyncMode::Pinned`] additionally waits for
//! [`FsEvent::FullySynced`], which admits a full backfill of the TLF.
//!
//! The gate is quiescent when nothing is staged and no pinned TLF is
//! waiting for its full sync.

use std::collections::{BTreeMap, VecDeque};

use crossbeam_channel::{Receiver, Sender, bounded};
use log::debug;
use parking_lot::Mutex;

use crate::error::Result;
use crate::fs::{EntryChange, FsEvent, SyncMode, TlfId};

/// Work the gate lets through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Change {
        tlf: TlfId,
        revision: u64,
        change: EntryChange,
    },
    /// Index the whole TLF.
    Backfill { tlf: TlfId },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Local,
    Remote,
}

#[derive(Debug)]
struct StagedChange {
    origin: Origin,
    revision: u64,
    change: EntryChange,
}

#[derive(Debug)]
struct TlfGate {
    staged: VecDeque<StagedChange>,
    synced_revision: u64,
    mode: SyncMode,
    awaiting_full_sync: bool,
}

impl Default for TlfGate {
    fn default() -> Self {
        TlfGate {
            staged: VecDeque::new(),
            synced_revision: 0,
            mode: SyncMode::Partial,
            awaiting_full_sync: false,
        }
    }
}

impl TlfGate {
    fn is_quiescent(&self) -> bool {
        self.staged.is_empty() && !self.awaiting_full_sync
    }

    /// Pop every staged change that may go through now.
    fn release(&mut self) -> Vec<StagedChange> {
        let mut released = Vec::new();
        while let Some(front) = self.staged.front() {
            if front.origin == Origin::Local && front.revision > self.synced_revision {
                break;
            }
            if let Some(change) = self.staged.pop_front() {
                released.push(change);
            }
        }
        released
    }
}

#[derive(Debug, Default)]
struct GateState {
    tlfs: BTreeMap<TlfId, TlfGate>,
    waiters: Vec<Sender<()>>,
    /// Admissions released but not yet handed off.
    handoffs: usize,
}

impl GateState {
    fn is_quiescent(&self) -> bool {
        self.handoffs == 0 && self.tlfs.values().all(TlfGate::is_quiescent)
    }

    fn wake_if_quiescent(&mut self) {
        if !self.waiters.is_empty() && self.is_quiescent() {
            for waiter in self.waiters.drain(..) {
                let _ = waiter.send(());
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct SyncGate {
    state: Mutex<GateState>,
    /// Held for a whole `observe` so admissions are handed off in order.
    order: Mutex<()>,
}

impl SyncGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one filesystem event through the gate.
    ///
    /// Admitted work is handed to `admit` with the gate state unlocked, so a
    /// slow `admit` never stalls readers of the gate. The gate does not turn
    /// quiescent before `admit` returns: a waiter woken by quiescence always
    /// finds the work already queued. [`FsEvent::Unreferenced`] is not gated
    /// and is ignored here.
    pub fn observe<F>(&self, event: &FsEvent, mut admit: F) -> Result<()>
    where
        F: FnMut(Admission) -> Result<()>,
    {
        let _order = self.order.lock();
        let admitted = {
            let mut state = self.state.lock();
            let admitted = Self::admissions(&mut state, event);
            state.handoffs += admitted.len();
            admitted
        };

        let count = admitted.len();
        let result = admitted.into_iter().try_for_each(&mut admit);

        let mut state = self.state.lock();
        state.handoffs -= count;
        state.wake_if_quiescent();
        result
    }

    fn admissions(state: &mut GateState, event: &FsEvent) -> Vec<Admission> {
        match event {
            FsEvent::Local {
                tlf,
                revision,
                change,
            } => Self::stage(state, tlf, Origin::Local, *revision, change)
                .into_iter()
                .collect(),
            FsEvent::Remote {
                tlf,
                revision,
                change,
            } => Self::stage(state, tlf, Origin::Remote, *revision, change)
                .into_iter()
                .collect(),
            FsEvent::Synced { tlf, revision } => {
                let gate = state.tlfs.entry(tlf.clone()).or_default();
                gate.synced_revision = gate.synced_revision.max(*revision);
                let released = gate.release();
                debug!(
                    "{tlf} synced to revision {revision}, admitting {} staged changes",
                    released.len()
                );
                released
                    .into_iter()
                    .map(|staged| Admission::Change {
                        tlf: tlf.clone(),
                        revision: staged.revision,
                        change: staged.change,
                    })
                    .collect()
            }
            FsEvent::SyncModeChanged { tlf, mode } => {
                let gate = state.tlfs.entry(tlf.clone()).or_default();
                gate.mode = *mode;
                gate.awaiting_full_sync = *mode == SyncMode::Pinned;
                debug!("{tlf} sync mode is now {mode:?}");
                Vec::new()
            }
            FsEvent::FullySynced { tlf } => {
                let gate = state.tlfs.entry(tlf.clone()).or_default();
                if gate.mode == SyncMode::Pinned && gate.awaiting_full_sync {
                    gate.awaiting_full_sync = false;
                    debug!("{tlf} fully synced, admitting backfill");
                    vec![Admission::Backfill { tlf: tlf.clone() }]
                } else {
                    Vec::new()
                }
            }
            FsEvent::Unreferenced { .. } => Vec::new(),
        }
    }

    fn stage(
        state: &mut GateState,
        tlf: &TlfId,
        origin: Origin,
        revision: u64,
        change: &EntryChange,
    ) -> Option<Admission> {
        let gate = state.tlfs.entry(tlf.clone()).or_default();
        let ready = gate.staged.is_empty()
            && (origin == Origin::Remote || revision <= gate.synced_revision);

        if ready {
            return Some(Admission::Change {
                tlf: tlf.clone(),
                revision,
                change: change.clone(),
            });
        }

        gate.staged.push_back(StagedChange {
            origin,
            revision,
            change: change.clone(),
        });
        None
    }

    pub fn is_quiescent(&self) -> bool {
        self.state.lock().is_quiescent()
    }

    /// TLFs with staged changes or a pending full sync.
    pub fn pending_tlfs(&self) -> Vec<TlfId> {
        self.state
            .lock()
            .tlfs
            .iter()
            .filter(|(_, gate)| !gate.is_quiescent())
            .map(|(tlf, _)| tlf.clone())
            .collect()
    }

    pub fn staged_count(&self) -> usize {
        self.state.lock().tlfs.values().map(|g| g.staged.len()).sum()
    }

    /// A receiver that yields once the gate is quiescent. Already ready
    /// when the gate is quiescent now.
    pub fn subscribe(&self) -> Receiver<()> {
        let (tx, rx) = bounded(1);
        let mut state = self.state.lock();
        if state.is_quiescent() {
            let _ = tx.send(());
        } else {
            state.waiters.push(tx);
        }
        rx
    }

    /// Disconnect every pending subscriber.
    pub fn close(&self) {
        self.state.lock().waiters.clear();
    }
}
