//! The indexing worker.
//!
//! One thread owns the [`IndexCore`] and drains a bounded queue of
//! [`Task`]s in order. Callers that need a result ship a closure
//! ([`Task::Call`]); callers that only need to know the queue drained ship a
//! [`Task::Barrier`].

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::thread;

use chrono::{DateTime, Utc};
use crossbeam_channel::{Receiver, Sender, bounded};
use log::{debug, info};
use parking_lot::Mutex;

use crate::error::{Result, SearchError};
use crate::fs::{BlockPointer, EntryChange, TlfId};
use crate::index::indexing::IndexCore;
use crate::index::sync_gate::Admission;

pub(crate) type Call = Box<dyn FnOnce(&mut IndexCore) + Send>;

pub(crate) enum Task {
    Change {
        tlf: TlfId,
        revision: u64,
        change: EntryChange,
    },
    Unrefs {
        tlf: TlfId,
        pointers: Vec<BlockPointer>,
    },
    Backfill {
        tlf: TlfId,
    },
    Call(Call),
    /// Answered once every task queued before it has run.
    Barrier(Sender<()>),
}

impl Task {
    fn mutates(&self) -> bool {
        matches!(
            self,
            Task::Change { .. } | Task::Unrefs { .. } | Task::Backfill { .. }
        )
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Task::Change {
                tlf,
                revision,
                change,
            } => f
                .debug_struct("Change")
                .field("tlf", tlf)
                .field("revision", revision)
                .field("change", change)
                .finish(),
            Task::Unrefs { tlf, pointers } => f
                .debug_struct("Unrefs")
                .field("tlf", tlf)
                .field("pointers", &pointers.len())
                .finish(),
            Task::Backfill { tlf } => f.debug_struct("Backfill").field("tlf", tlf).finish(),
            Task::Call(_) => f.write_str("Call"),
            Task::Barrier(_) => f.write_str("Barrier"),
        }
    }
}

impl From<Admission> for Task {
    fn from(admission: Admission) -> Self {
        match admission {
            Admission::Change {
                tlf,
                revision,
                change,
            } => Task::Change {
                tlf,
                revision,
                change,
            },
            Admission::Backfill { tlf } => Task::Backfill { tlf },
        }
    }
}

/// State the worker shares with the handle.
#[derive(Debug, Default)]
pub(crate) struct WorkerShared {
    fatal: Mutex<Option<String>>,
    /// Set when shutdown gave up waiting; remaining tasks are dropped.
    aborted: AtomicBool,
    /// Tasks sent but not yet taken off the queue.
    pending: AtomicUsize,
    processed: AtomicU64,
    last_indexed_at: Mutex<Option<DateTime<Utc>>>,
}

impl WorkerShared {
    pub(crate) fn record_fatal(&self, err: &SearchError) {
        let mut fatal = self.fatal.lock();
        if fatal.is_none() {
            *fatal = Some(err.to_string());
        }
    }

    pub(crate) fn fatal(&self) -> Option<String> {
        self.fatal.lock().clone()
    }

    /// The recorded fatal failure as an error.
    pub(crate) fn fatal_error(&self) -> Option<SearchError> {
        self.fatal().map(SearchError::Storage)
    }

    pub(crate) fn abort(&self) {
        self.aborted.store(true, Ordering::Release);
    }

    pub(crate) fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    pub(crate) fn task_queued(&self) {
        self.pending.fetch_add(1, Ordering::AcqRel);
    }

    /// Undo [`WorkerShared::task_queued`] for a task that was never sent.
    pub(crate) fn task_rejected(&self) {
        self.pending.fetch_sub(1, Ordering::AcqRel);
    }

    pub(crate) fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    pub(crate) fn processed(&self) -> u64 {
        self.processed.load(Ordering::Acquire)
    }

    pub(crate) fn last_indexed_at(&self) -> Option<DateTime<Utc>> {
        *self.last_indexed_at.lock()
    }
}

/// Start the worker thread.
///
/// The returned receiver disconnects when the thread is about to exit,
/// which lets shutdown wait for it with a cancellation token.
pub(crate) fn spawn(
    name: &str,
    core: IndexCore,
    tasks: Receiver<Task>,
) -> Result<(thread::JoinHandle<()>, Receiver<()>)> {
    let (exit_tx, exit_rx) = bounded::<()>(0);
    let handle = thread::Builder::new()
        .name(format!("vfs-index-{name}"))
        .spawn(move || {
            let _exit = exit_tx;
            run(core, tasks);
        })?;
    Ok((handle, exit_rx))
}

fn run(mut core: IndexCore, tasks: Receiver<Task>) {
    let shared = core.shared.clone();
    debug!("indexing worker started");

    for task in tasks.iter() {
        shared.pending.fetch_sub(1, Ordering::AcqRel);

        if shared.is_aborted() {
            // Dropping a Call or Barrier disconnects its caller.
            continue;
        }
        if task.mutates() && shared.fatal().is_some() {
            debug!("dropping {task:?} after a fatal failure");
            continue;
        }

        let mutates = task.mutates();
        let succeeded = execute(&mut core, task);

        if mutates {
            shared.processed.fetch_add(1, Ordering::AcqRel);
            if succeeded {
                *shared.last_indexed_at.lock() = Some(Utc::now());
            }
        }
    }

    info!(
        "indexing worker stopped after {} tasks",
        shared.processed()
    );
}

/// Run one task. Returns whether it completed without error.
fn execute(core: &mut IndexCore, task: Task) -> bool {
    match task {
        Task::Change {
            tlf,
            revision,
            change,
        } => {
            match core.progress.indexed_revision(&tlf) {
                Ok(done) if revision <= done => {
                    debug!("{tlf} revision {revision} already indexed");
                    return true;
                }
                Ok(_) => {}
                Err(e) => {
                    core.note_failure("reading index progress", &e);
                    return false;
                }
            }

            let what = format!("indexing {tlf} revision {revision}");
            let result = core.apply_change(&change);
            if let Err(e) = &result {
                core.note_failure(&what, e);
                if e.is_fatal() {
                    return false;
                }
            }
            // A change that failed for good is not retried either.
            if let Err(e) = core.progress.record(&tlf, revision) {
                core.note_failure(&what, &e);
                return false;
            }
            result.is_ok()
        }
        Task::Unrefs { tlf, pointers } => {
            match core.delete_from_unrefs(&tlf, &pointers) {
                Ok(_) => true,
                Err(e) => {
                    core.note_failure(&format!("deleting unreferenced blocks of {tlf}"), &e);
                    false
                }
            }
        }
        Task::Backfill { tlf } => match core.backfill(&tlf) {
            Ok(_) => true,
            Err(e) => {
                core.note_failure(&format!("backfilling {tlf}"), &e);
                false
            }
        },
        Task::Call(call) => {
            call(core);
            true
        }
        Task::Barrier(done) => {
            let _ = done.send(());
            true
        }
    }
}
