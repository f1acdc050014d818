//! Cancellation tokens for blocking calls.
//!
//! A token is cancelled explicitly with [`CancelToken::cancel`] or implicitly
//! when its deadline passes. Blocking calls wait with [`CancelToken::wait_on`],
//! which selects over the completion channel, the cancellation signal and the
//! deadline timer, so cancelling wakes every waiter at once.
//! [`CancelToken::send_on`] does the same for handing work to a full queue.
//!
//! # Examples
//!
//! ```
//! use std::time::Duration;
//!
//! use crossbeam_channel::bounded;
//! use vfs_search::index::CancelToken;
//!
//! let token = CancelToken::with_timeout(Duration::from_millis(10));
//! let (_done_tx, done_rx) = bounded::<()>(1);
//! let err = token.wait_on(&done_rx).unwrap_err();
//! assert!(err.is_cancelled());
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded, select};
use parking_lot::Mutex;

use crate::error::{Result, SearchError};

#[derive(Debug)]
struct CancelInner {
    cancelled: AtomicBool,
    /// Dropped on cancel, which disconnects `signal` for every waiter.
    trigger: Mutex<Option<Sender<()>>>,
    signal: Receiver<()>,
    deadline: Option<Instant>,
}

#[derive(Debug, Clone)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    /// A token without a deadline.
    pub fn new() -> Self {
        Self::build(None)
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self::build(Some(deadline))
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::build(Instant::now().checked_add(timeout))
    }

    fn build(deadline: Option<Instant>) -> Self {
        let (trigger, signal) = bounded(0);
        CancelToken {
            inner: Arc::new(CancelInner {
                cancelled: AtomicBool::new(false),
                trigger: Mutex::new(Some(trigger)),
                signal,
                deadline,
            }),
        }
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::Release);
        self.inner.trigger.lock().take();
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
            || self
                .inner
                .deadline
                .is_some_and(|deadline| Instant::now() >= deadline)
    }

    /// `Err(Cancelled)` once the token fired.
    pub fn check(&self) -> Result<()> {
        if self.inner.cancelled.load(Ordering::Acquire) {
            Err(SearchError::cancelled("operation cancelled"))
        } else if self.is_cancelled() {
            Err(SearchError::cancelled("deadline exceeded"))
        } else {
            Ok(())
        }
    }

    /// Block until `done` yields a message or the token fires.
    ///
    /// A disconnected `done` means the other side went away without
    /// finishing, reported as `Closed`. Completion wins over cancellation
    /// when both are ready.
    pub fn wait_on<T>(&self, done: &Receiver<T>) -> Result<T> {
        if let Ok(value) = done.try_recv() {
            return Ok(value);
        }
        self.check()?;

        let deadline = match self.inner.deadline {
            Some(deadline) => crossbeam_channel::at(deadline),
            None => crossbeam_channel::never(),
        };

        select! {
            recv(done) -> msg => msg.map_err(|_| SearchError::Closed),
            recv(self.inner.signal) -> _ => match done.try_recv() {
                Ok(value) => Ok(value),
                Err(_) => Err(SearchError::cancelled("operation cancelled")),
            },
            recv(deadline) -> _ => match done.try_recv() {
                Ok(value) => Ok(value),
                Err(_) => Err(SearchError::cancelled("deadline exceeded")),
            },
        }
    }

    /// Send `value` on a bounded channel, waiting for room until the token
    /// fires. A disconnected channel is reported as `Closed`.
    pub fn send_on<T>(&self, sender: &Sender<T>, value: T) -> Result<()> {
        let value = match sender.try_send(value) {
            Ok(()) => return Ok(()),
            Err(TrySendError::Disconnected(_)) => return Err(SearchError::Closed),
            Err(TrySendError::Full(value)) => value,
        };
        self.check()?;

        let deadline = match self.inner.deadline {
            Some(deadline) => crossbeam_channel::at(deadline),
            None => crossbeam_channel::never(),
        };

        select! {
            send(sender, value) -> res => res.map_err(|_| SearchError::Closed),
            recv(self.inner.signal) -> _ => Err(SearchError::cancelled("operation cancelled")),
            recv(deadline) -> _ => Err(SearchError::cancelled("deadline exceeded")),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    #[test]
    fn test_completion() {
        let token = CancelToken::new();
        let (tx, rx) = bounded(1);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            let _ = tx.send(7);
        });
        assert_eq!(token.wait_on(&rx).unwrap(), 7);
    }

    #[test]
    fn test_cancel_wakes_waiter() {
        let token = CancelToken::new();
        let (_tx, rx) = bounded::<()>(1);

        let canceller = token.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            canceller.cancel();
        });

        let err = token.wait_on(&rx).unwrap_err();
        assert!(err.is_cancelled());
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_deadline() {
        let token = CancelToken::with_timeout(Duration::from_millis(20));
        let (_tx, rx) = bounded::<()>(1);
        let start = Instant::now();
        assert!(token.wait_on(&rx).unwrap_err().is_cancelled());
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_ready_result_beats_cancellation() {
        let token = CancelToken::new();
        token.cancel();
        let (tx, rx) = bounded(1);
        tx.send(1).unwrap();
        assert_eq!(token.wait_on(&rx).unwrap(), 1);
    }

    #[test]
    fn test_send_on_full_channel_honours_deadline() {
        let token = CancelToken::with_timeout(Duration::from_millis(20));
        let (tx, rx) = bounded(1);
        token.send_on(&tx, 1).unwrap();

        let start = Instant::now();
        assert!(token.send_on(&tx, 2).unwrap_err().is_cancelled());
        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(rx.try_recv().unwrap(), 1);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_send_on_waits_for_room() {
        let token = CancelToken::new();
        let (tx, rx) = bounded(1);
        tx.send(1).unwrap();
        let reader = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            (rx.recv().unwrap(), rx.recv().unwrap())
        });
        token.send_on(&tx, 2).unwrap();
        assert_eq!(reader.join().unwrap(), (1, 2));

        drop(tx);
        let (tx, rx) = bounded::<()>(1);
        drop(rx);
        assert!(token.send_on(&tx, ()).unwrap_err().is_closed());
    }

    #[test]
    fn test_disconnected_is_closed() {
        let token = CancelToken::new();
        let (tx, rx) = bounded::<()>(1);
        drop(tx);
        assert!(token.wait_on(&rx).unwrap_err().is_closed());
    }
}
