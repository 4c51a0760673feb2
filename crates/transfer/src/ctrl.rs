//! Control handle and the state it shares with the engine.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use rivulet_protocol::{DownloadProgress, DownloadStatus};
use tracing::debug;

use crate::status::Transition;
use crate::{Failure, TransferError};

/// State shared between a [`DownloadCtrl`] and its engine thread.
///
/// `status` is the single guard for every transition; `status_mirror` is
/// only written while that guard is held and lets readers skip the lock.
pub(crate) struct SharedState {
    id: String,
    path: PathBuf,
    total_bytes: u64,
    status: Mutex<DownloadStatus>,
    status_mirror: AtomicU8,
    changed: Condvar,
    done_bytes: AtomicU64,
    unhandled: Mutex<Option<Failure>>,
}

impl SharedState {
    pub(crate) fn new(id: String, path: PathBuf, total_bytes: u64) -> Self {
        let initial = DownloadStatus::Downloading;
        Self {
            id,
            path,
            total_bytes,
            status: Mutex::new(initial),
            status_mirror: AtomicU8::new(initial.as_u8()),
            changed: Condvar::new(),
            done_bytes: AtomicU64::new(0),
            unhandled: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, DownloadStatus> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn id(&self) -> &str {
        &self.id
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn status(&self) -> DownloadStatus {
        let raw = self.status_mirror.load(Ordering::Acquire);
        DownloadStatus::from_u8(raw).unwrap_or(DownloadStatus::Error)
    }

    /// Applies `transition` if the current status allows it.
    ///
    /// Returns `true` when the status changed. Waiters are woken on every
    /// effective change.
    pub(crate) fn transition(&self, transition: Transition) -> bool {
        let mut status = self.lock();
        let current = *status;
        let Some(next) = transition.apply(current) else {
            debug!(id = %self.id, status = %current, ?transition, "transition ignored");
            return false;
        };
        debug!(id = %self.id, from = %current, to = %next, "status changed");
        *status = next;
        self.status_mirror.store(next.as_u8(), Ordering::Release);
        self.changed.notify_all();
        true
    }

    /// Blocks while the download is paused and returns the status that ended
    /// the wait.
    pub(crate) fn wait_while_paused(&self) -> DownloadStatus {
        let guard = self.lock();
        let guard = self
            .changed
            .wait_while(guard, |s| *s == DownloadStatus::Paused)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }

    /// Blocks until a terminal status is reached.
    pub(crate) fn wait_terminal(&self) -> DownloadStatus {
        let guard = self.lock();
        let guard = self
            .changed
            .wait_while(guard, |s| s.is_active())
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }

    /// Blocks until a terminal status is reached or `timeout` elapses.
    pub(crate) fn wait_terminal_timeout(&self, timeout: Duration) -> Option<DownloadStatus> {
        let guard = self.lock();
        let (guard, result) = self
            .changed
            .wait_timeout_while(guard, timeout, |s| s.is_active())
            .unwrap_or_else(PoisonError::into_inner);
        (!result.timed_out()).then_some(*guard)
    }

    pub(crate) fn done_bytes(&self) -> u64 {
        self.done_bytes.load(Ordering::Acquire)
    }

    pub(crate) fn set_done_bytes(&self, bytes: u64) {
        self.done_bytes.store(bytes, Ordering::Release);
        self.notify_bytes();
    }

    pub(crate) fn add_done_bytes(&self, bytes: u64) -> u64 {
        let total = self.done_bytes.fetch_add(bytes, Ordering::AcqRel) + bytes;
        self.notify_bytes();
        total
    }

    fn notify_bytes(&self) {
        // Taking the lock orders this wakeup after a waiter's check.
        drop(self.lock());
        self.changed.notify_all();
    }

    /// Blocks until `done_bytes` reaches `bytes`, the status is terminal, or
    /// `timeout` elapses, and returns the byte count.
    pub(crate) fn wait_for_bytes(&self, bytes: u64, timeout: Duration) -> u64 {
        let guard = self.lock();
        let _guard = self
            .changed
            .wait_timeout_while(guard, timeout, |s| {
                s.is_active() && self.done_bytes() < bytes
            })
            .unwrap_or_else(PoisonError::into_inner);
        self.done_bytes()
    }

    /// Records a failure no callback handled and panics the engine thread
    /// with it. [`DownloadCtrl::join`] hands the failure back to the caller.
    pub(crate) fn escalate(&self, failure: Failure) -> ! {
        let message = format!("unhandled download failure: {failure}");
        *self.unhandled.lock().unwrap_or_else(PoisonError::into_inner) = Some(failure);
        panic!("{message}");
    }

    pub(crate) fn take_unhandled(&self) -> Option<Failure> {
        self.unhandled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

type EngineHandle = JoinHandle<()>;

/// Handle to a running download.
///
/// Cheap to clone; every clone controls the same download. Pause, resume and
/// cancel are observed by the engine at the next chunk boundary: a request
/// issued while the engine is blocked reading the input stream takes effect
/// once that read returns.
#[derive(Clone)]
pub struct DownloadCtrl {
    state: Arc<SharedState>,
    engine: Arc<Mutex<Option<EngineHandle>>>,
}

impl DownloadCtrl {
    pub(crate) fn new(state: Arc<SharedState>, engine: EngineHandle) -> Self {
        Self {
            state,
            engine: Arc::new(Mutex::new(Some(engine))),
        }
    }

    /// Unique id of this download.
    pub fn id(&self) -> &str {
        self.state.id()
    }

    /// Destination file.
    pub fn path(&self) -> &Path {
        self.state.path()
    }

    /// Current status. Never blocks.
    pub fn status(&self) -> DownloadStatus {
        self.state.status()
    }

    /// Bytes written to the destination so far, including a resume offset.
    pub fn done_bytes(&self) -> u64 {
        self.state.done_bytes()
    }

    /// Pauses a downloading transfer. Returns `false` if it was not
    /// downloading.
    pub fn pause(&self) -> bool {
        self.state.transition(Transition::Pause)
    }

    /// Resumes a paused transfer. Returns `false` if it was not paused.
    pub fn resume(&self) -> bool {
        self.state.transition(Transition::Resume)
    }

    /// Cancels the transfer; the destination file is deleted once the engine
    /// has released it. Returns `false` if the transfer had already ended.
    pub fn cancel(&self) -> bool {
        self.state.transition(Transition::Cancel)
    }

    /// Returns `true` once the status is terminal.
    pub fn is_finished(&self) -> bool {
        self.status().is_terminal()
    }

    /// Snapshot of the current progress.
    pub fn progress(&self) -> DownloadProgress {
        DownloadProgress {
            download_id: self.state.id().to_string(),
            status: self.status(),
            total_bytes: self.state.total_bytes,
            transferred_bytes: self.done_bytes(),
            path: self.state.path().to_path_buf(),
            bytes_per_second: 0.0,
        }
    }

    /// Blocks until the status is terminal and returns it.
    ///
    /// The engine may still be releasing resources when this returns; use
    /// [`join`](Self::join) to wait for the thread itself.
    pub fn wait_terminal(&self) -> DownloadStatus {
        self.state.wait_terminal()
    }

    /// Like [`wait_terminal`](Self::wait_terminal) but gives up after
    /// `timeout`, returning `None`.
    pub fn wait_terminal_timeout(&self, timeout: Duration) -> Option<DownloadStatus> {
        self.state.wait_terminal_timeout(timeout)
    }

    /// Waits for the engine thread to exit and returns the terminal status.
    ///
    /// A failure with no failure callback registered panics the engine
    /// thread; it is returned here as [`TransferError::Unhandled`]. Only the
    /// first caller joins the thread; later callers get the terminal status.
    pub fn join(&self) -> Result<DownloadStatus, TransferError> {
        let handle = self
            .engine
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match handle {
            Some(handle) => match handle.join() {
                Ok(()) => Ok(self.status()),
                Err(_) => Err(match self.state.take_unhandled() {
                    Some(failure) => TransferError::Unhandled(failure),
                    None => TransferError::Panicked,
                }),
            },
            None => Ok(self.wait_terminal()),
        }
    }

    /// Blocks until `done_bytes` reaches `bytes`, the download ends, or
    /// `timeout` elapses. Returns the byte count observed last.
    pub fn wait_for_bytes(&self, bytes: u64, timeout: Duration) -> u64 {
        self.state.wait_for_bytes(bytes, timeout)
    }
}

impl std::fmt::Debug for DownloadCtrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadCtrl")
            .field("id", &self.state.id())
            .field("path", &self.state.path())
            .field("status", &self.status())
            .field("done_bytes", &self.done_bytes())
            .finish()
    }
}
