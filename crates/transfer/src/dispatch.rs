//! Delivery of the terminal outcome through a caller-supplied executor.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, error, warn};

use crate::Failure;

/// Callback invoked with the destination path once a download is done.
pub type OnSuccess = Box<dyn FnOnce(PathBuf) + Send + 'static>;

/// Callback invoked with the failure snapshot when a download errors.
pub type OnFailure = Box<dyn FnOnce(Failure) + Send + 'static>;

/// A unit of callback work handed to an executor.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Execution context that runs outcome callbacks off the engine thread.
pub trait CallbackExecutor: Send + Sync {
    fn execute(&self, task: Task);
}

impl<F> CallbackExecutor for F
where
    F: Fn(Task) + Send + Sync,
{
    fn execute(&self, task: Task) {
        self(task)
    }
}

/// Runs callbacks directly on the engine thread.
///
/// The engine cannot exit until the callback returns, so joining the
/// download also waits for the callback.
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineExecutor;

impl CallbackExecutor for InlineExecutor {
    fn execute(&self, task: Task) {
        task()
    }
}

/// Runs each callback on a fresh thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadExecutor;

impl CallbackExecutor for ThreadExecutor {
    fn execute(&self, task: Task) {
        // The task is moved into the closure, so a spawn failure loses it;
        // hand it over through a slot we can take back.
        let slot = Arc::new(Mutex::new(Some(task)));
        let remote = Arc::clone(&slot);
        let spawned = std::thread::Builder::new()
            .name("rivulet-callback".into())
            .spawn(move || {
                let task = remote
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .take();
                if let Some(task) = task {
                    task();
                }
            });
        if let Err(e) = spawned {
            warn!("failed to spawn callback thread, running inline: {e}");
            let task = slot
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            if let Some(task) = task {
                task();
            }
        }
    }
}

/// Runs callbacks on a tokio runtime's blocking pool.
///
/// A task the runtime rejects because it is shutting down runs on the
/// submitting thread instead.
#[derive(Debug, Clone)]
pub struct TokioExecutor {
    handle: tokio::runtime::Handle,
}

impl TokioExecutor {
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }

    /// Binds to the runtime the caller is running in, if any.
    pub fn current() -> Option<Self> {
        tokio::runtime::Handle::try_current().ok().map(Self::new)
    }
}

impl CallbackExecutor for TokioExecutor {
    fn execute(&self, task: Task) {
        let pending = Pending(Some(task));
        drop(self.handle.spawn_blocking(move || pending.run()));
    }
}

/// A task that runs when dropped if nothing ran it first.
struct Pending(Option<Task>);

impl Pending {
    fn run(mut self) {
        if let Some(task) = self.0.take() {
            task();
        }
    }
}

impl Drop for Pending {
    fn drop(&mut self) {
        if let Some(task) = self.0.take() {
            warn!("tokio runtime rejected callback, running it inline");
            task();
        }
    }
}

/// Holds the outcome callbacks of one download.
///
/// Every delivery method consumes the dispatcher, so a download can deliver
/// at most one outcome.
pub(crate) struct Dispatcher {
    id: String,
    executor: Arc<dyn CallbackExecutor>,
    on_success: Option<OnSuccess>,
    on_failure: Option<OnFailure>,
}

impl Dispatcher {
    pub(crate) fn new(
        id: String,
        executor: Arc<dyn CallbackExecutor>,
        on_success: Option<OnSuccess>,
        on_failure: Option<OnFailure>,
    ) -> Self {
        Self {
            id,
            executor,
            on_success,
            on_failure,
        }
    }

    /// Submits the success callback, or drops the outcome if none is set.
    pub(crate) fn success(self, path: PathBuf) {
        match self.on_success {
            Some(cb) => self.executor.execute(Box::new(move || cb(path))),
            None => debug!(id = %self.id, "no success callback registered"),
        }
    }

    /// Submits the failure callback.
    ///
    /// Without a failure callback the failure is logged and handed back so
    /// the engine can escalate it.
    pub(crate) fn failure(self, failure: Failure) -> Result<(), Failure> {
        match self.on_failure {
            Some(cb) => {
                self.executor.execute(Box::new(move || cb(failure)));
                Ok(())
            }
            None => {
                error!(id = %self.id, "unhandled download failure: {failure}");
                Err(failure)
            }
        }
    }
}
