use std::fs::OpenOptions;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

use crate::ctrl::{DownloadCtrl, SharedState};
use crate::dispatch::{CallbackExecutor, Dispatcher, OnFailure, OnSuccess};
use crate::engine::Engine;
use crate::{DEFAULT_CHUNK_SIZE, DownloadConfig, Failure, TransferError};

/// A download that has not been started yet.
///
/// ```no_run
/// # use std::sync::Arc;
/// # use rivulet_transfer::{Download, ThreadExecutor};
/// let body = std::io::Cursor::new(b"HELLO WORLD".to_vec());
/// let ctrl = Download::new("/tmp/hello.txt", body, Arc::new(ThreadExecutor), 0)
///     .chunk_size(4)
///     .on_success(|path| println!("saved {}", path.display()))
///     .on_failure(|failure| eprintln!("{failure}"))
///     .start()?;
/// ctrl.pause();
/// ctrl.resume();
/// # Ok::<(), rivulet_transfer::TransferError>(())
/// ```
pub struct Download {
    path: PathBuf,
    input: Box<dyn Read + Send>,
    executor: Arc<dyn CallbackExecutor>,
    chunk_size: usize,
    seek_bytes: u64,
    resume_breakpoint: bool,
    total_bytes: u64,
    on_success: Option<OnSuccess>,
    on_failure: Option<OnFailure>,
}

impl Download {
    /// Prepares a download of `input` into `path`.
    ///
    /// `skip_bytes` is the resume offset; it only takes effect once
    /// [`resume_breakpoint`](Self::resume_breakpoint) is enabled. Callbacks
    /// run on `executor`.
    pub fn new(
        path: impl Into<PathBuf>,
        input: impl Read + Send + 'static,
        executor: Arc<dyn CallbackExecutor>,
        skip_bytes: u64,
    ) -> Self {
        Self {
            path: path.into(),
            input: Box::new(input),
            executor,
            chunk_size: DEFAULT_CHUNK_SIZE,
            seek_bytes: skip_bytes,
            resume_breakpoint: false,
            total_bytes: 0,
            on_success: None,
            on_failure: None,
        }
    }

    /// Sets the read/write unit. Zero is ignored.
    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        if chunk_size > 0 {
            self.chunk_size = chunk_size;
        } else {
            warn!(path = %self.path.display(), "ignoring chunk size 0");
        }
        self
    }

    /// Enables breakpoint resume: the destination is opened at the resume
    /// offset (clamped to its current length) instead of at 0.
    pub fn resume_breakpoint(mut self) -> Self {
        self.resume_breakpoint = true;
        self
    }

    /// Overrides the resume offset.
    pub fn file_pointer(mut self, seek_bytes: u64) -> Self {
        self.seek_bytes = seek_bytes;
        self
    }

    /// Declares the expected final size, reported in progress snapshots.
    pub fn total_bytes(mut self, total_bytes: u64) -> Self {
        self.total_bytes = total_bytes;
        self
    }

    /// Registers the success callback.
    pub fn on_success(mut self, f: impl FnOnce(PathBuf) + Send + 'static) -> Self {
        self.on_success = Some(Box::new(f));
        self
    }

    /// Registers the failure callback.
    ///
    /// Without one, a failed download panics its engine thread and is
    /// returned by [`DownloadCtrl::join`].
    pub fn on_failure(mut self, f: impl FnOnce(Failure) + Send + 'static) -> Self {
        self.on_failure = Some(Box::new(f));
        self
    }

    /// Applies a [`DownloadConfig`] on top of the current settings.
    pub fn with_config(mut self, config: &DownloadConfig) -> Self {
        self = self.chunk_size(config.chunk_size);
        if config.resume_from_offset {
            self = self.resume_breakpoint();
        }
        if let Some(seek_bytes) = config.file_pointer {
            self = self.file_pointer(seek_bytes);
        }
        if config.total_bytes > 0 {
            self = self.total_bytes(config.total_bytes);
        }
        self
    }

    /// Opens the destination and starts copying on a dedicated thread.
    ///
    /// Fails without starting anything if the destination cannot be opened
    /// for reading and writing; the input stream is dropped in that case.
    pub fn start(self) -> Result<DownloadCtrl, TransferError> {
        let Download {
            path,
            input,
            executor,
            chunk_size,
            seek_bytes,
            resume_breakpoint,
            total_bytes,
            on_success,
            on_failure,
        } = self;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|source| TransferError::Open {
                path: path.clone(),
                source,
            })?;

        let id = uuid::Uuid::new_v4().to_string();
        let state = Arc::new(SharedState::new(id.clone(), path.clone(), total_bytes));
        let resume_offset = (resume_breakpoint && seek_bytes > 0).then_some(seek_bytes);

        let engine = Engine {
            state: Arc::clone(&state),
            file,
            input,
            chunk_size,
            resume_offset,
            dispatcher: Dispatcher::new(id.clone(), executor, on_success, on_failure),
        };

        let handle = std::thread::Builder::new()
            .name(format!("rivulet-dl-{}", &id[..8]))
            .spawn(move || engine.run())
            .map_err(TransferError::Spawn)?;

        info!(
            id = %id,
            path = %path.display(),
            chunk_size,
            ?resume_offset,
            "download started"
        );
        Ok(DownloadCtrl::new(state, handle))
    }
}

impl std::fmt::Debug for Download {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Download")
            .field("path", &self.path)
            .field("chunk_size", &self.chunk_size)
            .field("seek_bytes", &self.seek_bytes)
            .field("resume_breakpoint", &self.resume_breakpoint)
            .field("total_bytes", &self.total_bytes)
            .finish_non_exhaustive()
    }
}
