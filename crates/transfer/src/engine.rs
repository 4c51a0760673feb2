//! The background copy loop.

use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::sync::Arc;

use rivulet_protocol::DownloadStatus;
use tracing::{debug, info, warn};

use crate::ctrl::SharedState;
use crate::dispatch::Dispatcher;
use crate::status::Transition;
use crate::Failure;

/// File and input stream of one download.
///
/// Owned by the engine thread and dropped before the outcome is delivered,
/// whichever way the copy loop ends.
struct Streams {
    file: File,
    input: Box<dyn Read + Send>,
}

/// Everything the engine thread needs; built by [`Download::start`](crate::Download::start).
pub(crate) struct Engine {
    pub(crate) state: Arc<SharedState>,
    pub(crate) file: File,
    pub(crate) input: Box<dyn Read + Send>,
    pub(crate) chunk_size: usize,
    /// Offset to seek to before copying; `None` when resume is disabled.
    pub(crate) resume_offset: Option<u64>,
    pub(crate) dispatcher: Dispatcher,
}

impl Engine {
    /// Runs the download to completion on the current thread.
    ///
    /// A failure that no callback handles panics the thread once the file
    /// and input have been released.
    pub(crate) fn run(self) {
        let Engine {
            state,
            file,
            input,
            chunk_size,
            resume_offset,
            dispatcher,
        } = self;

        let mut streams = Streams { file, input };
        let outcome = streams.copy(&state, chunk_size, resume_offset);
        let error = match outcome {
            Ok(()) => None,
            Err(e) => {
                state.transition(Transition::Fail);
                Some(e)
            }
        };
        drop(streams);

        let path = state.path().to_path_buf();
        let done_bytes = state.done_bytes();
        match (state.status(), error) {
            (DownloadStatus::Canceled, error) => {
                if let Some(e) = error {
                    debug!(id = %state.id(), "I/O error after cancel ignored: {e}");
                }
                match std::fs::remove_file(&path) {
                    Ok(()) => {}
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => warn!(
                        id = %state.id(),
                        path = %path.display(),
                        "failed to delete canceled download: {e}"
                    ),
                }
                info!(id = %state.id(), done_bytes, "download canceled");
            }
            (_, Some(error)) => {
                warn!(id = %state.id(), done_bytes, "download failed: {error}");
                if let Err(failure) = dispatcher.failure(Failure::new(path, done_bytes, error)) {
                    state.escalate(failure);
                }
            }
            (DownloadStatus::Done, None) => {
                info!(id = %state.id(), done_bytes, "download finished");
                dispatcher.success(path);
            }
            (status, None) => {
                // The copy loop only returns cleanly on a terminal status.
                warn!(id = %state.id(), %status, "engine stopped in a non-terminal status");
            }
        }
    }
}

impl Streams {
    /// Copies the input into the file chunk by chunk until the status
    /// leaves `Downloading`/`Paused` for good.
    fn copy(
        &mut self,
        state: &SharedState,
        chunk_size: usize,
        resume_offset: Option<u64>,
    ) -> std::io::Result<()> {
        if let Some(offset) = resume_offset {
            let length = self.file.metadata()?.len();
            // Never seek past what is already on disk.
            let start = offset.min(length);
            self.file.seek(SeekFrom::Start(start))?;
            state.set_done_bytes(start);
            debug!(id = %state.id(), offset, length, start, "resuming download");
        }

        let mut buf = vec![0u8; chunk_size];
        loop {
            if state.wait_while_paused() != DownloadStatus::Downloading {
                return Ok(());
            }

            let n = match self.input.read(&mut buf) {
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };

            if n == 0 {
                if state.status() != DownloadStatus::Downloading {
                    continue;
                }
                // Drop stale bytes from an earlier, longer file.
                self.file.set_len(state.done_bytes())?;
                self.file.flush()?;
                state.transition(Transition::Finish);
                continue;
            }

            self.file.write_all(&buf[..n])?;
            state.add_done_bytes(n as u64);
        }
    }
}
