//! Pausable, resumable stream-to-file downloads.
//!
//! A [`Download`] copies an input byte stream into a destination file on a
//! dedicated background thread. Starting it returns a [`DownloadCtrl`] that
//! can pause, resume or cancel the transfer at chunk boundaries. The terminal
//! outcome (success or [`Failure`]) is delivered once, through a
//! caller-supplied [`CallbackExecutor`].
//!
//! Restarting after an interruption is up to the caller: reissue the request
//! for the remaining range and start a new download with
//! [`Download::resume_breakpoint`] and the existing file length as offset
//! (see [`resume_offset_of`]).

mod checksum;
mod config;
mod ctrl;
mod dispatch;
mod download;
mod engine;
mod failure;
mod progress;
mod status;

pub use checksum::{calculate_file_checksum, checksum_bytes, resume_offset_of};
pub use config::DownloadConfig;
pub use ctrl::DownloadCtrl;
pub use dispatch::{
    CallbackExecutor, InlineExecutor, OnFailure, OnSuccess, Task, ThreadExecutor, TokioExecutor,
};
pub use download::Download;
pub use failure::Failure;
pub use progress::{ProgressCallback, ProgressTracker, SpeedCalculator};
pub use rivulet_protocol::{DownloadProgress, DownloadStatus};
pub use status::Transition;

/// Default chunk size: 8 KiB.
///
/// Each read from the input stream is at most this large, and status is
/// re-checked after every chunk, so it also bounds how much data is written
/// after a pause or cancel request.
pub const DEFAULT_CHUNK_SIZE: usize = 8192;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot open destination {}: {source}", .path.display())]
    Open {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to spawn download thread: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("download failed with no failure callback registered: {0}")]
    Unhandled(#[source] Failure),

    #[error("download thread panicked")]
    Panicked,

    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
}
