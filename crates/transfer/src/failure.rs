use std::path::{Path, PathBuf};

/// Snapshot of a download that stopped on an I/O error.
///
/// Taken by the engine at the moment of failure; the destination still
/// holds the first [`done_bytes`](Self::done_bytes) bytes and can be used as
/// a resume point.
#[derive(Debug, thiserror::Error)]
#[error("download to {} failed after {done_bytes} bytes: {error}", .path.display())]
pub struct Failure {
    path: PathBuf,
    done_bytes: u64,
    #[source]
    error: std::io::Error,
}

impl Failure {
    pub(crate) fn new(path: PathBuf, done_bytes: u64, error: std::io::Error) -> Self {
        Self {
            path,
            done_bytes,
            error,
        }
    }

    /// Destination file of the failed download.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes written to the destination before the failure.
    pub fn done_bytes(&self) -> u64 {
        self.done_bytes
    }

    /// The underlying I/O error.
    pub fn error(&self) -> &std::io::Error {
        &self.error
    }

    /// Consumes the snapshot, returning the underlying I/O error.
    pub fn into_error(self) -> std::io::Error {
        self.error
    }
}
