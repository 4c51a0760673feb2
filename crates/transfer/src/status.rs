//! Download status machine.

use rivulet_protocol::DownloadStatus;

/// A requested status change.
///
/// `Pause`, `Resume` and `Cancel` come from the control handle; `Finish` and
/// `Fail` are issued by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Pause,
    Resume,
    Cancel,
    Finish,
    Fail,
}

impl Transition {
    /// Returns the status reached by applying `self` to `from`, or `None`
    /// when the edge does not exist.
    ///
    /// ```text
    /// Downloading --Pause-->  Paused
    /// Paused      --Resume--> Downloading
    /// Downloading | Paused --Cancel--> Canceled
    /// Downloading --Finish--> Done
    /// Downloading | Paused --Fail-->   Error
    /// ```
    pub fn apply(self, from: DownloadStatus) -> Option<DownloadStatus> {
        use DownloadStatus::*;

        match (self, from) {
            (Self::Pause, Downloading) => Some(Paused),
            (Self::Resume, Paused) => Some(Downloading),
            (Self::Cancel, Downloading | Paused) => Some(Canceled),
            (Self::Finish, Downloading) => Some(Done),
            (Self::Fail, Downloading | Paused) => Some(Error),
            _ => None,
        }
    }
}
