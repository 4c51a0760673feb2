use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Current state of a download.
///
/// `Canceled`, `Done` and `Error` are terminal: once reached, no further
/// transition takes place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DownloadStatus {
    #[serde(rename = "downloading")]
    Downloading,
    #[serde(rename = "paused")]
    Paused,
    #[serde(rename = "canceled")]
    Canceled,
    #[serde(rename = "done")]
    Done,
    #[serde(rename = "error")]
    Error,
}

impl DownloadStatus {
    /// Returns `true` for `Canceled`, `Done` and `Error`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Canceled | Self::Done | Self::Error)
    }

    /// Returns `true` while the download may still make progress.
    pub fn is_active(self) -> bool {
        !self.is_terminal()
    }

    /// Compact numeric encoding, stable across releases.
    pub fn as_u8(self) -> u8 {
        match self {
            Self::Downloading => 1,
            Self::Paused => 2,
            Self::Canceled => 3,
            Self::Done => 4,
            Self::Error => 5,
        }
    }

    /// Inverse of [`as_u8`](Self::as_u8).
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(Self::Downloading),
            2 => Some(Self::Paused),
            3 => Some(Self::Canceled),
            4 => Some(Self::Done),
            5 => Some(Self::Error),
            _ => None,
        }
    }
}

impl std::fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Downloading => "downloading",
            Self::Paused => "paused",
            Self::Canceled => "canceled",
            Self::Done => "done",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// Progress snapshot of a single download.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadProgress {
    pub download_id: String,
    pub status: DownloadStatus,
    /// Expected size of the finished file, 0 when unknown.
    #[serde(default, skip_serializing_if = "is_zero_u64")]
    pub total_bytes: u64,
    pub transferred_bytes: u64,
    pub path: PathBuf,
    #[serde(default, skip_serializing_if = "is_zero_f64")]
    pub bytes_per_second: f64,
}

fn is_zero_u64(v: &u64) -> bool {
    *v == 0
}

fn is_zero_f64(v: &f64) -> bool {
    *v == 0.0
}

impl DownloadProgress {
    /// Returns the download progress as a percentage (0-100).
    pub fn percentage(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        self.transferred_bytes as f64 / self.total_bytes as f64 * 100.0
    }

    /// Bytes still expected, 0 when the total is unknown or already reached.
    pub fn remaining_bytes(&self) -> u64 {
        self.total_bytes.saturating_sub(self.transferred_bytes)
    }
}
