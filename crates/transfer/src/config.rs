use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{DEFAULT_CHUNK_SIZE, TransferError};

/// Tunables for a [`Download`](crate::Download), loadable from JSON.
///
/// Every field is optional in the serialized form:
///
/// ```json
/// { "chunkSize": 4096, "resumeFromOffset": true, "filePointer": 1024 }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DownloadConfig {
    /// Size of each read/write unit in bytes. 0 means the default.
    pub chunk_size: usize,
    /// Enables seeking to the resume offset before writing.
    pub resume_from_offset: bool,
    /// Overrides the resume offset given at construction.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_pointer: Option<u64>,
    /// Expected size of the finished file, 0 when unknown.
    #[serde(skip_serializing_if = "is_zero")]
    pub total_bytes: u64,
}

fn is_zero(v: &u64) -> bool {
    *v == 0
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            resume_from_offset: false,
            file_pointer: None,
            total_bytes: 0,
        }
    }
}

impl DownloadConfig {
    /// Parses a JSON config, normalizing out-of-range values.
    pub fn from_json(json: &str) -> Result<Self, TransferError> {
        let config: Self = serde_json::from_str(json)?;
        Ok(config.normalized())
    }

    /// Replaces a zero chunk size with [`DEFAULT_CHUNK_SIZE`].
    pub fn normalized(mut self) -> Self {
        if self.chunk_size == 0 {
            warn!(
                default = DEFAULT_CHUNK_SIZE,
                "chunk size 0 is not allowed, using default"
            );
            self.chunk_size = DEFAULT_CHUNK_SIZE;
        }
        self
    }
}
