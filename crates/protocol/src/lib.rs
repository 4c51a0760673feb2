pub mod types;

pub use types::{DownloadProgress, DownloadStatus};
