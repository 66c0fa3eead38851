use std::path::Path;

use async_trait::async_trait;

use crate::domain::VoxError;

/// HTTP client port for remote voice payload retrieval.
/// All network traffic in the pipeline goes through this interface.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Download `url` into `path`, enforcing `max_bytes` while streaming.
    /// Returns the number of bytes written. Partial files are removed on
    /// every error path.
    async fn download_file(&self, url: &str, path: &Path, max_bytes: u64)
        -> Result<u64, VoxError>;
}
