use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::VoiceReference;

/// Failure of a single host capability.
///
/// `NotSupported` is an expected answer: host adapters implement only the
/// subset of capabilities their platform actually has, and the resolver
/// chain treats absence as a clean skip, not a dispatch failure.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("capability not supported by this host")]
    NotSupported,
    #[error("host capability failed: {0}")]
    Failed(String),
}

/// Port for the host platform's voice-message delivery capabilities.
///
/// The host may be able to hand over a managed local file, an inline
/// base64 payload, or a file-service download URL; none of the three is
/// guaranteed across deployments.
#[async_trait]
pub trait VoiceSource: Send + Sync {
    /// Ask the host to materialize the payload as a local file it manages.
    async fn fetch_path(&self, reference: &VoiceReference) -> Result<PathBuf, SourceError>;

    /// Ask the host for the payload as a base64-encoded string.
    async fn fetch_base64(&self, reference: &VoiceReference) -> Result<String, SourceError>;

    /// Ask the host to register the payload with its file service and
    /// return a download URL for it.
    async fn register_download_url(&self, reference: &VoiceReference)
        -> Result<String, SourceError>;
}
