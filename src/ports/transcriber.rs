use std::path::Path;

use async_trait::async_trait;
use thiserror::Error;

/// Transcription failure, classified for retry purposes.
///
/// Provider-specific errors are opaque to the pipeline; adapters map them
/// into transient (transport hiccups, rate limits) or permanent (bad audio,
/// rejected request) before they reach the generic retry policy.
#[derive(Debug, Error)]
pub enum TranscribeError {
    #[error("transient transcription failure: {0}")]
    Transient(String),
    #[error("transcription failed: {0}")]
    Permanent(String),
}

impl TranscribeError {
    pub fn is_transient(&self) -> bool {
        matches!(self, TranscribeError::Transient(_))
    }
}

/// Port for the speech-to-text capability, local or remote.
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe a normalized local audio file to text.
    async fn transcribe(&self, audio_path: &Path) -> Result<String, TranscribeError>;
}
