use thiserror::Error;

use crate::domain::format::AudioFormat;

/// Domain-level errors for VoxPipe.
///
/// Lower-level strategy failures are absorbed and logged by the components
/// that attempt them; only these typed, component-level failures propagate
/// to the pipeline caller.
#[derive(Error, Debug)]
pub enum VoxError {
    #[error("could not obtain a local file for the voice reference")]
    ResolutionFailed,

    #[error("unsupported audio format: {0}")]
    UnsupportedFormat(AudioFormat),

    #[error("audio conversion failed for {format} input")]
    ConversionFailed { format: AudioFormat },

    #[error("transcription failed: {0}")]
    TranscriptionFailed(String),

    #[error("audio exceeds the configured size limit ({size_bytes} > {limit_bytes} bytes)")]
    SizeLimitExceeded { size_bytes: u64, limit_bytes: u64 },

    #[error("{0} timed out")]
    Timeout(&'static str),

    #[error("invalid audio file: {0}")]
    InvalidAudio(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("HTTP request failed: {0}")]
    HttpRequest(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(String),
}

impl From<std::io::Error> for VoxError {
    fn from(err: std::io::Error) -> Self {
        VoxError::Io(err.to_string())
    }
}

impl From<toml::de::Error> for VoxError {
    fn from(err: toml::de::Error) -> Self {
        VoxError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for VoxError {
    fn from(err: toml::ser::Error) -> Self {
        VoxError::Serialization(err.to_string())
    }
}
