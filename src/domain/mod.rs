pub mod audio;
pub mod config;
pub mod error;
pub mod format;
pub mod retry;

pub use audio::{ConversionOutcome, ResolvedAudio, Transcript, VoiceReference};
pub use config::{AppConfig, AudioConfig, LoggingConfig, ResolverConfig, TranscoderConfig};
pub use error::VoxError;
pub use format::AudioFormat;
pub use retry::RetryPolicy;
