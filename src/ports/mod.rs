pub mod config;
pub mod converter;
pub mod http;
pub mod transcriber;
pub mod voice_source;

pub use config::ConfigStore;
pub use converter::{ConversionStrategy, StrategyError};
pub use http::HttpClient;
pub use transcriber::{TranscribeError, Transcriber};
pub use voice_source::{SourceError, VoiceSource};
