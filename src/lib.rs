//! Voice-message acquisition and normalization pipeline.
//!
//! Host platforms deliver voice messages as opaque references: a path claim,
//! a URL, an inline payload, or a bare filename. This crate resolves such a
//! reference to a local file, detects its container from content, converts
//! it to a speech-to-text friendly format when needed, and hands the
//! normalized file to a transcription backend, deleting every scratch
//! artifact it created along the way.
//!
//! The architecture is hexagonal: `domain` holds pure types and policies,
//! `ports` the capability traits, `adapters` the concrete backends, and
//! `app` the orchestration.

#![forbid(unsafe_code)]

pub mod adapters;
pub mod app;
pub mod domain;
pub mod infrastructure;
pub mod ports;

pub use app::{ArtifactStore, ConversionChain, IngestionPipeline, VoiceFileResolver};
pub use domain::{
    AppConfig, AudioFormat, ResolvedAudio, Transcript, VoiceReference, VoxError,
};
pub use ports::{TranscribeError, Transcriber, VoiceSource};
