use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::retry::RetryPolicy;

/// Audio processing limits and pipeline retry behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Reject resolved audio larger than this, before any conversion work.
    pub max_audio_size_mb: u64,
    /// Reject resolved files smaller than this; too short to hold a header.
    pub min_file_size_bytes: u64,
    /// When false, incompatible formats fail instead of being converted.
    pub conversion_enabled: bool,
    /// Extra transcription attempts for transient transport errors.
    pub retry_count: u32,
    /// Backoff base delay between transcription retries.
    pub retry_delay_ms: u64,
    /// Wall-clock bound on a single transcription call.
    pub processing_timeout_secs: u64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            max_audio_size_mb: 25,
            min_file_size_bytes: 100,
            conversion_enabled: true,
            retry_count: 2,
            retry_delay_ms: 1000,
            processing_timeout_secs: 60,
        }
    }
}

impl AudioConfig {
    pub fn max_size_bytes(&self) -> u64 {
        self.max_audio_size_mb * 1024 * 1024
    }

    pub fn transcription_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry_count + 1,
            Duration::from_millis(self.retry_delay_ms),
        )
    }

    pub fn processing_timeout(&self) -> Duration {
        Duration::from_secs(self.processing_timeout_secs)
    }
}

/// Acquisition-side limits for remote payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Bound on a single payload download.
    pub download_timeout_secs: u64,
    /// Size cap enforced while streaming the download.
    pub max_download_bytes: u64,
    /// Allow plain-HTTP payload URLs. HTTPS is required by default.
    pub allow_insecure_http: bool,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            download_timeout_secs: 30,
            max_download_bytes: 64 * 1024 * 1024,
            allow_insecure_http: false,
        }
    }
}

impl ResolverConfig {
    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }
}

/// External transcoder (ffmpeg) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscoderConfig {
    /// Explicit executable path; checked before any probing.
    pub executable_path: Option<PathBuf>,
    /// Wall-clock bound on a single transcoder invocation.
    pub conversion_timeout_secs: u64,
    /// Extra attempts for transient launch failures only.
    pub retry_count: u32,
}

impl Default for TranscoderConfig {
    fn default() -> Self {
        Self {
            executable_path: None,
            conversion_timeout_secs: 20,
            retry_count: 1,
        }
    }
}

impl TranscoderConfig {
    pub fn conversion_timeout(&self) -> Duration {
        Duration::from_secs(self.conversion_timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry_count + 1, Duration::from_secs(1))
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
    /// Enable file logging with rotation.
    pub file_logging: bool,
    /// Maximum number of log files to keep.
    pub max_files: u32,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_logging: true,
            max_files: 7,
        }
    }
}

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub audio: AudioConfig,
    pub resolver: ResolverConfig,
    pub transcoder: TranscoderConfig,
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Create a new AppConfig with default values.
    pub fn new() -> Self {
        Self::default()
    }
}
