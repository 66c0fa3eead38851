use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::domain::format::AudioFormat;
use crate::domain::VoxError;

/// Opaque host-supplied reference to a voice message payload.
///
/// Host platforms are inconsistent about what they deliver: any subset of
/// these fields may be set, and none of them is guaranteed to be a usable
/// local path. The resolver chain is responsible for turning this into a
/// real file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VoiceReference {
    /// Platform file handle or bare filename; may also carry `file://`,
    /// `http(s)://` or `base64://` payloads depending on the host.
    pub file: Option<String>,
    /// Remote download location, when the host exposes one.
    pub url: Option<String>,
    /// Local path claim, when the host believes it wrote a file.
    pub path: Option<String>,
}

impl VoiceReference {
    pub fn from_file(file: impl Into<String>) -> Self {
        Self {
            file: Some(file.into()),
            ..Self::default()
        }
    }

    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::default()
        }
    }

    pub fn from_path(path: impl Into<String>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::default()
        }
    }
}

/// A locally materialized audio payload.
///
/// `owned` distinguishes scratch artifacts the pipeline must delete from
/// pre-existing host files it must never touch.
#[derive(Debug, Clone)]
pub struct ResolvedAudio {
    pub local_path: PathBuf,
    pub owned: bool,
    pub size_bytes: u64,
}

impl ResolvedAudio {
    /// Wrap a pre-existing, host-managed file. Never deleted by the pipeline.
    pub fn unowned(path: &Path) -> Result<Self, VoxError> {
        let size_bytes = std::fs::metadata(path)?.len();
        Ok(Self {
            local_path: path.to_path_buf(),
            owned: false,
            size_bytes,
        })
    }

    /// Re-read the backing file size after it has been (re)written.
    pub fn refresh_size(&mut self) -> Result<(), VoxError> {
        self.size_bytes = std::fs::metadata(&self.local_path)?.len();
        Ok(())
    }
}

/// Result of running the conversion strategy chain.
///
/// Exhausting every strategy is a normal, expected outcome for
/// unsupported or corrupt input, carried here rather than as a panic.
#[derive(Debug)]
pub struct ConversionOutcome {
    /// Normalized artifact, when some strategy succeeded.
    pub output: Option<ResolvedAudio>,
    /// Name of the winning strategy.
    pub strategy: Option<&'static str>,
    /// Number of strategies actually attempted.
    pub attempts: u32,
    /// Names of all strategies attempted, in order.
    pub tried: Vec<&'static str>,
}

impl ConversionOutcome {
    pub fn succeeded(&self) -> bool {
        self.output.is_some()
    }
}

/// Final product of a pipeline run.
#[derive(Debug, Clone)]
pub struct Transcript {
    pub text: String,
    /// Format detected on the resolved input.
    pub format: AudioFormat,
    /// Whether a conversion step was required before transcription.
    pub converted: bool,
}
