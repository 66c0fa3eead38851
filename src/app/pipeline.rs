use std::fmt;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::app::artifact_store::{ArtifactScope, ArtifactStore};
use crate::app::conversion::ConversionChain;
use crate::app::resolver::VoiceFileResolver;
use crate::domain::{
    AudioConfig, AudioFormat, ResolvedAudio, Transcript, VoiceReference, VoxError,
};
use crate::ports::{TranscribeError, Transcriber};

/// Pipeline stages, logged at every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Resolving,
    Detecting,
    Converting,
    Transcribing,
    CleaningUp,
    Done,
    Failed,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Resolving => "resolving",
            PipelineState::Detecting => "detecting",
            PipelineState::Converting => "converting",
            PipelineState::Transcribing => "transcribing",
            PipelineState::CleaningUp => "cleaning_up",
            PipelineState::Done => "done",
            PipelineState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// One transcription attempt outcome, classified for the retry loop.
enum AttemptError {
    Timeout(u64),
    Backend(TranscribeError),
}

impl AttemptError {
    fn is_transient(&self) -> bool {
        match self {
            // A hung backend may recover on the next attempt.
            AttemptError::Timeout(_) => true,
            AttemptError::Backend(e) => e.is_transient(),
        }
    }
}

impl fmt::Display for AttemptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptError::Timeout(secs) => write!(f, "transcription timed out after {}s", secs),
            AttemptError::Backend(e) => e.fmt(f),
        }
    }
}

/// End-to-end ingestion of one voice message.
///
/// Drives resolve, detect, convert, and transcribe in order, and guarantees
/// that every scratch artifact of the run is deleted on every exit path,
/// including errors, timeouts, and task cancellation. Control returns upward
/// at every stage with a typed outcome; no stage retries a stage above it.
pub struct IngestionPipeline {
    resolver: VoiceFileResolver,
    chain: ConversionChain,
    transcriber: Arc<dyn Transcriber>,
    store: ArtifactStore,
    config: AudioConfig,
}

impl IngestionPipeline {
    pub fn new(
        resolver: VoiceFileResolver,
        chain: ConversionChain,
        transcriber: Arc<dyn Transcriber>,
        store: ArtifactStore,
        config: AudioConfig,
    ) -> Self {
        Self {
            resolver,
            chain,
            transcriber,
            store,
            config,
        }
    }

    /// Process a single voice reference to a transcript.
    ///
    /// Each call runs in its own artifact scope; concurrent calls never
    /// share artifacts.
    pub async fn process(&self, reference: &VoiceReference) -> Result<Transcript, VoxError> {
        let scope = self.store.scope();
        let result = self.run(reference, &scope).await;

        self.transition(PipelineState::CleaningUp);
        let leftover = scope.owned_count();
        if leftover > 0 {
            debug!(count = leftover, "Releasing scratch artifacts");
        }
        drop(scope);

        match &result {
            Ok(transcript) => {
                self.transition(PipelineState::Done);
                info!(
                    format = %transcript.format,
                    converted = transcript.converted,
                    chars = transcript.text.len(),
                    "Voice message ingested"
                );
            }
            Err(e) => {
                self.transition(PipelineState::Failed);
                warn!(error = %e, "Voice message ingestion failed");
            }
        }
        result
    }

    async fn run(
        &self,
        reference: &VoiceReference,
        scope: &ArtifactScope,
    ) -> Result<Transcript, VoxError> {
        self.transition(PipelineState::Resolving);
        let audio = self.resolver.resolve(reference, scope).await?;

        self.validate_size(&audio)?;

        self.transition(PipelineState::Detecting);
        let format = self.detect_format(&audio)?;

        let (transcribe_path, converted) = if format.is_stt_compatible() {
            debug!(format = %format, "Format accepted directly, no conversion needed");
            (audio.local_path.clone(), false)
        } else {
            if !self.config.conversion_enabled {
                warn!(format = %format, "Conversion disabled, rejecting incompatible format");
                return Err(VoxError::UnsupportedFormat(format));
            }
            self.transition(PipelineState::Converting);
            let outcome = self
                .chain
                .convert(&audio, format, AudioFormat::Wav, scope)
                .await;
            match outcome.output {
                Some(output) => {
                    debug!(
                        strategy = outcome.strategy.unwrap_or("?"),
                        attempts = outcome.attempts,
                        "Conversion chain finished"
                    );
                    (output.local_path.clone(), true)
                }
                // No strategy even applied: the format is out of scope.
                None if outcome.attempts == 0 => {
                    return Err(VoxError::UnsupportedFormat(format));
                }
                None => {
                    warn!(
                        attempts = outcome.attempts,
                        tried = ?outcome.tried,
                        "Every conversion strategy failed"
                    );
                    return Err(VoxError::ConversionFailed { format });
                }
            }
        };

        self.transition(PipelineState::Transcribing);
        let text = self.transcribe_with_retry(&transcribe_path).await?;

        Ok(Transcript {
            text,
            format,
            converted,
        })
    }

    /// Size gates run before any conversion work is attempted.
    fn validate_size(&self, audio: &ResolvedAudio) -> Result<(), VoxError> {
        let limit = self.config.max_size_bytes();
        if audio.size_bytes > limit {
            return Err(VoxError::SizeLimitExceeded {
                size_bytes: audio.size_bytes,
                limit_bytes: limit,
            });
        }
        if audio.size_bytes < self.config.min_file_size_bytes {
            return Err(VoxError::InvalidAudio(format!(
                "file is {} bytes, below the {}-byte minimum",
                audio.size_bytes, self.config.min_file_size_bytes
            )));
        }
        Ok(())
    }

    /// Content sniffing decides; the extension is consulted only when the
    /// bytes are unrecognizable.
    fn detect_format(&self, audio: &ResolvedAudio) -> Result<AudioFormat, VoxError> {
        let sniffed = AudioFormat::sniff_file(&audio.local_path)?;
        if sniffed != AudioFormat::Unknown {
            debug!(format = %sniffed, "Format detected from content");
            return Ok(sniffed);
        }
        if let Some(hinted) = AudioFormat::from_extension(&audio.local_path) {
            debug!(format = %hinted, "Content unrecognizable, using extension hint");
            return Ok(hinted);
        }
        Ok(AudioFormat::Unknown)
    }

    async fn transcribe_with_retry(&self, path: &Path) -> Result<String, VoxError> {
        let policy = self.config.transcription_retry_policy();
        let timeout = self.config.processing_timeout();
        let timeout_secs = self.config.processing_timeout_secs;

        let result = policy
            .run("transcribe", AttemptError::is_transient, || async {
                match tokio::time::timeout(timeout, self.transcriber.transcribe(path)).await {
                    Ok(Ok(text)) => Ok(text),
                    Ok(Err(e)) => Err(AttemptError::Backend(e)),
                    Err(_) => Err(AttemptError::Timeout(timeout_secs)),
                }
            })
            .await;

        match result {
            Ok(text) => Ok(text),
            Err(AttemptError::Timeout(_)) => Err(VoxError::Timeout("transcription")),
            Err(AttemptError::Backend(e)) => Err(VoxError::TranscriptionFailed(e.to_string())),
        }
    }

    fn transition(&self, state: PipelineState) {
        debug!(state = %state, "Pipeline state");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::conversion::ConversionChain;
    use crate::app::resolver::VoiceFileResolver;
    use crate::domain::ResolverConfig;
    use crate::ports::{
        ConversionStrategy, HttpClient, SourceError, StrategyError, VoiceSource,
    };
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct BareHost;

    #[async_trait]
    impl VoiceSource for BareHost {
        async fn fetch_path(&self, _: &VoiceReference) -> Result<PathBuf, SourceError> {
            Err(SourceError::NotSupported)
        }
        async fn fetch_base64(&self, _: &VoiceReference) -> Result<String, SourceError> {
            Err(SourceError::NotSupported)
        }
        async fn register_download_url(
            &self,
            _: &VoiceReference,
        ) -> Result<String, SourceError> {
            Err(SourceError::NotSupported)
        }
    }

    struct DeadHttp;

    #[async_trait]
    impl HttpClient for DeadHttp {
        async fn download_file(&self, _: &str, _: &Path, _: u64) -> Result<u64, VoxError> {
            Err(VoxError::HttpRequest("no network in tests".to_string()))
        }
    }

    /// Transcriber stub that counts invocations.
    struct CountingTranscriber {
        calls: Arc<AtomicU32>,
        reply: String,
    }

    #[async_trait]
    impl Transcriber for CountingTranscriber {
        async fn transcribe(&self, _: &Path) -> Result<String, TranscribeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.reply.clone())
        }
    }

    /// Transcriber stub that fails transiently before succeeding.
    struct FlakyTranscriber {
        calls: Arc<AtomicU32>,
        fail_first: u32,
    }

    #[async_trait]
    impl Transcriber for FlakyTranscriber {
        async fn transcribe(&self, _: &Path) -> Result<String, TranscribeError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                Err(TranscribeError::Transient("socket reset".to_string()))
            } else {
                Ok("recovered".to_string())
            }
        }
    }

    /// Conversion backend stub, scripted per test.
    struct ScriptedStrategy {
        name: &'static str,
        calls: Arc<AtomicU32>,
        succeed: bool,
    }

    #[async_trait]
    impl ConversionStrategy for ScriptedStrategy {
        fn name(&self) -> &'static str {
            self.name
        }
        async fn can_handle(&self, _: AudioFormat, target: AudioFormat) -> bool {
            target == AudioFormat::Wav
        }
        async fn convert(&self, _: &Path, output: &Path) -> Result<(), StrategyError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.succeed {
                std::fs::write(output, minimal_wav()).unwrap();
                Ok(())
            } else {
                Err(StrategyError::Permanent("codec not supported".to_string()))
            }
        }
    }

    fn minimal_wav() -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"RIFF");
        bytes.extend_from_slice(&(36u32 + 320).to_le_bytes());
        bytes.extend_from_slice(b"WAVEfmt ");
        bytes.extend_from_slice(&16u32.to_le_bytes());
        bytes.extend_from_slice(&[1, 0, 1, 0]);
        bytes.extend_from_slice(&16000u32.to_le_bytes());
        bytes.extend_from_slice(&32000u32.to_le_bytes());
        bytes.extend_from_slice(&[2, 0, 16, 0]);
        bytes.extend_from_slice(b"data");
        bytes.extend_from_slice(&320u32.to_le_bytes());
        bytes.extend_from_slice(&[0u8; 320]);
        bytes
    }

    fn silk_bytes() -> Vec<u8> {
        let mut bytes = b"\x02#!SILK_V3".to_vec();
        bytes.extend_from_slice(&[7u8; 256]);
        bytes
    }

    struct Fixture {
        dir: tempfile::TempDir,
    }

    fn pipeline_with(
        transcriber: Arc<dyn Transcriber>,
        strategies: Vec<Box<dyn ConversionStrategy>>,
        config: AudioConfig,
    ) -> (IngestionPipeline, Fixture) {
        let dir = tempfile::tempdir().unwrap();
        let resolver = VoiceFileResolver::new(
            Arc::new(BareHost),
            Arc::new(DeadHttp),
            ResolverConfig::default(),
            dir.path().to_path_buf(),
        );
        let chain = ConversionChain::with_strategies(strategies);
        let store = ArtifactStore::new(&dir.path().join("scratch"));
        let pipeline = IngestionPipeline::new(resolver, chain, transcriber, store, config);
        (pipeline, Fixture { dir })
    }

    fn scratch_is_empty(fixture: &Fixture) -> bool {
        let scratch = fixture.dir.path().join("scratch");
        std::fs::read_dir(scratch)
            .map(|entries| entries.count() == 0)
            .unwrap_or(true)
    }

    #[tokio::test]
    async fn test_compatible_wav_skips_conversion() {
        let calls = Arc::new(AtomicU32::new(0));
        let strategy_calls = Arc::new(AtomicU32::new(0));
        let (pipeline, fixture) = pipeline_with(
            Arc::new(CountingTranscriber {
                calls: calls.clone(),
                reply: "hello world".to_string(),
            }),
            vec![Box::new(ScriptedStrategy {
                name: "never",
                calls: strategy_calls.clone(),
                succeed: true,
            })],
            AudioConfig::default(),
        );

        let voice = fixture.dir.path().join("msg.wav");
        std::fs::write(&voice, minimal_wav()).unwrap();

        let transcript = pipeline
            .process(&VoiceReference::from_path(voice.to_string_lossy()))
            .await
            .unwrap();

        assert_eq!(transcript.text, "hello world");
        assert_eq!(transcript.format, AudioFormat::Wav);
        assert!(!transcript.converted);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(strategy_calls.load(Ordering::SeqCst), 0);
        assert!(scratch_is_empty(&fixture));
    }

    #[tokio::test]
    async fn test_silk_converts_via_second_strategy_then_cleans_up() {
        let calls = Arc::new(AtomicU32::new(0));
        let native_calls = Arc::new(AtomicU32::new(0));
        let external_calls = Arc::new(AtomicU32::new(0));
        let (pipeline, fixture) = pipeline_with(
            Arc::new(CountingTranscriber {
                calls: calls.clone(),
                reply: "converted speech".to_string(),
            }),
            vec![
                Box::new(ScriptedStrategy {
                    name: "native",
                    calls: native_calls.clone(),
                    succeed: false,
                }),
                Box::new(ScriptedStrategy {
                    name: "external",
                    calls: external_calls.clone(),
                    succeed: true,
                }),
            ],
            AudioConfig::default(),
        );

        let voice = fixture.dir.path().join("msg.silk");
        std::fs::write(&voice, silk_bytes()).unwrap();

        let transcript = pipeline
            .process(&VoiceReference::from_path(voice.to_string_lossy()))
            .await
            .unwrap();

        assert_eq!(transcript.text, "converted speech");
        assert_eq!(transcript.format, AudioFormat::Silk);
        assert!(transcript.converted);
        assert_eq!(native_calls.load(Ordering::SeqCst), 1);
        assert_eq!(external_calls.load(Ordering::SeqCst), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        // The converted artifact is deleted; the host file is not.
        assert!(scratch_is_empty(&fixture));
        assert!(voice.exists());
    }

    #[tokio::test]
    async fn test_oversized_input_fails_before_any_conversion() {
        let calls = Arc::new(AtomicU32::new(0));
        let strategy_calls = Arc::new(AtomicU32::new(0));
        let (pipeline, fixture) = pipeline_with(
            Arc::new(CountingTranscriber {
                calls: calls.clone(),
                reply: String::new(),
            }),
            vec![Box::new(ScriptedStrategy {
                name: "never",
                calls: strategy_calls.clone(),
                succeed: true,
            })],
            AudioConfig {
                max_audio_size_mb: 1,
                ..AudioConfig::default()
            },
        );

        let voice = fixture.dir.path().join("huge.silk");
        let mut bytes = silk_bytes();
        bytes.resize(2 * 1024 * 1024, 0);
        std::fs::write(&voice, bytes).unwrap();

        let err = pipeline
            .process(&VoiceReference::from_path(voice.to_string_lossy()))
            .await
            .unwrap_err();

        assert!(matches!(err, VoxError::SizeLimitExceeded { .. }));
        assert_eq!(strategy_calls.load(Ordering::SeqCst), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_undersized_input_is_rejected() {
        let calls = Arc::new(AtomicU32::new(0));
        let (pipeline, fixture) = pipeline_with(
            Arc::new(CountingTranscriber {
                calls: calls.clone(),
                reply: String::new(),
            }),
            vec![],
            AudioConfig::default(),
        );

        let voice = fixture.dir.path().join("tiny.wav");
        std::fs::write(&voice, b"RIFF").unwrap();

        let err = pipeline
            .process(&VoiceReference::from_path(voice.to_string_lossy()))
            .await
            .unwrap_err();

        assert!(matches!(err, VoxError::InvalidAudio(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_conversion_disabled_rejects_incompatible_format() {
        let calls = Arc::new(AtomicU32::new(0));
        let strategy_calls = Arc::new(AtomicU32::new(0));
        let (pipeline, fixture) = pipeline_with(
            Arc::new(CountingTranscriber {
                calls: calls.clone(),
                reply: String::new(),
            }),
            vec![Box::new(ScriptedStrategy {
                name: "capable",
                calls: strategy_calls.clone(),
                succeed: true,
            })],
            AudioConfig {
                conversion_enabled: false,
                ..AudioConfig::default()
            },
        );

        let voice = fixture.dir.path().join("msg.silk");
        std::fs::write(&voice, silk_bytes()).unwrap();

        let err = pipeline
            .process(&VoiceReference::from_path(voice.to_string_lossy()))
            .await
            .unwrap_err();

        assert!(matches!(err, VoxError::UnsupportedFormat(AudioFormat::Silk)));
        assert_eq!(strategy_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_all_strategies_failing_reports_conversion_failed() {
        let calls = Arc::new(AtomicU32::new(0));
        let (pipeline, fixture) = pipeline_with(
            Arc::new(CountingTranscriber {
                calls: calls.clone(),
                reply: String::new(),
            }),
            vec![
                Box::new(ScriptedStrategy {
                    name: "a",
                    calls: Arc::new(AtomicU32::new(0)),
                    succeed: false,
                }),
                Box::new(ScriptedStrategy {
                    name: "b",
                    calls: Arc::new(AtomicU32::new(0)),
                    succeed: false,
                }),
            ],
            AudioConfig::default(),
        );

        let voice = fixture.dir.path().join("msg.silk");
        std::fs::write(&voice, silk_bytes()).unwrap();

        let err = pipeline
            .process(&VoiceReference::from_path(voice.to_string_lossy()))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            VoxError::ConversionFailed {
                format: AudioFormat::Silk
            }
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(scratch_is_empty(&fixture));
    }

    #[tokio::test]
    async fn test_transient_transcription_errors_are_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let (pipeline, fixture) = pipeline_with(
            Arc::new(FlakyTranscriber {
                calls: calls.clone(),
                fail_first: 2,
            }),
            vec![],
            AudioConfig {
                retry_delay_ms: 0,
                ..AudioConfig::default()
            },
        );

        let voice = fixture.dir.path().join("msg.wav");
        std::fs::write(&voice, minimal_wav()).unwrap();

        let transcript = pipeline
            .process(&VoiceReference::from_path(voice.to_string_lossy()))
            .await
            .unwrap();

        assert_eq!(transcript.text, "recovered");
        // Two failures plus the success, within the default budget of 3.
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_transcription_error_is_not_retried() {
        struct PermanentFail {
            calls: Arc<AtomicU32>,
        }

        #[async_trait]
        impl Transcriber for PermanentFail {
            async fn transcribe(&self, _: &Path) -> Result<String, TranscribeError> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                Err(TranscribeError::Permanent("bad credentials".to_string()))
            }
        }

        let calls = Arc::new(AtomicU32::new(0));
        let (pipeline, fixture) = pipeline_with(
            Arc::new(PermanentFail {
                calls: calls.clone(),
            }),
            vec![],
            AudioConfig::default(),
        );

        let voice = fixture.dir.path().join("msg.wav");
        std::fs::write(&voice, minimal_wav()).unwrap();

        let err = pipeline
            .process(&VoiceReference::from_path(voice.to_string_lossy()))
            .await
            .unwrap_err();

        assert!(matches!(err, VoxError::TranscriptionFailed(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_same_input_detects_same_format_twice() {
        let calls = Arc::new(AtomicU32::new(0));
        let (pipeline, fixture) = pipeline_with(
            Arc::new(CountingTranscriber {
                calls,
                reply: "same".to_string(),
            }),
            vec![Box::new(ScriptedStrategy {
                name: "only",
                calls: Arc::new(AtomicU32::new(0)),
                succeed: true,
            })],
            AudioConfig::default(),
        );

        let voice = fixture.dir.path().join("msg.silk");
        std::fs::write(&voice, silk_bytes()).unwrap();
        let reference = VoiceReference::from_path(voice.to_string_lossy());

        let first = pipeline.process(&reference).await.unwrap();
        let second = pipeline.process(&reference).await.unwrap();
        assert_eq!(first.format, second.format);
        assert_eq!(first.converted, second.converted);
    }
}
