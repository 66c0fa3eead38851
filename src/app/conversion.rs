use tracing::{debug, info, warn};

use crate::adapters::{FfmpegStrategy, RawPcmFallback, SymphoniaStrategy};
use crate::app::artifact_store::ArtifactScope;
use crate::domain::{AudioFormat, ConversionOutcome, ResolvedAudio, TranscoderConfig};
use crate::ports::{ConversionStrategy, StrategyError};

/// Ordered chain of conversion backends.
///
/// Backends are tried cheapest-first: native in-process decode, then the
/// external transcoder, then the raw PCM wrap as a last resort. Strategy
/// selection is deterministic for identical input and configuration.
pub struct ConversionChain {
    strategies: Vec<Box<dyn ConversionStrategy>>,
}

impl ConversionChain {
    pub fn new(transcoder: &TranscoderConfig) -> Self {
        Self {
            strategies: vec![
                Box::new(SymphoniaStrategy::new()),
                Box::new(FfmpegStrategy::new(transcoder.clone())),
                Box::new(RawPcmFallback::new()),
            ],
        }
    }

    /// Build a chain from arbitrary backends. Used by tests and by hosts
    /// with custom codecs.
    pub fn with_strategies(strategies: Vec<Box<dyn ConversionStrategy>>) -> Self {
        Self { strategies }
    }

    /// Convert `input` to `target`, walking the chain until one backend
    /// produces an output that actually sniffs as the target format.
    ///
    /// Exhaustion is a normal outcome carried in `ConversionOutcome`, not an
    /// error. `attempts` counts strategies tried, not inner retries.
    pub async fn convert(
        &self,
        input: &ResolvedAudio,
        input_format: AudioFormat,
        target: AudioFormat,
        scope: &ArtifactScope,
    ) -> ConversionOutcome {
        let mut tried: Vec<&'static str> = Vec::new();

        for strategy in &self.strategies {
            if !strategy.can_handle(input_format, target).await {
                debug!(
                    strategy = strategy.name(),
                    input = %input_format,
                    target = %target,
                    "Strategy declined input"
                );
                continue;
            }

            tried.push(strategy.name());
            let suffix = format!(".{}", target.extension());
            let mut output = scope.allocate(&suffix);

            let policy = strategy.retry_policy();
            let result = policy
                .run(strategy.name(), StrategyError::is_transient, || {
                    strategy.convert(&input.local_path, &output.local_path)
                })
                .await;

            match result {
                Ok(()) => {
                    if self.validate_output(&mut output, target) {
                        info!(
                            strategy = strategy.name(),
                            output = ?output.local_path,
                            size = output.size_bytes,
                            "Conversion succeeded"
                        );
                        return ConversionOutcome {
                            output: Some(output),
                            strategy: tried.last().copied(),
                            attempts: tried.len() as u32,
                            tried,
                        };
                    }
                    // Zero exit but garbled container; treat as failure.
                    warn!(
                        strategy = strategy.name(),
                        "Strategy output failed validation, trying next"
                    );
                    scope.release(&output);
                }
                Err(e) => {
                    warn!(strategy = strategy.name(), error = %e, "Strategy failed, trying next");
                    scope.release(&output);
                }
            }
        }

        ConversionOutcome {
            output: None,
            strategy: None,
            attempts: tried.len() as u32,
            tried,
        }
    }

    /// Success means the output file exists, is non-empty, and its bytes
    /// sniff as the target format. An exit code is not trusted on its own.
    fn validate_output(&self, output: &mut ResolvedAudio, target: AudioFormat) -> bool {
        if output.refresh_size().is_err() || output.size_bytes == 0 {
            return false;
        }
        matches!(AudioFormat::sniff_file(&output.local_path), Ok(f) if f == target)
    }
}
