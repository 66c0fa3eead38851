use std::path::Path;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::domain::AudioFormat;
use crate::ports::{ConversionStrategy, StrategyError};

/// Sample rates tried in order when wrapping headerless payloads. Voice
/// platforms commonly emit 24 kHz or 16 kHz; telephony codecs use 8 kHz.
const CANDIDATE_RATES: [u32; 4] = [24_000, 16_000, 12_000, 8_000];

/// Last-resort strategy for payloads with no recognizable container.
///
/// Interprets the bytes as signed 16-bit little-endian mono PCM and wraps
/// them in a WAV header, trying a fixed ladder of sample rates. This is a
/// guess; a mistagged rate produces sped-up or slowed-down audio rather than
/// silence, which a downstream STT backend can often still work with.
pub struct RawPcmFallback;

impl RawPcmFallback {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RawPcmFallback {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConversionStrategy for RawPcmFallback {
    fn name(&self) -> &'static str {
        "raw-pcm"
    }

    async fn can_handle(&self, _input: AudioFormat, target: AudioFormat) -> bool {
        target == AudioFormat::Wav
    }

    async fn convert(&self, input: &Path, output: &Path) -> Result<(), StrategyError> {
        let input = input.to_path_buf();
        let output = output.to_path_buf();
        tokio::task::spawn_blocking(move || wrap_as_wav(&input, &output))
            .await
            .map_err(|e| StrategyError::Transient(format!("wrap task failed: {}", e)))?
    }
}

fn wrap_as_wav(input: &Path, output: &Path) -> Result<(), StrategyError> {
    let bytes = std::fs::read(input)
        .map_err(|e| StrategyError::Permanent(format!("read input: {}", e)))?;
    if bytes.len() < 2 {
        return Err(StrategyError::Permanent(
            "payload too short to contain PCM samples".to_string(),
        ));
    }
    if bytes.len() % 2 != 0 {
        warn!(size = bytes.len(), "Odd payload length, dropping trailing byte");
    }

    let samples: Vec<i16> = bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect();

    for rate in CANDIDATE_RATES {
        match write_pcm_wav(output, &samples, rate) {
            Ok(()) => {
                // A rate only counts if the result reads back as WAV.
                if AudioFormat::sniff_file(output).ok() == Some(AudioFormat::Wav) {
                    debug!(rate = rate, samples = samples.len(), "Raw payload wrapped as WAV");
                    return Ok(());
                }
                let _ = std::fs::remove_file(output);
            }
            Err(e) => {
                warn!(rate = rate, error = %e, "WAV wrap attempt failed");
                let _ = std::fs::remove_file(output);
            }
        }
    }

    Err(StrategyError::Permanent(
        "could not wrap payload as WAV at any candidate rate".to_string(),
    ))
}

fn write_pcm_wav(path: &Path, samples: &[i16], sample_rate: u32) -> Result<(), hound::Error> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)?;
    for &sample in samples {
        writer.write_sample(sample)?;
    }
    writer.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_wraps_arbitrary_bytes_as_wav() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("blob.silk");
        let output = dir.path().join("out.wav");
        let payload: Vec<u8> = (0..4096u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(&input, &payload).unwrap();

        let strategy = RawPcmFallback::new();
        strategy.convert(&input, &output).await.unwrap();

        assert_eq!(AudioFormat::sniff_file(&output).unwrap(), AudioFormat::Wav);
        let reader = hound::WavReader::open(&output).unwrap();
        assert_eq!(reader.spec().channels, 1);
        assert_eq!(reader.len() as usize, payload.len() / 2);
    }

    #[tokio::test]
    async fn test_empty_input_fails() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("empty.bin");
        let output = dir.path().join("out.wav");
        std::fs::write(&input, b"").unwrap();

        let strategy = RawPcmFallback::new();
        let err = strategy.convert(&input, &output).await.unwrap_err();
        assert!(!err.is_transient());
        assert!(!output.exists());
    }

    #[tokio::test]
    async fn test_handles_any_input_format() {
        let strategy = RawPcmFallback::new();
        assert!(strategy.can_handle(AudioFormat::Unknown, AudioFormat::Wav).await);
        assert!(strategy.can_handle(AudioFormat::Silk, AudioFormat::Wav).await);
        assert!(strategy.can_handle(AudioFormat::Amr, AudioFormat::Wav).await);
        assert!(!strategy.can_handle(AudioFormat::Silk, AudioFormat::Mp3).await);
    }
}
