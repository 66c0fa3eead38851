use std::fs::File;
use std::path::Path;

use async_trait::async_trait;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, warn};

use crate::domain::AudioFormat;
use crate::ports::{ConversionStrategy, StrategyError};

/// Native in-process decode backend.
///
/// Fastest strategy in the chain and free of external tooling, but limited
/// to the containers symphonia ships codecs for. Output is mono 16-bit WAV
/// at the source sample rate.
///
/// The default pipeline sends speech-to-text-compatible containers straight
/// to transcription, so this backend fires for hosts that drive
/// `ConversionChain` directly to force uniform WAV output, e.g. for a
/// backend that accepts nothing else.
pub struct SymphoniaStrategy;

impl SymphoniaStrategy {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SymphoniaStrategy {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConversionStrategy for SymphoniaStrategy {
    fn name(&self) -> &'static str {
        "symphonia"
    }

    async fn can_handle(&self, input: AudioFormat, target: AudioFormat) -> bool {
        target == AudioFormat::Wav
            && matches!(
                input,
                AudioFormat::Mp3
                    | AudioFormat::Wav
                    | AudioFormat::Ogg
                    | AudioFormat::Flac
                    | AudioFormat::M4a
            )
    }

    async fn convert(&self, input: &Path, output: &Path) -> Result<(), StrategyError> {
        let input = input.to_path_buf();
        let output = output.to_path_buf();
        // Decoding is CPU-bound; keep it off the async workers.
        tokio::task::spawn_blocking(move || {
            let (samples, sample_rate) = decode_to_mono_pcm(&input)?;
            write_wav(&output, &samples, sample_rate)
        })
        .await
        .map_err(|e| StrategyError::Transient(format!("decode task failed: {}", e)))?
    }
}

/// Decode any symphonia-supported file into mono f32 PCM.
fn decode_to_mono_pcm(path: &Path) -> Result<(Vec<f32>, u32), StrategyError> {
    let file = File::open(path)
        .map_err(|e| StrategyError::Permanent(format!("open input: {}", e)))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }
    let format_opts = FormatOptions::default();
    let metadata_opts = MetadataOptions::default();
    let decoder_opts = DecoderOptions::default();

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &format_opts, &metadata_opts)
        .map_err(|e| StrategyError::Permanent(format!("probe: {}", e)))?;

    let mut format = probed.format;

    let track = format
        .default_track()
        .ok_or_else(|| StrategyError::Permanent("no audio track found".to_string()))?;

    let track_id = track.id;
    let codec_params = track.codec_params.clone();
    let sample_rate = codec_params
        .sample_rate
        .ok_or_else(|| StrategyError::Permanent("unknown sample rate".to_string()))?;
    let channels = codec_params.channels.map(|c| c.count()).unwrap_or(1);

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &decoder_opts)
        .map_err(|e| StrategyError::Permanent(format!("codec: {}", e)))?;

    let mut all_samples: Vec<f32> = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(symphonia::core::errors::Error::IoError(ref e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(e) => {
                return Err(StrategyError::Permanent(format!("packet: {}", e)));
            }
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(symphonia::core::errors::Error::DecodeError(e)) => {
                warn!(error = %e, "Skipping corrupt audio frame");
                continue;
            }
            Err(e) => {
                return Err(StrategyError::Permanent(format!("decode: {}", e)));
            }
        };

        let spec = *decoded.spec();
        let num_frames = decoded.frames();
        if num_frames == 0 {
            continue;
        }

        let mut sample_buf = SampleBuffer::<f32>::new(num_frames as u64, spec);
        sample_buf.copy_interleaved_ref(decoded);
        let samples = sample_buf.samples();

        // Downmix to mono if multi-channel
        if channels > 1 {
            for frame in samples.chunks(channels) {
                let mono: f32 = frame.iter().sum::<f32>() / channels as f32;
                all_samples.push(mono);
            }
        } else {
            all_samples.extend_from_slice(samples);
        }
    }

    if all_samples.is_empty() {
        return Err(StrategyError::Permanent(
            "no audio samples decoded".to_string(),
        ));
    }

    debug!(
        samples = all_samples.len(),
        sample_rate = sample_rate,
        duration_secs = all_samples.len() as f32 / sample_rate as f32,
        "Audio decoded to mono PCM"
    );

    Ok((all_samples, sample_rate))
}

fn write_wav(path: &Path, samples: &[f32], sample_rate: u32) -> Result<(), StrategyError> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = hound::WavWriter::create(path, spec)
        .map_err(|e| StrategyError::Permanent(format!("create wav: {}", e)))?;

    for &sample in samples {
        let clamped = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        writer
            .write_sample(clamped)
            .map_err(|e| StrategyError::Permanent(format!("write wav: {}", e)))?;
    }

    writer
        .finalize()
        .map_err(|e| StrategyError::Permanent(format!("finalize wav: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_sine_wav(path: &Path, sample_rate: u32, channels: u16) {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for t in 0..(sample_rate / 10) {
            let value = ((t as f32 / sample_rate as f32 * 440.0 * std::f32::consts::TAU).sin()
                * 8000.0) as i16;
            for _ in 0..channels {
                writer.write_sample(value).unwrap();
            }
        }
        writer.finalize().unwrap();
    }

    #[tokio::test]
    async fn test_converts_wav_to_mono_wav() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.wav");
        let output = dir.path().join("out.wav");
        write_sine_wav(&input, 16_000, 1);

        let strategy = SymphoniaStrategy::new();
        strategy.convert(&input, &output).await.unwrap();

        assert_eq!(
            AudioFormat::sniff_file(&output).unwrap(),
            AudioFormat::Wav
        );
        let reader = hound::WavReader::open(&output).unwrap();
        assert_eq!(reader.spec().channels, 1);
        assert_eq!(reader.spec().sample_rate, 16_000);
    }

    #[tokio::test]
    async fn test_downmixes_stereo_input() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("stereo.wav");
        let output = dir.path().join("mono.wav");
        write_sine_wav(&input, 8_000, 2);

        let strategy = SymphoniaStrategy::new();
        strategy.convert(&input, &output).await.unwrap();

        let reader = hound::WavReader::open(&output).unwrap();
        assert_eq!(reader.spec().channels, 1);
    }

    #[tokio::test]
    async fn test_garbage_input_fails_permanently() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("garbage.mp3");
        let output = dir.path().join("out.wav");
        std::fs::write(&input, b"definitely not audio data").unwrap();

        let strategy = SymphoniaStrategy::new();
        let err = strategy.convert(&input, &output).await.unwrap_err();
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_can_handle_matrix() {
        let strategy = SymphoniaStrategy::new();
        assert!(strategy.can_handle(AudioFormat::Mp3, AudioFormat::Wav).await);
        assert!(strategy.can_handle(AudioFormat::Flac, AudioFormat::Wav).await);
        assert!(!strategy.can_handle(AudioFormat::Silk, AudioFormat::Wav).await);
        assert!(!strategy.can_handle(AudioFormat::Amr, AudioFormat::Wav).await);
        assert!(!strategy.can_handle(AudioFormat::Unknown, AudioFormat::Wav).await);
        assert!(!strategy.can_handle(AudioFormat::Mp3, AudioFormat::Mp3).await);
    }
}
