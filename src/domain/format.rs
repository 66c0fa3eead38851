use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// How many bytes of a file are inspected for magic signatures.
/// Every supported container declares itself well within this window.
pub const SNIFF_PREFIX_LEN: usize = 512;

/// Audio container/codec tag, derived from byte signatures.
///
/// The tag is always recomputed from content; a filename extension is only a
/// hint for tie-breaking when the content is unrecognizable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    Amr,
    Silk,
    Mp3,
    Wav,
    Ogg,
    Flac,
    M4a,
    Unknown,
}

impl AudioFormat {
    /// Detect the audio format from a byte prefix.
    ///
    /// Pure function of the prefix: truncated, empty, or garbage input maps
    /// to `Unknown` and never fails the caller.
    pub fn sniff(bytes: &[u8]) -> AudioFormat {
        if bytes.starts_with(b"#!AMR") {
            return AudioFormat::Amr;
        }
        if bytes.starts_with(b"\x02#!SILK_V3") || bytes.starts_with(b"#!SILK_V3") {
            return AudioFormat::Silk;
        }
        // RIFF alone is not enough; the WAVE marker must follow the size field.
        if bytes.starts_with(b"RIFF") && bytes.len() >= 12 && &bytes[8..12] == b"WAVE" {
            return AudioFormat::Wav;
        }
        if bytes.starts_with(b"OggS") {
            return AudioFormat::Ogg;
        }
        if bytes.starts_with(b"fLaC") {
            return AudioFormat::Flac;
        }
        if bytes.starts_with(b"ID3") {
            return AudioFormat::Mp3;
        }
        // Bare MPEG frame sync (no ID3 tag).
        if bytes.len() >= 2 && bytes[0] == 0xFF && matches!(bytes[1], 0xFB | 0xF3 | 0xF2) {
            return AudioFormat::Mp3;
        }
        // ISO-BMFF: the ftyp box sits after a 4-byte size field.
        if bytes.len() >= 12 && &bytes[4..8] == b"ftyp" {
            return AudioFormat::M4a;
        }
        AudioFormat::Unknown
    }

    /// Detect the format of a file by reading a bounded prefix.
    pub fn sniff_file(path: &Path) -> std::io::Result<AudioFormat> {
        let mut file = File::open(path)?;
        let mut prefix = [0u8; SNIFF_PREFIX_LEN];
        let mut read = 0;
        // A single read may return short on pipes or small files.
        loop {
            let n = file.read(&mut prefix[read..])?;
            if n == 0 {
                break;
            }
            read += n;
            if read == SNIFF_PREFIX_LEN {
                break;
            }
        }
        Ok(AudioFormat::sniff(&prefix[..read]))
    }

    /// Guess a format from the filename extension. A hint only, never
    /// authoritative over content sniffing.
    pub fn from_extension(path: &Path) -> Option<AudioFormat> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "amr" => Some(AudioFormat::Amr),
            "silk" => Some(AudioFormat::Silk),
            "mp3" | "mpga" => Some(AudioFormat::Mp3),
            "wav" => Some(AudioFormat::Wav),
            "ogg" | "oga" => Some(AudioFormat::Ogg),
            "flac" => Some(AudioFormat::Flac),
            "m4a" | "mp4" => Some(AudioFormat::M4a),
            _ => None,
        }
    }

    /// Whether the speech-to-text backends accept this container directly.
    pub fn is_stt_compatible(self) -> bool {
        matches!(
            self,
            AudioFormat::Mp3
                | AudioFormat::Wav
                | AudioFormat::Ogg
                | AudioFormat::Flac
                | AudioFormat::M4a
        )
    }

    /// Canonical file suffix for artifacts of this format.
    pub fn extension(self) -> &'static str {
        match self {
            AudioFormat::Amr => "amr",
            AudioFormat::Silk => "silk",
            AudioFormat::Mp3 => "mp3",
            AudioFormat::Wav => "wav",
            AudioFormat::Ogg => "ogg",
            AudioFormat::Flac => "flac",
            AudioFormat::M4a => "m4a",
            AudioFormat::Unknown => "audio",
        }
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}
