use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::domain::{AudioFormat, RetryPolicy, TranscoderConfig};
use crate::ports::{ConversionStrategy, StrategyError};

/// Global singleton instance of the locator.
static INSTANCE: OnceCell<FfmpegLocator> = OnceCell::new();

/// Locates the external ffmpeg executable and caches the answer for the
/// process lifetime.
///
/// Search order: explicit configuration path, PATH lookup, well-known
/// per-OS install locations, environment variable overrides. Unavailability
/// is a cached value, not an error; callers with a non-ffmpeg fallback can
/// proceed. The cache fill is idempotent, so losing a race between two
/// concurrent `locate` calls just repeats the probe.
pub struct FfmpegLocator {
    explicit: RwLock<Option<PathBuf>>,
    cache: RwLock<Option<Option<PathBuf>>>,
}

impl FfmpegLocator {
    /// Get the global locator instance.
    pub fn global() -> &'static FfmpegLocator {
        INSTANCE.get_or_init(FfmpegLocator::new)
    }

    fn new() -> Self {
        Self {
            explicit: RwLock::new(None),
            cache: RwLock::new(None),
        }
    }

    #[cfg(test)]
    fn with_explicit(path: PathBuf) -> Self {
        Self {
            explicit: RwLock::new(Some(path)),
            cache: RwLock::new(None),
        }
    }

    /// Apply an explicit executable path from configuration and drop the
    /// cached probe result. The only way the cache is ever invalidated.
    pub fn reconfigure(&self, explicit: Option<PathBuf>) {
        *self.explicit.write() = explicit;
        *self.cache.write() = None;
        info!("Transcoder locator reconfigured, cache invalidated");
    }

    /// Resolve the transcoder path, probing at most once per configuration.
    pub fn locate(&self) -> Option<PathBuf> {
        if let Some(cached) = self.cache.read().as_ref() {
            return cached.clone();
        }

        let found = self.probe();
        match &found {
            Some(path) => info!(path = ?path, "Transcoder executable located"),
            None => warn!("No transcoder executable found on this system"),
        }
        *self.cache.write() = Some(found.clone());
        found
    }

    pub fn is_available(&self) -> bool {
        self.locate().is_some()
    }

    fn probe(&self) -> Option<PathBuf> {
        if let Some(explicit) = self.explicit.read().clone() {
            if is_executable(&explicit) {
                return Some(explicit);
            }
            warn!(path = ?explicit, "Configured transcoder path is not executable");
        }

        if let Some(path) = search_path_env() {
            return Some(path);
        }

        for candidate in well_known_locations() {
            if is_executable(&candidate) {
                debug!(path = ?candidate, "Transcoder found in well-known location");
                return Some(candidate);
            }
        }

        for var in ["FFMPEG_PATH", "FFMPEG_BINARY"] {
            if let Some(value) = std::env::var_os(var) {
                let path = PathBuf::from(value);
                if is_executable(&path) {
                    debug!(var = var, path = ?path, "Transcoder found via environment variable");
                    return Some(path);
                }
            }
        }

        None
    }
}

fn binary_names() -> &'static [&'static str] {
    if cfg!(windows) {
        &["ffmpeg.exe", "ffmpeg"]
    } else {
        &["ffmpeg"]
    }
}

fn search_path_env() -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path_var) {
        for name in binary_names() {
            let candidate = dir.join(name);
            if is_executable(&candidate) {
                debug!(path = ?candidate, "Transcoder found on PATH");
                return Some(candidate);
            }
        }
    }
    None
}

fn well_known_locations() -> Vec<PathBuf> {
    let mut locations: Vec<PathBuf> = Vec::new();

    #[cfg(windows)]
    {
        locations.extend(
            [
                r"C:\ffmpeg\bin\ffmpeg.exe",
                r"C:\Program Files\FFmpeg\bin\ffmpeg.exe",
                r"C:\Program Files (x86)\FFmpeg\bin\ffmpeg.exe",
                r"C:\ProgramData\chocolatey\bin\ffmpeg.exe",
            ]
            .iter()
            .map(PathBuf::from),
        );
        if let Some(home) = dirs::home_dir() {
            locations.push(home.join(r"scoop\apps\ffmpeg\current\bin\ffmpeg.exe"));
        }
    }

    #[cfg(not(windows))]
    {
        locations.extend(
            [
                "/usr/bin/ffmpeg",
                "/usr/local/bin/ffmpeg",
                "/bin/ffmpeg",
                "/opt/ffmpeg/bin/ffmpeg",
                "/opt/homebrew/bin/ffmpeg",
                "/opt/local/bin/ffmpeg",
                "/snap/bin/ffmpeg",
            ]
            .iter()
            .map(PathBuf::from),
        );
        if let Some(home) = dirs::home_dir() {
            locations.push(home.join("bin/ffmpeg"));
            locations.push(home.join(".local/bin/ffmpeg"));
        }
    }

    locations
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Conversion backend that shells out to ffmpeg.
///
/// Broadest format coverage of the chain, at the cost of a subprocess.
/// Output is 16 kHz mono 16-bit PCM WAV, which every STT backend accepts.
pub struct FfmpegStrategy {
    locator: &'static FfmpegLocator,
    config: TranscoderConfig,
}

impl FfmpegStrategy {
    pub fn new(config: TranscoderConfig) -> Self {
        let locator = FfmpegLocator::global();
        if config.executable_path.is_some() {
            locator.reconfigure(config.executable_path.clone());
        }
        Self { locator, config }
    }
}

#[async_trait]
impl ConversionStrategy for FfmpegStrategy {
    fn name(&self) -> &'static str {
        "ffmpeg"
    }

    async fn can_handle(&self, input: AudioFormat, target: AudioFormat) -> bool {
        if target != AudioFormat::Wav || !self.locator.is_available() {
            return false;
        }
        // ffmpeg handles every tagged container; Unknown stays with the
        // raw fallback.
        input != AudioFormat::Unknown
    }

    async fn convert(&self, input: &Path, output: &Path) -> Result<(), StrategyError> {
        let ffmpeg = self
            .locator
            .locate()
            .ok_or_else(|| StrategyError::Permanent("no transcoder executable".to_string()))?;

        let mut cmd = Command::new(&ffmpeg);
        cmd.arg("-i")
            .arg(input)
            .args(["-ar", "16000", "-ac", "1", "-c:a", "pcm_s16le", "-y"])
            .arg(output)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // If the timeout drops the wait future, the child must not
            // outlive it with open descriptors.
            .kill_on_drop(true);

        debug!(ffmpeg = ?ffmpeg, input = ?input, output = ?output, "Invoking transcoder");

        let child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StrategyError::Permanent(format!("transcoder vanished: {}", e))
            } else {
                // Launch failures (fd exhaustion, fork pressure) can clear up.
                StrategyError::Transient(format!("failed to launch transcoder: {}", e))
            }
        })?;

        let result = tokio::time::timeout(
            self.config.conversion_timeout(),
            child.wait_with_output(),
        )
        .await;

        let out = match result {
            Ok(Ok(out)) => out,
            Ok(Err(e)) => {
                return Err(StrategyError::Transient(format!(
                    "waiting for transcoder failed: {}",
                    e
                )))
            }
            Err(_) => {
                // kill_on_drop already reaped the child.
                return Err(StrategyError::Permanent(format!(
                    "transcoder timed out after {}s",
                    self.config.conversion_timeout_secs
                )));
            }
        };

        if !out.status.success() {
            let stderr = String::from_utf8_lossy(&out.stderr);
            let snippet: String = stderr.chars().take(500).collect();
            return Err(StrategyError::Permanent(format!(
                "transcoder exited with {}: {}",
                out.status, snippet
            )));
        }

        // Exit code zero with an empty output file is still a failure.
        let size = std::fs::metadata(output).map(|m| m.len()).unwrap_or(0);
        if size == 0 {
            return Err(StrategyError::Permanent(
                "transcoder produced an empty output file".to_string(),
            ));
        }

        debug!(output = ?output, size = size, "Transcoder conversion finished");
        Ok(())
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.config.retry_policy()
    }
}
