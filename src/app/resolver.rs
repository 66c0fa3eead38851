use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::app::artifact_store::ArtifactScope;
use crate::domain::{AudioFormat, ResolvedAudio, ResolverConfig, VoiceReference, VoxError};
use crate::ports::{HttpClient, SourceError, VoiceSource};

/// One acquisition strategy in the resolver chain.
///
/// The chain is a fixed ordered table rather than nested branches so each
/// strategy can be named in logs and exercised in isolation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveStrategy {
    /// Ask the host to materialize a file it manages.
    HostPath,
    /// Ask the host for an inline base64 payload.
    HostInline,
    /// Ask the host's file service for a download URL.
    HostFileService,
    /// The reference's path claim already points at a readable file.
    DirectPath,
    /// Download the reference's URL field.
    UrlDownload,
    /// Interpret the file field: local path, file://, http(s)://, base64://.
    FileField,
    /// Look for the bare filename next to the process and its data dir.
    RelativeSearch,
    /// Look for the bare filename in temp directories.
    TempDirSearch,
    /// Look for the bare filename in user-facing system directories.
    SystemDirSearch,
    /// Recursive stem search across data and temp trees.
    PatternSearch,
}

impl ResolveStrategy {
    /// Every strategy, in resolution order. First success wins.
    pub const ALL: [ResolveStrategy; 10] = [
        ResolveStrategy::HostPath,
        ResolveStrategy::HostInline,
        ResolveStrategy::HostFileService,
        ResolveStrategy::DirectPath,
        ResolveStrategy::UrlDownload,
        ResolveStrategy::FileField,
        ResolveStrategy::RelativeSearch,
        ResolveStrategy::TempDirSearch,
        ResolveStrategy::SystemDirSearch,
        ResolveStrategy::PatternSearch,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ResolveStrategy::HostPath => "host-path",
            ResolveStrategy::HostInline => "host-inline",
            ResolveStrategy::HostFileService => "host-file-service",
            ResolveStrategy::DirectPath => "direct-path",
            ResolveStrategy::UrlDownload => "url-download",
            ResolveStrategy::FileField => "file-field",
            ResolveStrategy::RelativeSearch => "relative-search",
            ResolveStrategy::TempDirSearch => "temp-dir-search",
            ResolveStrategy::SystemDirSearch => "system-dir-search",
            ResolveStrategy::PatternSearch => "pattern-search",
        }
    }
}

/// Turns an opaque host reference into a local audio file.
///
/// No host platform reliably delivers a usable path, so every acquisition
/// route is tried in a fixed order and only exhaustion of the whole table
/// is reported as failure.
pub struct VoiceFileResolver {
    source: Arc<dyn VoiceSource>,
    http: Arc<dyn HttpClient>,
    config: ResolverConfig,
    data_dir: PathBuf,
}

impl VoiceFileResolver {
    pub fn new(
        source: Arc<dyn VoiceSource>,
        http: Arc<dyn HttpClient>,
        config: ResolverConfig,
        data_dir: PathBuf,
    ) -> Self {
        Self {
            source,
            http,
            config,
            data_dir,
        }
    }

    /// Run the strategy table top to bottom. Individual failures are logged
    /// at low severity; only full exhaustion surfaces as `ResolutionFailed`.
    pub async fn resolve(
        &self,
        reference: &VoiceReference,
        scope: &ArtifactScope,
    ) -> Result<ResolvedAudio, VoxError> {
        for strategy in ResolveStrategy::ALL {
            match self.attempt(strategy, reference, scope).await {
                Ok(Some(audio)) => {
                    info!(
                        strategy = strategy.name(),
                        path = ?audio.local_path,
                        size = audio.size_bytes,
                        owned = audio.owned,
                        "Voice payload resolved"
                    );
                    return Ok(audio);
                }
                Ok(None) => {
                    debug!(strategy = strategy.name(), "Strategy not applicable");
                }
                Err(e) => {
                    debug!(strategy = strategy.name(), error = %e, "Strategy failed");
                }
            }
        }
        warn!("All resolution strategies exhausted");
        Err(VoxError::ResolutionFailed)
    }

    /// Run one strategy. `Ok(None)` means "not applicable to this
    /// reference", which is distinct from an attempted-and-failed `Err`.
    async fn attempt(
        &self,
        strategy: ResolveStrategy,
        reference: &VoiceReference,
        scope: &ArtifactScope,
    ) -> Result<Option<ResolvedAudio>, VoxError> {
        match strategy {
            ResolveStrategy::HostPath => match self.source.fetch_path(reference).await {
                Ok(path) => Ok(Some(ResolvedAudio::unowned(&path)?)),
                Err(SourceError::NotSupported) => Ok(None),
                Err(e) => Err(VoxError::Io(e.to_string())),
            },
            ResolveStrategy::HostInline => match self.source.fetch_base64(reference).await {
                Ok(encoded) => Ok(Some(self.decode_base64_to_scope(&encoded, scope)?)),
                Err(SourceError::NotSupported) => Ok(None),
                Err(e) => Err(VoxError::InvalidAudio(e.to_string())),
            },
            ResolveStrategy::HostFileService => {
                match self.source.register_download_url(reference).await {
                    Ok(url) => Ok(Some(self.download_to_scope(&url, scope).await?)),
                    Err(SourceError::NotSupported) => Ok(None),
                    Err(e) => Err(VoxError::HttpRequest(e.to_string())),
                }
            }
            ResolveStrategy::DirectPath => {
                let Some(claim) = reference.path.as_deref() else {
                    return Ok(None);
                };
                let path = Path::new(claim);
                if path.is_file() {
                    Ok(Some(ResolvedAudio::unowned(path)?))
                } else {
                    Ok(None)
                }
            }
            ResolveStrategy::UrlDownload => {
                let Some(url) = reference.url.as_deref() else {
                    return Ok(None);
                };
                Ok(Some(self.download_to_scope(url, scope).await?))
            }
            ResolveStrategy::FileField => {
                let Some(file) = reference.file.as_deref() else {
                    return Ok(None);
                };
                self.resolve_file_field(file, scope).await
            }
            ResolveStrategy::RelativeSearch => {
                self.search_dirs(reference, &self.relative_dirs())
            }
            ResolveStrategy::TempDirSearch => self.search_dirs(reference, &self.temp_dirs()),
            ResolveStrategy::SystemDirSearch => {
                self.search_dirs(reference, &self.system_dirs())
            }
            ResolveStrategy::PatternSearch => self.pattern_search(reference),
        }
    }

    /// The file field is the least disciplined host channel: depending on
    /// the deployment it carries a path, a URI, or an inline payload.
    async fn resolve_file_field(
        &self,
        file: &str,
        scope: &ArtifactScope,
    ) -> Result<Option<ResolvedAudio>, VoxError> {
        if let Some(encoded) = file.strip_prefix("base64://") {
            return Ok(Some(self.decode_base64_to_scope(encoded, scope)?));
        }
        if file.starts_with("http://") || file.starts_with("https://") {
            return Ok(Some(self.download_to_scope(file, scope).await?));
        }
        if let Some(stripped) = file.strip_prefix("file://") {
            let path = Path::new(stripped);
            if path.is_file() {
                return Ok(Some(ResolvedAudio::unowned(path)?));
            }
            return Ok(None);
        }
        let path = Path::new(file);
        if path.is_file() {
            return Ok(Some(ResolvedAudio::unowned(path)?));
        }
        Ok(None)
    }

    async fn download_to_scope(
        &self,
        url: &str,
        scope: &ArtifactScope,
    ) -> Result<ResolvedAudio, VoxError> {
        let mut artifact = scope.allocate(suffix_from_url(url));
        let result = self
            .http
            .download_file(url, &artifact.local_path, self.config.max_download_bytes)
            .await;
        if let Err(e) = result {
            scope.release(&artifact);
            return Err(e);
        }
        artifact.refresh_size()?;

        // The URL suffix was a guess; trust the bytes instead.
        self.correct_suffix(&mut artifact, scope)?;
        Ok(artifact)
    }

    fn decode_base64_to_scope(
        &self,
        encoded: &str,
        scope: &ArtifactScope,
    ) -> Result<ResolvedAudio, VoxError> {
        let bytes = BASE64
            .decode(encoded.trim())
            .map_err(|e| VoxError::InvalidAudio(format!("base64 decode failed: {}", e)))?;
        if bytes.len() as u64 > self.config.max_download_bytes {
            return Err(VoxError::SizeLimitExceeded {
                size_bytes: bytes.len() as u64,
                limit_bytes: self.config.max_download_bytes,
            });
        }
        let format = AudioFormat::sniff(&bytes);
        let suffix = format!(".{}", format.extension());
        scope.persist(&bytes, &suffix)
    }

    /// Rename an owned artifact so its extension agrees with its sniffed
    /// format. Downstream tooling keys codec hints off the extension.
    fn correct_suffix(
        &self,
        artifact: &mut ResolvedAudio,
        scope: &ArtifactScope,
    ) -> Result<(), VoxError> {
        let format = AudioFormat::sniff_file(&artifact.local_path)?;
        if format == AudioFormat::Unknown {
            return Ok(());
        }
        let wanted = format.extension();
        let current = artifact
            .local_path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("");
        if current == wanted {
            return Ok(());
        }

        let corrected = scope.allocate(&format!(".{}", wanted));
        std::fs::rename(&artifact.local_path, &corrected.local_path)?;
        let old = std::mem::replace(
            artifact,
            ResolvedAudio {
                local_path: corrected.local_path.clone(),
                owned: true,
                size_bytes: artifact.size_bytes,
            },
        );
        scope.release(&old);
        debug!(path = ?artifact.local_path, "Artifact suffix corrected from payload bytes");
        Ok(())
    }

    fn relative_dirs(&self) -> Vec<PathBuf> {
        let mut dirs = vec![self.data_dir.clone()];
        if let Ok(cwd) = std::env::current_dir() {
            dirs.push(cwd.join("data"));
            dirs.push(cwd);
        }
        dirs
    }

    fn temp_dirs(&self) -> Vec<PathBuf> {
        let mut dirs = vec![std::env::temp_dir()];
        #[cfg(unix)]
        dirs.push(PathBuf::from("/tmp"));
        if let Some(cache) = dirs::cache_dir() {
            dirs.push(cache);
        }
        dirs
    }

    fn system_dirs(&self) -> Vec<PathBuf> {
        let mut dirs = Vec::new();
        if let Some(d) = dirs::download_dir() {
            dirs.push(d);
        }
        if let Some(d) = dirs::document_dir() {
            dirs.push(d);
        }
        if let Some(d) = dirs::desktop_dir() {
            dirs.push(d);
        }
        #[cfg(unix)]
        dirs.push(PathBuf::from("/var/tmp"));
        dirs
    }

    /// Flat filename lookup in a candidate directory list. Never owned:
    /// files found this way belong to whoever put them there.
    fn search_dirs(
        &self,
        reference: &VoiceReference,
        dirs: &[PathBuf],
    ) -> Result<Option<ResolvedAudio>, VoxError> {
        let Some(name) = bare_filename(reference) else {
            return Ok(None);
        };
        for dir in dirs {
            let candidate = dir.join(&name);
            if candidate.is_file() {
                debug!(path = ?candidate, "Reference filename found by directory search");
                return Ok(Some(ResolvedAudio::unowned(&candidate)?));
            }
        }
        Ok(None)
    }

    /// Recursive stem match across the data and temp trees. Hosts sometimes
    /// write the payload with a different extension than they report.
    fn pattern_search(
        &self,
        reference: &VoiceReference,
    ) -> Result<Option<ResolvedAudio>, VoxError> {
        let Some(name) = bare_filename(reference) else {
            return Ok(None);
        };
        let stem = Path::new(&name)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(&name)
            .to_string();
        if stem.is_empty() {
            return Ok(None);
        }

        for root in [self.data_dir.clone(), std::env::temp_dir()] {
            for entry in WalkDir::new(&root)
                .max_depth(4)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
            {
                let matches = entry
                    .path()
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .map(|s| s == stem)
                    .unwrap_or(false);
                if matches {
                    debug!(path = ?entry.path(), "Reference stem found by pattern search");
                    return Ok(Some(ResolvedAudio::unowned(entry.path())?));
                }
            }
        }
        Ok(None)
    }
}

/// Extract a plain filename from the reference, rejecting anything that
/// carries a scheme or directory components.
fn bare_filename(reference: &VoiceReference) -> Option<String> {
    let candidate = reference
        .file
        .as_deref()
        .or(reference.path.as_deref())?;
    if candidate.contains("://") {
        return None;
    }
    let name = Path::new(candidate).file_name()?.to_str()?;
    if name.is_empty() {
        return None;
    }
    Some(name.to_string())
}

fn suffix_from_url(url: &str) -> &'static str {
    let trimmed = url.split(['?', '#']).next().unwrap_or(url);
    let lower = trimmed.to_ascii_lowercase();
    for (ext, suffix) in [
        (".amr", ".amr"),
        (".silk", ".silk"),
        (".slk", ".silk"),
        (".mp3", ".mp3"),
        (".wav", ".wav"),
        (".ogg", ".ogg"),
        (".flac", ".flac"),
        (".m4a", ".m4a"),
    ] {
        if lower.ends_with(ext) {
            return suffix;
        }
    }
    ".audio"
}
