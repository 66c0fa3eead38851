use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::{ResolvedAudio, VoxError};

/// Factory for per-ingestion scratch scopes.
///
/// Verifies the scratch root is writable once at construction and falls
/// back to the system temp directory when it is not, so allocation inside
/// a running pipeline never fails on a bad configured path.
pub struct ArtifactStore {
    scratch_dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(scratch_root: &Path) -> Self {
        let scratch_dir = match probe_writable(scratch_root) {
            Ok(()) => scratch_root.to_path_buf(),
            Err(e) => {
                let fallback = std::env::temp_dir().join("voxpipe_scratch");
                warn!(
                    requested = ?scratch_root,
                    fallback = ?fallback,
                    error = %e,
                    "Scratch root not writable, using fallback"
                );
                let _ = std::fs::create_dir_all(&fallback);
                fallback
            }
        };

        info!(scratch_dir = ?scratch_dir, "Artifact store initialized");
        Self { scratch_dir }
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    /// Open a new scope. Artifacts allocated through it are deleted when the
    /// scope is dropped, whichever way the pipeline run ends.
    pub fn scope(&self) -> ArtifactScope {
        ArtifactScope {
            scratch_dir: self.scratch_dir.clone(),
            owned: Mutex::new(Vec::new()),
        }
    }
}

fn probe_writable(dir: &Path) -> Result<(), VoxError> {
    std::fs::create_dir_all(dir)?;
    let probe = dir.join(format!(".probe_{}", Uuid::new_v4().simple()));
    std::fs::write(&probe, b"ok")?;
    std::fs::remove_file(&probe)?;
    Ok(())
}

/// Tracks scratch artifacts for one pipeline run.
///
/// Cleanup lives in `Drop`, not in an explicit call, so it also runs when
/// the owning task is cancelled or a future is dropped mid-await.
pub struct ArtifactScope {
    scratch_dir: PathBuf,
    owned: Mutex<Vec<PathBuf>>,
}

impl ArtifactScope {
    /// Reserve a fresh scratch path with the given suffix. The file is not
    /// created; the path is registered for cleanup regardless.
    pub fn allocate(&self, suffix: &str) -> ResolvedAudio {
        let name = format!("voice_{}{}", Uuid::new_v4().simple(), suffix);
        let path = self.scratch_dir.join(name);
        self.owned.lock().push(path.clone());
        debug!(path = ?path, "Scratch artifact allocated");
        ResolvedAudio {
            local_path: path,
            owned: true,
            size_bytes: 0,
        }
    }

    /// Write a byte payload into a fresh scratch artifact.
    pub fn persist(&self, bytes: &[u8], suffix: &str) -> Result<ResolvedAudio, VoxError> {
        let mut artifact = self.allocate(suffix);
        std::fs::write(&artifact.local_path, bytes)?;
        artifact.size_bytes = bytes.len() as u64;
        Ok(artifact)
    }

    /// Delete one artifact early and drop it from the cleanup list.
    /// Safe to call twice; unowned files are never touched.
    pub fn release(&self, audio: &ResolvedAudio) {
        if !audio.owned {
            return;
        }
        let mut owned = self.owned.lock();
        if let Some(pos) = owned.iter().position(|p| p == &audio.local_path) {
            owned.remove(pos);
        }
        remove_quietly(&audio.local_path);
    }

    /// Number of artifacts still registered for cleanup.
    pub fn owned_count(&self) -> usize {
        self.owned.lock().len()
    }
}

impl Drop for ArtifactScope {
    fn drop(&mut self) {
        let owned = std::mem::take(&mut *self.owned.lock());
        if owned.is_empty() {
            return;
        }
        debug!(count = owned.len(), "Cleaning up scratch artifacts");
        for path in owned {
            remove_quietly(&path);
        }
    }
}

fn remove_quietly(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!(path = ?path, "Scratch artifact removed"),
        // Already gone is fine; the goal is absence.
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = ?path, error = %e, "Failed to remove scratch artifact"),
    }
}
