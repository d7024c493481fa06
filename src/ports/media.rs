/// Media pipeline port trait
///
/// Transforms an inbound artifact into the canonical mono MP3 form the ASR
/// providers expect. Implementation: ffmpeg/ffprobe subprocesses.
use crate::error::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Conservative duration assumed when probing fails (seconds)
pub const PROBE_FALLBACK_SECS: f64 = 600.0;

/// Registry of temporary files created while processing one job.
///
/// Every path produced by the pipeline is registered here; the orchestrator
/// clears the set in a finally-equivalent block on every exit path.
#[derive(Debug, Default)]
pub struct TempSet {
    paths: Mutex<Vec<PathBuf>>,
}

impl TempSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a path for deletion at cleanup time
    pub fn register(&self, path: &Path) {
        self.paths.lock().unwrap().push(path.to_path_buf());
    }

    /// Number of registered paths (for tests)
    pub fn len(&self) -> usize {
        self.paths.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.lock().unwrap().is_empty()
    }

    /// Remove every registered file. Missing files are ignored.
    pub async fn cleanup(&self) {
        let paths: Vec<PathBuf> = self.paths.lock().unwrap().drain(..).collect();
        for path in paths {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    log::warn!("Failed to remove temp file {}: {}", path.display(), e);
                }
            }
        }
    }
}

/// Port trait for the media pipeline
#[async_trait]
pub trait MediaPort: Send + Sync {
    /// Detect video vs audio, extract the audio track if needed, and
    /// transcode to ASR-ready mono MP3. Produced paths are registered in
    /// `temps`.
    async fn prepare(&self, input: &Path, temps: &TempSet) -> Result<PathBuf>;

    /// Probe duration in seconds. Probe failure is non-fatal: logs a warning
    /// and returns `PROBE_FALLBACK_SECS`.
    async fn duration(&self, path: &Path) -> f64;

    /// Split into ⌈duration/chunk_secs⌉ equal-interval chunks; returns the
    /// input path unchanged when it fits in one chunk, and falls back to the
    /// single original path on subprocess failure.
    async fn split(&self, path: &Path, chunk_secs: u32, temps: &TempSet) -> Vec<PathBuf>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_tempset_cleanup_removes_files() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("scratch.mp3");
        tokio::fs::write(&file, b"data").await.unwrap();

        let temps = TempSet::new();
        temps.register(&file);
        assert_eq!(temps.len(), 1);

        temps.cleanup().await;
        assert!(!file.exists());
        assert!(temps.is_empty());
    }

    #[tokio::test]
    async fn test_tempset_tolerates_missing_files() {
        let temps = TempSet::new();
        temps.register(Path::new("/tmp/talkscribe-definitely-not-there.mp3"));
        temps.cleanup().await;
        assert!(temps.is_empty());
    }
}
