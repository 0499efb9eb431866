//! Filesystem artifact storage: one directory per job id under a flat base.

use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, warn};

use scrollcap_core::{ArtifactStore, Error, JobId, Result};

/// Filesystem implementation of [`ArtifactStore`].
///
/// Layout: `{base}/{job_id}/capture.webm`. Job directories are created by
/// the capture engine when it finalizes; this store only reads, checks,
/// and deletes.
pub struct FilesystemArtifacts {
    base_path: PathBuf,
}

impl FilesystemArtifacts {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }
}

#[async_trait::async_trait]
impl ArtifactStore for FilesystemArtifacts {
    fn job_dir(&self, id: &JobId) -> PathBuf {
        self.base_path.join(id.as_str())
    }

    fn resolve(&self, rel_path: &str) -> PathBuf {
        self.base_path.join(rel_path)
    }

    async fn exists(&self, rel_path: &str) -> Result<bool> {
        match fs::metadata(self.resolve(rel_path)).await {
            Ok(meta) => Ok(meta.is_file() && meta.len() > 0),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn read(&self, rel_path: &str) -> Result<Vec<u8>> {
        let full = self.resolve(rel_path);
        match fs::read(&full).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::ArtifactMissing(rel_path.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_job(&self, id: &JobId) -> Result<()> {
        let dir = self.job_dir(id);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => {
                debug!(job_id = %id, dir = %dir.display(), "artifact dir removed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn clear(&self) -> Result<u64> {
        let mut removed = 0u64;
        let mut entries = match fs::read_dir(&self.base_path).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if entry.file_type().await?.is_dir() {
                if let Err(e) = fs::remove_dir_all(&path).await {
                    warn!(dir = %path.display(), error = %e, "failed to remove artifact dir");
                } else {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    async fn validate(&self) -> Result<()> {
        let test_dir = self.base_path.join(".health-check");
        let test_file = test_dir.join("test.bin");

        fs::create_dir_all(&test_dir)
            .await
            .map_err(|e| Error::Config(format!("create_dir_all({:?}): {}", test_dir, e)))?;

        let data = b"storage-health-check";
        fs::write(&test_file, data)
            .await
            .map_err(|e| Error::Config(format!("write({:?}): {}", test_file, e)))?;

        let read_back = fs::read(&test_file)
            .await
            .map_err(|e| Error::Config(format!("read({:?}): {}", test_file, e)))?;
        if read_back != data {
            return Err(Error::Config("storage read-back mismatch".to_string()));
        }

        fs::remove_file(&test_file)
            .await
            .map_err(|e| Error::Config(format!("remove_file({:?}): {}", test_file, e)))?;
        let _ = fs::remove_dir(&test_dir).await;

        Ok(())
    }
}
