use super::{StorageBackend, StorageError, StorageKind};
use async_trait::async_trait;
use chrono::Local;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Artifacts kept on the local filesystem under `{base}/{YYYYMMDD}/{name}`.
pub struct LocalStorage {
    base_path: PathBuf,
}

impl LocalStorage {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    /// Absolute paths are used as-is; relative ones are legacy values that
    /// were stored relative to the base directory.
    fn resolve_path(&self, path: &str) -> Result<PathBuf, StorageError> {
        if path.is_empty() {
            return Err(StorageError::InvalidPath("empty path".to_string()));
        }
        let path = Path::new(path);
        if path.is_absolute() {
            Ok(path.to_path_buf())
        } else {
            Ok(self.base_path.join(path))
        }
    }
}

#[async_trait]
impl StorageBackend for LocalStorage {
    fn kind(&self) -> StorageKind {
        StorageKind::Local
    }

    async fn save(&self, name: &str, artifact: &Path) -> Result<String, StorageError> {
        if name.is_empty() || name.contains('/') || name.contains('\\') {
            return Err(StorageError::InvalidPath(name.to_string()));
        }

        let dir = self.base_path.join(Local::now().format("%Y%m%d").to_string());
        tokio::fs::create_dir_all(&dir).await?;
        let dir = tokio::fs::canonicalize(&dir).await?;
        let target = dir.join(name);

        let bytes = tokio::fs::copy(artifact, &target).await?;
        info!("Stored {} bytes at {:?}", bytes, target);

        Ok(target.to_string_lossy().to_string())
    }

    async fn fetch(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        let full_path = self.resolve_path(path)?;
        Ok(tokio::fs::read(&full_path).await?)
    }

    async fn delete(&self, path: &str) -> Result<(), StorageError> {
        let full_path = self.resolve_path(path)?;
        match tokio::fs::remove_file(&full_path).await {
            Ok(()) => {
                info!("Deleted {:?}", full_path);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("{:?} already absent", full_path);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
