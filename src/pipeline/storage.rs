use serde::Serialize;
use std::{
    io,
    path::{Component, Path, PathBuf},
};
use tokio::fs;
use tracing::{debug, info};

use crate::crawler::Record;

/// Storage configuration
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Base path for downloaded images
    pub base_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_path: PathBuf::from("downloaded_images"),
        }
    }
}

/// Error type for storage operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid storage path: {0}")]
    InvalidPath(String),
}

impl From<StoreError> for crate::Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Io(e) => crate::Error::Io(e),
            StoreError::InvalidPath(path) => {
                crate::Error::Pipeline(format!("invalid storage path: {}", path))
            }
        }
    }
}

type Result<T> = std::result::Result<T, StoreError>;

/// Where downloaded image bytes end up
pub trait ImageStore: Send + Sync {
    /// Write `bytes` at `relative_path` and return the absolute location
    fn persist(
        &self,
        bytes: &[u8],
        relative_path: &str,
    ) -> impl Future<Output = Result<PathBuf>> + Send;
}

/// Image store writing into a directory on disk
#[derive(Debug, Clone)]
pub struct FsImageStore {
    config: StorageConfig,
}

impl Default for FsImageStore {
    fn default() -> Self {
        Self::new()
    }
}

impl FsImageStore {
    /// Create a new store with default configuration
    pub fn new() -> Self {
        Self {
            config: StorageConfig::default(),
        }
    }

    /// Create a new store with custom configuration
    pub fn with_config(config: StorageConfig) -> Self {
        Self { config }
    }

    pub fn base_path(&self) -> &Path {
        &self.config.base_path
    }

    /// Resolve a relative image path inside the base directory
    fn get_storage_path(&self, relative_path: &str) -> Result<PathBuf> {
        let relative = Path::new(relative_path);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if relative_path.is_empty() || escapes {
            return Err(StoreError::InvalidPath(relative_path.to_string()));
        }
        Ok(std::path::absolute(self.config.base_path.join(relative))?)
    }

    /// Creates necessary directories for storage
    async fn ensure_directories(&self, path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }
}

impl ImageStore for FsImageStore {
    async fn persist(&self, bytes: &[u8], relative_path: &str) -> Result<PathBuf> {
        let storage_path = self.get_storage_path(relative_path)?;
        self.ensure_directories(&storage_path).await?;
        fs::write(&storage_path, bytes).await?;
        debug!("Stored {} bytes at {}", bytes.len(), storage_path.display());
        Ok(storage_path)
    }
}

/// Write emitted records as a pretty-printed JSON array
pub async fn write_feed<R: Serialize>(path: &Path, records: &[R]) -> crate::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await?;
    }
    let json = serde_json::to_string_pretty(records)?;
    fs::write(path, json).await?;
    info!("Wrote {} record(s) to {}", records.len(), path.display());
    Ok(())
}

/// Load a feed written by [`write_feed`]
pub async fn load_feed(path: &Path) -> crate::Result<Vec<Record>> {
    let json = fs::read_to_string(path).await?;
    Ok(serde_json::from_str(&json)?)
}
