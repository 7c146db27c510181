use crate::store::error::{Result, StoreError};
use crate::store::traits::Backend;
use async_trait::async_trait;
use std::io;
use std::path::PathBuf;
use tokio::fs;

/// File-per-key backend. Each key becomes one file under `base_path`
/// holding the raw value, so session state survives restarts and stays
/// inspectable with ordinary tools.
pub struct FileStore {
    base_path: PathBuf,
}

impl FileStore {
    pub async fn new(path: impl Into<PathBuf>) -> io::Result<Self> {
        let base_path = path.into();
        fs::create_dir_all(&base_path).await?;
        Ok(Self { base_path })
    }

    fn sanitize_filename(key: &str) -> String {
        key.replace(|c: char| !c.is_alphanumeric() && c != '.' && c != '-', "_")
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.base_path.join(Self::sanitize_filename(key))
    }
}

#[async_trait]
impl Backend for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        match fs::read_to_string(self.path_for(key)).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        fs::write(self.path_for(key), value)
            .await
            .map_err(StoreError::Io)
    }

    async fn remove(&self, key: &str) -> Result<()> {
        match fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    async fn clear(&self) -> Result<()> {
        let mut entries = fs::read_dir(&self.base_path).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                fs::remove_file(entry.path()).await?;
            }
        }
        Ok(())
    }
}
