use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::info;

use super::KeyValueStore;
use crate::error::{Error, Result};

/// File-backed store: one `<key>.json` file per key under a data directory.
///
/// Writes go through a temp file + rename so a crash mid-write never leaves
/// a half-written blob behind.
pub struct FileStore {
    data_dir: PathBuf,
}

impl FileStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.data_dir.join(format!("{key}.json"))
    }

    async fn ensure_data_dir(&self) -> Result<()> {
        if !self.data_dir.exists() {
            tokio::fs::create_dir_all(&self.data_dir)
                .await
                .map_err(|e| {
                    Error::persistence(format!(
                        "failed to create data directory {}: {e}",
                        self.data_dir.display()
                    ))
                })?;
            info!("created data directory: {}", self.data_dir.display());
        }
        Ok(())
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key);
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::persistence(format!(
                "failed to read {}: {e}",
                path.display()
            ))),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.ensure_data_dir().await?;

        let path = self.path_for(key);
        let tmp = self.data_dir.join(format!(".{key}.json.tmp"));
        tokio::fs::write(&tmp, value).await.map_err(|e| {
            Error::persistence(format!("failed to write {}: {e}", tmp.display()))
        })?;
        tokio::fs::rename(&tmp, &path).await.map_err(|e| {
            Error::persistence(format!("failed to replace {}: {e}", path.display()))
        })?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let path = self.path_for(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::persistence(format!(
                "failed to remove {}: {e}",
                path.display()
            ))),
        }
    }
}
