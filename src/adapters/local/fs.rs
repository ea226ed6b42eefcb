use crate::error::CheckpointError;
use crate::ports::checkpoint::CheckpointStorage;
use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// Stores each checkpoint as `<root>/<key>.json`.
#[derive(Debug, Clone)]
pub struct FsCheckpointStorage {
    root: PathBuf,
}

impl FsCheckpointStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, CheckpointError> {
        let valid = !key.is_empty()
            && key.split('/').all(|segment| {
                !segment.is_empty() && segment != "." && segment != ".." && !segment.contains('\\')
            });
        if !valid {
            return Err(CheckpointError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(format!("{key}.json")))
    }
}

#[async_trait]
impl CheckpointStorage for FsCheckpointStorage {
    async fn load(&self, key: &str) -> io::Result<Option<Vec<u8>>> {
        let path = self
            .path_for(key)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn save(&self, key: &str, payload: &[u8]) -> Result<(), CheckpointError> {
        let path = self.path_for(key)?;
        let persist = |source: io::Error| CheckpointError::Persist {
            key: key.to_string(),
            source,
        };

        let parent = path.parent().unwrap_or(&self.root);
        tokio::fs::create_dir_all(parent).await.map_err(persist)?;

        // Write next to the target so the rename stays on one filesystem.
        let tmp = parent.join(format!(".{}.tmp", uuid::Uuid::new_v4()));
        let written = async {
            let mut file = tokio::fs::File::create(&tmp).await?;
            file.write_all(payload).await?;
            file.sync_all().await?;
            drop(file);
            tokio::fs::rename(&tmp, &path).await
        }
        .await;

        if let Err(e) = written {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(persist(e));
        }
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), CheckpointError> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(CheckpointError::Persist {
                key: key.to_string(),
                source,
            }),
        }
    }
}

/// Remove a file, logging instead of failing. A missing file is fine.
pub async fn remove_quietly(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!("removed {}", path.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!("unable to remove {}: {}", path.display(), e),
    }
}

pub async fn copy_file(from: &Path, to: &Path) -> io::Result<()> {
    if let Some(parent) = to.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::copy(from, to).await.map(|_| ())
}

/// Move `from` to `to`, falling back to copy-then-delete across filesystems.
pub async fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    if let Some(parent) = to.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    match tokio::fs::rename(from, to).await {
        Ok(()) => Ok(()),
        Err(_) => {
            tokio::fs::copy(from, to).await?;
            tokio::fs::remove_file(from).await
        }
    }
}
