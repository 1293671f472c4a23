use std::path::PathBuf;

use crate::cipher::SnapshotCipher;
use crate::error::AppError;

/// The on-disk snapshot tree.
///
/// Paths passed in are relative to the root and use `/` separators, as
/// produced by [`crate::path_map`]. Every write goes to a temporary file
/// first and is renamed into place, so a reader never sees a half-written
/// snapshot.
#[derive(Debug, Clone)]
pub struct SnapshotFiles {
    root: PathBuf,
    cipher: SnapshotCipher,
}

impl SnapshotFiles {
    pub fn new(root: impl Into<PathBuf>, cipher: SnapshotCipher) -> Self {
        Self {
            root: root.into(),
            cipher,
        }
    }

    pub fn resolve(&self, relative: &str) -> PathBuf {
        relative
            .split('/')
            .filter(|s| !s.is_empty())
            .fold(self.root.clone(), |path, segment| path.join(segment))
    }

    /// Write page bytes, sealed when a key is configured.
    pub async fn write_snapshot(&self, relative: &str, plaintext: &[u8]) -> Result<(), AppError> {
        let sealed = self.cipher.seal(plaintext)?;
        self.write_atomic(relative, &sealed).await
    }

    /// Write resource bytes verbatim.
    pub async fn write_resource(&self, relative: &str, bytes: &[u8]) -> Result<(), AppError> {
        self.write_atomic(relative, bytes).await
    }

    /// Read and unseal a snapshot. `Ok(None)` when the file does not exist.
    pub async fn read_snapshot(&self, relative: &str) -> Result<Option<Vec<u8>>, AppError> {
        match self.read_raw(relative).await? {
            Some(bytes) => self.cipher.open(&bytes).map(Some),
            None => Ok(None),
        }
    }

    /// The bytes on disk, still sealed if encryption is on.
    pub async fn read_raw(&self, relative: &str) -> Result<Option<Vec<u8>>, AppError> {
        let path = self.resolve(relative);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::StorageError(format!(
                "Failed to read {}: {e}",
                path.display()
            ))),
        }
    }

    /// Put back what [`read_raw`](Self::read_raw) returned earlier. `None`
    /// means the file did not exist, so it is removed.
    pub async fn restore(&self, relative: &str, previous: Option<Vec<u8>>) -> Result<(), AppError> {
        match previous {
            Some(bytes) => self.write_atomic(relative, &bytes).await,
            None => self.remove(relative).await.map(|_| ()),
        }
    }

    /// Delete a file. Returns `false` if it was already gone.
    pub async fn remove(&self, relative: &str) -> Result<bool, AppError> {
        let path = self.resolve(relative);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(AppError::StorageError(format!(
                "Failed to delete {}: {e}",
                path.display()
            ))),
        }
    }

    /// Total size in bytes of every file under the root.
    pub async fn tree_size(&self) -> Result<u64, AppError> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || {
            walkdir::WalkDir::new(&root)
                .into_iter()
                .filter_map(Result::ok)
                .filter(|entry| entry.file_type().is_file())
                .filter_map(|entry| entry.metadata().ok())
                .map(|meta| meta.len())
                .sum()
        })
        .await
        .map_err(|e| AppError::Generic(format!("Size task failed: {e}")))
    }

    async fn write_atomic(&self, relative: &str, bytes: &[u8]) -> Result<(), AppError> {
        let path = self.resolve(relative);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                AppError::StorageError(format!("Failed to create {}: {e}", parent.display()))
            })?;
        }

        let mut tmp = path.clone().into_os_string();
        tmp.push(".part");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, bytes).await.map_err(|e| {
            AppError::StorageError(format!("Failed to write {}: {e}", tmp.display()))
        })?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(AppError::StorageError(format!(
                "Failed to move snapshot into {}: {e}",
                path.display()
            )));
        }
        Ok(())
    }
}
