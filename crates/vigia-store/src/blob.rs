//! Blob stores hold the annex files that evidence each obligation.
//!
//! A path handed to a blob store is already complete: period tokens have been
//! rewritten and relative fragments joined to the configured base path.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;
use vigia_core::annex_path;

use crate::StoreError;

/// A file listed in a blob store folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobEntry {
    pub name: String,
    /// Path accepted by [`BlobStore::download`].
    pub path: String,
    pub modified_at: DateTime<Utc>,
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Fetch a file's bytes. `Ok(None)` when the file does not exist.
    async fn download(&self, path: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Files directly inside `folder`. A missing folder lists as empty.
    async fn list_folder(&self, folder: &str) -> Result<Vec<BlobEntry>, StoreError>;

    async fn exists(&self, path: &str) -> Result<bool, StoreError>;
}

// ── Local filesystem ──

/// Blob store over a local directory tree.
///
/// Relative and server-relative paths are resolved under `root`; absolute
/// paths that already exist are used as they are. URLs never resolve locally.
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn locate(&self, path: &str) -> Option<PathBuf> {
        if annex_path::is_url(path) {
            return None;
        }
        let candidate = Path::new(path);
        if candidate.is_absolute() && (candidate.starts_with(&self.root) || candidate.exists()) {
            return Some(candidate.to_path_buf());
        }
        Some(self.root.join(path.trim_start_matches('/')))
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    fn name(&self) -> &str {
        "local"
    }

    async fn download(&self, path: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let Some(file) = self.locate(path) else {
            debug!(path, "url path has no local counterpart");
            return Ok(None);
        };
        match tokio::fs::read(&file).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::NotFound | std::io::ErrorKind::IsADirectory
                ) =>
            {
                Ok(None)
            }
            Err(e) => Err(StoreError::io(file, e)),
        }
    }

    async fn list_folder(&self, folder: &str) -> Result<Vec<BlobEntry>, StoreError> {
        let Some(dir) = self.locate(folder) else {
            return Ok(Vec::new());
        };
        let mut reader = match tokio::fs::read_dir(&dir).await {
            Ok(r) => r,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io(dir, e)),
        };

        let mut entries = Vec::new();
        while let Some(entry) = reader
            .next_entry()
            .await
            .map_err(|e| StoreError::io(&dir, e))?
        {
            let meta = entry
                .metadata()
                .await
                .map_err(|e| StoreError::io(entry.path(), e))?;
            if !meta.is_file() {
                continue;
            }
            let modified_at = meta
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
            let name = entry.file_name().to_string_lossy().into_owned();
            let path = format!("{}/{}", folder.trim_end_matches('/'), name);
            entries.push(BlobEntry {
                name,
                path,
                modified_at,
            });
        }
        Ok(entries)
    }

    async fn exists(&self, path: &str) -> Result<bool, StoreError> {
        let Some(file) = self.locate(path) else {
            return Ok(false);
        };
        tokio::fs::try_exists(&file)
            .await
            .map_err(|e| StoreError::io(file, e))
    }
}
