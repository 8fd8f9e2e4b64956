//! Report document store keyed by (year, month, section, subsection).
//!
//! Documents are opaque JSON values; callers decide their shape. Writes can
//! keep the previous version as a backup before overwriting.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info};
use vigia_core::Period;

use crate::StoreError;

/// Identity of one stored report document.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentKey {
    pub period: Period,
    pub section: String,
    pub subsection: String,
}

impl DocumentKey {
    pub fn new(period: Period, section: impl Into<String>, subsection: impl Into<String>) -> Self {
        Self {
            period,
            section: section.into(),
            subsection: subsection.into(),
        }
    }

    /// Same section and subsection in another month.
    pub fn for_period(&self, period: Period) -> Self {
        Self {
            period,
            ..self.clone()
        }
    }
}

impl fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.period, self.section)?;
        if !self.subsection.is_empty() {
            write!(f, "/{}", self.subsection)?;
        }
        Ok(())
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetch a document. `Ok(None)` when nothing is stored under `key`.
    async fn get(&self, key: &DocumentKey) -> Result<Option<Value>, StoreError>;

    /// Store a document, preserving the previous version first when `backup` is set.
    async fn put(&self, key: &DocumentKey, document: &Value, backup: bool)
    -> Result<(), StoreError>;
}

// ── JSON directory store ──

/// One JSON file per document under `{root}/{year}/{MM}/{section}/{subsection}.json`.
///
/// Backups are renamed to `{subsection}.backup-{YYYYMMDDTHHMMSS}.json` next to
/// the live file.
pub struct JsonDirStore {
    root: PathBuf,
}

impl JsonDirStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn folder(&self, key: &DocumentKey) -> PathBuf {
        self.root
            .join(key.period.year().to_string())
            .join(format!("{:02}", key.period.month()))
            .join(sanitize(&key.section))
    }

    fn stem(key: &DocumentKey) -> String {
        if key.subsection.trim().is_empty() {
            "index".to_string()
        } else {
            sanitize(&key.subsection)
        }
    }

    /// Path of the live document file for `key`.
    pub fn document_path(&self, key: &DocumentKey) -> PathBuf {
        self.folder(key).join(format!("{}.json", Self::stem(key)))
    }

    async fn backup(&self, key: &DocumentKey, live: &Path) -> Result<Option<PathBuf>, StoreError> {
        if !tokio::fs::try_exists(live)
            .await
            .map_err(|e| StoreError::io(live, e))?
        {
            return Ok(None);
        }
        let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%S").to_string();
        let stem = Self::stem(key);
        let folder = self.folder(key);
        let mut target = folder.join(format!("{stem}.backup-{stamp}.json"));
        let mut n = 1;
        while tokio::fs::try_exists(&target)
            .await
            .map_err(|e| StoreError::io(&target, e))?
        {
            target = folder.join(format!("{stem}.backup-{stamp}-{n}.json"));
            n += 1;
        }
        tokio::fs::rename(live, &target)
            .await
            .map_err(|e| StoreError::io(live, e))?;
        Ok(Some(target))
    }
}

/// Replace path separators so a section name stays a single path component.
fn sanitize(name: &str) -> String {
    name.trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' => '_',
            c => c,
        })
        .collect()
}

#[async_trait]
impl DocumentStore for JsonDirStore {
    async fn get(&self, key: &DocumentKey) -> Result<Option<Value>, StoreError> {
        let path = self.document_path(key);
        let bytes = match tokio::fs::read(&path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(key = %key, path = %path.display(), "document not stored");
                return Ok(None);
            }
            Err(e) => return Err(StoreError::io(&path, e)),
        };
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    async fn put(
        &self,
        key: &DocumentKey,
        document: &Value,
        backup: bool,
    ) -> Result<(), StoreError> {
        let folder = self.folder(key);
        tokio::fs::create_dir_all(&folder)
            .await
            .map_err(|e| StoreError::io(&folder, e))?;

        let live = self.document_path(key);
        if backup && let Some(saved) = self.backup(key, &live).await? {
            info!(key = %key, backup = %saved.display(), "previous document backed up");
        }

        let tmp = live.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(document)?;
        tokio::fs::write(&tmp, body)
            .await
            .map_err(|e| StoreError::io(&tmp, e))?;
        tokio::fs::rename(&tmp, &live)
            .await
            .map_err(|e| StoreError::io(&live, e))?;
        info!(key = %key, path = %live.display(), "document stored");
        Ok(())
    }
}

// ── In-memory store ──

/// Process-local store for tests and dry runs. Backups are kept in insertion order.
#[derive(Default)]
pub struct MemoryDocumentStore {
    documents: Mutex<HashMap<DocumentKey, Value>>,
    backups: Mutex<Vec<(DocumentKey, Value)>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a document without going through `put`.
    pub fn insert(&self, key: DocumentKey, document: Value) {
        lock(&self.documents).insert(key, document);
    }

    /// Backed-up versions of `key`, oldest first.
    pub fn backups_of(&self, key: &DocumentKey) -> Vec<Value> {
        lock(&self.backups)
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
            .collect()
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get(&self, key: &DocumentKey) -> Result<Option<Value>, StoreError> {
        Ok(lock(&self.documents).get(key).cloned())
    }

    async fn put(
        &self,
        key: &DocumentKey,
        document: &Value,
        backup: bool,
    ) -> Result<(), StoreError> {
        let previous = lock(&self.documents).insert(key.clone(), document.clone());
        if backup && let Some(prev) = previous {
            lock(&self.backups).push((key.clone(), prev));
        }
        Ok(())
    }
}
