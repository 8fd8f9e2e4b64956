//! Annex path resolution with a per-batch download cache.
//!
//! One `FileLocator` serves one reconciliation batch. Every downloaded file
//! lands in a temporary directory owned by the locator; `cleanup` (or drop)
//! removes it. Lookups are keyed by the trimmed, lower-cased resolved path,
//! so two obligations citing the same annex cause a single fetch. Misses are
//! cached too.
//!
//! Nothing here fails: store errors, timeouts and missing files all come
//! back as `None` with a log line.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tracing::{debug, info, warn};
use vigia_core::annex_path::{self, AnnexPath};
use vigia_core::{Period, complete_path, normalize_key};
use vigia_store::{BlobEntry, BlobStore};

#[derive(Debug, Clone)]
pub struct LocatorSettings {
    /// Prefix for short relative annex paths.
    pub base_path: Option<String>,
    /// Limit for each list or download call.
    pub call_timeout: Duration,
}

impl Default for LocatorSettings {
    fn default() -> Self {
        Self {
            base_path: None,
            call_timeout: Duration::from_secs(60),
        }
    }
}

/// A downloaded annex, valid until the locator is cleaned up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFile {
    pub path: PathBuf,
    /// Store path the file was fetched from.
    pub source: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LocatorStats {
    pub fetches: usize,
    pub cache_hits: usize,
    pub misses: usize,
}

pub struct FileLocator {
    store: Arc<dyn BlobStore>,
    settings: LocatorSettings,
    files: HashMap<String, Option<LocalFile>>,
    prefixes: HashMap<String, Option<String>>,
    scratch: Option<TempDir>,
    created: Vec<PathBuf>,
    stats: LocatorStats,
}

impl FileLocator {
    pub fn new(store: Arc<dyn BlobStore>, settings: LocatorSettings) -> Self {
        Self {
            store,
            settings,
            files: HashMap::new(),
            prefixes: HashMap::new(),
            scratch: None,
            created: Vec::new(),
            stats: LocatorStats::default(),
        }
    }

    pub fn stats(&self) -> LocatorStats {
        self.stats
    }

    /// Resolve a stored annex path for `period`.
    ///
    /// The path is parsed (URLs decoded) and its period tokens rewritten, then
    /// it is either completed against the base path and downloaded, or (for a
    /// trailing wildcard) searched by prefix.
    pub async fn resolve(&mut self, path: &str, period: Period) -> Option<LocalFile> {
        match AnnexPath::parse(path) {
            AnnexPath::File(file) => {
                let full = self.complete(&period.substitute_tokens(&file));
                self.download(&full).await
            }
            AnnexPath::Prefix { folder, prefix } => {
                let prefix = period.substitute_tokens(&prefix);
                self.resolve_by_prefix(&folder, &prefix, period).await
            }
        }
    }

    /// The location `resolve` looks up for a stored path, for reporting.
    pub fn lookup_path(&self, path: &str, period: Period) -> String {
        match AnnexPath::parse(path) {
            AnnexPath::File(file) => self.complete(&period.substitute_tokens(&file)),
            AnnexPath::Prefix { folder, prefix } => {
                let prefix = period.substitute_tokens(&prefix);
                let folder = self.complete(&period.substitute_tokens(&folder));
                if folder.is_empty() {
                    format!("{prefix}{}", annex_path::WILDCARD)
                } else {
                    format!("{folder}/{prefix}{}", annex_path::WILDCARD)
                }
            }
        }
    }

    fn complete(&self, path: &str) -> String {
        complete_path(path, self.settings.base_path.as_deref())
    }

    /// Newest file in `folder` whose name starts with `prefix`.
    ///
    /// Case-sensitive matches win over case-insensitive ones.
    pub async fn resolve_by_prefix(
        &mut self,
        folder: &str,
        prefix: &str,
        period: Period,
    ) -> Option<LocalFile> {
        let folder = self.complete(&period.substitute_tokens(folder));
        let key = normalize_key(&format!("{folder}/{prefix}{}", annex_path::WILDCARD));

        let chosen = match self.prefixes.get(&key) {
            Some(cached) => {
                self.stats.cache_hits += 1;
                cached.clone()
            }
            None => {
                let chosen = self.search_folder(&folder, prefix).await;
                self.prefixes.insert(key, chosen.clone());
                chosen
            }
        };
        match chosen {
            Some(path) => self.download(&path).await,
            None => None,
        }
    }

    async fn search_folder(&mut self, folder: &str, prefix: &str) -> Option<String> {
        let listing = tokio::time::timeout(self.settings.call_timeout, self.store.list_folder(folder)).await;
        let entries = match listing {
            Ok(Ok(entries)) => entries,
            Ok(Err(e)) => {
                warn!(folder, store = self.store.name(), error = %e, "folder listing failed");
                self.stats.misses += 1;
                return None;
            }
            Err(_) => {
                warn!(folder, store = self.store.name(), "folder listing timed out");
                self.stats.misses += 1;
                return None;
            }
        };

        match newest_with_prefix(&entries, prefix) {
            Some(entry) => {
                debug!(folder, prefix, file = %entry.name, "prefix matched");
                Some(entry.path.clone())
            }
            None => {
                info!(folder, prefix, candidates = entries.len(), "no file matches prefix");
                self.stats.misses += 1;
                None
            }
        }
    }

    /// Fetch `path` once per batch; later calls return the cached result.
    pub async fn download(&mut self, path: &str) -> Option<LocalFile> {
        let key = normalize_key(path);
        if let Some(cached) = self.files.get(&key) {
            self.stats.cache_hits += 1;
            debug!(path, hit = cached.is_some(), "download cache");
            return cached.clone();
        }

        self.stats.fetches += 1;
        let fetched = tokio::time::timeout(self.settings.call_timeout, self.store.download(path)).await;
        let result = match fetched {
            Ok(Ok(Some(bytes))) => self.materialize(path, &bytes),
            Ok(Ok(None)) => {
                info!(path, store = self.store.name(), "annex not found");
                None
            }
            Ok(Err(e)) => {
                warn!(path, store = self.store.name(), error = %e, "annex download failed");
                None
            }
            Err(_) => {
                warn!(path, store = self.store.name(), timeout_secs = self.settings.call_timeout.as_secs(), "annex download timed out");
                None
            }
        };
        if result.is_none() {
            self.stats.misses += 1;
        }
        self.files.insert(key, result.clone());
        result
    }

    fn materialize(&mut self, source: &str, bytes: &[u8]) -> Option<LocalFile> {
        if self.scratch.is_none() {
            match tempfile::Builder::new().prefix("vigia-annexes-").tempdir() {
                Ok(dir) => self.scratch = Some(dir),
                Err(e) => {
                    warn!(error = %e, "could not create scratch directory");
                    return None;
                }
            }
        }
        let dir = self.scratch.as_ref()?.path();
        let name = format!("{:03}_{}", self.created.len(), scratch_name(source));
        let path = dir.join(name);
        if let Err(e) = std::fs::write(&path, bytes) {
            warn!(path = %path.display(), error = %e, "could not write annex copy");
            return None;
        }
        debug!(source, local = %path.display(), bytes = bytes.len(), "annex downloaded");
        self.created.push(path.clone());
        Some(LocalFile {
            path,
            source: source.to_string(),
        })
    }

    /// Delete every file fetched in this batch and forget the cache.
    ///
    /// Safe to call more than once.
    pub fn cleanup(&mut self) {
        self.files.clear();
        self.prefixes.clear();
        let removed = self.created.len();
        self.created.clear();
        if let Some(dir) = self.scratch.take() {
            let location = dir.path().to_path_buf();
            if let Err(e) = dir.close() {
                warn!(dir = %location.display(), error = %e, "scratch cleanup failed");
            }
            info!(files = removed, "annex scratch directory removed");
        }
    }

    /// Location of the scratch directory, if any file was fetched.
    pub fn scratch_dir(&self) -> Option<&Path> {
        self.scratch.as_ref().map(TempDir::path)
    }
}

impl Drop for FileLocator {
    fn drop(&mut self) {
        self.cleanup();
    }
}

fn newest_with_prefix<'a>(entries: &'a [BlobEntry], prefix: &str) -> Option<&'a BlobEntry> {
    let exact = entries
        .iter()
        .filter(|e| e.name.starts_with(prefix))
        .max_by_key(|e| e.modified_at);
    if exact.is_some() {
        return exact;
    }
    let lower = prefix.to_lowercase();
    entries
        .iter()
        .filter(|e| e.name.to_lowercase().starts_with(&lower))
        .max_by_key(|e| e.modified_at)
}

/// File name for the scratch copy: last path segment without any query
/// string, restricted to characters safe on every filesystem.
fn scratch_name(source: &str) -> String {
    let name = annex_path::file_name(source.split(['?', '#']).next().unwrap_or(source));
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
        .collect();
    if cleaned.trim_matches(['.', '_']).is_empty() {
        "annex".to_string()
    } else {
        cleaned
    }
}
