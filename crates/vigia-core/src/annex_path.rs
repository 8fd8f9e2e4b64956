//! Annex path grammar.
//!
//! A stored annex path is one of:
//!
//! - a complete URL (`https://tenant.sharepoint.com/sites/...`)
//! - a server-relative or absolute path (`/sites/...`, `C:\...`)
//! - a short relative fragment, completed against a configured base path
//! - any of the above ending in `*`, meaning "newest file in this folder whose
//!   name starts with the text before the wildcard"
//!
//! URLs are percent-decoded on parse, so period tokens and cache keys see the
//! same text whether a path was stored as a link or typed by hand.

use std::borrow::Cow;

/// Trailing marker that turns a path into a prefix search.
pub const WILDCARD: char = '*';

/// A parsed annex path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnnexPath {
    /// A single file.
    File(String),
    /// Newest file in `folder` whose name starts with `prefix`.
    Prefix { folder: String, prefix: String },
}

impl AnnexPath {
    /// Parse a stored path. Backslashes are normalised to `/` and URLs are
    /// percent-decoded.
    pub fn parse(raw: &str) -> Self {
        let cleaned = raw.trim().replace('\\', "/");
        let cleaned = if is_url(&cleaned) {
            decode(&cleaned)
        } else {
            cleaned
        };
        if !cleaned.ends_with(WILDCARD) {
            return Self::File(cleaned);
        }
        let stem = cleaned.trim_end_matches(WILDCARD);
        match stem.rfind('/') {
            Some(idx) => Self::Prefix {
                folder: stem[..idx].to_string(),
                prefix: stem[idx + 1..].to_string(),
            },
            None => Self::Prefix {
                folder: String::new(),
                prefix: stem.to_string(),
            },
        }
    }

    pub fn is_prefix(&self) -> bool {
        matches!(self, Self::Prefix { .. })
    }
}

/// Percent-decode `s`; input that does not decode to UTF-8 is returned as is.
pub fn decode(s: &str) -> String {
    urlencoding::decode(s)
        .map(Cow::into_owned)
        .unwrap_or_else(|_| s.to_string())
}

/// True for `http(s)://` URLs.
pub fn is_url(path: &str) -> bool {
    let lower = path.trim_start().to_ascii_lowercase();
    lower.starts_with("https://") || lower.starts_with("http://")
}

/// True for URLs, rooted paths, and Windows drive paths.
pub fn is_complete(path: &str) -> bool {
    let path = path.trim();
    if is_url(path) || path.starts_with('/') {
        return true;
    }
    let bytes = path.as_bytes();
    bytes.len() >= 3 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' && bytes[2] == b'/'
}

/// Complete a path against `base` unless it is already complete.
///
/// An empty fragment resolves to the base itself.
pub fn complete_path(path: &str, base: Option<&str>) -> String {
    let path = path.trim().replace('\\', "/");
    if is_complete(&path) {
        return path;
    }
    match base.map(str::trim).filter(|b| !b.is_empty()) {
        Some(base) => {
            let base = base.replace('\\', "/");
            let base = base.trim_end_matches('/');
            let fragment = path.trim_start_matches("./").trim_start_matches('/');
            if fragment.is_empty() {
                base.to_string()
            } else {
                format!("{base}/{fragment}")
            }
        }
        None => path,
    }
}

/// Cache key for a resolved path: trimmed and lower-cased.
pub fn normalize_key(path: &str) -> String {
    path.trim().to_lowercase()
}

/// Final path segment, used for display in report tables.
pub fn file_name(path: &str) -> &str {
    let trimmed = path.trim().trim_end_matches(['/', '\\']);
    trimmed
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(trimmed)
}
