//! Plain text from annex files, dispatched on the file extension.
//!
//! Extraction never fails: unreadable or unsupported files give an empty
//! string and a warning. Image-only PDFs legitimately come back (nearly) empty.

use std::path::Path;

use tracing::{debug, warn};

use crate::docx::WordDocument;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Pdf,
    Word,
    Text,
    Unsupported,
}

impl ArtifactKind {
    pub fn of(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        match ext.as_str() {
            "pdf" => Self::Pdf,
            "docx" | "docm" => Self::Word,
            "txt" | "csv" | "md" | "log" => Self::Text,
            _ => Self::Unsupported,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TextExtractor {
    /// Stop reading PDFs after this many pages. `None` reads them all.
    pub max_pdf_pages: Option<usize>,
}

impl TextExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extract(&self, path: &Path) -> String {
        let text = match ArtifactKind::of(path) {
            ArtifactKind::Pdf => self.extract_pdf(path),
            ArtifactKind::Word => extract_word(path),
            ArtifactKind::Text => extract_plain(path),
            ArtifactKind::Unsupported => {
                warn!(path = %path.display(), "unsupported annex type, no text extracted");
                return String::new();
            }
        };
        debug!(path = %path.display(), chars = text.chars().count(), "text extracted");
        text
    }

    fn extract_pdf(&self, path: &Path) -> String {
        let doc = match lopdf::Document::load(path) {
            Ok(doc) => doc,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "could not open PDF");
                return String::new();
            }
        };
        let limit = self.max_pdf_pages.unwrap_or(usize::MAX);
        let mut pages = Vec::new();
        for page in doc.get_pages().keys().take(limit) {
            match doc.extract_text(&[*page]) {
                Ok(text) => pages.push(text.trim().to_string()),
                Err(e) => debug!(path = %path.display(), page, error = %e, "page without text"),
            }
        }
        pages.retain(|p| !p.is_empty());
        pages.join("\n")
    }
}

fn extract_word(path: &Path) -> String {
    match WordDocument::open(path) {
        Ok(doc) => doc
            .paragraphs()
            .into_iter()
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect::<Vec<_>>()
            .join("\n"),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "could not open Word document");
            String::new()
        }
    }
}

fn extract_plain(path: &Path) -> String {
    match std::fs::read(path) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "could not read text file");
            String::new()
        }
    }
}
