//! Storage layer: report documents (JSON directory, DuckDB, memory) and annex blobs.

mod error;
pub use error::StoreError;

pub mod blob;
pub mod document;

pub use blob::{BlobEntry, BlobStore, LocalBlobStore};
pub use document::{DocumentKey, DocumentStore, JsonDirStore, MemoryDocumentStore};

#[cfg(feature = "duckdb")]
mod duck;
#[cfg(feature = "duckdb")]
pub use duck::DuckDocumentStore;
