//! Word documents: a minimal OOXML model, annex text extraction, and the
//! heuristic that finds and refills the obligations table in a rendered report.

mod error;
pub use error::DocxError;

pub mod anchor;
pub mod docx;
pub mod extract;
pub mod xml;

pub use anchor::{
    AnchorConfig, AnchorMatch, AnchorOutcome, AnchorStrategy, Column, ObligationRow, TableAnchor,
};
pub use docx::{Block, WordDocument};
pub use extract::{ArtifactKind, TextExtractor};
pub use xml::{Element, Node};
