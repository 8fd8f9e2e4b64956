pub mod annex_path;
pub mod obligation;
pub mod period;

pub use annex_path::{AnnexPath, complete_path, normalize_key};
pub use obligation::{Annex, ComplianceStatus, Obligation, ObligationDocument, ValidationError};
pub use period::{Period, PeriodError};
