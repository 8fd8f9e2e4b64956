//! Monthly obligation reconciliation.
//!
//! [`FileLocator`] turns stored annex paths into local files for one batch,
//! [`ObligationReconciler`] decides each obligation's observation, and
//! [`ReportJob`] drives a whole report document from load to save.

pub mod job;
pub mod locator;
pub mod reconcile;
pub mod reference;

pub use job::{JobError, JobSummary, ReportJob};
pub use locator::{FileLocator, LocalFile, LocatorSettings, LocatorStats};
pub use reconcile::{BatchReport, ItemReport, ObligationReconciler, Outcome, Reconciled};
pub use reference::{ReferenceObservationSet, load_references};
