//! One monthly report section, from stored document to saved result.

use std::sync::Arc;

use tracing::{info, warn};
use vigia_ai::ObservationSynthesizer;
use vigia_core::ObligationDocument;
use vigia_docs::TextExtractor;
use vigia_store::{BlobStore, DocumentKey, DocumentStore, StoreError};

use crate::locator::{FileLocator, LocatorSettings, LocatorStats};
use crate::reconcile::{BatchReport, ObligationReconciler};
use crate::reference::{self, ReferenceObservationSet};

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("document store error: {0}")]
    Store(#[from] StoreError),

    #[error("no obligation document stored for {0}")]
    MissingDocument(DocumentKey),

    #[error("document {key} is not a valid obligation document: {source}")]
    Malformed {
        key: DocumentKey,
        source: serde_json::Error,
    },

    #[error("could not serialize document {key}: {source}")]
    Serialize {
        key: DocumentKey,
        source: serde_json::Error,
    },
}

#[derive(Debug)]
pub struct JobSummary {
    pub key: DocumentKey,
    pub document: ObligationDocument,
    pub report: BatchReport,
    pub locator: LocatorStats,
    /// Obligations with approved history in earlier months.
    pub reference_items: usize,
    /// False for dry runs.
    pub saved: bool,
}

pub struct ReportJob {
    documents: Arc<dyn DocumentStore>,
    blobs: Arc<dyn BlobStore>,
    synthesizer: Arc<ObservationSynthesizer>,
    extractor: TextExtractor,
    locator_settings: LocatorSettings,
    reference_months: usize,
    dry_run: bool,
}

impl ReportJob {
    pub fn new(
        documents: Arc<dyn DocumentStore>,
        blobs: Arc<dyn BlobStore>,
        synthesizer: Arc<ObservationSynthesizer>,
    ) -> Self {
        Self {
            documents,
            blobs,
            synthesizer,
            extractor: TextExtractor::new(),
            locator_settings: LocatorSettings::default(),
            reference_months: reference::DEFAULT_MONTHS_BACK,
            dry_run: false,
        }
    }

    pub fn with_locator_settings(mut self, settings: LocatorSettings) -> Self {
        self.locator_settings = settings;
        self
    }

    pub fn with_extractor(mut self, extractor: TextExtractor) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn with_reference_months(mut self, months: usize) -> Self {
        self.reference_months = months;
        self
    }

    /// Reconcile without writing the result back.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Load the stored obligation document. Absent or malformed is fatal.
    pub async fn load_document(&self, key: &DocumentKey) -> Result<ObligationDocument, JobError> {
        let value = self
            .documents
            .get(key)
            .await?
            .ok_or_else(|| JobError::MissingDocument(key.clone()))?;
        let doc: ObligationDocument =
            serde_json::from_value(value).map_err(|source| JobError::Malformed {
                key: key.clone(),
                source,
            })?;
        if let Err(e) = doc.validate() {
            // Individual bad obligations are passed through by the batch.
            warn!(key = %key, error = %e, "document has invalid obligations");
        }
        Ok(doc)
    }

    pub async fn run(&self, key: &DocumentKey) -> Result<JobSummary, JobError> {
        let mut document = self.load_document(key).await?;
        info!(key = %key, obligations = document.obligations.len(), "report job started");

        let references: ReferenceObservationSet =
            reference::load_references(self.documents.as_ref(), key, self.reference_months).await;

        let locator = FileLocator::new(self.blobs.clone(), self.locator_settings.clone());
        let mut reconciler =
            ObligationReconciler::new(locator, self.extractor.clone(), self.synthesizer.clone());

        let obligations = std::mem::take(&mut document.obligations);
        let (obligations, report) = reconciler
            .reconcile_all(obligations, &references, key.period)
            .await;
        let locator_stats = reconciler.locator().stats();
        reconciler.cleanup();
        document.obligations = obligations;

        let saved = if self.dry_run {
            info!(key = %key, "dry run, document not saved");
            false
        } else {
            let value = serde_json::to_value(&document).map_err(|source| JobError::Serialize {
                key: key.clone(),
                source,
            })?;
            self.documents.put(key, &value, true).await?;
            info!(key = %key, "document saved with backup");
            true
        };

        Ok(JobSummary {
            key: key.clone(),
            document,
            report,
            locator: locator_stats,
            reference_items: references.items_with_history(),
            saved,
        })
    }
}
