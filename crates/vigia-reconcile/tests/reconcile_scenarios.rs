//! End-to-end reconciliation scenarios over in-memory stores.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use vigia_ai::{CompletionService, MockCompletion, ObservationSynthesizer, SynthesisSettings};
use vigia_core::{Annex, Obligation, ObligationDocument, Period};
use vigia_docs::TextExtractor;
use vigia_reconcile::{
    FileLocator, JobError, LocatorSettings, ObligationReconciler, Outcome, ReferenceObservationSet,
    ReportJob,
};
use vigia_store::{
    BlobEntry, BlobStore, DocumentKey, DocumentStore, MemoryDocumentStore, StoreError,
};

// ── Fakes ──

/// Blob store over a map of path → (bytes, modified), counting downloads.
#[derive(Default)]
struct FakeBlobs {
    files: Mutex<HashMap<String, (Vec<u8>, DateTime<Utc>)>>,
    downloads: Mutex<Vec<String>>,
    broken: bool,
    /// Downloading this path panics.
    panics_on: Option<String>,
}

impl FakeBlobs {
    fn with(files: &[(&str, Vec<u8>)]) -> Self {
        let now = Utc::now();
        let store = Self::default();
        for (i, (path, bytes)) in files.iter().enumerate() {
            store.put(path, bytes.clone(), now - Duration::minutes(i as i64));
        }
        store
    }

    fn put(&self, path: &str, bytes: Vec<u8>, modified: DateTime<Utc>) {
        self.files
            .lock()
            .unwrap()
            .insert(path.to_string(), (bytes, modified));
    }

    fn downloads_of(&self, path: &str) -> usize {
        self.downloads
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.as_str() == path)
            .count()
    }

    fn total_downloads(&self) -> usize {
        self.downloads.lock().unwrap().len()
    }
}

#[async_trait]
impl BlobStore for FakeBlobs {
    fn name(&self) -> &str {
        "fake"
    }

    async fn download(&self, path: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.downloads.lock().unwrap().push(path.to_string());
        if self.panics_on.as_deref() == Some(path) {
            panic!("corrupt listing entry for {path}");
        }
        if self.broken {
            return Err(StoreError::Remote("authentication rejected".into()));
        }
        Ok(self.files.lock().unwrap().get(path).map(|(b, _)| b.clone()))
    }

    async fn list_folder(&self, folder: &str) -> Result<Vec<BlobEntry>, StoreError> {
        let prefix = format!("{}/", folder.trim_end_matches('/'));
        Ok(self
            .files
            .lock()
            .unwrap()
            .iter()
            .filter_map(|(path, (_, modified))| {
                let name = path.strip_prefix(&prefix)?;
                (!name.contains('/')).then(|| BlobEntry {
                    name: name.to_string(),
                    path: path.clone(),
                    modified_at: *modified,
                })
            })
            .collect())
    }

    async fn exists(&self, path: &str) -> Result<bool, StoreError> {
        Ok(self.files.lock().unwrap().contains_key(path))
    }
}

// ── Helpers ──

const LLM_TEXT: &str = "Durante el periodo el contratista ejecutó el mantenimiento preventivo \
                        de la totalidad de las cámaras y entregó las actas firmadas.";

fn nov() -> Period {
    Period::new(2025, 11).unwrap()
}

fn synthesizer(mock: &Arc<MockCompletion>) -> Arc<ObservationSynthesizer> {
    let service: Arc<dyn CompletionService> = mock.clone();
    Arc::new(ObservationSynthesizer::new(
        Some(service),
        SynthesisSettings::default(),
    ))
}

fn reconciler(blobs: &Arc<FakeBlobs>, mock: &Arc<MockCompletion>) -> ObligationReconciler {
    let store: Arc<dyn BlobStore> = blobs.clone();
    ObligationReconciler::new(
        FileLocator::new(store, LocatorSettings::default()),
        TextExtractor::new(),
        synthesizer(mock),
    )
}

fn evidence(chars: usize) -> Vec<u8> {
    "Acta de mantenimiento preventivo de camaras del sistema CCTV. "
        .repeat(chars / 60 + 1)
        .into_bytes()
}

/// A one-page PDF whose page text is `text`.
fn pdf_with_text(text: &str) -> Vec<u8> {
    use lopdf::content::{Content, Operation};
    use lopdf::{Document, Object, Stream, dictionary};

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });
    let content = Content {
        operations: vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec!["F1".into(), 10.into()]),
            Operation::new("Td", vec![50.into(), 700.into()]),
            Operation::new("Tj", vec![Object::string_literal(text)]),
            Operation::new("ET", vec![]),
        ],
    };
    let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
    });
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).unwrap();
    bytes
}

// ── Properties ──

#[tokio::test]
async fn existing_observation_is_left_alone() {
    let blobs = Arc::new(FakeBlobs::with(&[("doc.txt", evidence(500))]));
    let mock = Arc::new(MockCompletion::new(LLM_TEXT));
    let mut rec = reconciler(&blobs, &mock);

    let ob = Obligation::new(1, "Entregar informe mensual")
        .unwrap()
        .with_annex(Annex::new("doc.txt", true))
        .with_observation("Observación aprobada.");
    let first = rec.reconcile(ob.clone(), &[], nov()).await;
    let second = rec.reconcile(first.obligation.clone(), &[], nov()).await;

    assert_eq!(first.outcome, Outcome::Unchanged);
    assert_eq!(first.obligation, ob);
    assert_eq!(second.obligation, ob);
    assert_eq!(mock.call_count(), 0);
    assert_eq!(blobs.total_downloads(), 0);
}

#[tokio::test]
async fn skip_review_annexes_use_default_without_completion() {
    let blobs = Arc::new(FakeBlobs::with(&[("doc.txt", evidence(3000))]));
    let mock = Arc::new(MockCompletion::new(LLM_TEXT));
    let mut rec = reconciler(&blobs, &mock);

    let ob = Obligation::new(2, "Mantener pólizas vigentes")
        .unwrap()
        .with_annex(Annex::new("doc.txt", false))
        .with_annex(Annex::new("otro.pdf", false))
        .with_default_observation("Always compliant");
    let done = rec.reconcile(ob, &["Referencia".into()], nov()).await;

    assert_eq!(done.obligation.observation.as_deref(), Some("Always compliant"));
    assert_eq!(done.outcome, Outcome::DefaultUsed);
    assert!(!done.obligation.generated_by_llm);
    assert_eq!(mock.call_count(), 0);
    assert_eq!(blobs.total_downloads(), 0);
}

#[tokio::test]
async fn missing_annexes_are_listed_and_completion_skipped() {
    let blobs = Arc::new(FakeBlobs::with(&[("presente.txt", evidence(3000))]));
    let mock = Arc::new(MockCompletion::new(LLM_TEXT));
    let mut rec = reconciler(&blobs, &mock);

    let ob = Obligation::new(3, "Reportar incidentes")
        .unwrap()
        .with_annex(Annex::new("Anexos/incidentes.pdf", true))
        .with_annex(Annex::new("presente.txt", true))
        .with_annex(Annex::new("Anexos/bitacora.docx", true))
        .with_default_observation("Sin incidentes");
    let done = rec.reconcile(ob, &[], nov()).await;

    let observation = done.obligation.observation.unwrap();
    assert!(observation.contains("Anexos/incidentes.pdf"));
    assert!(observation.contains("Anexos/bitacora.docx"));
    assert!(!observation.contains("presente.txt"));
    assert!(!done.obligation.generated_by_llm);
    assert!(matches!(done.outcome, Outcome::MissingAnnexes(ref m) if m.len() == 2));
    assert_eq!(mock.call_count(), 0);
}

#[tokio::test]
async fn store_failures_count_as_missing() {
    let blobs = Arc::new(FakeBlobs {
        broken: true,
        ..FakeBlobs::default()
    });
    let mock = Arc::new(MockCompletion::new(LLM_TEXT));
    let mut rec = reconciler(&blobs, &mock);

    let ob = Obligation::new(4, "Entregar informe")
        .unwrap()
        .with_annex(Annex::new("doc.pdf", true));
    let done = rec.reconcile(ob, &[], nov()).await;
    assert!(done.obligation.observation.unwrap().contains("doc.pdf"));
    assert_eq!(mock.call_count(), 0);
}

#[tokio::test]
async fn shared_annex_is_downloaded_once_per_batch() {
    let blobs = Arc::new(FakeBlobs::with(&[("Anexos/acta.txt", evidence(2000))]));
    let mock = Arc::new(MockCompletion::new(LLM_TEXT));
    let mut rec = reconciler(&blobs, &mock);

    let obligations = vec![
        Obligation::new(1, "Mantenimiento preventivo")
            .unwrap()
            .with_annex(Annex::new("Anexos/acta.txt", true)),
        Obligation::new(2, "Mantenimiento correctivo")
            .unwrap()
            .with_annex(Annex::new("Anexos/acta.txt", true)),
    ];
    let (out, report) = rec
        .reconcile_all(obligations, &ReferenceObservationSet::new(), nov())
        .await;
    rec.cleanup();

    assert_eq!(blobs.downloads_of("Anexos/acta.txt"), 1);
    assert_eq!(report.generated(), 2);
    assert_eq!(mock.call_count(), 2);
    assert!(out.iter().all(|o| o.generated_by_llm));
}

#[tokio::test]
async fn old_period_tokens_resolve_to_target_month() {
    let blobs = Arc::new(FakeBlobs::with(&[(
        "/sites/CCTV/Informes/01NOV – 30NOV/acta.txt",
        evidence(2000),
    )]));
    let mock = Arc::new(MockCompletion::new(LLM_TEXT));
    let mut rec = reconciler(&blobs, &mock);

    let ob = Obligation::new(5, "Entregar actas")
        .unwrap()
        .with_annex(Annex::new("/sites/CCTV/Informes/01SEP – 30SEP/acta.txt", true));
    let done = rec.reconcile(ob, &[], nov()).await;

    assert_eq!(done.outcome, Outcome::Synthesized { llm: true });
    let fetched = blobs.downloads.lock().unwrap().clone();
    assert_eq!(fetched, vec!["/sites/CCTV/Informes/01NOV – 30NOV/acta.txt"]);
    assert!(fetched.iter().all(|p| !p.contains("SEP")));
}

#[tokio::test]
async fn wildcard_annex_picks_newest_matching_file() {
    let blobs = Arc::new(FakeBlobs::default());
    let now = Utc::now();
    blobs.put("Reportes/ANS_octubre.txt", evidence(200), now - Duration::days(30));
    blobs.put("Reportes/ANS_noviembre.txt", evidence(2000), now - Duration::hours(1));
    blobs.put("Reportes/Factura.txt", evidence(200), now);
    let mock = Arc::new(MockCompletion::new(LLM_TEXT));
    let mut rec = reconciler(&blobs, &mock);

    let ob = Obligation::new(6, "Reportar ANS")
        .unwrap()
        .with_annex(Annex::new("Reportes/ANS_*", true));
    let done = rec.reconcile(ob, &[], nov()).await;

    assert_eq!(done.outcome, Outcome::Synthesized { llm: true });
    assert_eq!(blobs.total_downloads(), 1);
    assert_eq!(blobs.downloads_of("Reportes/ANS_noviembre.txt"), 1);
}

#[tokio::test]
async fn clean_reconcile_from_pdf_annex() {
    let text = "Mantenimiento preventivo ejecutado sobre camaras, grabadores y enlaces. ".repeat(28);
    assert!(text.len() >= 2000);
    let blobs = Arc::new(FakeBlobs::with(&[("doc.pdf", pdf_with_text(&text))]));
    let mock = Arc::new(MockCompletion::new(LLM_TEXT));
    let mut rec = reconciler(&blobs, &mock);

    let ob = Obligation::new(1, "Comply with X law")
        .unwrap()
        .with_annex(Annex::new("doc.pdf", true));
    let done = rec.reconcile(ob, &[], nov()).await;

    let observation = done.obligation.observation.clone().unwrap();
    assert!(!observation.is_empty());
    assert!(observation.split_whitespace().count() <= 220);
    assert!(done.obligation.generated_by_llm);
    assert_eq!(mock.call_count(), 1);
    assert!(mock.requests()[0].prompt.contains("Mantenimiento preventivo ejecutado"));
}

#[tokio::test]
async fn completion_failure_falls_back_and_is_not_flagged() {
    let blobs = Arc::new(FakeBlobs::with(&[("doc.txt", evidence(2000))]));
    let mock = Arc::new(MockCompletion::failing("quota exceeded"));
    let mut rec = reconciler(&blobs, &mock);

    let ob = Obligation::new(7, "Entregar cronograma")
        .unwrap()
        .with_annex(Annex::new("doc.txt", true));
    let done = rec.reconcile(ob, &[], nov()).await;

    assert_eq!(done.outcome, Outcome::Synthesized { llm: false });
    assert!(!done.obligation.generated_by_llm);
    assert!(done.obligation.observation.unwrap().contains("Entregar cronograma"));
}

#[tokio::test]
async fn invalid_obligation_does_not_stop_the_batch() {
    let blobs = Arc::new(FakeBlobs::default());
    let mock = Arc::new(MockCompletion::new(LLM_TEXT));
    let mut rec = reconciler(&blobs, &mock);

    let broken: Obligation = serde_json::from_value(json!({"item": 2, "text": "  "})).unwrap();
    let obligations = vec![
        Obligation::new(1, "Primera").unwrap().with_default_observation("uno"),
        broken.clone(),
        Obligation::new(3, "Tercera").unwrap().with_default_observation("tres"),
    ];
    let (out, report) = rec
        .reconcile_all(obligations, &ReferenceObservationSet::new(), nov())
        .await;

    assert_eq!(out.iter().map(|o| o.item).collect::<Vec<_>>(), vec![1, 2, 3]);
    assert_eq!(out[1], broken);
    assert_eq!(out[0].observation.as_deref(), Some("uno"));
    assert_eq!(out[2].observation.as_deref(), Some("tres"));
    assert_eq!(report.failed(), 1);
    assert_eq!(report.defaults(), 2);
}

#[tokio::test]
async fn panicking_obligation_is_passed_through() {
    let blobs = Arc::new(FakeBlobs {
        panics_on: Some("Anexos/corrupto.pdf".into()),
        ..FakeBlobs::with(&[("Anexos/acta.txt", evidence(2000))])
    });
    let mock = Arc::new(MockCompletion::new(LLM_TEXT));
    let mut rec = reconciler(&blobs, &mock);

    let poisoned = Obligation::new(2, "Entregar informe de incidentes")
        .unwrap()
        .with_annex(Annex::new("Anexos/corrupto.pdf", true));
    let obligations = vec![
        Obligation::new(1, "Mantenimiento preventivo")
            .unwrap()
            .with_annex(Annex::new("Anexos/acta.txt", true)),
        poisoned.clone(),
        Obligation::new(3, "Tercera").unwrap().with_default_observation("tres"),
    ];
    let (out, report) = rec
        .reconcile_all(obligations, &ReferenceObservationSet::new(), nov())
        .await;
    rec.cleanup();

    assert_eq!(out.iter().map(|o| o.item).collect::<Vec<_>>(), vec![1, 2, 3]);
    assert_eq!(out[1], poisoned);
    assert_eq!(out[0].observation.as_deref(), Some(LLM_TEXT));
    assert!(out[0].generated_by_llm);
    assert_eq!(out[2].observation.as_deref(), Some("tres"));
    assert_eq!(report.failed(), 1);
    assert!(matches!(
        report.items[1].outcome,
        Outcome::Failed(ref reason) if reason.contains("Anexos/corrupto.pdf")
    ));
    assert_eq!(report.generated(), 1);
    assert_eq!(report.defaults(), 1);
}

// ── Report job ──

fn key(month: u32) -> DocumentKey {
    DocumentKey::new(Period::new(2025, month).unwrap(), "1", "1.5")
}

fn stored_document(month: u32, approved: bool, observation: Option<&str>) -> serde_json::Value {
    json!({
        "year": 2025,
        "month": month,
        "section": "1",
        "subsection": "1.5",
        "approved": approved,
        "obligations": [
            {
                "item": 1,
                "text": "Realizar mantenimiento preventivo",
                "periodicity": "Mensual",
                "complianceStatus": "CUMPLE",
                "annexes": [{"path": "Anexos/acta.txt", "revisar": true}],
                "observation": observation,
            },
            {
                "item": 2,
                "text": "Mantener pólizas",
                "annexes": [{"path": "polizas.pdf", "mustReview": false}],
                "defaultObservation": "Pólizas vigentes.",
            }
        ],
    })
}

#[tokio::test]
async fn job_reconciles_saves_with_backup_and_uses_references() {
    let documents = Arc::new(MemoryDocumentStore::new());
    documents.insert(key(11), stored_document(11, false, None));
    documents.insert(key(10), stored_document(10, true, Some("Observación de octubre.")));
    let blobs = Arc::new(FakeBlobs::with(&[("Anexos/acta.txt", evidence(2000))]));
    let mock = Arc::new(MockCompletion::new(LLM_TEXT));

    let job = ReportJob::new(documents.clone(), blobs.clone(), synthesizer(&mock));
    let summary = job.run(&key(11)).await.unwrap();

    assert!(summary.saved);
    assert_eq!(summary.report.generated(), 1);
    assert_eq!(summary.report.defaults(), 1);
    assert_eq!(summary.reference_items, 1);
    assert!(mock.requests()[0].prompt.contains("Observación de octubre."));

    let saved: ObligationDocument =
        serde_json::from_value(documents.get(&key(11)).await.unwrap().unwrap()).unwrap();
    assert_eq!(saved.obligations[0].observation.as_deref(), Some(LLM_TEXT));
    assert!(saved.obligations[0].generated_by_llm);
    assert_eq!(saved.obligations[1].observation.as_deref(), Some("Pólizas vigentes."));
    assert_eq!(documents.backups_of(&key(11)).len(), 1);
}

#[tokio::test]
async fn job_dry_run_leaves_store_untouched() {
    let documents = Arc::new(MemoryDocumentStore::new());
    documents.insert(key(11), stored_document(11, false, None));
    let blobs = Arc::new(FakeBlobs::default());
    let mock = Arc::new(MockCompletion::new(LLM_TEXT));

    let job = ReportJob::new(documents.clone(), blobs, synthesizer(&mock)).dry_run(true);
    let summary = job.run(&key(11)).await.unwrap();

    assert!(!summary.saved);
    assert_eq!(summary.report.missing(), 1);
    assert!(documents.backups_of(&key(11)).is_empty());
    assert_eq!(documents.get(&key(11)).await.unwrap().unwrap(), stored_document(11, false, None));
}

#[tokio::test]
async fn job_fails_on_missing_or_malformed_document() {
    let documents = Arc::new(MemoryDocumentStore::new());
    documents.insert(key(12), json!({"obligations": "no es una lista"}));
    let blobs = Arc::new(FakeBlobs::default());
    let mock = Arc::new(MockCompletion::new(LLM_TEXT));
    let job = ReportJob::new(documents, blobs, synthesizer(&mock));

    let missing = job.run(&key(11)).await.unwrap_err();
    assert!(matches!(missing, JobError::MissingDocument(_)));
    assert!(missing.to_string().contains("2025-11/1/1.5"));

    let malformed = job.run(&key(12)).await.unwrap_err();
    assert!(matches!(malformed, JobError::Malformed { .. }));
}
