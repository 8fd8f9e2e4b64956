//! Per-obligation observation decisions and the sequential batch driver.
//!
//! For each obligation, in order:
//!
//! 1. An existing observation is kept unless `regenerate` is set.
//! 2. With no reviewable annex (none at all, or all flagged "do not
//!    review") the completion service is never called: the default
//!    observation is used, else the deterministic fallback.
//! 3. Reviewable annexes are resolved and their text extracted. Any
//!    missing annex makes the observation an explicit list of the missing
//!    files, and nothing is synthesized.
//! 4. If the annexes gave no text, the default (else fallback) is used.
//! 5. Otherwise the synthesizer writes the observation from the combined
//!    annex text and the reference observations.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tracing::{debug, error, info, warn};
use vigia_ai::ObservationSynthesizer;
use vigia_core::{Obligation, Period};
use vigia_docs::TextExtractor;

use crate::locator::FileLocator;
use crate::reference::ReferenceObservationSet;

/// Marker placed between the texts of consecutive annexes.
pub const ANNEX_SEPARATOR: &str = "\n\n===== SIGUIENTE ANEXO =====\n\n";

/// How an obligation's observation was arrived at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Observation already present and not flagged for regeneration.
    Unchanged,
    DefaultUsed,
    /// Deterministic text, no default available.
    Fallback,
    MissingAnnexes(Vec<String>),
    /// `llm` is false when the synthesizer fell back.
    Synthesized { llm: bool },
    /// Processing failed; the obligation was passed through as it came.
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct Reconciled {
    pub obligation: Obligation,
    pub outcome: Outcome,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemReport {
    pub item: u32,
    pub outcome: Outcome,
}

/// Per-item outcomes of one batch, in processing order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub items: Vec<ItemReport>,
}

impl BatchReport {
    fn count(&self, pred: impl Fn(&Outcome) -> bool) -> usize {
        self.items.iter().filter(|i| pred(&i.outcome)).count()
    }

    pub fn total(&self) -> usize {
        self.items.len()
    }

    pub fn unchanged(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Unchanged))
    }

    pub fn defaults(&self) -> usize {
        self.count(|o| matches!(o, Outcome::DefaultUsed))
    }

    pub fn fallbacks(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Fallback | Outcome::Synthesized { llm: false }))
    }

    pub fn missing(&self) -> usize {
        self.count(|o| matches!(o, Outcome::MissingAnnexes(_)))
    }

    pub fn generated(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Synthesized { llm: true }))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Failed(_)))
    }
}

/// Statement recorded when required annexes could not be found.
///
/// Each entry is the stored path, followed by the location searched when the
/// period rewrite changed it.
pub fn missing_annexes_statement(missing: &[(String, String)]) -> String {
    let listed: Vec<String> = missing
        .iter()
        .map(|(stored, searched)| {
            if stored == searched {
                stored.clone()
            } else {
                format!("{stored} (buscado en {searched})")
            }
        })
        .collect();
    format!(
        "No se encontraron los siguientes anexos requeridos para el periodo: {}.",
        listed.join(", ")
    )
}

/// Owns the locator of one batch. Build a new one per report run.
pub struct ObligationReconciler {
    locator: FileLocator,
    extractor: TextExtractor,
    synthesizer: Arc<ObservationSynthesizer>,
}

impl ObligationReconciler {
    pub fn new(
        locator: FileLocator,
        extractor: TextExtractor,
        synthesizer: Arc<ObservationSynthesizer>,
    ) -> Self {
        Self {
            locator,
            extractor,
            synthesizer,
        }
    }

    pub fn locator(&self) -> &FileLocator {
        &self.locator
    }

    /// Decide one obligation's observation.
    pub async fn reconcile(
        &mut self,
        mut ob: Obligation,
        references: &[String],
        period: Period,
    ) -> Reconciled {
        if ob.current_observation().is_some() && !ob.regenerate {
            debug!(item = ob.item, "observation present, kept");
            return Reconciled {
                obligation: ob,
                outcome: Outcome::Unchanged,
            };
        }

        let to_review: Vec<_> = ob.annexes.iter().filter(|a| a.must_review).cloned().collect();
        if to_review.is_empty() {
            debug!(item = ob.item, annexes = ob.annexes.len(), "no reviewable annex");
            return self.without_evidence(ob);
        }

        let mut missing = Vec::new();
        let mut texts = Vec::new();
        for annex in &to_review {
            let Some(file) = self.locator.resolve(&annex.path, period).await else {
                let stored = annex.path.trim().to_string();
                let searched = self.locator.lookup_path(&stored, period);
                missing.push((stored, searched));
                continue;
            };
            let text = self.extractor.extract(&file.path);
            let text = text.trim();
            if text.is_empty() {
                info!(item = ob.item, annex = %annex.path, "annex has no extractable text");
                continue;
            }
            let note = annex.note.trim();
            if note.is_empty() {
                texts.push(text.to_string());
            } else {
                texts.push(format!("{note}\n{text}"));
            }
        }

        if !missing.is_empty() {
            warn!(item = ob.item, missing = ?missing, "required annexes not found");
            ob.observation = Some(missing_annexes_statement(&missing));
            ob.generated_by_llm = false;
            ob.regenerate = false;
            return Reconciled {
                obligation: ob,
                outcome: Outcome::MissingAnnexes(
                    missing.into_iter().map(|(stored, _)| stored).collect(),
                ),
            };
        }

        if texts.is_empty() {
            info!(item = ob.item, "annexes resolved but gave no text");
            return self.without_evidence(ob);
        }

        let combined = texts.join(ANNEX_SEPARATOR);
        let observation = self
            .synthesizer
            .synthesize(
                &ob.text,
                &ob.periodicity,
                ob.compliance_status,
                &combined,
                references,
            )
            .await;
        let llm = observation != self.synthesizer.fallback(&ob.text, ob.compliance_status);
        info!(item = ob.item, annexes = texts.len(), llm, "observation synthesized");

        ob.observation = Some(observation);
        ob.generated_by_llm = llm;
        ob.regenerate = false;
        Reconciled {
            obligation: ob,
            outcome: Outcome::Synthesized { llm },
        }
    }

    /// No evidence to ground a synthesis on: default observation, else fallback.
    fn without_evidence(&self, mut ob: Obligation) -> Reconciled {
        let outcome = match ob.default_observation() {
            Some(default) => {
                ob.observation = Some(default.to_string());
                Outcome::DefaultUsed
            }
            None => {
                ob.observation = Some(self.synthesizer.fallback(&ob.text, ob.compliance_status));
                Outcome::Fallback
            }
        };
        ob.generated_by_llm = false;
        ob.regenerate = false;
        Reconciled {
            obligation: ob,
            outcome,
        }
    }

    /// Reconcile every obligation in order.
    ///
    /// An obligation that fails validation, or whose processing panics, is
    /// logged and passed through unchanged; the rest of the batch carries on.
    pub async fn reconcile_all(
        &mut self,
        obligations: Vec<Obligation>,
        references: &ReferenceObservationSet,
        period: Period,
    ) -> (Vec<Obligation>, BatchReport) {
        let total = obligations.len();
        let mut out = Vec::with_capacity(total);
        let mut report = BatchReport::default();

        for (i, ob) in obligations.into_iter().enumerate() {
            let item = ob.item;
            info!(item, position = i + 1, total, "reconciling obligation");

            if let Err(e) = ob.validate() {
                error!(item, error = %e, "invalid obligation, passed through");
                report.items.push(ItemReport {
                    item,
                    outcome: Outcome::Failed(e.to_string()),
                });
                out.push(ob);
                continue;
            }

            let original = ob.clone();
            let attempt = AssertUnwindSafe(self.reconcile(ob, references.for_item(item), period))
                .catch_unwind()
                .await;
            match attempt {
                Ok(done) => {
                    report.items.push(ItemReport {
                        item,
                        outcome: done.outcome,
                    });
                    out.push(done.obligation);
                }
                Err(panic) => {
                    let reason = panic_message(panic.as_ref());
                    error!(item, reason = %reason, "obligation processing panicked, passed through");
                    report.items.push(ItemReport {
                        item,
                        outcome: Outcome::Failed(reason),
                    });
                    out.push(original);
                }
            }
        }

        info!(
            total,
            generated = report.generated(),
            defaults = report.defaults(),
            missing = report.missing(),
            failed = report.failed(),
            "batch reconciled"
        );
        (out, report)
    }

    /// Release the batch's downloaded files.
    pub fn cleanup(&mut self) {
        self.locator.cleanup();
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    use crate::locator::LocatorSettings;
    use vigia_ai::{CompletionService, MockCompletion, SynthesisSettings};
    use vigia_core::{Annex, ComplianceStatus};
    use vigia_store::LocalBlobStore;

    const EVIDENCE: &str = "Durante el periodo se realizó el mantenimiento preventivo de las 120 cámaras \
                            del sistema de videovigilancia, con actas firmadas por el supervisor.";

    fn reconciler(root: &Path, mock: Arc<MockCompletion>) -> ObligationReconciler {
        let service: Arc<dyn CompletionService> = mock;
        ObligationReconciler::new(
            FileLocator::new(Arc::new(LocalBlobStore::new(root)), LocatorSettings::default()),
            TextExtractor::new(),
            Arc::new(ObservationSynthesizer::new(Some(service), SynthesisSettings::default())),
        )
    }

    fn period() -> Period {
        Period::new(2025, 11).unwrap()
    }

    #[tokio::test]
    async fn notes_prefix_annex_text_and_annexes_are_joined() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), EVIDENCE).unwrap();
        std::fs::write(dir.path().join("b.txt"), "Segundo soporte del periodo.").unwrap();
        let mock = Arc::new(MockCompletion::new("Observación redactada."));
        let mut rec = reconciler(dir.path(), mock.clone());

        let ob = Obligation::new(4, "Realizar mantenimiento preventivo")
            .unwrap()
            .with_annex(Annex::new("a.txt", true).with_note("Acta de mantenimiento"))
            .with_annex(Annex::new("b.txt", true))
            .with_annex(Annex::new("no_revisar.pdf", false));
        let done = rec.reconcile(ob, &["Referencia".to_string()], period()).await;

        assert_eq!(done.outcome, Outcome::Synthesized { llm: true });
        assert_eq!(done.obligation.observation.as_deref(), Some("Observación redactada."));
        assert!(done.obligation.generated_by_llm);

        let prompt = &mock.requests()[0].prompt;
        assert!(prompt.contains(&format!("Acta de mantenimiento\n{EVIDENCE}")));
        assert!(prompt.contains(ANNEX_SEPARATOR.trim()));
        assert!(prompt.contains("Segundo soporte"));
        assert!(prompt.contains("[1] Referencia"));
    }

    #[tokio::test]
    async fn empty_extraction_uses_default() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("vacio.txt"), "   ").unwrap();
        let mock = Arc::new(MockCompletion::new("no"));
        let mut rec = reconciler(dir.path(), mock.clone());

        let ob = Obligation::new(2, "Entregar informe")
            .unwrap()
            .with_annex(Annex::new("vacio.txt", true))
            .with_default_observation("Se entregó el informe.");
        let done = rec.reconcile(ob, &[], period()).await;
        assert_eq!(done.outcome, Outcome::DefaultUsed);
        assert_eq!(done.obligation.observation.as_deref(), Some("Se entregó el informe."));
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test]
    async fn no_annexes_and_no_default_gives_fallback_without_calls() {
        let dir = tempfile::tempdir().unwrap();
        let mock = Arc::new(MockCompletion::new("no"));
        let mut rec = reconciler(dir.path(), mock.clone());

        let ob = Obligation::new(3, "Cumplir la normatividad vigente").unwrap();
        let done = rec.reconcile(ob, &[], period()).await;
        assert_eq!(done.outcome, Outcome::Fallback);
        assert_eq!(
            done.obligation.observation,
            Some(vigia_ai::fallback_observation(
                "Cumplir la normatividad vigente",
                ComplianceStatus::Complied
            ))
        );
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test]
    async fn regenerate_forces_new_observation() {
        let dir = tempfile::tempdir().unwrap();
        let mock = Arc::new(MockCompletion::new("no"));
        let mut rec = reconciler(dir.path(), mock);

        let mut ob = Obligation::new(1, "Entregar informe")
            .unwrap()
            .with_observation("vieja")
            .with_default_observation("nueva");
        ob.regenerate = true;
        let done = rec.reconcile(ob, &[], period()).await;
        assert_eq!(done.obligation.observation.as_deref(), Some("nueva"));
        assert!(!done.obligation.regenerate);
    }

    #[test]
    fn batch_report_counts() {
        let report = BatchReport {
            items: vec![
                ItemReport { item: 1, outcome: Outcome::Unchanged },
                ItemReport { item: 2, outcome: Outcome::Synthesized { llm: true } },
                ItemReport { item: 3, outcome: Outcome::Synthesized { llm: false } },
                ItemReport { item: 4, outcome: Outcome::Fallback },
                ItemReport { item: 5, outcome: Outcome::MissingAnnexes(vec!["x".into()]) },
                ItemReport { item: 6, outcome: Outcome::Failed("boom".into()) },
            ],
        };
        assert_eq!(report.total(), 6);
        assert_eq!(report.unchanged(), 1);
        assert_eq!(report.generated(), 1);
        assert_eq!(report.fallbacks(), 2);
        assert_eq!(report.missing(), 1);
        assert_eq!(report.failed(), 1);
    }

    #[test]
    fn missing_statement_lists_paths() {
        let text = missing_annexes_statement(&[
            ("a.pdf".into(), "a.pdf".into()),
            ("b/01SEP – 30SEP/c.pdf".into(), "b/01NOV – 30NOV/c.pdf".into()),
        ]);
        assert!(text.ends_with("a.pdf, b/01SEP – 30SEP/c.pdf (buscado en b/01NOV – 30NOV/c.pdf)."));
    }

    #[tokio::test]
    async fn missing_statement_keeps_stored_path_with_old_token() {
        let dir = tempfile::tempdir().unwrap();
        let mock = Arc::new(MockCompletion::new("no"));
        let mut rec = reconciler(dir.path(), mock.clone());

        let stored = "Informes/01SEP – 30SEP/acta.pdf";
        let ob = Obligation::new(6, "Entregar actas")
            .unwrap()
            .with_annex(Annex::new(stored, true));
        let done = rec.reconcile(ob, &[], period()).await;

        let observation = done.obligation.observation.unwrap();
        assert!(observation.contains(stored));
        assert!(observation.contains("Informes/01NOV – 30NOV/acta.pdf"));
        assert_eq!(done.outcome, Outcome::MissingAnnexes(vec![stored.to_string()]));
        assert_eq!(mock.call_count(), 0);
    }
}
