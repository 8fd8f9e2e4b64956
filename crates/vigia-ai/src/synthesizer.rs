//! Grounded observation synthesis.
//!
//! Builds one prompt per obligation from the obligation text, the annex text
//! extracted this month, and up to three approved observations from earlier
//! months of the same section. The prompt pins tone and structure to those
//! references and the call runs at low temperature, so successive monthly
//! reports read the same.
//!
//! Every failure path (no backend, too little annex text, timeout, backend
//! error, empty answer) returns the deterministic fallback observation.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};
use vigia_core::ComplianceStatus;

use crate::completion::{CompletionError, CompletionRequest, CompletionService};

const SYSTEM_PROMPT: &str = "\
Eres el interventor técnico de un contrato de mantenimiento del sistema de videovigilancia. \
Redactas las observaciones de cumplimiento de obligaciones contractuales para el informe mensual. \
Escribes en español, en tercera persona, con registro profesional y objetivo, \
y te basas únicamente en la evidencia suministrada.";

const TRUNCATION_MARK: &str = " […]";

/// Tuning for the synthesizer.
#[derive(Debug, Clone)]
pub struct SynthesisSettings {
    /// Annex text shorter than this is treated as no evidence.
    pub min_annex_chars: usize,
    /// Annex text beyond this many characters is cut before prompting.
    pub annex_char_budget: usize,
    pub max_references: usize,
    /// Word limit requested in the prompt.
    pub target_words: usize,
    /// Hard cap applied to the returned text.
    pub max_words: usize,
    pub max_tokens: u32,
    pub temperature: f64,
    pub call_timeout: Duration,
}

impl Default for SynthesisSettings {
    fn default() -> Self {
        Self {
            min_annex_chars: 50,
            annex_char_budget: 4000,
            max_references: 3,
            target_words: 200,
            max_words: 220,
            max_tokens: 450,
            temperature: 0.1,
            call_timeout: Duration::from_secs(90),
        }
    }
}

pub struct ObservationSynthesizer {
    completion: Option<Arc<dyn CompletionService>>,
    settings: SynthesisSettings,
}

impl ObservationSynthesizer {
    pub fn new(
        completion: Option<Arc<dyn CompletionService>>,
        settings: SynthesisSettings,
    ) -> Self {
        Self {
            completion,
            settings,
        }
    }

    /// A synthesizer that only ever produces fallback text.
    pub fn offline() -> Self {
        Self::new(None, SynthesisSettings::default())
    }

    pub fn has_completion(&self) -> bool {
        self.completion.is_some()
    }

    pub fn settings(&self) -> &SynthesisSettings {
        &self.settings
    }

    /// Deterministic observation used whenever no grounded text can be produced.
    pub fn fallback(&self, obligation_text: &str, status: ComplianceStatus) -> String {
        fallback_observation(obligation_text, status)
    }

    /// Produce the observation for one obligation. Never fails.
    pub async fn synthesize(
        &self,
        obligation_text: &str,
        periodicity: &str,
        status: ComplianceStatus,
        annex_text: &str,
        references: &[String],
    ) -> String {
        let Some(service) = self.completion.as_ref() else {
            debug!("no completion backend configured, using fallback");
            return self.fallback(obligation_text, status);
        };
        let evidence_chars = annex_text.trim().chars().count();
        if evidence_chars < self.settings.min_annex_chars {
            debug!(evidence_chars, "annex text too short, using fallback");
            return self.fallback(obligation_text, status);
        }

        let prompt = self.build_prompt(obligation_text, periodicity, status, annex_text, references);
        let request = CompletionRequest::new(prompt, self.settings.max_tokens, self.settings.temperature)
            .with_system(SYSTEM_PROMPT);

        let outcome = match tokio::time::timeout(self.settings.call_timeout, service.complete(request)).await {
            Ok(result) => result,
            Err(_) => Err(CompletionError::Timeout(self.settings.call_timeout.as_secs())),
        };

        match outcome {
            Ok(raw) => match clean_completion(&raw, self.settings.max_words) {
                Some(text) => {
                    info!(backend = service.id(), words = text.split_whitespace().count(), "observation synthesized");
                    text
                }
                None => {
                    warn!(backend = service.id(), "completion had no usable text, using fallback");
                    self.fallback(obligation_text, status)
                }
            },
            Err(e) => {
                warn!(backend = service.id(), error = %e, "completion failed, using fallback");
                self.fallback(obligation_text, status)
            }
        }
    }

    /// The user prompt sent for one obligation.
    pub fn build_prompt(
        &self,
        obligation_text: &str,
        periodicity: &str,
        status: ComplianceStatus,
        annex_text: &str,
        references: &[String],
    ) -> String {
        let periodicity = match periodicity.trim() {
            "" => "No especificada",
            p => p,
        };
        let mut prompt = format!(
            "OBLIGACIÓN: {obligation}\n\
             PERIODICIDAD: {periodicity}\n\
             ESTADO DE CUMPLIMIENTO: {status}\n",
            obligation = obligation_text.trim(),
            status = status.describe(),
        );

        let references: Vec<&str> = references
            .iter()
            .map(|r| r.trim())
            .filter(|r| !r.is_empty())
            .take(self.settings.max_references)
            .collect();
        if !references.is_empty() {
            prompt.push_str(
                "\nOBSERVACIONES APROBADAS DE PERIODOS ANTERIORES DE LA MISMA SECCIÓN:\n",
            );
            for (i, r) in references.iter().enumerate() {
                prompt.push_str(&format!("[{}] {}\n", i + 1, r));
            }
            prompt.push_str(
                "Replica casi literalmente el tono, el estilo y la estructura de estas observaciones \
                 aprobadas. Cambia únicamente los datos propios de los anexos de este periodo \
                 (fechas, cantidades, nombres de documentos y hallazgos).\n",
            );
        }

        prompt.push_str("\nCONTENIDO DE LOS ANEXOS DEL PERIODO:\n");
        prompt.push_str(&truncate_chars(annex_text.trim(), self.settings.annex_char_budget));
        prompt.push('\n');

        prompt.push_str(&format!(
            "\nINSTRUCCIONES:\n\
             - Máximo {words} palabras.\n\
             - Un solo párrafo, sin viñetas, listas ni títulos.\n\
             - Registro profesional y objetivo.\n\
             - Usa solo la información de los anexos; no inventes datos.\n\
             - Responde únicamente con el texto de la observación.",
            words = self.settings.target_words,
        ));
        prompt
    }
}

/// Deterministic observation chosen by keyword matching on the obligation text.
pub fn fallback_observation(obligation_text: &str, status: ComplianceStatus) -> String {
    let quoted = truncate_chars(obligation_text.trim().trim_end_matches('.'), 300);
    if status == ComplianceStatus::NotComplied {
        return format!(
            "Durante el periodo no se evidenció el cumplimiento de la obligación \"{quoted}\"; \
             se requiere al contratista la presentación de los soportes correspondientes."
        );
    }
    if mentions_legal_compliance(obligation_text) {
        return "El contratista dio cumplimiento a la normatividad legal vigente aplicable al \
                contrato durante el periodo, sin que se registraran requerimientos ni \
                incumplimientos por parte de las autoridades competentes."
            .to_string();
    }
    format!("Se dio cumplimiento a la obligación \"{quoted}\" durante el periodo reportado.")
}

fn mentions_legal_compliance(text: &str) -> bool {
    let lower = text.to_lowercase();
    lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .any(|w| {
            matches!(w, "ley" | "leyes" | "legal" | "legales" | "law")
                || w.starts_with("normativ")
                || w.starts_with("decreto")
                || w.starts_with("resoluci")
                || w.starts_with("reglament")
        })
}

/// Cut to at most `max` characters on a char boundary, marking the cut.
fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}{TRUNCATION_MARK}", &text[..idx]),
        None => text.to_string(),
    }
}

/// Flatten a completion into one paragraph and cap it at `max_words`.
///
/// Returns `None` when nothing usable is left.
pub(crate) fn clean_completion(raw: &str, max_words: usize) -> Option<String> {
    let stripped = raw
        .trim()
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    let lines: Vec<&str> = stripped
        .lines()
        .map(|l| strip_list_marker(l.trim()))
        .filter(|l| !l.is_empty())
        .collect();
    let joined = lines.join(" ");
    let unquoted = joined
        .trim()
        .trim_matches(|c| matches!(c, '"' | '“' | '”' | '«' | '»'))
        .trim();

    let words: Vec<&str> = unquoted.split_whitespace().collect();
    if words.is_empty() {
        return None;
    }
    if words.len() <= max_words {
        return Some(words.join(" "));
    }

    let capped = words[..max_words].join(" ");
    // Prefer ending on a full sentence when one closes late enough.
    match capped.rfind(". ") {
        Some(idx) if idx > capped.len() * 3 / 5 => Some(capped[..=idx].to_string()),
        _ => Some(format!("{}.", capped.trim_end_matches([',', ';', ':', '.']))),
    }
}

fn strip_list_marker(line: &str) -> &str {
    let line = line
        .trim_start_matches(['-', '*', '•', '·'])
        .trim_start();
    // "1. ", "2) "
    let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits > 0 && digits < 3 {
        let rest = &line[digits..];
        if let Some(r) = rest.strip_prefix(". ").or_else(|| rest.strip_prefix(") ")) {
            return r.trim_start();
        }
    }
    line
}
