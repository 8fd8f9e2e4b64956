//! Approved observations from earlier months, used as style references.

use std::collections::HashMap;

use tracing::{debug, info, warn};
use vigia_core::ObligationDocument;
use vigia_store::{DocumentKey, DocumentStore};

/// How far back the loader looks for approved reports.
pub const DEFAULT_MONTHS_BACK: usize = 12;
/// References handed to the synthesizer per obligation.
pub const MAX_REFERENCES: usize = 3;

/// Reference observations for one report section, most recent first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReferenceObservationSet {
    by_item: HashMap<u32, Vec<String>>,
    general: Vec<String>,
}

impl ReferenceObservationSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// A set where every item gets the same references.
    pub fn general(observations: Vec<String>) -> Self {
        Self {
            by_item: HashMap::new(),
            general: observations
                .into_iter()
                .filter(|o| !o.trim().is_empty())
                .take(MAX_REFERENCES)
                .collect(),
        }
    }

    pub fn items_with_history(&self) -> usize {
        self.by_item.values().filter(|v| !v.is_empty()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.by_item.is_empty() && self.general.is_empty()
    }

    /// References for `item`: its own history when it has one, otherwise the
    /// general set.
    pub fn for_item(&self, item: u32) -> &[String] {
        match self.by_item.get(&item) {
            Some(own) if !own.is_empty() => own,
            _ => &self.general,
        }
    }

    /// Fold in an approved report. Reports must be added most recent first.
    pub fn add_report(&mut self, doc: &ObligationDocument) {
        let fill_general = self.general.is_empty();
        for ob in &doc.obligations {
            let Some(text) = ob.current_observation() else {
                continue;
            };
            let own = self.by_item.entry(ob.item).or_default();
            if own.len() < MAX_REFERENCES && !own.iter().any(|o| o == text) {
                own.push(text.to_string());
            }
            if fill_general && self.general.len() < MAX_REFERENCES {
                self.general.push(text.to_string());
            }
        }
    }
}

/// Collect references for `key` from up to `months_back` earlier months.
///
/// Only approved reports count. Store failures and unreadable documents are
/// logged and skipped; a report with no references is still a valid report.
pub async fn load_references(
    store: &dyn DocumentStore,
    key: &DocumentKey,
    months_back: usize,
) -> ReferenceObservationSet {
    let mut set = ReferenceObservationSet::new();
    let mut approved = 0;
    for period in key.period.preceding(months_back) {
        let past = key.for_period(period);
        let value = match store.get(&past).await {
            Ok(Some(value)) => value,
            Ok(None) => continue,
            Err(e) => {
                warn!(key = %past, error = %e, "could not read earlier report");
                continue;
            }
        };
        let doc: ObligationDocument = match serde_json::from_value(value) {
            Ok(doc) => doc,
            Err(e) => {
                warn!(key = %past, error = %e, "earlier report is not an obligation document");
                continue;
            }
        };
        if !doc.approved {
            debug!(key = %past, "earlier report not approved, skipped");
            continue;
        }
        set.add_report(&doc);
        approved += 1;
    }
    info!(key = %key, approved, items = set.by_item.len(), "reference observations loaded");
    set
}
