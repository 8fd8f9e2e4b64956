//! Contract obligations and their supporting annexes.
//!
//! Stored as JSON inside the monthly report documents; field names are
//! camelCase to match the documents already in the store.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::annex_path::{self, AnnexPath};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("obligation item must be >= 1")]
    ItemNumber,
    #[error("obligation {0} has empty text")]
    EmptyText(u32),
    #[error("obligation {item} has an annex with an empty path")]
    EmptyAnnexPath { item: u32 },
    #[error("duplicate obligation item {0}")]
    DuplicateItem(u32),
}

/// Whether the contractor complied with an obligation this period.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComplianceStatus {
    #[default]
    #[serde(alias = "CUMPLE", alias = "cumple")]
    Complied,
    #[serde(alias = "NO CUMPLE", alias = "no cumple")]
    NotComplied,
}

impl ComplianceStatus {
    /// Label used in report tables.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Complied => "CUMPLE",
            Self::NotComplied => "NO CUMPLE",
        }
    }

    /// Wording used in prompts and fallback text.
    pub fn describe(&self) -> &'static str {
        match self {
            Self::Complied => "Cumple",
            Self::NotComplied => "No cumple",
        }
    }
}

/// A supporting file referenced by an obligation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Annex {
    pub path: String,
    /// `false` means the annex is listed in the report but never read.
    #[serde(default = "default_true", alias = "revisar")]
    pub must_review: bool,
    #[serde(default)]
    pub note: String,
}

fn default_true() -> bool {
    true
}

impl Annex {
    pub fn new(path: impl Into<String>, must_review: bool) -> Self {
        Self {
            path: path.into(),
            must_review,
            note: String::new(),
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = note.into();
        self
    }

    pub fn parsed(&self) -> AnnexPath {
        AnnexPath::parse(&self.path)
    }

    /// File name shown in the report's annex column.
    pub fn display_name(&self) -> &str {
        annex_path::file_name(self.path.trim_end_matches(annex_path::WILDCARD))
    }
}

/// One contractually mandated duty tracked in the monthly report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Obligation {
    pub item: u32,
    pub text: String,
    #[serde(default)]
    pub periodicity: String,
    #[serde(default)]
    pub compliance_status: ComplianceStatus,
    #[serde(default)]
    pub annexes: Vec<Annex>,
    #[serde(default)]
    pub default_observation: String,
    #[serde(default)]
    pub observation: Option<String>,
    /// Force a new observation even when one is already stored.
    #[serde(default)]
    pub regenerate: bool,
    /// Set when the stored observation came from the completion service.
    #[serde(default, rename = "generatedByLLM")]
    pub generated_by_llm: bool,
}

impl Obligation {
    pub fn new(item: u32, text: impl Into<String>) -> Result<Self, ValidationError> {
        let ob = Self {
            item,
            text: text.into(),
            periodicity: String::new(),
            compliance_status: ComplianceStatus::Complied,
            annexes: Vec::new(),
            default_observation: String::new(),
            observation: None,
            regenerate: false,
            generated_by_llm: false,
        };
        ob.validate()?;
        Ok(ob)
    }

    pub fn with_periodicity(mut self, periodicity: impl Into<String>) -> Self {
        self.periodicity = periodicity.into();
        self
    }

    pub fn with_status(mut self, status: ComplianceStatus) -> Self {
        self.compliance_status = status;
        self
    }

    pub fn with_annex(mut self, annex: Annex) -> Self {
        self.annexes.push(annex);
        self
    }

    pub fn with_default_observation(mut self, text: impl Into<String>) -> Self {
        self.default_observation = text.into();
        self
    }

    pub fn with_observation(mut self, text: impl Into<String>) -> Self {
        self.observation = Some(text.into());
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.item == 0 {
            return Err(ValidationError::ItemNumber);
        }
        if self.text.trim().is_empty() {
            return Err(ValidationError::EmptyText(self.item));
        }
        if self.annexes.iter().any(|a| a.path.trim().is_empty()) {
            return Err(ValidationError::EmptyAnnexPath { item: self.item });
        }
        Ok(())
    }

    /// Stored observation, if any and non-blank.
    pub fn current_observation(&self) -> Option<&str> {
        self.observation
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    pub fn default_observation(&self) -> Option<&str> {
        Some(self.default_observation.trim()).filter(|s| !s.is_empty())
    }

    /// Annex names for the report's annex column, joined by `", "`.
    pub fn annex_reference(&self) -> String {
        self.annexes
            .iter()
            .map(Annex::display_name)
            .filter(|n| !n.is_empty())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// The obligation list of one report section for one month.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObligationDocument {
    pub year: i32,
    pub month: u32,
    pub section: String,
    #[serde(default)]
    pub subsection: String,
    /// Approved reports feed the reference observations of later months.
    #[serde(default)]
    pub approved: bool,
    #[serde(default)]
    pub obligations: Vec<Obligation>,
}

impl ObligationDocument {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut seen = std::collections::HashSet::new();
        for ob in &self.obligations {
            ob.validate()?;
            if !seen.insert(ob.item) {
                return Err(ValidationError::DuplicateItem(ob.item));
            }
        }
        Ok(())
    }
}
