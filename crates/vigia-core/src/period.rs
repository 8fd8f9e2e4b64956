//! Report periods and the folder-name tokens that encode them.
//!
//! The contract repository stores each month's evidence under a folder named
//! by the date range it covers, e.g. `01SEP – 30SEP`. Annex paths saved in a
//! previous month still carry that month's token, so every stored path is
//! rewritten to the target period before it is resolved.
//!
//! # Token conventions
//!
//! - Two-digit first day, three-letter Spanish month, en dash, two-digit last day
//! - Leap years respected: `01FEB – 29FEB` in 2024
//! - Detection is lenient: hyphen or em dash, optional spaces, any case, and
//!   English abbreviations (`JAN`, `APR`, `AUG`, `DEC`) are all recognised

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{Datelike, NaiveDate};
use regex::{NoExpand, Regex};
use thiserror::Error;

/// Spanish month abbreviations used in folder tokens, January first.
pub const MONTH_ABBR: [&str; 12] = [
    "ENE", "FEB", "MAR", "ABR", "MAY", "JUN", "JUL", "AGO", "SEP", "OCT", "NOV", "DIC",
];

const MONTH_ALTERNATION: &str =
    "ENE|JAN|FEB|MAR|ABR|APR|MAY|JUN|JUL|AGO|AUG|SEP|SET|OCT|NOV|DIC|DEC";

static TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    let pattern = format!(
        r"(?i)(\d{{2}})\s*({m})\.?\s*[–—-]\s*(\d{{2}})\s*({m})\.?",
        m = MONTH_ALTERNATION
    );
    Regex::new(&pattern).expect("period token pattern is valid")
});

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PeriodError {
    #[error("month out of range: {0}")]
    Month(u32),
    #[error("year out of range: {0}")]
    Year(i32),
    #[error("expected YYYY-MM, got {0:?}")]
    Format(String),
}

/// A report month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Period {
    year: i32,
    month: u32,
}

impl Period {
    pub fn new(year: i32, month: u32) -> Result<Self, PeriodError> {
        if !(1..=12).contains(&month) {
            return Err(PeriodError::Month(month));
        }
        if !(1900..=9999).contains(&year) {
            return Err(PeriodError::Year(year));
        }
        Ok(Self { year, month })
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    /// Last calendar day of the month.
    pub fn last_day(&self) -> u32 {
        let (y, m) = if self.month == 12 {
            (self.year + 1, 1)
        } else {
            (self.year, self.month + 1)
        };
        NaiveDate::from_ymd_opt(y, m, 1)
            .and_then(|d| d.pred_opt())
            .map(|d| d.day())
            .unwrap_or(30)
    }

    /// The period immediately before this one.
    pub fn previous(&self) -> Self {
        if self.month == 1 {
            Self {
                year: self.year - 1,
                month: 12,
            }
        } else {
            Self {
                year: self.year,
                month: self.month - 1,
            }
        }
    }

    /// The `n` periods before this one, most recent first.
    pub fn preceding(&self, n: usize) -> Vec<Self> {
        let mut out = Vec::with_capacity(n);
        let mut cursor = *self;
        for _ in 0..n {
            cursor = cursor.previous();
            out.push(cursor);
        }
        out
    }

    /// Folder token for this month, e.g. `01NOV – 30NOV`.
    pub fn folder_token(&self) -> String {
        let abbr = MONTH_ABBR[(self.month - 1) as usize];
        format!("01{abbr} – {:02}{abbr}", self.last_day())
    }

    /// Rewrite every period token embedded in `path` to this period's token.
    ///
    /// Paths without a token are returned unchanged.
    pub fn substitute_tokens(&self, path: &str) -> String {
        let token = self.folder_token();
        TOKEN_RE
            .replace_all(path, NoExpand(token.as_str()))
            .into_owned()
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{:02}", self.year, self.month)
    }
}

impl FromStr for Period {
    type Err = PeriodError;

    /// Parses `2025-11`; a single-digit month (`2025-9`) is accepted.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let format = || PeriodError::Format(s.to_string());
        let (year, month) = s.trim().split_once('-').ok_or_else(format)?;
        let year = year.parse().map_err(|_| format())?;
        let month = month.parse().map_err(|_| format())?;
        Self::new(year, month)
    }
}

/// True when `path` contains something that looks like a period token.
pub fn has_token(path: &str) -> bool {
    TOKEN_RE.is_match(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(year: i32, month: u32) -> Period {
        Period::new(year, month).unwrap()
    }

    #[test]
    fn folder_token_values() {
        assert_eq!(p(2025, 9).folder_token(), "01SEP – 30SEP");
        assert_eq!(p(2025, 11).folder_token(), "01NOV – 30NOV");
        assert_eq!(p(2025, 12).folder_token(), "01DIC – 31DIC");
        assert_eq!(p(2025, 1).folder_token(), "01ENE – 31ENE");
    }

    #[test]
    fn february_leap_years() {
        assert_eq!(p(2024, 2).folder_token(), "01FEB – 29FEB");
        assert_eq!(p(2025, 2).folder_token(), "01FEB – 28FEB");
    }

    #[test]
    fn substitution_replaces_old_token() {
        let stored = "/sites/CCTV/Informes/2025/01SEP – 30SEP/Anexos/acta.pdf";
        let resolved = p(2025, 11).substitute_tokens(stored);
        assert!(resolved.contains("01NOV – 30NOV"));
        assert!(!resolved.contains("SEP"));
        assert_eq!(resolved, "/sites/CCTV/Informes/2025/01NOV – 30NOV/Anexos/acta.pdf");
    }

    #[test]
    fn substitution_is_lenient_about_dashes_and_case() {
        let target = p(2025, 10);
        assert_eq!(
            target.substitute_tokens("x/01sep-30sep/y"),
            "x/01OCT – 31OCT/y"
        );
        assert_eq!(
            target.substitute_tokens("x/01AUG — 31AUG/y"),
            "x/01OCT – 31OCT/y"
        );
    }

    #[test]
    fn substitution_without_token_is_identity() {
        let path = "Anexos/2025/acta_mantenimiento.pdf";
        assert_eq!(p(2025, 11).substitute_tokens(path), path);
        assert!(!has_token(path));
    }

    #[test]
    fn parse_and_display() {
        let period: Period = "2025-11".parse().unwrap();
        assert_eq!(period, p(2025, 11));
        assert_eq!(period.to_string(), "2025-11");
        assert_eq!("2025-9".parse::<Period>().unwrap(), p(2025, 9));
        assert_eq!("2025-13".parse::<Period>(), Err(PeriodError::Month(13)));
        assert!(matches!("noviembre".parse::<Period>(), Err(PeriodError::Format(_))));
    }

    #[test]
    fn previous_wraps_year() {
        assert_eq!(p(2025, 1).previous(), p(2024, 12));
        assert_eq!(p(2025, 6).previous(), p(2025, 5));
    }

    #[test]
    fn preceding_is_most_recent_first() {
        let prev = p(2025, 2).preceding(3);
        assert_eq!(prev, vec![p(2025, 1), p(2024, 12), p(2024, 11)]);
    }

    #[test]
    fn invalid_month_rejected() {
        assert_eq!(Period::new(2025, 13), Err(PeriodError::Month(13)));
        assert_eq!(Period::new(2025, 0), Err(PeriodError::Month(0)));
    }

    #[test]
    fn display_is_iso_month() {
        assert_eq!(p(2025, 3).to_string(), "2025-03");
    }
}
