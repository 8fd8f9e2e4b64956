//! Find the obligations table in a rendered report and refill its rows.
//!
//! Word documents produced by the template engine carry no stable table id,
//! so the table is located heuristically:
//!
//! 1. **By title**: the first table after a paragraph that names the section
//!    (subsection number plus a title keyword), accepted when its header row
//!    matches at least two column keywords.
//! 2. **By header score**: every table is scored by how many column kinds its
//!    first row names; the best table with at least three kinds and the
//!    expected column count wins, ties going to the wider table.
//! 3. **Last resort**: the first table with the expected column count.
//!
//! If all three fail, injection is abandoned and every table's header
//! signature is logged. Nothing here returns an error to the caller.

use tracing::{debug, info, warn};
use vigia_core::Obligation;

use crate::docx::{self, WordDocument};
use crate::xml::{Element, Node};

// ── Columns ──

/// The column kinds an obligations table may carry, in canonical order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Column {
    Item,
    Obligation,
    Periodicity,
    Compliance,
    Observation,
    Annex,
}

impl Column {
    pub const CANONICAL: [Column; 6] = [
        Column::Item,
        Column::Obligation,
        Column::Periodicity,
        Column::Compliance,
        Column::Observation,
        Column::Annex,
    ];

    /// Header text written into placeholder or padded header cells.
    pub fn header(&self) -> &'static str {
        match self {
            Self::Item => "ÍTEM",
            Self::Obligation => "OBLIGACIÓN",
            Self::Periodicity => "PERIODICIDAD",
            Self::Compliance => "CUMPLIMIENTO",
            Self::Observation => "OBSERVACIONES",
            Self::Annex => "ANEXO",
        }
    }

    /// Classify a header cell. Order matters: "CUMPLIMIENTO DE LA OBLIGACIÓN"
    /// is a compliance column, "OBSERVACIONES DEL CUMPLIMIENTO" an observation one.
    pub fn classify(header: &str) -> Option<Self> {
        let h = fold(header);
        let h = h.trim();
        if h.is_empty() {
            return None;
        }
        if matches!(h, "NO" | "NO." | "N°" | "Nº" | "#") || h.contains("ITEM") || h.starts_with("NUMERO") {
            Some(Self::Item)
        } else if h.contains("OBSERVACI") {
            Some(Self::Observation)
        } else if h.contains("ANEXO") || h.contains("SOPORTE") || h.contains("EVIDENCIA") {
            Some(Self::Annex)
        } else if h.contains("PERIODICIDAD") || h.contains("FRECUENCIA") {
            Some(Self::Periodicity)
        } else if h.contains("CUMPLIMIENTO") || h.contains("CUMPLE") || h == "ESTADO" {
            Some(Self::Compliance)
        } else if h.contains("OBLIGACI") {
            Some(Self::Obligation)
        } else {
            None
        }
    }
}

/// Upper case with Spanish accents removed.
fn fold(text: &str) -> String {
    text.to_uppercase()
        .chars()
        .map(|c| match c {
            'Á' | 'À' => 'A',
            'É' | 'È' => 'E',
            'Í' | 'Ì' => 'I',
            'Ó' | 'Ò' => 'O',
            'Ú' | 'Ù' | 'Ü' => 'U',
            'Ñ' => 'N',
            other => other,
        })
        .collect()
}

fn is_placeholder(header: &str) -> bool {
    let h = header.trim();
    h.is_empty()
        || h.chars().all(|c| matches!(c, '-' | '_' | '.' | '…' | ' '))
        || h.starts_with("{{")
        || h.starts_with("{%")
        || fold(h).starts_with("COLUMNA")
}

/// Number of distinct column kinds named by a header row.
fn header_score(signature: &[String]) -> usize {
    let mut seen = Vec::new();
    for kind in signature.iter().filter_map(|h| Column::classify(h)) {
        if !seen.contains(&kind) {
            seen.push(kind);
        }
    }
    seen.len()
}

// ── Rows ──

/// One obligation rendered as table cell text.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ObligationRow {
    pub item: String,
    pub obligation: String,
    pub periodicity: String,
    pub compliance: String,
    pub observation: String,
    pub annex: String,
}

impl ObligationRow {
    pub fn from_obligation(ob: &Obligation) -> Self {
        Self {
            item: ob.item.to_string(),
            obligation: ob.text.trim().to_string(),
            periodicity: ob.periodicity.trim().to_string(),
            compliance: ob.compliance_status.label().to_string(),
            observation: ob
                .current_observation()
                .or_else(|| ob.default_observation())
                .unwrap_or_default()
                .to_string(),
            annex: ob.annex_reference(),
        }
    }

    pub fn field(&self, column: Column) -> &str {
        match column {
            Column::Item => &self.item,
            Column::Obligation => &self.obligation,
            Column::Periodicity => &self.periodicity,
            Column::Compliance => &self.compliance,
            Column::Observation => &self.observation,
            Column::Annex => &self.annex,
        }
    }
}

// ── Search ──

#[derive(Debug, Clone)]
pub struct AnchorConfig {
    /// Keywords, any of which marks the section heading.
    pub title_keywords: Vec<String>,
    /// Subsection number the heading must also contain, e.g. `1.5`.
    pub subsection: Option<String>,
    /// Minimum column count for score and last-resort selection; narrower
    /// tables are padded up to it before writing.
    pub expected_columns: usize,
    /// Header keyword kinds a title-found table must name.
    pub min_title_matches: usize,
    /// Header keyword kinds a scored table must name.
    pub min_score: usize,
}

impl Default for AnchorConfig {
    fn default() -> Self {
        Self {
            title_keywords: vec!["OBLIGACIONES".into()],
            subsection: None,
            expected_columns: 5,
            min_title_matches: 2,
            min_score: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnchorStrategy {
    Title,
    HeaderScore,
    FirstWideTable,
}

/// The table picked for injection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnchorMatch {
    pub table_index: usize,
    pub header_signature: Vec<String>,
    pub confidence_score: usize,
    pub strategy: AnchorStrategy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnchorOutcome {
    Injected { anchor: AnchorMatch, rows: usize },
    /// No usable table; the document is left untouched.
    Abandoned { signatures: Vec<Vec<String>> },
}

enum SearchState {
    SearchingByTitle,
    SearchingByHeaderScore,
    Found(AnchorMatch),
    NotFound,
}

pub struct TableAnchor {
    config: AnchorConfig,
}

struct TableInfo {
    signature: Vec<String>,
    columns: usize,
}

impl TableAnchor {
    pub fn new(config: AnchorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AnchorConfig {
        &self.config
    }

    /// Run the search and return the chosen table, if any.
    pub fn locate(&self, doc: &WordDocument) -> Option<AnchorMatch> {
        let tables: Vec<TableInfo> = doc.tables().into_iter().map(table_info).collect();
        let mut state = SearchState::SearchingByTitle;
        loop {
            state = match state {
                SearchState::SearchingByTitle => match self.search_by_title(doc, &tables) {
                    Some(found) => SearchState::Found(found),
                    None => SearchState::SearchingByHeaderScore,
                },
                SearchState::SearchingByHeaderScore => match self.search_by_score(&tables) {
                    Some(found) => SearchState::Found(found),
                    None => SearchState::NotFound,
                },
                SearchState::Found(found) => {
                    debug!(
                        table = found.table_index,
                        score = found.confidence_score,
                        strategy = ?found.strategy,
                        "anchor table found"
                    );
                    return Some(found);
                }
                SearchState::NotFound => {
                    for (i, t) in tables.iter().enumerate() {
                        warn!(
                            table = i,
                            columns = t.columns,
                            header = ?t.signature,
                            "candidate table rejected"
                        );
                    }
                    return self.last_resort(&tables);
                }
            };
        }
    }

    fn search_by_title(&self, doc: &WordDocument, tables: &[TableInfo]) -> Option<AnchorMatch> {
        let mut heading_seen = false;
        for block in doc.blocks() {
            match block {
                docx::Block::Paragraph { text, .. } => {
                    if self.is_section_heading(&text) {
                        heading_seen = true;
                    }
                }
                docx::Block::Table(index) if heading_seen => {
                    heading_seen = false;
                    let info = &tables[index];
                    let score = header_score(&info.signature);
                    if score >= self.config.min_title_matches {
                        return Some(AnchorMatch {
                            table_index: index,
                            header_signature: info.signature.clone(),
                            confidence_score: score,
                            strategy: AnchorStrategy::Title,
                        });
                    }
                    debug!(table = index, score, "table after heading failed header validation");
                }
                _ => {}
            }
        }
        None
    }

    fn is_section_heading(&self, text: &str) -> bool {
        let folded = fold(text);
        let keyword = self
            .config
            .title_keywords
            .iter()
            .any(|k| folded.contains(&fold(k)));
        if !keyword {
            return false;
        }
        match &self.config.subsection {
            Some(number) => folded
                .split_whitespace()
                .any(|token| token.trim_end_matches(['.', ')', ':']) == number.trim_end_matches('.')),
            None => true,
        }
    }

    fn search_by_score(&self, tables: &[TableInfo]) -> Option<AnchorMatch> {
        tables
            .iter()
            .enumerate()
            .map(|(i, t)| (i, t, header_score(&t.signature)))
            .filter(|(_, t, score)| {
                *score >= self.config.min_score && t.columns >= self.config.expected_columns
            })
            // Highest score, then most columns, then earliest table.
            .max_by(|a, b| {
                a.2.cmp(&b.2)
                    .then(a.1.columns.cmp(&b.1.columns))
                    .then(b.0.cmp(&a.0))
            })
            .map(|(i, t, score)| AnchorMatch {
                table_index: i,
                header_signature: t.signature.clone(),
                confidence_score: score,
                strategy: AnchorStrategy::HeaderScore,
            })
    }

    fn last_resort(&self, tables: &[TableInfo]) -> Option<AnchorMatch> {
        tables
            .iter()
            .enumerate()
            .find(|(_, t)| t.columns >= self.config.expected_columns)
            .map(|(i, t)| AnchorMatch {
                table_index: i,
                header_signature: t.signature.clone(),
                confidence_score: header_score(&t.signature),
                strategy: AnchorStrategy::FirstWideTable,
            })
    }

    // ── Injection ──

    /// Locate the table and replace its data rows with `rows`.
    pub fn inject(&self, doc: &mut WordDocument, rows: &[ObligationRow]) -> AnchorOutcome {
        let Some(anchor) = self.locate(doc) else {
            let signatures = doc
                .tables()
                .into_iter()
                .map(|t| table_info(t).signature)
                .collect();
            warn!("no obligations table found, injection abandoned");
            return AnchorOutcome::Abandoned { signatures };
        };
        let Some(table) = doc.table_mut(anchor.table_index) else {
            return AnchorOutcome::Abandoned { signatures: Vec::new() };
        };
        let written = self.refill(table, rows);
        info!(
            table = anchor.table_index,
            strategy = ?anchor.strategy,
            rows = written,
            "obligations table refilled"
        );
        AnchorOutcome::Injected {
            anchor,
            rows: written,
        }
    }

    fn refill(&self, table: &mut Element, rows: &[ObligationRow]) -> usize {
        let header_rows = leading_header_rows(table);
        let template = data_row_template(table, header_rows);

        // Drop all data rows.
        let mut seen_rows = 0;
        table.children.retain(|n| match n {
            Node::Element(e) if e.is("w:tr") => {
                seen_rows += 1;
                seen_rows <= header_rows
            }
            _ => true,
        });

        let Some(header) = table.elements_mut().filter(|e| e.is("w:tr")).nth(header_rows.saturating_sub(1)) else {
            return 0;
        };
        let columns = map_columns(header, self.config.expected_columns);
        let column_count = columns.len();
        sync_grid(table, column_count);

        let Some(mut template) = template else {
            return 0;
        };
        pad_cells(&mut template, column_count);

        for row in rows {
            let mut tr = template.clone();
            for (cell, column) in tr.elements_mut().filter(|e| e.is("w:tc")).zip(&columns) {
                let text = column.map(|c| row.field(c)).unwrap_or_default();
                docx::set_cell_text(cell, text);
            }
            table.push(tr);
        }
        rows.len()
    }
}

fn table_info(tbl: &Element) -> TableInfo {
    let rows = docx::table_rows(tbl);
    let signature: Vec<String> = rows
        .first()
        .map(|r| docx::row_cells(r).into_iter().map(docx::cell_text).collect())
        .unwrap_or_default();
    TableInfo {
        columns: signature.len(),
        signature,
    }
}

fn is_repeated_header(tr: &Element) -> bool {
    tr.child("w:trPr")
        .and_then(|p| p.child("w:tblHeader"))
        .is_some_and(|h| !matches!(h.attr("w:val"), Some("0" | "false")))
}

/// The first row plus any immediately following rows marked as repeating headers.
fn leading_header_rows(table: &Element) -> usize {
    let rows = docx::table_rows(table);
    if rows.is_empty() {
        return 0;
    }
    1 + rows[1..].iter().take_while(|r| is_repeated_header(r)).count()
}

/// The first data row, or a de-emphasised copy of the header row.
fn data_row_template(table: &Element, header_rows: usize) -> Option<Element> {
    let rows = docx::table_rows(table);
    if let Some(row) = rows.get(header_rows) {
        return Some((*row).clone());
    }
    let mut row = (*rows.get(header_rows.checked_sub(1)?)?).clone();
    if let Some(trpr) = row.child_mut("w:trPr") {
        trpr.remove_children_named("w:tblHeader");
    }
    row.remove_descendants_named("w:b");
    row.remove_descendants_named("w:bCs");
    row.remove_descendants_named("w:shd");
    Some(row)
}

/// Decide which field each header cell receives, padding the header to
/// `expected` cells and writing canonical text into placeholder headers.
fn map_columns(header: &mut Element, expected: usize) -> Vec<Option<Column>> {
    pad_cells(header, expected);
    let texts: Vec<String> = header
        .children_named("w:tc")
        .map(docx::cell_text)
        .collect();
    let classified: Vec<Option<Column>> = texts.iter().map(|t| Column::classify(t)).collect();

    // Headers that say nothing useful fall back to canonical positions.
    let positional = classified.iter().flatten().count() < 2;

    let mut assigned: Vec<Option<Column>> = Vec::with_capacity(texts.len());
    for kind in &classified {
        let kind = match kind {
            Some(k) if !positional && !assigned.contains(&Some(*k)) => Some(*k),
            _ => None,
        };
        assigned.push(kind);
    }
    for i in 0..assigned.len() {
        if assigned[i].is_some() || !(positional || is_placeholder(&texts[i])) {
            continue;
        }
        let canonical = Column::CANONICAL.get(i).copied().filter(|c| !assigned.contains(&Some(*c)));
        let fill = canonical.or_else(|| {
            Column::CANONICAL
                .iter()
                .copied()
                .find(|c| !assigned.contains(&Some(*c)))
        });
        assigned[i] = fill;
    }

    for (cell, (kind, text)) in header
        .elements_mut()
        .filter(|e| e.is("w:tc"))
        .zip(assigned.iter().zip(&texts))
    {
        if let Some(kind) = kind
            && is_placeholder(text)
        {
            docx::set_cell_text(cell, kind.header());
        }
    }
    assigned
}

/// Append cells cloned from the last one until the row has `count` cells.
fn pad_cells(row: &mut Element, count: usize) {
    let cells: Vec<Element> = row.children_named("w:tc").cloned().collect();
    let Some(last) = cells.last() else {
        return;
    };
    for _ in cells.len()..count {
        let mut cell = last.clone();
        docx::set_cell_text(&mut cell, "");
        row.push(cell);
    }
}

/// Make the table grid declare at least `columns` columns.
fn sync_grid(table: &mut Element, columns: usize) {
    let Some(grid) = table.child_mut("w:tblGrid") else {
        return;
    };
    let existing: Vec<Element> = grid.children_named("w:gridCol").cloned().collect();
    let template = existing
        .last()
        .cloned()
        .unwrap_or_else(|| Element::new("w:gridCol").with_attr("w:w", "1500"));
    for _ in existing.len()..columns {
        grid.push(template.clone());
    }
}
