//! Word (.docx) documents as a zip of parts plus an editable body tree.
//!
//! Only `word/document.xml` is parsed; every other part is carried through
//! byte for byte so styles, numbering and media survive a load/save cycle.

use std::io::{Cursor, Read, Write};
use std::path::Path;

use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::DocxError;
use crate::xml::{self, Element, Node, XmlPart};

pub const DOCUMENT_PART: &str = "word/document.xml";
const W_NS: &str = "http://schemas.openxmlformats.org/wordprocessingml/2006/main";

/// One top-level block of the body, in document order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    Paragraph { text: String, style: Option<String> },
    /// Index into [`WordDocument::tables`].
    Table(usize),
    Other,
}

pub struct WordDocument {
    parts: Vec<(String, Vec<u8>)>,
    root: Element,
    body: Element,
    body_pos: usize,
    declaration: bool,
}

impl WordDocument {
    pub fn open(path: &Path) -> Result<Self, DocxError> {
        let bytes = std::fs::read(path).map_err(|e| DocxError::io(path, e))?;
        Self::from_bytes(&bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DocxError> {
        let mut archive = ZipArchive::new(Cursor::new(bytes))?;
        let mut parts = Vec::with_capacity(archive.len());
        for i in 0..archive.len() {
            let mut file = archive.by_index(i)?;
            if !file.is_file() {
                continue;
            }
            let name = file.name().to_string();
            let mut contents = Vec::new();
            file.read_to_end(&mut contents)
                .map_err(|e| DocxError::io(&name, e))?;
            parts.push((name, contents));
        }

        let document_xml = parts
            .iter()
            .find(|(name, _)| name == DOCUMENT_PART)
            .map(|(_, bytes)| bytes.as_slice())
            .ok_or_else(|| DocxError::MissingPart(DOCUMENT_PART.into()))?;
        let XmlPart { mut root, declaration } = xml::parse(document_xml)?;

        let body_pos = root
            .children
            .iter()
            .position(|n| matches!(n, Node::Element(e) if e.is("w:body")))
            .ok_or(DocxError::MissingElement("w:body"))?;
        let body = match root.children.remove(body_pos) {
            Node::Element(e) => e,
            Node::Text(_) => return Err(DocxError::MissingElement("w:body")),
        };

        debug!(parts = parts.len(), blocks = body.children.len(), "docx loaded");
        Ok(Self {
            parts,
            root,
            body,
            body_pos,
            declaration,
        })
    }

    /// A minimal empty document with the three parts Word requires.
    pub fn blank() -> Self {
        let content_types = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/word/document.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml"/></Types>"#;
        let rels = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="word/document.xml"/></Relationships>"#;
        Self {
            parts: vec![
                ("[Content_Types].xml".into(), content_types.as_bytes().to_vec()),
                ("_rels/.rels".into(), rels.as_bytes().to_vec()),
                (DOCUMENT_PART.into(), Vec::new()),
            ],
            root: Element::new("w:document").with_attr("xmlns:w", W_NS),
            body: Element::new("w:body"),
            body_pos: 0,
            declaration: true,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, DocxError> {
        let mut root = self.root.clone();
        let pos = self.body_pos.min(root.children.len());
        root.children.insert(pos, Node::Element(self.body.clone()));
        let document_xml = xml::write(&XmlPart {
            root,
            declaration: self.declaration,
        })?;

        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        for (name, bytes) in &self.parts {
            writer.start_file(name.as_str(), options)?;
            let contents = if name == DOCUMENT_PART {
                &document_xml
            } else {
                bytes
            };
            writer
                .write_all(contents)
                .map_err(|e| DocxError::io(name, e))?;
        }
        Ok(writer.finish()?.into_inner())
    }

    pub fn save(&self, path: &Path) -> Result<(), DocxError> {
        let bytes = self.to_bytes()?;
        std::fs::write(path, bytes).map_err(|e| DocxError::io(path, e))
    }

    // ── Body access ──

    pub fn body(&self) -> &Element {
        &self.body
    }

    pub fn blocks(&self) -> Vec<Block> {
        let mut tables = 0;
        self.body
            .elements()
            .map(|el| match el.name.as_str() {
                "w:p" => Block::Paragraph {
                    text: paragraph_text(el),
                    style: paragraph_style(el).map(str::to_string),
                },
                "w:tbl" => {
                    tables += 1;
                    Block::Table(tables - 1)
                }
                _ => Block::Other,
            })
            .collect()
    }

    /// Text of every top-level paragraph.
    pub fn paragraphs(&self) -> Vec<String> {
        self.body.children_named("w:p").map(paragraph_text).collect()
    }

    /// Top-level tables in document order.
    pub fn tables(&self) -> Vec<&Element> {
        self.body.children_named("w:tbl").collect()
    }

    pub fn table_mut(&mut self, index: usize) -> Option<&mut Element> {
        self.body.elements_mut().filter(|e| e.is("w:tbl")).nth(index)
    }

    pub fn push_paragraph(&mut self, text: &str, style: Option<&str>) {
        self.insert_block(paragraph(text, style));
    }

    pub fn push_table(&mut self, table: Element) {
        self.insert_block(table);
    }

    /// Insert `table` right after the `paragraph_index`-th top-level paragraph.
    ///
    /// Returns `false` when there is no such paragraph.
    pub fn insert_table_after_paragraph(&mut self, paragraph_index: usize, table: Element) -> bool {
        let position = self
            .body
            .children
            .iter()
            .enumerate()
            .filter(|(_, n)| matches!(n, Node::Element(e) if e.is("w:p")))
            .nth(paragraph_index)
            .map(|(i, _)| i);
        match position {
            Some(i) => {
                self.body.children.insert(i + 1, Node::Element(table));
                true
            }
            None => false,
        }
    }

    pub fn remove_table(&mut self, index: usize) -> Option<Element> {
        let position = self
            .body
            .children
            .iter()
            .enumerate()
            .filter(|(_, n)| matches!(n, Node::Element(e) if e.is("w:tbl")))
            .nth(index)
            .map(|(i, _)| i)?;
        match self.body.children.remove(position) {
            Node::Element(e) => Some(e),
            Node::Text(_) => None,
        }
    }

    /// Blocks go before the trailing section properties.
    fn insert_block(&mut self, block: Element) {
        let at = self
            .body
            .children
            .iter()
            .rposition(|n| matches!(n, Node::Element(e) if e.is("w:sectPr")))
            .unwrap_or(self.body.children.len());
        self.body.children.insert(at, Node::Element(block));
    }
}

// ── Paragraphs ──

pub fn paragraph(text: &str, style: Option<&str>) -> Element {
    let mut p = Element::new("w:p");
    if let Some(style) = style {
        p.push(Element::new("w:pPr").with_child(Element::new("w:pStyle").with_attr("w:val", style)));
    }
    p.push(run(text, None));
    p
}

/// Visible text of a paragraph or any container of runs.
pub fn paragraph_text(el: &Element) -> String {
    let mut out = String::new();
    collect_run_text(el, &mut out);
    out
}

fn collect_run_text(el: &Element, out: &mut String) {
    for child in el.elements() {
        match child.name.as_str() {
            "w:t" => out.push_str(&child.text()),
            "w:tab" => out.push('\t'),
            "w:br" | "w:cr" => out.push('\n'),
            "w:delText" | "w:instrText" | "w:pPr" | "w:rPr" => {}
            _ => collect_run_text(child, out),
        }
    }
}

pub fn paragraph_style(p: &Element) -> Option<&str> {
    p.child("w:pPr")?.child("w:pStyle")?.attr("w:val")
}

/// A run holding `text`, with line breaks for embedded newlines.
fn run(text: &str, rpr: Option<Element>) -> Element {
    let mut r = Element::new("w:r");
    if let Some(rpr) = rpr {
        r.push(rpr);
    }
    for (i, line) in text.split('\n').enumerate() {
        if i > 0 {
            r.push(Element::new("w:br"));
        }
        r.push(
            Element::new("w:t")
                .with_attr("xml:space", "preserve")
                .with_text(line),
        );
    }
    r
}

// ── Tables ──

pub fn table_rows(tbl: &Element) -> Vec<&Element> {
    tbl.children_named("w:tr").collect()
}

pub fn row_cells(tr: &Element) -> Vec<&Element> {
    tr.children_named("w:tc").collect()
}

/// Text of a cell, paragraphs joined by a space.
pub fn cell_text(tc: &Element) -> String {
    tc.children_named("w:p")
        .map(paragraph_text)
        .collect::<Vec<_>>()
        .join(" ")
        .trim()
        .to_string()
}

/// Replace a cell's content with `text`, keeping the cell, paragraph and
/// first-run formatting.
pub fn set_cell_text(tc: &mut Element, text: &str) {
    let template = tc.child("w:p").cloned();
    let ppr = template.as_ref().and_then(|p| p.child("w:pPr").cloned());
    let rpr = template
        .as_ref()
        .and_then(|p| p.child("w:r"))
        .and_then(|r| r.child("w:rPr").cloned());

    let mut p = Element::new("w:p");
    if let Some(template) = &template {
        p.attrs = template.attrs.clone();
    }
    if let Some(ppr) = ppr {
        p.push(ppr);
    }
    p.push(run(text, rpr));

    tc.children.retain(|n| matches!(n, Node::Element(e) if e.is("w:tcPr")));
    tc.push(p);
}

/// A plain bordered table; the first row is the header.
pub fn new_table(rows: &[Vec<&str>]) -> Element {
    let columns = rows.iter().map(Vec::len).max().unwrap_or(0);
    let mut grid = Element::new("w:tblGrid");
    for _ in 0..columns {
        grid.push(Element::new("w:gridCol").with_attr("w:w", "1800"));
    }
    let mut tbl = Element::new("w:tbl")
        .with_child(
            Element::new("w:tblPr")
                .with_child(Element::new("w:tblStyle").with_attr("w:val", "TableGrid"))
                .with_child(Element::new("w:tblW").with_attr("w:w", "0").with_attr("w:type", "auto")),
        )
        .with_child(grid);
    for row in rows {
        let mut tr = Element::new("w:tr");
        for text in row {
            let mut tc = Element::new("w:tc").with_child(paragraph("", None));
            set_cell_text(&mut tc, text);
            tr.push(tc);
        }
        tbl.push(tr);
    }
    tbl
}
