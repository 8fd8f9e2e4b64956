//! A small owned XML tree over `quick-xml`.
//!
//! Element and attribute names keep their namespace prefix as written
//! (`w:tbl`, `w:val`), which is all the docx code needs. Comments and
//! processing instructions are dropped; everything else round-trips.

use quick_xml::Reader;
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};

use crate::DocxError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Element(Element),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub name: String,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<Node>,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attrs: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_attr(key, value);
        self
    }

    pub fn with_child(mut self, child: Element) -> Self {
        self.children.push(Node::Element(child));
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.children.push(Node::Text(text.into()));
        self
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn set_attr(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.attrs.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.attrs.push((key, value)),
        }
    }

    pub fn is(&self, name: &str) -> bool {
        self.name == name
    }

    /// Direct child elements, in document order.
    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|n| match n {
            Node::Element(e) => Some(e),
            Node::Text(_) => None,
        })
    }

    pub fn elements_mut(&mut self) -> impl Iterator<Item = &mut Element> {
        self.children.iter_mut().filter_map(|n| match n {
            Node::Element(e) => Some(e),
            Node::Text(_) => None,
        })
    }

    pub fn child(&self, name: &str) -> Option<&Element> {
        self.elements().find(|e| e.is(name))
    }

    pub fn child_mut(&mut self, name: &str) -> Option<&mut Element> {
        self.elements_mut().find(|e| e.is(name))
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> {
        self.elements().filter(move |e| e.is(name))
    }

    pub fn push(&mut self, child: Element) {
        self.children.push(Node::Element(child));
    }

    /// Remove every direct child element called `name`; returns how many went.
    pub fn remove_children_named(&mut self, name: &str) -> usize {
        let before = self.children.len();
        self.children
            .retain(|n| !matches!(n, Node::Element(e) if e.is(name)));
        before - self.children.len()
    }

    /// Remove every descendant element called `name`, at any depth.
    pub fn remove_descendants_named(&mut self, name: &str) {
        self.remove_children_named(name);
        for child in self.elements_mut() {
            child.remove_descendants_named(name);
        }
    }

    /// Concatenated text nodes of this element and all descendants.
    pub fn text(&self) -> String {
        let mut out = String::new();
        collect_text(self, &mut out);
        out
    }
}

fn collect_text(el: &Element, out: &mut String) {
    for child in &el.children {
        match child {
            Node::Text(t) => out.push_str(t),
            Node::Element(e) => collect_text(e, out),
        }
    }
}

// ── Reading ──

/// A parsed XML part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlPart {
    pub root: Element,
    pub declaration: bool,
}

pub fn parse(bytes: &[u8]) -> Result<XmlPart, DocxError> {
    let mut reader = Reader::from_reader(bytes);
    let mut buf = Vec::new();
    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;
    let mut declaration = false;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Decl(_) => declaration = true,
            Event::Start(start) => stack.push(element_from(&start)?),
            Event::Empty(start) => {
                let el = element_from(&start)?;
                attach(&mut stack, &mut root, el)?;
            }
            Event::End(_) => {
                let el = stack
                    .pop()
                    .ok_or_else(|| DocxError::Malformed("unbalanced end tag".into()))?;
                attach(&mut stack, &mut root, el)?;
            }
            Event::Text(text) => {
                if let Some(parent) = stack.last_mut() {
                    parent.children.push(Node::Text(text.unescape()?.into_owned()));
                }
            }
            Event::CData(data) => {
                if let Some(parent) = stack.last_mut() {
                    let text = String::from_utf8_lossy(&data.into_inner()).into_owned();
                    parent.children.push(Node::Text(text));
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if !stack.is_empty() {
        return Err(DocxError::Malformed(format!("unclosed element <{}>", stack[stack.len() - 1].name)));
    }
    let root = root.ok_or_else(|| DocxError::Malformed("no root element".into()))?;
    Ok(XmlPart { root, declaration })
}

fn element_from(start: &BytesStart<'_>) -> Result<Element, DocxError> {
    let mut el = Element::new(String::from_utf8_lossy(start.name().as_ref()).into_owned());
    for attr in start.attributes() {
        let attr = attr.map_err(quick_xml::Error::from)?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value()?.into_owned();
        el.attrs.push((key, value));
    }
    Ok(el)
}

fn attach(stack: &mut [Element], root: &mut Option<Element>, el: Element) -> Result<(), DocxError> {
    match stack.last_mut() {
        Some(parent) => {
            parent.push(el);
            Ok(())
        }
        None if root.is_none() => {
            *root = Some(el);
            Ok(())
        }
        None => Err(DocxError::Malformed("more than one root element".into())),
    }
}

// ── Writing ──

pub fn write(part: &XmlPart) -> Result<Vec<u8>, DocxError> {
    let mut writer = Writer::new(Vec::new());
    if part.declaration {
        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), Some("yes"))))?;
    }
    write_element(&mut writer, &part.root)?;
    Ok(writer.into_inner())
}

fn write_element(writer: &mut Writer<Vec<u8>>, el: &Element) -> Result<(), quick_xml::Error> {
    let mut start = BytesStart::new(el.name.as_str());
    for (k, v) in &el.attrs {
        start.push_attribute((k.as_str(), v.as_str()));
    }
    if el.children.is_empty() {
        return writer.write_event(Event::Empty(start));
    }
    writer.write_event(Event::Start(start))?;
    for child in &el.children {
        match child {
            Node::Element(e) => write_element(writer, e)?,
            Node::Text(t) => writer.write_event(Event::Text(BytesText::new(t)))?,
        }
    }
    writer.write_event(Event::End(BytesEnd::new(el.name.as_str())))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body><w:p><w:r><w:t xml:space="preserve">Hola &amp; adiós</w:t></w:r></w:p><w:sectPr/></w:body></w:document>"#;

    #[test]
    fn parses_names_attributes_and_text() {
        let part = parse(SAMPLE.as_bytes()).unwrap();
        assert!(part.declaration);
        assert_eq!(part.root.name, "w:document");
        assert!(part.root.attr("xmlns:w").is_some());
        let body = part.root.child("w:body").unwrap();
        assert_eq!(body.elements().count(), 2);
        assert_eq!(body.text(), "Hola & adiós");
        let t = body.child("w:p").unwrap().child("w:r").unwrap().child("w:t").unwrap();
        assert_eq!(t.attr("xml:space"), Some("preserve"));
    }

    #[test]
    fn write_then_parse_keeps_tree() {
        let part = parse(SAMPLE.as_bytes()).unwrap();
        let bytes = write(&part).unwrap();
        let text = String::from_utf8(bytes.clone()).unwrap();
        assert!(text.contains("Hola &amp; adiós"));
        assert!(text.contains("<w:sectPr/>"));
        assert_eq!(parse(&bytes).unwrap().root, part.root);
    }

    #[test]
    fn rejects_broken_documents() {
        assert!(parse(b"<a><b></a>").is_err());
        assert!(parse(b"").is_err());
    }

    #[test]
    fn removes_descendants() {
        let mut el = Element::new("w:rPr")
            .with_child(Element::new("w:b"))
            .with_child(Element::new("w:sz").with_child(Element::new("w:b")));
        el.remove_descendants_named("w:b");
        assert_eq!(el.elements().count(), 1);
        assert_eq!(el.child("w:sz").unwrap().elements().count(), 0);
    }
}
