//! Inbound markup -> element tree, plus a strict-order field reader

use quick_xml::events::Event;
use quick_xml::reader::Reader;

use crate::core::{Error, Result};

/// One parsed element.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Element {
    pub name: String,
    pub attrs: Vec<(String, String)>,
    pub text: String,
    pub children: Vec<Element>,
}

impl Element {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// Text with surrounding whitespace removed.
    pub fn value(&self) -> &str {
        self.text.trim()
    }

    /// Short single-line rendering for diagnostics.
    pub fn preview(&self) -> String {
        format!("<{}> ({} children)", self.name, self.children.len())
    }
}

/// Parse a blob holding one or more top-level elements.
pub fn parse_document(xml: &str) -> Result<Vec<Element>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut roots = Vec::new();
    let mut stack: Vec<Element> = Vec::new();

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                stack.push(open_element(&e)?);
            }
            Event::Empty(e) => {
                let el = open_element(&e)?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(el),
                    None => roots.push(el),
                }
            }
            Event::Text(t) => {
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(&t.unescape()?);
                }
            }
            Event::CData(c) => {
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(&String::from_utf8_lossy(&c.into_inner()));
                }
            }
            Event::End(_) => {
                let Some(done) = stack.pop() else {
                    return Err(Error::Protocol("unbalanced closing tag".into()));
                };
                match stack.last_mut() {
                    Some(parent) => parent.children.push(done),
                    None => roots.push(done),
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(Error::Protocol(format!("unterminated element <{}>", stack[0].name)));
    }
    Ok(roots)
}

fn open_element(e: &quick_xml::events::BytesStart<'_>) -> Result<Element> {
    let mut el = Element {
        name: String::from_utf8_lossy(e.name().as_ref()).into_owned(),
        ..Default::default()
    };
    for attr in e.attributes() {
        let attr = attr.map_err(quick_xml::Error::from)?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value()?.into_owned();
        el.attrs.push((key, value));
    }
    Ok(el)
}

/// Reads a record's child fields in their expected order.
///
/// Each lookup scans forward from the last matched field, so a field that
/// appears out of order counts as missing. Required lookups fail with
/// [`Error::MissingField`] naming the section and field.
pub struct FieldReader<'a> {
    section: &'static str,
    el: &'a Element,
    cursor: usize,
}

impl<'a> FieldReader<'a> {
    pub fn new(section: &'static str, el: &'a Element) -> Self {
        Self { section, el, cursor: 0 }
    }

    pub fn element(&self) -> &'a Element {
        self.el
    }

    pub fn attr(&self, name: &str) -> Option<&'a str> {
        self.el.attr(name)
    }

    pub fn require_attr(&self, name: &'static str) -> Result<&'a str> {
        self.el.attr(name).ok_or(Error::MissingField {
            section: self.section,
            field: name,
        })
    }

    /// Next field called `name`, if present in order.
    pub fn field(&mut self, name: &str) -> Option<&'a str> {
        self.field_element(name).map(|e| e.value())
    }

    pub fn field_element(&mut self, name: &str) -> Option<&'a Element> {
        let el: &'a Element = self.el;
        let offset = el.children[self.cursor..].iter().position(|c| c.name == name)?;
        let idx = self.cursor + offset;
        self.cursor = idx + 1;
        Some(&el.children[idx])
    }

    pub fn require(&mut self, name: &'static str) -> Result<&'a str> {
        self.field(name).ok_or(Error::MissingField {
            section: self.section,
            field: name,
        })
    }

    /// Required field that must also parse.
    pub fn require_parsed<T>(&mut self, name: &'static str, parse: impl FnOnce(&str) -> Option<T>) -> Result<T> {
        let raw = self.require(name)?;
        parse(raw).ok_or_else(|| {
            Error::Protocol(format!("section '{}' field '{}': bad value {:?}", self.section, name, raw))
        })
    }

    /// Optional field; absent or unparsable yields `None`.
    pub fn parsed<T>(&mut self, name: &str, parse: impl FnOnce(&str) -> Option<T>) -> Option<T> {
        self.field(name).and_then(parse)
    }
}
