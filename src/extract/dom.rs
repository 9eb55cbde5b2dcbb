//! Owned markup tree.
//!
//! Pages are tokenized and tree-built by `scraper` (html5ever), then folded into [Element]s with
//! lower-case tag names. Comments, doctypes and processing instructions are dropped.

use crate::epub::{is_xml_char, xml_escape};
use scraper::{ElementRef, Html};

/// Elements that never have children and serialize as `<tag/>`.
const VOID_TAGS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Element(Element),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub tag: String,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<Node>,
}

impl Element {
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_ascii_lowercase(),
            attrs: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn id(&self) -> Option<&str> {
        self.attr("id")
    }

    pub fn classes(&self) -> impl Iterator<Item = &str> {
        self.attr("class").unwrap_or("").split_whitespace()
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.classes().any(|c| c == class)
    }

    pub fn is_void(&self) -> bool {
        VOID_TAGS.contains(&self.tag.as_str())
    }

    /// Direct element children, in document order.
    pub fn elements(&self) -> impl DoubleEndedIterator<Item = &Element> {
        self.children.iter().filter_map(|n| match n {
            Node::Element(e) => Some(e),
            Node::Text(_) => None,
        })
    }

    /// All descendant elements in document (pre-)order, excluding `self`.
    pub fn descendants(&self) -> Descendants<'_> {
        Descendants {
            stack: self.elements().rev().collect(),
        }
    }

    /// Concatenated text content. `<br>` contributes a newline.
    pub fn text(&self) -> String {
        let mut out = String::new();
        self.push_text(&mut out);
        out
    }

    fn push_text(&self, out: &mut String) {
        if self.tag == "br" {
            out.push('\n');
        }
        for child in &self.children {
            match child {
                Node::Text(t) => out.push_str(t),
                Node::Element(e) => e.push_text(out),
            }
        }
    }

    /// Text content with whitespace runs collapsed to single spaces and trimmed.
    pub fn normalized_text(&self) -> String {
        self.text().split_whitespace().collect::<Vec<_>>().join(" ")
    }

    /// Serialize as XHTML. Descendant elements for which `keep` returns false are left out
    /// together with their subtree.
    pub fn write_xhtml(&self, out: &mut String, keep: &dyn Fn(&Element) -> bool) {
        out.push('<');
        out.push_str(&self.tag);
        for (name, value) in &self.attrs {
            if !is_xml_name(name) {
                continue;
            }
            out.push(' ');
            out.push_str(name);
            out.push_str("=\"");
            out.push_str(&xml_escape(value));
            out.push('"');
        }
        if self.is_void() {
            out.push_str("/>");
            return;
        }
        out.push('>');
        for child in &self.children {
            match child {
                Node::Text(t) => out.push_str(&xml_escape(t)),
                Node::Element(e) if keep(e) => e.write_xhtml(out, keep),
                Node::Element(_) => {}
            }
        }
        out.push_str("</");
        out.push_str(&self.tag);
        out.push('>');
    }
}

fn is_xml_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == ':' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | ':' | '.'))
}

/// Pre-order iterator over descendant elements.
pub struct Descendants<'a> {
    stack: Vec<&'a Element>,
}

impl<'a> Iterator for Descendants<'a> {
    type Item = &'a Element;

    fn next(&mut self) -> Option<&'a Element> {
        let el = self.stack.pop()?;
        self.stack.extend(el.elements().rev());
        Some(el)
    }
}

/// A parsed page.
#[derive(Debug, Clone)]
pub struct Document {
    root: Element,
}

impl Document {
    pub fn parse(html: &str) -> Self {
        let parsed = Html::parse_document(html);
        Self {
            root: fold(parsed.root_element()),
        }
    }

    /// All elements in document order, starting with `<html>`.
    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        std::iter::once(&self.root).chain(self.root.descendants())
    }

    /// `href` of the first `<base>` element, if any.
    pub fn base_href(&self) -> Option<&str> {
        self.elements()
            .filter(|e| e.tag == "base")
            .find_map(|e| e.attr("href"))
            .filter(|h| !h.trim().is_empty())
    }
}

fn fold(el: ElementRef<'_>) -> Element {
    let value = el.value();
    let mut element = Element::new(value.name());
    element.attrs = value
        .attrs()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    for child in el.children() {
        match child.value() {
            scraper::Node::Text(t) => {
                // Control characters have no place in XHTML output.
                let text = t.chars().filter(|&c| is_xml_char(c));
                match element.children.last_mut() {
                    Some(Node::Text(prev)) => prev.extend(text),
                    _ => element.children.push(Node::Text(text.collect())),
                }
            }
            scraper::Node::Element(_) => {
                if let Some(child_el) = ElementRef::wrap(child) {
                    element.children.push(Node::Element(fold(child_el)));
                }
            }
            _ => {}
        }
    }
    element
}
