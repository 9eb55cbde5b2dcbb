//! Content extraction: find the book container on a page, normalize it into a [Chapter], and
//! find the link to the next page.

pub mod dom;
mod error;
pub mod preset;
pub mod quirks;

pub use dom::{Document, Element, Node};
pub use error::ExtractError;
pub use preset::{PresetConfig, PresetError, RuleConfig};
pub use quirks::{QuirkAction, QuirkSelector, Quirks, MAX_HEADING_LEVEL};

use crate::model::{inline_text, Block, Chapter, Inline};
use regex::Regex;
use std::fmt;

/// Elements whose children are processed in place.
const CONTAINER_TAGS: &[&str] = &[
    "div", "section", "article", "main", "center", "body", "html", "hgroup",
];

/// Class of the small label line when a promoted paragraph merges into the heading after it.
pub const SMALL_HEADING_CLASS: &str = "wb-small-h";

/// Elements folded into the surrounding paragraph's inline content.
const INLINE_TAGS: &[&str] = &[
    "a", "abbr", "acronym", "b", "bdi", "bdo", "big", "br", "cite", "code", "del", "dfn", "em",
    "font", "i", "img", "ins", "kbd", "mark", "q", "s", "samp", "small", "span", "strike",
    "strong", "sub", "sup", "time", "tt", "u", "var",
];

/// Identifies the element holding a page's book content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootSelector {
    pub tag: String,
    pub id: Option<String>,
    pub class: Option<String>,
}

impl RootSelector {
    /// At least one of `id` and `class` is required.
    pub fn new(
        tag: impl Into<String>,
        id: Option<String>,
        class: Option<String>,
    ) -> Result<Self, ExtractError> {
        let tag = tag.into().trim().to_ascii_lowercase();
        let id = id.filter(|s| !s.trim().is_empty());
        let class = class.filter(|s| !s.trim().is_empty());
        if id.is_none() && class.is_none() {
            return Err(ExtractError::MissingRootSelector { tag });
        }
        Ok(Self { tag, id, class })
    }

    pub fn matches(&self, el: &Element) -> bool {
        el.tag == self.tag
            && self.id.as_deref().map_or(true, |id| el.id() == Some(id))
            && self.class.as_deref().map_or(true, |c| el.has_class(c))
    }
}

impl fmt::Display for RootSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}", self.tag)?;
        if let Some(id) = &self.id {
            write!(f, " id=\"{}\"", id)?;
        }
        if let Some(class) = &self.class {
            write!(f, " class=\"{}\"", class)?;
        }
        write!(f, ">")
    }
}

/// Where to look for the next-page link.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LinkScope {
    /// Anywhere on the page.
    #[default]
    Document,
    /// Only inside the content container.
    Root,
}

/// Everything the extractor needs. Quirk rules must be registered before [Extractor::new].
#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    /// Regular expression matched against the whole visible text of an anchor.
    pub link_next: String,
    pub root: RootSelector,
    pub link_scope: LinkScope,
    pub quirks: Quirks,
}

/// Result of extracting one page.
#[derive(Debug, Clone)]
pub struct Page {
    pub chapter: Chapter,
    /// Raw `href` of the next-page link.
    pub next: Option<String>,
    /// `href` of the page's `<base>` element.
    pub base_href: Option<String>,
}

/// Finds the first element matching `selector`, in document order.
pub fn locate_root<'d>(
    doc: &'d Document,
    selector: &RootSelector,
) -> Result<&'d Element, ExtractError> {
    doc.elements()
        .find(|e| selector.matches(e))
        .ok_or_else(|| ExtractError::RootNotFound {
            selector: selector.to_string(),
        })
}

/// Extraction engine. Owns its quirk rules; they cannot change once extraction can start.
#[derive(Debug, Clone)]
pub struct Extractor {
    link_next: Regex,
    root: RootSelector,
    link_scope: LinkScope,
    quirks: Quirks,
}

impl Extractor {
    pub fn new(config: ExtractorConfig) -> Result<Self, ExtractError> {
        Ok(Self {
            link_next: quirks::compile_anchored(&config.link_next)?,
            root: config.root,
            link_scope: config.link_scope,
            quirks: config.quirks,
        })
    }

    pub fn root_selector(&self) -> &RootSelector {
        &self.root
    }

    pub fn locate_root<'d>(&self, doc: &'d Document) -> Result<&'d Element, ExtractError> {
        locate_root(doc, &self.root)
    }

    /// Parse `html`, extract its chapter and find the next-page link.
    pub fn extract_page(&self, html: &str, index: u32) -> Result<Page, ExtractError> {
        let doc = Document::parse(html);
        let root = self.locate_root(&doc)?;
        let chapter = self.extract(root, index);
        let next = self.find_next_link(&doc, root).map(String::from);
        Ok(Page {
            chapter,
            next,
            base_href: doc.base_href().map(String::from),
        })
    }

    /// Normalize the children of `root` into a chapter.
    pub fn extract(&self, root: &Element, index: u32) -> Chapter {
        let mut walk = Walk {
            extractor: self,
            blocks: Vec::new(),
            pending: Vec::new(),
            promoted_at: None,
            merged_label: None,
        };
        walk.children(root);
        walk.flush();
        tracing::debug!(index, blocks = walk.blocks.len(), "Extracted chapter");
        let mut chapter = Chapter::new(index, walk.blocks);
        chapter.nav_label = walk.merged_label;
        chapter
    }

    /// `href` of the first anchor whose visible text matches the next-link pattern.
    pub fn find_next_link<'d>(&self, doc: &'d Document, root: &'d Element) -> Option<&'d str> {
        let anchors: Box<dyn Iterator<Item = &'d Element> + 'd> = match self.link_scope {
            LinkScope::Document => Box::new(doc.elements()),
            LinkScope::Root => Box::new(root.descendants()),
        };
        for anchor in anchors.filter(|e| self.is_next_link(e)) {
            match anchor.attr("href").map(str::trim).filter(|h| !h.is_empty()) {
                Some(href) => return Some(href),
                None => tracing::warn!(
                    text = %anchor.normalized_text(),
                    "Anchor matching the next-link pattern has no href; ignored"
                ),
            }
        }
        None
    }

    fn is_next_link(&self, el: &Element) -> bool {
        el.tag == "a" && self.link_next.is_match(&el.normalized_text())
    }

    /// Element is dropped from output entirely.
    fn is_dropped(&self, el: &Element) -> bool {
        self.quirks.is_skipped(el) || self.is_next_link(el)
    }
}

struct Walk<'x> {
    extractor: &'x Extractor,
    blocks: Vec<Block>,
    /// Loose inline content waiting to become a paragraph.
    pending: Vec<Inline>,
    /// Index of the last heading made by a promote rule.
    promoted_at: Option<usize>,
    /// Label of the chapter's first heading when it is a merged one.
    merged_label: Option<String>,
}

impl Walk<'_> {
    fn children(&mut self, el: &Element) {
        for child in &el.children {
            match child {
                Node::Text(t) => self.pending.push(Inline::Text(t.clone())),
                Node::Element(e) => self.element(e),
            }
        }
    }

    fn element(&mut self, el: &Element) {
        let extractor = self.extractor;
        match extractor.quirks.classify(el) {
            Some(QuirkAction::Skip) => return,
            Some(QuirkAction::PromoteToHeading { level, class }) => {
                self.flush();
                let text = el.normalized_text();
                if !text.is_empty() {
                    self.blocks.push(Block::Heading {
                        level: *level,
                        class: class.clone(),
                        content: vec![Inline::Text(text)],
                    });
                    self.promoted_at = Some(self.blocks.len() - 1);
                }
                return;
            }
            Some(QuirkAction::Demote { class }) => {
                self.flush();
                let content = self.inline_of(el);
                self.push_paragraph(class.clone(), content);
                return;
            }
            None => {}
        }
        if extractor.is_next_link(el) {
            return;
        }
        let tag = el.tag.as_str();
        if tag == "p" {
            self.flush();
            let content = self.inline_of(el);
            self.push_paragraph(None, content);
        } else if let Some(level) = heading_level(tag) {
            self.flush();
            let content = finish_inline(self.inline_of(el));
            if !content.is_empty() {
                self.push_heading(level, content);
            }
        } else if INLINE_TAGS.contains(&tag) && !self.holds_blocks(el) {
            let mut inline = std::mem::take(&mut self.pending);
            self.inline(el, &mut inline);
            self.pending = inline;
        } else if CONTAINER_TAGS.contains(&tag) || INLINE_TAGS.contains(&tag) {
            self.flush();
            self.children(el);
            self.flush();
        } else {
            self.flush();
            let mut markup = String::new();
            el.write_xhtml(&mut markup, &|e| !extractor.is_dropped(e));
            self.blocks.push(Block::RawBlock(markup));
        }
    }

    /// Inline wrapper around block content, e.g. `<font><p>..</p></font>` or
    /// `<a name="c1"><h2>..</h2></a>`.
    fn holds_blocks(&self, el: &Element) -> bool {
        el.descendants()
            .any(|e| !INLINE_TAGS.contains(&e.tag.as_str()) && !self.extractor.is_dropped(e))
    }

    /// Push a source heading. A promoted heading directly before it becomes its small label
    /// line, and the navigation label joins both.
    fn push_heading(&mut self, level: u8, content: Vec<Inline>) {
        let merged = match self.promoted_at.take() {
            Some(i) if i + 1 == self.blocks.len() => match self.blocks.pop() {
                Some(Block::Heading { class, content, .. }) => Some((class, content)),
                Some(other) => {
                    self.blocks.push(other);
                    None
                }
                None => None,
            },
            _ => None,
        };
        let Some((class, prefix)) = merged else {
            self.blocks.push(Block::Heading {
                level,
                class: None,
                content,
            });
            return;
        };
        if !self.blocks.iter().any(Block::is_heading) {
            let lead = inline_text(&prefix);
            self.merged_label = Some(format!(
                "{}. {}",
                lead.trim_end_matches('.'),
                inline_text(&content)
            ));
        }
        let mut joined = vec![
            Inline::Styled {
                class: SMALL_HEADING_CLASS.to_string(),
                content: prefix,
            },
            Inline::LineBreak,
        ];
        joined.extend(content);
        self.blocks.push(Block::Heading {
            level,
            class,
            content: joined,
        });
    }

    fn inline_of(&self, el: &Element) -> Vec<Inline> {
        let mut out = Vec::new();
        for child in &el.children {
            self.inline_node(child, &mut out);
        }
        out
    }

    fn inline_node(&self, node: &Node, out: &mut Vec<Inline>) {
        match node {
            Node::Text(t) => out.push(Inline::Text(t.clone())),
            Node::Element(e) if self.extractor.is_dropped(e) => {}
            Node::Element(e) => self.inline(e, out),
        }
    }

    /// Map one inline-level element. Unknown elements contribute their children.
    fn inline(&self, el: &Element, out: &mut Vec<Inline>) {
        match el.tag.as_str() {
            "br" => out.push(Inline::LineBreak),
            "img" => {
                if let Some(alt) = el.attr("alt").filter(|a| !a.trim().is_empty()) {
                    out.push(Inline::Text(alt.to_string()));
                }
            }
            "em" | "i" | "cite" | "dfn" | "var" => out.push(Inline::Emphasis(self.inline_of(el))),
            "strong" | "b" => out.push(Inline::Strong(self.inline_of(el))),
            _ => {
                for child in &el.children {
                    self.inline_node(child, out);
                }
            }
        }
    }

    fn push_paragraph(&mut self, class: Option<String>, content: Vec<Inline>) {
        let content = finish_inline(content);
        if !content.is_empty() {
            self.blocks.push(Block::Paragraph { class, content });
        }
    }

    fn flush(&mut self) {
        let pending = std::mem::take(&mut self.pending);
        self.push_paragraph(None, pending);
    }
}

fn heading_level(tag: &str) -> Option<u8> {
    let digit = tag.strip_prefix('h')?;
    match digit.parse::<u8>() {
        Ok(level) if (1..=MAX_HEADING_LEVEL).contains(&level) => Some(level),
        _ => None,
    }
}

/// Collapse whitespace across the whole run and trim both ends (including stray line breaks).
fn finish_inline(content: Vec<Inline>) -> Vec<Inline> {
    let mut prev_space = true;
    let mut out = collapse(content, &mut prev_space);
    trim_end(&mut out);
    while matches!(out.first(), Some(Inline::LineBreak)) {
        out.remove(0);
    }
    out
}

fn collapse(content: Vec<Inline>, prev_space: &mut bool) -> Vec<Inline> {
    let mut out: Vec<Inline> = Vec::with_capacity(content.len());
    for item in content {
        match item {
            Inline::Text(t) => {
                let mut s = String::with_capacity(t.len());
                for c in t.chars() {
                    if c.is_whitespace() {
                        if !*prev_space {
                            s.push(' ');
                            *prev_space = true;
                        }
                    } else {
                        s.push(c);
                        *prev_space = false;
                    }
                }
                if s.is_empty() {
                    continue;
                }
                match out.last_mut() {
                    Some(Inline::Text(last)) => last.push_str(&s),
                    _ => out.push(Inline::Text(s)),
                }
            }
            Inline::LineBreak => {
                trim_end(&mut out);
                out.push(Inline::LineBreak);
                *prev_space = true;
            }
            Inline::Emphasis(inner) => {
                let inner = collapse(inner, prev_space);
                if !inner.is_empty() {
                    out.push(Inline::Emphasis(inner));
                }
            }
            Inline::Strong(inner) => {
                let inner = collapse(inner, prev_space);
                if !inner.is_empty() {
                    out.push(Inline::Strong(inner));
                }
            }
            Inline::Styled { class, content } => {
                let content = collapse(content, prev_space);
                if !content.is_empty() {
                    out.push(Inline::Styled { class, content });
                }
            }
        }
    }
    out
}

/// Remove trailing whitespace, and trailing line breaks, from the end of the run.
fn trim_end(content: &mut Vec<Inline>) {
    loop {
        let empty = match content.last_mut() {
            Some(Inline::Text(t)) => {
                let len = t.trim_end().len();
                t.truncate(len);
                t.is_empty()
            }
            Some(Inline::Emphasis(inner))
            | Some(Inline::Strong(inner))
            | Some(Inline::Styled { content: inner, .. }) => {
                trim_end(inner);
                inner.is_empty()
            }
            Some(Inline::LineBreak) => true,
            None => return,
        };
        if !empty {
            return;
        }
        content.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> Inline {
        Inline::Text(s.to_string())
    }

    fn paragraph(s: &str) -> Block {
        Block::Paragraph {
            class: None,
            content: vec![text(s)],
        }
    }

    fn extractor(quirks: Quirks) -> Extractor {
        Extractor::new(ExtractorConfig {
            link_next: "Next >>".to_string(),
            root: RootSelector::new("div", Some("root".to_string()), None).unwrap(),
            link_scope: LinkScope::Document,
            quirks,
        })
        .unwrap()
    }

    fn page(body: &str) -> String {
        format!(
            r#"<html><head><title>t</title></head><body><p>outside</p><div id="root">{}</div></body></html>"#,
            body
        )
    }

    #[test]
    fn root_selector_requires_id_or_class() {
        assert!(matches!(
            RootSelector::new("div", None, Some("  ".to_string())),
            Err(ExtractError::MissingRootSelector { .. })
        ));
        let sel = RootSelector::new("DIV", None, Some("gutenb".to_string())).unwrap();
        assert_eq!(sel.tag, "div");
        assert_eq!(sel.to_string(), r#"<div class="gutenb">"#);
    }

    #[test]
    fn locate_root_uses_tag_and_all_given_attributes() {
        let doc = Document::parse(
            r#"<body><div class="x">a</div><section id="r">b</section><div id="r" class="x">c</div></body>"#,
        );
        let sel = RootSelector::new("div", Some("r".to_string()), Some("x".to_string())).unwrap();
        assert_eq!(locate_root(&doc, &sel).unwrap().text(), "c");
        let missing = RootSelector::new("div", Some("nope".to_string()), None).unwrap();
        assert!(matches!(
            locate_root(&doc, &missing),
            Err(ExtractError::RootNotFound { .. })
        ));
    }

    #[test]
    fn scenario_page_with_next_link() {
        let ex = extractor(Quirks::new());
        let html = page(r#"<p>Intro</p><a href="b.html">Next &gt;&gt;</a>"#);
        let page = ex.extract_page(&html, 1).unwrap();
        assert_eq!(page.chapter.index, 1);
        assert_eq!(page.chapter.blocks, vec![paragraph("Intro")]);
        assert_eq!(page.next.as_deref(), Some("b.html"));
    }

    #[test]
    fn skip_rule_removes_element_and_descendants_everywhere() -> Result<(), ExtractError> {
        let mut quirks = Quirks::new();
        quirks.register_skip(QuirkSelector::tag("h*").class("author"))?;
        quirks.register_skip(QuirkSelector::tag("span").class("ad"))?;
        let ex = extractor(quirks);
        let html = page(
            r#"<h2 class="author">Jane <em>Doe</em></h2>
               <p>Kept <span class="ad">BUY <b>now</b></span>text</p>
               <ul><li>one</li><li><span class="ad">two</span></li></ul>"#,
        );
        let ch = ex.extract_page(&html, 1)?.chapter;
        assert_eq!(
            ch.blocks,
            vec![
                paragraph("Kept text"),
                Block::RawBlock("<ul><li>one</li><li></li></ul>".to_string()),
            ]
        );
        Ok(())
    }

    #[test]
    fn promote_rule_turns_paragraph_into_heading() -> Result<(), ExtractError> {
        let mut quirks = Quirks::new();
        quirks.register_heading(
            QuirkSelector::any()
                .class("centerbig")
                .text(r"^[0-9]+\. Chapter$"),
            2,
            Some("chapter-h"),
        )?;
        let ex = extractor(quirks);
        let html = page(r#"<p class="centerbig">3. <b>Chapter</b></p><p>Body.</p>"#);
        let ch = ex.extract_page(&html, 3)?.chapter;
        assert_eq!(
            ch.blocks[0],
            Block::Heading {
                level: 2,
                class: Some("chapter-h".to_string()),
                content: vec![text("3. Chapter")],
            }
        );
        assert_eq!(ch.first_heading().as_deref(), Some("3. Chapter"));
        assert_eq!(ch.blocks[1], paragraph("Body."));
        Ok(())
    }

    #[test]
    fn demoted_heading_becomes_styled_paragraph() -> Result<(), ExtractError> {
        let mut quirks = Quirks::new();
        quirks.register_demote(QuirkSelector::tag("h3").class("motto"), Some("false-h"))?;
        let ex = extractor(quirks);
        let html = page(r#"<h3 class="motto">Carpe diem</h3><h1>Real</h1>"#);
        let ch = ex.extract_page(&html, 1)?.chapter;
        assert_eq!(
            ch.blocks[0],
            Block::Paragraph {
                class: Some("false-h".to_string()),
                content: vec![text("Carpe diem")],
            }
        );
        assert_eq!(ch.first_heading().as_deref(), Some("Real"));
        Ok(())
    }

    #[test]
    fn containers_flatten_and_loose_text_becomes_paragraphs() {
        let ex = extractor(Quirks::new());
        let html = page(
            "Loose <i>start</i><br>second line<div><section><p>Deep</p></section>tail</div>",
        );
        let ch = ex.extract_page(&html, 1).unwrap().chapter;
        assert_eq!(
            ch.blocks,
            vec![
                Block::Paragraph {
                    class: None,
                    content: vec![
                        text("Loose "),
                        Inline::Emphasis(vec![text("start")]),
                        Inline::LineBreak,
                        text("second line"),
                    ],
                },
                paragraph("Deep"),
                paragraph("tail"),
            ]
        );
    }

    #[test]
    fn headings_keep_their_level_and_whitespace_is_normalized() {
        let ex = extractor(Quirks::new());
        let html = page("<h3>\n  Part   One </h3><p>  a\n\n b <br> </p><p>   </p>");
        let ch = ex.extract_page(&html, 1).unwrap().chapter;
        assert_eq!(
            ch.blocks,
            vec![
                Block::Heading {
                    level: 3,
                    class: None,
                    content: vec![text("Part One")],
                },
                paragraph("a b"),
            ]
        );
    }

    #[test]
    fn inline_wrappers_around_blocks_keep_paragraphs_and_headings() {
        let ex = extractor(Quirks::new());
        let html = page(
            r#"<font face="x"><p>First para.</p><p>Second para.</p></font><a name="c1"><h2>Chapter One</h2></a><p>Text</p><span>plain <b>bold</b></span>"#,
        );
        let ch = ex.extract_page(&html, 1).unwrap().chapter;
        assert_eq!(
            ch.blocks,
            vec![
                paragraph("First para."),
                paragraph("Second para."),
                Block::Heading {
                    level: 2,
                    class: None,
                    content: vec![text("Chapter One")],
                },
                paragraph("Text"),
                Block::Paragraph {
                    class: None,
                    content: vec![text("plain "), Inline::Strong(vec![text("bold")])],
                },
            ]
        );
        assert_eq!(ch.first_heading().as_deref(), Some("Chapter One"));
    }

    #[test]
    fn promoted_paragraph_merges_into_following_heading() -> Result<(), ExtractError> {
        let mut quirks = Quirks::new();
        quirks.register_heading(
            QuirkSelector::tag("p").class("centerbig").text(r"[0-9]+\. Kapitel"),
            2,
            Some("chapter-h"),
        )?;
        let ex = extractor(quirks);
        let html = page(
            r#"<p class="centerbig">1. Kapitel</p> <h3>Verhaftung</h3><p>Jemand.</p>
               <p class="centerbig">2. Kapitel</p><p>Kein Titel.</p><h3>Später</h3>"#,
        );
        let ch = ex.extract_page(&html, 1)?.chapter;
        assert_eq!(
            ch.blocks[0],
            Block::Heading {
                level: 3,
                class: Some("chapter-h".to_string()),
                content: vec![
                    Inline::Styled {
                        class: SMALL_HEADING_CLASS.to_string(),
                        content: vec![text("1. Kapitel")],
                    },
                    Inline::LineBreak,
                    text("Verhaftung"),
                ],
            }
        );
        assert_eq!(ch.label(1), "1. Kapitel. Verhaftung");
        // Anything in between keeps the two apart.
        assert_eq!(
            ch.blocks[2],
            Block::Heading {
                level: 2,
                class: Some("chapter-h".to_string()),
                content: vec![text("2. Kapitel")],
            }
        );
        assert_eq!(ch.blocks.len(), 5);
        Ok(())
    }

    #[test]
    fn images_contribute_alt_text() {
        let ex = extractor(Quirks::new());
        let html = page(r#"<p>See <img src="x.png" alt="a map"> here</p>"#);
        let ch = ex.extract_page(&html, 1).unwrap().chapter;
        assert_eq!(ch.blocks, vec![paragraph("See a map here")]);
    }

    #[test]
    fn next_link_first_match_wins_and_scope_is_respected() {
        let html = r#"<body>
            <a href="top.html">Next &gt;&gt;</a>
            <div id="root"><p>x</p><a>Next &gt;&gt;</a><a href="in.html"> Next  &gt;&gt; </a></div>
            <a href="bottom.html">Next &gt;&gt;</a></body>"#;
        let doc = Document::parse(html);
        let mut ex = extractor(Quirks::new());
        let root = ex.locate_root(&doc).unwrap();
        assert_eq!(ex.find_next_link(&doc, root), Some("top.html"));
        ex.link_scope = LinkScope::Root;
        assert_eq!(ex.find_next_link(&doc, root), Some("in.html"));
    }

    #[test]
    fn no_matching_link_means_last_page() {
        let ex = extractor(Quirks::new());
        let html = page(r#"<p>End.</p><a href="a.html">&lt;&lt; Previous</a>"#);
        let page = ex.extract_page(&html, 2).unwrap();
        assert!(page.next.is_none());
    }

    #[test]
    fn missing_root_is_an_error() {
        let ex = extractor(Quirks::new());
        assert!(matches!(
            ex.extract_page("<body><div id='other'>x</div></body>", 1),
            Err(ExtractError::RootNotFound { .. })
        ));
    }

    #[test]
    fn invalid_link_pattern_is_rejected() {
        let result = Extractor::new(ExtractorConfig {
            link_next: "Next [".to_string(),
            root: RootSelector::new("div", Some("root".to_string()), None).unwrap(),
            link_scope: LinkScope::Document,
            quirks: Quirks::new(),
        });
        assert!(matches!(result, Err(ExtractError::InvalidPattern { .. })));
    }
}
