//! Normalized content model shared by the extractor, the crawler and the EPUB builder.
//!
//! Extraction produces [Chapter]s made of [Block]s; the builder accumulates them in a [Book].

/// Inline content inside a heading or paragraph. Order-preserving.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inline {
    Text(String),
    Emphasis(Vec<Inline>),
    Strong(Vec<Inline>),
    /// Content rendered with a style class, e.g. the small label line of a merged heading.
    Styled { class: String, content: Vec<Inline> },
    LineBreak,
}

/// One unit of normalized chapter content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    /// Heading at `level` (1..=6). `class` is the style class a quirk rule assigned, if any.
    Heading {
        level: u8,
        class: Option<String>,
        content: Vec<Inline>,
    },
    Paragraph {
        class: Option<String>,
        content: Vec<Inline>,
    },
    /// Markup kept verbatim (already serialized as XHTML).
    RawBlock(String),
}

impl Block {
    pub fn is_heading(&self) -> bool {
        matches!(self, Block::Heading { .. })
    }
}

/// Concatenated text of inline content, line breaks rendered as a single space.
pub fn inline_text(content: &[Inline]) -> String {
    fn push(out: &mut String, content: &[Inline]) {
        for item in content {
            match item {
                Inline::Text(t) => out.push_str(t),
                Inline::Emphasis(inner) | Inline::Strong(inner) => push(out, inner),
                Inline::Styled { content, .. } => push(out, content),
                Inline::LineBreak => out.push(' '),
            }
        }
    }
    let mut out = String::new();
    push(&mut out, content);
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Content extracted from exactly one source page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chapter {
    /// 1-based position of the source page in crawl order. Synthesized front matter uses 0.
    pub index: u32,
    pub blocks: Vec<Block>,
    /// Explicit navigation label. When unset the first heading is used.
    pub nav_label: Option<String>,
    /// Nesting level in the navigation tree; 0 is top level. Set by the builder.
    pub nav_depth: usize,
}

impl Chapter {
    pub fn new(index: u32, blocks: Vec<Block>) -> Self {
        Self {
            index,
            blocks,
            nav_label: None,
            nav_depth: 0,
        }
    }

    /// Text of the first heading block, if the chapter has one with non-empty text.
    pub fn first_heading(&self) -> Option<String> {
        self.blocks.iter().find_map(|b| match b {
            Block::Heading { content, .. } => {
                Some(inline_text(content)).filter(|t| !t.is_empty())
            }
            _ => None,
        })
    }

    /// Label for the navigation document: explicit label, first heading, or `Chapter {ordinal}`.
    pub fn label(&self, ordinal: usize) -> String {
        self.nav_label
            .clone()
            .or_else(|| self.first_heading())
            .unwrap_or_else(|| format!("Chapter {}", ordinal))
    }
}

/// A creator entry (`dc:creator`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Author {
    pub name: String,
    /// Sort form, e.g. "Kafka, Franz".
    pub file_as: String,
    /// MARC relator code, e.g. "aut" or "edt".
    pub role: String,
}

impl Author {
    /// Author with role `aut` and file-as derived as "Last, First Middle".
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let file_as = file_as(&name);
        Self {
            name,
            file_as,
            role: "aut".to_string(),
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = role.into();
        self
    }

    pub fn with_file_as(mut self, file_as: impl Into<String>) -> Self {
        self.file_as = file_as.into();
        self
    }
}

fn file_as(name: &str) -> String {
    let parts: Vec<&str> = name.split_whitespace().collect();
    match parts.split_last() {
        Some((last, rest)) if !rest.is_empty() => format!("{}, {}", last, rest.join(" ")),
        _ => name.trim().to_string(),
    }
}

/// A file embedded in the package besides the generated documents.
#[derive(Debug, Clone)]
pub struct AuxFile {
    /// Path inside the content directory, e.g. `images/map.png`.
    pub name: String,
    pub media_type: &'static str,
    pub data: Vec<u8>,
    pub in_spine: bool,
    /// Number of chapters registered before this file; reading-order files are placed there.
    pub position: usize,
}

/// Accumulated book state. Owned by the EPUB builder.
#[derive(Debug, Clone, Default)]
pub struct Book {
    pub title: Option<String>,
    pub subtitle: Option<String>,
    pub authors: Vec<Author>,
    pub language: Option<String>,
    pub identifier: Option<String>,
    pub date: Option<String>,
    pub publisher: Option<String>,
    pub rights: Option<String>,
    pub stylesheet: String,
    pub chapters: Vec<Chapter>,
    pub auxiliary: Vec<AuxFile>,
    /// True when `chapters[0]` is the synthesized title page.
    pub has_titlepage: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> Inline {
        Inline::Text(s.to_string())
    }

    #[test]
    fn label_prefers_explicit_then_first_heading_then_placeholder() {
        let mut ch = Chapter::new(
            1,
            vec![
                Block::Paragraph {
                    class: None,
                    content: vec![text("Intro")],
                },
                Block::Heading {
                    level: 2,
                    class: None,
                    content: vec![text("First")],
                },
                Block::Heading {
                    level: 1,
                    class: None,
                    content: vec![text("Second")],
                },
            ],
        );
        assert_eq!(ch.label(3), "First");
        ch.nav_label = Some("Front".to_string());
        assert_eq!(ch.label(3), "Front");

        let plain = Chapter::new(
            4,
            vec![Block::Paragraph {
                class: None,
                content: vec![text("No heading here.")],
            }],
        );
        assert_eq!(plain.label(3), "Chapter 3");
    }

    #[test]
    fn empty_heading_does_not_claim_label() {
        let ch = Chapter::new(
            1,
            vec![
                Block::Heading {
                    level: 1,
                    class: None,
                    content: vec![text("   ")],
                },
                Block::Heading {
                    level: 2,
                    class: None,
                    content: vec![text("Real")],
                },
            ],
        );
        assert_eq!(ch.first_heading().as_deref(), Some("Real"));
    }

    #[test]
    fn inline_text_flattens_markup_and_breaks() {
        let content = vec![
            text("One "),
            Inline::Emphasis(vec![text("two")]),
            Inline::LineBreak,
            Inline::Strong(vec![text("three")]),
        ];
        assert_eq!(inline_text(&content), "One two three");
    }

    #[test]
    fn styled_and_heading_blocks() {
        let heading = Block::Heading {
            level: 2,
            class: None,
            content: vec![
                Inline::Styled {
                    class: "wb-small-h".to_string(),
                    content: vec![text("1. Kapitel")],
                },
                Inline::LineBreak,
                text("Verhaftung"),
            ],
        };
        assert!(heading.is_heading());
        assert!(!Block::RawBlock("<hr/>".to_string()).is_heading());
        match &heading {
            Block::Heading { content, .. } => {
                assert_eq!(inline_text(content), "1. Kapitel Verhaftung")
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn author_overrides() {
        let editor = Author::new("Max Brod").with_role("edt");
        assert_eq!(editor.role, "edt");
        assert_eq!(editor.file_as, "Brod, Max");
        let named = Author::new("Johann Wolfgang von Goethe").with_file_as("Goethe, Johann Wolfgang von");
        assert_eq!(named.file_as, "Goethe, Johann Wolfgang von");
        assert_eq!(named.role, "aut");
    }

    #[test]
    fn author_file_as_is_last_name_first() {
        assert_eq!(Author::new("Franz Kafka").file_as, "Kafka, Franz");
        assert_eq!(
            Author::new("Johann Wolfgang Goethe").file_as,
            "Goethe, Johann Wolfgang"
        );
        assert_eq!(Author::new("Homer").file_as, "Homer");
        assert_eq!(Author::new("Homer").role, "aut");
    }
}
