//! Quirk rules: declarative fixes for site-specific markup.
//!
//! A rule pairs a [QuirkSelector] with a [QuirkAction]. Rules are checked in registration
//! order and the first match wins; an element no rule matches falls through to the extractor's
//! structural mapping.

use super::dom::Element;
use super::error::ExtractError;
use regex::Regex;

/// Deepest heading level an EPUB content document renders.
pub const MAX_HEADING_LEVEL: u8 = 6;

/// Tags skipped by [Quirks::with_defaults]: scripting, embedded widgets and page chrome.
const DEFAULT_SKIP_TAGS: &[&str] = &[
    "script", "style", "noscript", "template", "iframe", "form", "nav", "header", "footer",
    "aside", "audio", "video", "canvas", "dialog", "datalist", "progress", "meter",
];

/// Describes a class of elements. Unset fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuirkSelector {
    /// Tag name, case-insensitive. A trailing `*` stands for exactly one digit, so `h*` names the
    /// headings `h1`..`h6`.
    pub tag: Option<String>,
    /// Matches when the element carries at least one of these classes.
    pub classes: Vec<String>,
    pub id: Option<String>,
    /// Regular expression that must match the whole whitespace-normalized text content.
    pub text: Option<String>,
    /// Elements with more text than this (in characters) never match.
    pub max_chars: Option<usize>,
}

impl QuirkSelector {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn tag(tag: impl Into<String>) -> Self {
        Self {
            tag: Some(tag.into()),
            ..Self::default()
        }
    }

    pub fn class(mut self, class: impl Into<String>) -> Self {
        self.classes.push(class.into());
        self
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn text(mut self, pattern: impl Into<String>) -> Self {
        self.text = Some(pattern.into());
        self
    }

    pub fn max_chars(mut self, n: usize) -> Self {
        self.max_chars = Some(n);
        self
    }
}

/// What to do with a matching element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuirkAction {
    /// Drop the element and its whole subtree.
    Skip,
    /// Emit the element's text as a heading.
    PromoteToHeading { level: u8, class: Option<String> },
    /// Emit the element as a styled paragraph; it never becomes a navigation label.
    Demote { class: Option<String> },
}

#[derive(Debug, Clone)]
enum TagPattern {
    Exact(String),
    /// Prefix followed by exactly one digit.
    Numbered(String),
}

impl TagPattern {
    fn parse(pattern: &str) -> Self {
        let lower = pattern.trim().to_ascii_lowercase();
        match lower.strip_suffix('*') {
            Some(prefix) => TagPattern::Numbered(prefix.to_string()),
            None => TagPattern::Exact(lower),
        }
    }

    fn matches(&self, tag: &str) -> bool {
        match self {
            TagPattern::Exact(t) => tag.eq_ignore_ascii_case(t),
            TagPattern::Numbered(prefix) => {
                let lower = tag.to_ascii_lowercase();
                match lower.strip_prefix(prefix.as_str()) {
                    Some(rest) => rest.len() == 1 && rest.bytes().all(|b| b.is_ascii_digit()),
                    None => false,
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
struct Rule {
    tag: Option<TagPattern>,
    classes: Vec<String>,
    id: Option<String>,
    text: Option<Regex>,
    max_chars: Option<usize>,
    action: QuirkAction,
}

impl Rule {
    fn compile(selector: QuirkSelector, action: QuirkAction) -> Result<Self, ExtractError> {
        let text = selector
            .text
            .as_deref()
            .map(compile_anchored)
            .transpose()?;
        Ok(Self {
            tag: selector.tag.as_deref().map(TagPattern::parse),
            classes: selector.classes,
            id: selector.id,
            text,
            max_chars: selector.max_chars,
            action,
        })
    }

    /// Tag, class and id checks; cheap, no text needed.
    fn matches_start_tag(&self, el: &Element) -> bool {
        if let Some(tag) = &self.tag {
            if !tag.matches(&el.tag) {
                return false;
            }
        }
        if !self.classes.is_empty() && !el.classes().any(|c| self.classes.iter().any(|k| k == c))
        {
            return false;
        }
        if let Some(id) = &self.id {
            if el.id() != Some(id.as_str()) {
                return false;
            }
        }
        true
    }

    fn needs_text(&self) -> bool {
        self.text.is_some() || self.max_chars.is_some()
    }

    fn matches_text(&self, text: &str) -> bool {
        if let Some(limit) = self.max_chars {
            if text.chars().count() > limit {
                return false;
            }
        }
        self.text.as_ref().map_or(true, |re| re.is_match(text))
    }
}

/// Compile `pattern` so that it must match an entire string.
pub(crate) fn compile_anchored(pattern: &str) -> Result<Regex, ExtractError> {
    Regex::new(&format!("^(?:{})$", pattern)).map_err(|e| ExtractError::InvalidPattern {
        pattern: pattern.to_string(),
        source: e,
    })
}

/// Ordered, append-only rule set.
#[derive(Debug, Clone, Default)]
pub struct Quirks {
    rules: Vec<Rule>,
}

impl Quirks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rule set that already skips scripts, styles, embedded widgets and HTML5 page chrome.
    pub fn with_defaults() -> Self {
        let rules = DEFAULT_SKIP_TAGS
            .iter()
            .map(|tag| Rule {
                tag: Some(TagPattern::Exact((*tag).to_string())),
                classes: Vec::new(),
                id: None,
                text: None,
                max_chars: None,
                action: QuirkAction::Skip,
            })
            .collect();
        Self { rules }
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn register_skip(&mut self, selector: QuirkSelector) -> Result<(), ExtractError> {
        self.rules.push(Rule::compile(selector, QuirkAction::Skip)?);
        Ok(())
    }

    pub fn register_heading(
        &mut self,
        selector: QuirkSelector,
        level: u8,
        style_class: Option<&str>,
    ) -> Result<(), ExtractError> {
        if level == 0 || level > MAX_HEADING_LEVEL {
            return Err(ExtractError::InvalidLevel {
                level,
                max: MAX_HEADING_LEVEL,
            });
        }
        let action = QuirkAction::PromoteToHeading {
            level,
            class: style_class.map(String::from),
        };
        self.rules.push(Rule::compile(selector, action)?);
        Ok(())
    }

    pub fn register_demote(
        &mut self,
        selector: QuirkSelector,
        style_class: Option<&str>,
    ) -> Result<(), ExtractError> {
        let action = QuirkAction::Demote {
            class: style_class.map(String::from),
        };
        self.rules.push(Rule::compile(selector, action)?);
        Ok(())
    }

    /// First matching action, or `None` when no rule applies.
    pub fn classify(&self, el: &Element) -> Option<&QuirkAction> {
        let mut text: Option<String> = None;
        for rule in &self.rules {
            if !rule.matches_start_tag(el) {
                continue;
            }
            if rule.needs_text() {
                let text = text.get_or_insert_with(|| el.normalized_text());
                if !rule.matches_text(text) {
                    continue;
                }
            }
            return Some(&rule.action);
        }
        None
    }

    pub fn is_skipped(&self, el: &Element) -> bool {
        matches!(self.classify(el), Some(QuirkAction::Skip))
    }
}
