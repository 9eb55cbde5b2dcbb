//! Site presets: named extractor configurations.
//!
//! A preset is plain data. Built-in presets live here; more can be declared under
//! `[presets.<name>]` in the config file. CLI flags override individual fields.

use super::{ExtractError, ExtractorConfig, LinkScope, QuirkSelector, Quirks, RootSelector};
use serde::Deserialize;

/// One quirk rule as written in a preset.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RuleConfig {
    pub tag: Option<String>,
    pub classes: Vec<String>,
    pub id: Option<String>,
    pub text: Option<String>,
    pub max_chars: Option<usize>,
    /// Heading level for `heading` rules.
    pub level: Option<u8>,
    /// Style class for `heading` and `demote` rules.
    pub class: Option<String>,
}

impl RuleConfig {
    fn selector(&self) -> QuirkSelector {
        QuirkSelector {
            tag: self.tag.clone(),
            classes: self.classes.clone(),
            id: self.id.clone(),
            text: self.text.clone(),
            max_chars: self.max_chars,
        }
    }
}

/// Extractor settings for one site. All fields optional so that presets can be layered.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PresetConfig {
    pub link_next: Option<String>,
    pub root_tag: Option<String>,
    pub root_id: Option<String>,
    pub root_class: Option<String>,
    /// `document` (default) or `root`.
    pub link_scope: Option<String>,
    /// Start from the default skip rules (scripts, page chrome). Default true.
    pub default_quirks: Option<bool>,
    pub skip: Vec<RuleConfig>,
    pub heading: Vec<RuleConfig>,
    pub demote: Vec<RuleConfig>,
}

/// Names of the built-in presets.
pub const BUILTIN_PRESETS: &[&str] = &["spiegel-gutenberg"];

/// Built-in preset by name.
pub fn builtin(name: &str) -> Option<PresetConfig> {
    match name {
        // Projekt Gutenberg-DE: chapter pages link to each other by chapter number.
        "spiegel-gutenberg" => Some(PresetConfig {
            link_next: Some("Kapitel [0-9]*".to_string()),
            root_tag: Some("div".to_string()),
            root_class: Some("gutenb".to_string()),
            skip: vec![RuleConfig {
                tag: Some("h*".to_string()),
                classes: vec!["author".to_string()],
                ..RuleConfig::default()
            }],
            heading: vec![RuleConfig {
                tag: Some("p".to_string()),
                classes: vec!["centerbig".to_string()],
                text: Some(r"[0-9]+\. (Kapitel|Chapter)".to_string()),
                max_chars: Some(20),
                level: Some(2),
                ..RuleConfig::default()
            }],
            ..PresetConfig::default()
        }),
        _ => None,
    }
}

pub fn parse_link_scope(s: &str) -> Result<LinkScope, String> {
    match s.to_lowercase().as_str() {
        "document" | "page" => Ok(LinkScope::Document),
        "root" | "content" => Ok(LinkScope::Root),
        _ => Err(format!(
            "Invalid link scope: '{}'. Use document or root.",
            s
        )),
    }
}

/// Why a preset could not become an extractor configuration.
#[derive(Debug, thiserror::Error)]
pub enum PresetError {
    #[error("Missing {0}: set it in the preset or pass it on the command line.")]
    Missing(&'static str),

    #[error("{0}")]
    InvalidValue(String),

    #[error("{0}")]
    Rule(#[from] ExtractError),
}

impl PresetConfig {
    /// Fields set in `other` replace fields in `self`; rule lists are appended.
    pub fn overlay(mut self, other: PresetConfig) -> Self {
        self.link_next = other.link_next.or(self.link_next);
        self.root_tag = other.root_tag.or(self.root_tag);
        self.root_id = other.root_id.or(self.root_id);
        self.root_class = other.root_class.or(self.root_class);
        self.link_scope = other.link_scope.or(self.link_scope);
        self.default_quirks = other.default_quirks.or(self.default_quirks);
        self.skip.extend(other.skip);
        self.heading.extend(other.heading);
        self.demote.extend(other.demote);
        self
    }

    /// Build the extractor configuration, registering rules in the order skip, heading, demote.
    pub fn to_extractor_config(&self) -> Result<ExtractorConfig, PresetError> {
        let link_next = self
            .link_next
            .clone()
            .filter(|s| !s.is_empty())
            .ok_or(PresetError::Missing("next-link pattern"))?;
        let root_tag = self
            .root_tag
            .clone()
            .filter(|s| !s.trim().is_empty())
            .ok_or(PresetError::Missing("root tag"))?;
        let root = RootSelector::new(root_tag, self.root_id.clone(), self.root_class.clone())?;
        let link_scope = match &self.link_scope {
            Some(s) => parse_link_scope(s).map_err(PresetError::InvalidValue)?,
            None => LinkScope::Document,
        };

        let mut quirks = if self.default_quirks.unwrap_or(true) {
            Quirks::with_defaults()
        } else {
            Quirks::new()
        };
        for rule in &self.skip {
            quirks.register_skip(rule.selector())?;
        }
        for rule in &self.heading {
            let level = rule.level.ok_or_else(|| {
                PresetError::InvalidValue("heading rule needs a level (1-6)".to_string())
            })?;
            quirks.register_heading(rule.selector(), level, rule.class.as_deref())?;
        }
        for rule in &self.demote {
            quirks.register_demote(rule.selector(), rule.class.as_deref())?;
        }
        tracing::debug!(rules = quirks.len(), root = %root, "Built extractor configuration");

        Ok(ExtractorConfig {
            link_next,
            root,
            link_scope,
            quirks,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::{Document, Extractor, QuirkAction};

    #[test]
    fn builtin_preset_builds_extractor() -> Result<(), PresetError> {
        for name in BUILTIN_PRESETS {
            let preset = builtin(name).ok_or(PresetError::Missing("builtin"))?;
            let config = preset.to_extractor_config()?;
            Extractor::new(config)?;
        }
        assert!(builtin("nope").is_none());
        Ok(())
    }

    #[test]
    fn overlay_replaces_fields_and_appends_rules() {
        let base = PresetConfig {
            link_next: Some("Next".to_string()),
            root_tag: Some("div".to_string()),
            root_class: Some("a".to_string()),
            skip: vec![RuleConfig {
                tag: Some("h1".to_string()),
                ..RuleConfig::default()
            }],
            ..PresetConfig::default()
        };
        let merged = base.overlay(PresetConfig {
            root_class: Some("b".to_string()),
            skip: vec![RuleConfig {
                tag: Some("h2".to_string()),
                ..RuleConfig::default()
            }],
            ..PresetConfig::default()
        });
        assert_eq!(merged.link_next.as_deref(), Some("Next"));
        assert_eq!(merged.root_class.as_deref(), Some("b"));
        assert_eq!(merged.skip.len(), 2);
    }

    #[test]
    fn missing_fields_and_bad_rules_are_reported() {
        let empty = PresetConfig::default();
        assert!(matches!(
            empty.to_extractor_config(),
            Err(PresetError::Missing("next-link pattern"))
        ));

        let no_disambiguator = PresetConfig {
            link_next: Some("Next".to_string()),
            root_tag: Some("div".to_string()),
            ..PresetConfig::default()
        };
        assert!(matches!(
            no_disambiguator.to_extractor_config(),
            Err(PresetError::Rule(ExtractError::MissingRootSelector { .. }))
        ));

        let bad_level = PresetConfig {
            link_next: Some("Next".to_string()),
            root_tag: Some("div".to_string()),
            root_id: Some("c".to_string()),
            heading: vec![RuleConfig {
                tag: Some("p".to_string()),
                level: Some(9),
                ..RuleConfig::default()
            }],
            ..PresetConfig::default()
        };
        assert!(matches!(
            bad_level.to_extractor_config(),
            Err(PresetError::Rule(ExtractError::InvalidLevel { level: 9, .. }))
        ));
    }

    #[test]
    fn preset_rules_apply_in_order_after_defaults() -> Result<(), PresetError> {
        let preset = PresetConfig {
            link_next: Some("Next".to_string()),
            root_tag: Some("div".to_string()),
            root_id: Some("c".to_string()),
            heading: vec![RuleConfig {
                classes: vec!["big".to_string()],
                level: Some(1),
                class: Some("h".to_string()),
                ..RuleConfig::default()
            }],
            ..PresetConfig::default()
        };
        let config = preset.to_extractor_config()?;
        let doc = Document::parse(r#"<body><script class="big">x</script><p class="big">T</p></body>"#);
        let script = doc.elements().find(|e| e.tag == "script").ok_or(PresetError::Missing("script"))?;
        let p = doc.elements().find(|e| e.tag == "p").ok_or(PresetError::Missing("p"))?;
        assert_eq!(config.quirks.classify(script), Some(&QuirkAction::Skip));
        assert!(matches!(
            config.quirks.classify(p),
            Some(QuirkAction::PromoteToHeading { level: 1, .. })
        ));
        Ok(())
    }

    #[test]
    fn link_scope_parsing() {
        assert_eq!(parse_link_scope("Root"), Ok(LinkScope::Root));
        assert_eq!(parse_link_scope("document"), Ok(LinkScope::Document));
        assert!(parse_link_scope("sideways").is_err());
    }
}
