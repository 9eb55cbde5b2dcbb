//! Optional config file loading. Search order: ./webbook.toml, then
//! $XDG_CONFIG_HOME/webbook/config.toml (or ~/.config/webbook/config.toml).

use crate::extract::preset::{self, PresetConfig};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Config file contents. All fields optional; only present keys override defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct Config {
    /// Default output directory when -o is not set. Paths are relative to CWD.
    pub output_dir: Option<PathBuf>,
    /// HTTP User-Agent header.
    pub user_agent: Option<String>,
    /// Delay in seconds between requests.
    pub request_delay_secs: Option<u64>,
    /// Request timeout in seconds.
    pub timeout_secs: Option<u64>,
    /// Number of HTTP attempts per page for transient failures.
    pub retry_count: Option<u32>,
    /// Delay in seconds before each retry (e.g. [1, 2, 4]). Length should be retry_count - 1.
    pub retry_backoff_secs: Option<Vec<u64>>,
    /// Book language when --lang is not given.
    pub language: Option<String>,
    /// Include toc.ncx in EPUB 3 output.
    pub toc_ncx: Option<bool>,
    /// Site presets by name. A preset named like a built-in one is layered on top of it.
    pub presets: BTreeMap<String, PresetConfig>,
}

impl Config {
    /// Preset `name` from the built-ins and this config. `None` if neither defines it.
    pub fn preset(&self, name: &str) -> Option<PresetConfig> {
        match (preset::builtin(name), self.presets.get(name)) {
            (Some(base), Some(local)) => Some(base.overlay(local.clone())),
            (Some(base), None) => Some(base),
            (None, Some(local)) => Some(local.clone()),
            (None, None) => None,
        }
    }

    /// Names of every preset available, built-in and configured.
    pub fn preset_names(&self) -> Vec<String> {
        let mut names: Vec<String> = preset::BUILTIN_PRESETS
            .iter()
            .map(|s| s.to_string())
            .collect();
        for name in self.presets.keys() {
            if !names.contains(name) {
                names.push(name.clone());
            }
        }
        names
    }
}

/// Search order: (1) ./webbook.toml, (2) $XDG_CONFIG_HOME/webbook/config.toml.
/// Missing file returns Ok(None). Invalid TOML or I/O error reading a present file returns Err.
pub fn load_config() -> Result<Option<Config>, String> {
    let cwd = std::env::current_dir()
        .map_err(|e| format!("Cannot determine current directory: {}", e))?;
    let mut paths = vec![cwd.join("webbook.toml")];
    if let Some(d) = dirs::config_dir() {
        paths.push(d.join("webbook").join("config.toml"));
    }
    for path in &paths {
        if path.exists() {
            return load_config_from(path).map(Some);
        }
    }
    Ok(None)
}

/// Load a config file that must exist.
pub fn load_config_from(path: &Path) -> Result<Config, String> {
    let s = std::fs::read_to_string(path)
        .map_err(|e| format!("Cannot read config {}: {}", path.display(), e))?;
    let config: Config =
        toml::from_str(&s).map_err(|e| format!("Invalid config {}: {}", path.display(), e))?;
    tracing::debug!(path = %path.display(), presets = config.presets.len(), "Loaded config");
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_empty_config() {
        let c: Config = toml::from_str("").unwrap();
        assert!(c.output_dir.is_none());
        assert!(c.user_agent.is_none());
        assert!(c.request_delay_secs.is_none());
        assert!(c.language.is_none());
        assert!(c.toc_ncx.is_none());
        assert!(c.presets.is_empty());
    }

    #[test]
    fn parse_full_config() {
        let s = r#"
            output_dir = "out"
            user_agent = "Custom/1.0"
            request_delay_secs = 3
            timeout_secs = 60
            retry_count = 5
            retry_backoff_secs = [1, 2, 4, 8]
            language = "de"
            toc_ncx = true

            [presets.example]
            link_next = "Weiter"
            root_tag = "div"
            root_id = "text"
            link_scope = "root"
            default_quirks = false

            [[presets.example.skip]]
            tag = "p"
            classes = ["ad", "promo"]

            [[presets.example.heading]]
            tag = "p"
            classes = ["chapter"]
            text = "Kapitel [0-9]+"
            max_chars = 20
            level = 2
            class = "wb-chapter-h"

            [[presets.example.demote]]
            tag = "h*"
            classes = ["motto"]
            class = "wb-false-h"
        "#;
        let c: Config = toml::from_str(s).unwrap();
        assert_eq!(c.output_dir.as_deref(), Some(Path::new("out")));
        assert_eq!(c.user_agent.as_deref(), Some("Custom/1.0"));
        assert_eq!(c.request_delay_secs, Some(3));
        assert_eq!(c.timeout_secs, Some(60));
        assert_eq!(c.retry_count, Some(5));
        assert_eq!(
            c.retry_backoff_secs.as_deref(),
            Some([1, 2, 4, 8].as_slice())
        );
        assert_eq!(c.language.as_deref(), Some("de"));
        assert_eq!(c.toc_ncx, Some(true));

        let p = c.preset("example").unwrap();
        assert_eq!(p.root_id.as_deref(), Some("text"));
        assert_eq!(p.skip[0].classes, ["ad", "promo"]);
        assert_eq!(p.heading[0].level, Some(2));
        assert_eq!(p.demote[0].class.as_deref(), Some("wb-false-h"));
        assert!(p.to_extractor_config().is_ok());
    }

    #[test]
    fn config_preset_layers_on_builtin() {
        let s = r#"
            [presets.spiegel-gutenberg]
            link_next = "Next"
        "#;
        let c: Config = toml::from_str(s).unwrap();
        let p = c.preset("spiegel-gutenberg").unwrap();
        assert_eq!(p.link_next.as_deref(), Some("Next"));
        assert_eq!(p.root_class.as_deref(), Some("gutenb"));
        assert!(c.preset("unknown").is_none());
        assert_eq!(c.preset_names(), ["spiegel-gutenberg"]);
    }

    #[test]
    fn malformed_rule_list_errors() {
        assert!(toml::from_str::<Config>("[presets.x]\nskip = 3").is_err());
    }

    #[test]
    fn invalid_toml_errors() {
        assert!(toml::from_str::<Config>("output_dir = [").is_err());
    }

    #[test]
    fn load_config_from_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("webbook.toml");
        std::fs::write(&path, "language = ").unwrap();
        let err = load_config_from(&path).unwrap_err();
        assert!(err.contains("webbook.toml"));
        std::fs::write(&path, "language = \"fr\"").unwrap();
        assert_eq!(load_config_from(&path).unwrap().language.as_deref(), Some("fr"));
    }
}
