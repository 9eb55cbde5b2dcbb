//! Errors from extractor configuration and page extraction.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Invalid pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("Invalid heading level {level}: must be between 1 and {max}.")]
    InvalidLevel { level: u8, max: u8 },

    #[error("Root selector <{tag}> needs an id or a class to identify the content container.")]
    MissingRootSelector { tag: String },

    #[error("Content container {selector} not found on page.")]
    RootNotFound { selector: String },
}
