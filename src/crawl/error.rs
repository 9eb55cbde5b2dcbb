//! Fetch and crawl errors.

use crate::epub::EpubError;
use crate::extract::ExtractError;
use thiserror::Error;

/// Failure of the fetch collaborator for a single URL.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Network error: {source}")]
    Network {
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP {status}")]
    HttpStatus { status: u16 },

    #[error("Failed to read response body: {source}")]
    BodyRead {
        #[source]
        source: reqwest::Error,
    },

    /// Fetchers other than the HTTP client (files, fixtures).
    #[error("{0}")]
    Other(String),
}

impl FetchError {
    /// Timeouts, connection failures, 5xx and 429 are worth another attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Network { source } => source.is_timeout() || source.is_connect(),
            FetchError::HttpStatus { status } => *status >= 500 || *status == 429,
            FetchError::BodyRead { .. } | FetchError::Other(_) => false,
        }
    }
}

/// Why a crawl stopped in the Failed state.
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("Invalid URL: {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Could not fetch {url}: {cause}")]
    FetchFailed {
        url: String,
        #[source]
        cause: FetchError,
    },

    #[error("Could not extract {url}: {source}")]
    RootNotFound {
        url: String,
        #[source]
        source: ExtractError,
    },

    #[error(transparent)]
    Package(#[from] EpubError),
}
