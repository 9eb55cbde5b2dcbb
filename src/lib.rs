//! webbook: follow a paginated web book page by page, clean each page's markup with per-site
//! quirk rules and bind the result into an EPUB.

pub mod cli;
pub mod config;
pub mod crawl;
pub mod epub;
pub mod extract;
pub mod model;

// Re-exports for CLI and consumers.
pub use crawl::{
    CrawlError, CrawlState, CrawlSummary, Crawler, Fetch, FetchError, PoliteClient,
    PoliteClientBuilder,
};
pub use epub::{EpubBuilder, EpubError, EpubVersion, Package};
pub use extract::{ExtractError, Extractor, ExtractorConfig, LinkScope, Quirks, RootSelector};
pub use model::{Author, Block, Book, Chapter, Inline};
