//! Pagination crawler: fetch a page, extract its chapter, append it to the book, follow the
//! next-page link until there is none or it leads back to a page already seen.

mod client;
mod error;

pub use client::{PoliteClient, PoliteClientBuilder};
pub use error::{CrawlError, FetchError};

use crate::epub::EpubBuilder;
use crate::extract::Extractor;
use reqwest::Url;
use std::collections::HashSet;

/// Source of page markup. Implemented by [PoliteClient]; tests use in-memory fetchers.
pub trait Fetch {
    fn fetch(&mut self, url: &str) -> Result<String, FetchError>;
}

impl<F: Fetch + ?Sized> Fetch for &mut F {
    fn fetch(&mut self, url: &str) -> Result<String, FetchError> {
        (**self).fetch(url)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlState {
    Running,
    Done,
    Failed,
}

/// Outcome of a crawl that reached [CrawlState::Done].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlSummary {
    /// Pages fetched and appended.
    pub pages: u32,
    /// The last next-link pointed at a page already visited.
    pub cycle_detected: bool,
    /// URL of the last page appended.
    pub last_url: Option<String>,
}

/// Walks a paginated book one page per [Crawler::step].
pub struct Crawler<'p, F: Fetch> {
    fetcher: F,
    extractor: Extractor,
    state: CrawlState,
    current: Option<Url>,
    visited: HashSet<String>,
    pages: u32,
    cycle_detected: bool,
    last_url: Option<String>,
    progress: Option<&'p dyn Fn(u32, &str)>,
}

impl<'p, F: Fetch> Crawler<'p, F> {
    pub fn new(fetcher: F, extractor: Extractor, start_url: &str) -> Result<Self, CrawlError> {
        let start = parse_page_url(start_url)?;
        Ok(Self {
            fetcher,
            extractor,
            state: CrawlState::Running,
            current: Some(start),
            visited: HashSet::new(),
            pages: 0,
            cycle_detected: false,
            last_url: None,
            progress: None,
        })
    }

    /// Called with the page count and URL after each page is appended.
    pub fn with_progress(mut self, progress: &'p dyn Fn(u32, &str)) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn state(&self) -> CrawlState {
        self.state
    }

    /// URL the next step will fetch.
    pub fn current_url(&self) -> Option<&str> {
        self.current.as_ref().map(Url::as_str)
    }

    pub fn summary(&self) -> CrawlSummary {
        CrawlSummary {
            pages: self.pages,
            cycle_detected: self.cycle_detected,
            last_url: self.last_url.clone(),
        }
    }

    /// Process one page. Does nothing once the crawl is no longer running. On error the
    /// crawler is Failed and nothing from the failing page has been appended.
    pub fn step(&mut self, book: &mut EpubBuilder) -> Result<CrawlState, CrawlError> {
        if self.state != CrawlState::Running {
            return Ok(self.state);
        }
        let result = self.visit(book);
        self.state = match &result {
            Ok(state) => *state,
            Err(_) => CrawlState::Failed,
        };
        result
    }

    /// Step until the crawl is Done or Failed.
    pub fn run(&mut self, book: &mut EpubBuilder) -> Result<CrawlSummary, CrawlError> {
        while self.step(book)? == CrawlState::Running {}
        tracing::info!(
            pages = self.pages,
            cycle = self.cycle_detected,
            "Crawl finished"
        );
        Ok(self.summary())
    }

    fn visit(&mut self, book: &mut EpubBuilder) -> Result<CrawlState, CrawlError> {
        let url = match self.current.take() {
            Some(url) => url,
            None => return Ok(CrawlState::Done),
        };
        self.visited.insert(visit_key(&url));

        let html = self
            .fetcher
            .fetch(url.as_str())
            .map_err(|cause| CrawlError::FetchFailed {
                url: url.to_string(),
                cause,
            })?;
        let index = self.pages + 1;
        let page = self
            .extractor
            .extract_page(&html, index)
            .map_err(|source| CrawlError::RootNotFound {
                url: url.to_string(),
                source,
            })?;
        tracing::info!(
            url = %url,
            page = index,
            blocks = page.chapter.blocks.len(),
            "Extracted page"
        );
        let next = match &page.next {
            Some(href) => Some(resolve_next(&url, page.base_href.as_deref(), href)?),
            None => None,
        };
        book.add_chapter(page.chapter)?;
        self.pages = index;
        self.last_url = Some(url.to_string());
        if let Some(progress) = self.progress {
            progress(index, url.as_str());
        }

        let next = match next {
            Some(next) if is_followable(&url, &next) => next,
            Some(next) => {
                tracing::warn!(url = %url, next = %next, "Next link is not a page; last page");
                return Ok(CrawlState::Done);
            }
            None => {
                tracing::debug!(url = %url, "No next link; last page");
                return Ok(CrawlState::Done);
            }
        };
        if self.visited.contains(&visit_key(&next)) {
            tracing::info!(url = %next, "Next link leads to a visited page; stopping");
            self.cycle_detected = true;
            return Ok(CrawlState::Done);
        }
        self.current = Some(next);
        Ok(CrawlState::Running)
    }
}

fn parse_page_url(input: &str) -> Result<Url, CrawlError> {
    let url = Url::parse(input.trim()).map_err(|e| CrawlError::InvalidUrl {
        url: input.to_string(),
        reason: e.to_string(),
    })?;
    if url.cannot_be_a_base() {
        return Err(CrawlError::InvalidUrl {
            url: input.to_string(),
            reason: "not a page URL".to_string(),
        });
    }
    Ok(url)
}

/// Resolve `href` against the page's `<base>` (itself relative to the page) or the page URL.
pub fn resolve_next(page: &Url, base_href: Option<&str>, href: &str) -> Result<Url, CrawlError> {
    let base = match base_href {
        Some(b) => page.join(b.trim()).map_err(|e| CrawlError::InvalidUrl {
            url: b.to_string(),
            reason: e.to_string(),
        })?,
        None => page.clone(),
    };
    let mut next = base.join(href).map_err(|e| CrawlError::InvalidUrl {
        url: href.to_string(),
        reason: e.to_string(),
    })?;
    next.set_fragment(None);
    Ok(next)
}

/// Web pages, or pages under the start page's own scheme (e.g. `file:`). Rules out
/// `javascript:` and `mailto:` links.
fn is_followable(page: &Url, next: &Url) -> bool {
    !next.cannot_be_a_base()
        && (matches!(next.scheme(), "http" | "https") || next.scheme() == page.scheme())
}

/// Pages are the same when their URLs are equal without fragment.
fn visit_key(url: &Url) -> String {
    let mut key = url.clone();
    key.set_fragment(None);
    key.into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn next_link_resolves_against_page_and_drops_fragment() -> Result<(), CrawlError> {
        let page = url("http://example.test/book/a.html");
        assert_eq!(
            resolve_next(&page, None, "b.html#top")?.as_str(),
            "http://example.test/book/b.html"
        );
        assert_eq!(
            resolve_next(&page, None, "/other/c.html")?.as_str(),
            "http://example.test/other/c.html"
        );
        Ok(())
    }

    #[test]
    fn only_page_links_are_followed() -> Result<(), CrawlError> {
        let page = url("http://example.test/book/a.html");
        assert!(is_followable(&page, &resolve_next(&page, None, "b.html")?));
        assert!(is_followable(&page, &url("https://mirror.test/b.html")));
        assert!(!is_followable(&page, &resolve_next(&page, None, "javascript:next()")?));
        assert!(!is_followable(&page, &resolve_next(&page, None, "mailto:a@b.test")?));
        assert!(!is_followable(&page, &url("file:///tmp/b.html")));
        let local = url("file:///tmp/a.html");
        assert!(is_followable(&local, &url("file:///tmp/b.html")));
        Ok(())
    }

    #[test]
    fn base_href_takes_precedence_and_may_be_relative() -> Result<(), CrawlError> {
        let page = url("http://example.test/book/a.html");
        assert_eq!(
            resolve_next(&page, Some("http://mirror.test/kapitel/"), "2.html")?.as_str(),
            "http://mirror.test/kapitel/2.html"
        );
        assert_eq!(
            resolve_next(&page, Some("../pages/"), "2.html")?.as_str(),
            "http://example.test/pages/2.html"
        );
        Ok(())
    }

    #[test]
    fn visit_key_ignores_fragment_only() {
        assert_eq!(
            visit_key(&url("http://example.test/a.html#x")),
            visit_key(&url("http://example.test/a.html"))
        );
        assert_ne!(
            visit_key(&url("http://example.test/a.html?p=2")),
            visit_key(&url("http://example.test/a.html"))
        );
    }

    #[test]
    fn start_url_must_be_absolute() {
        assert!(matches!(
            parse_page_url("chapter1.html"),
            Err(CrawlError::InvalidUrl { .. })
        ));
        assert!(matches!(
            parse_page_url("mailto:someone@example.test"),
            Err(CrawlError::InvalidUrl { .. })
        ));
    }
}
