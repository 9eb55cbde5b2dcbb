//! CLI parsing and orchestration. Parses args, resolves the extractor preset, crawls into an
//! EPUB builder and finalizes it. Maps errors to exit codes.

use crate::config::{self, Config};
use crate::crawl::{CrawlError, CrawlSummary, Crawler, PoliteClient};
use crate::epub::{EpubBuilder, EpubError, EpubVersion};
use crate::extract::{preset, Extractor, PresetConfig};
use crate::model::Author;
use clap::Parser;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

const DEFAULT_LANGUAGE: &str = "en";

/// CLI error carrying exit code and message.
#[derive(Debug, Error)]
pub enum CliRunError {
    #[error("{0}")]
    InvalidInput(String),

    #[error(transparent)]
    Crawl(#[from] CrawlError),

    #[error(transparent)]
    Epub(#[from] EpubError),

    #[error("{0}")]
    Validation(String),
}

impl CliRunError {
    pub fn exit_code(&self) -> i32 {
        match self {
            CliRunError::InvalidInput(_) => 1,
            CliRunError::Crawl(CrawlError::Package(_)) => 3,
            CliRunError::Crawl(_) => 2,
            CliRunError::Epub(_) | CliRunError::Validation(_) => 3,
        }
    }
}

/// Run epubcheck on the given EPUB path. Requires epubcheck on PATH.
fn validate_epub(path: &Path) -> Result<(), CliRunError> {
    let output = std::process::Command::new("epubcheck")
        .arg(path)
        .output()
        .map_err(|e| {
            CliRunError::Validation(format!(
                "Could not run epubcheck: {}. Is epubcheck installed and on PATH?",
                e
            ))
        })?;
    if output.status.success() {
        Ok(())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stdout = String::from_utf8_lossy(&output.stdout);
        let msg = if stderr.is_empty() { stdout } else { stderr };
        Err(CliRunError::Validation(format!(
            "epubcheck reported errors:\n{}",
            msg.trim()
        )))
    }
}

#[derive(Parser, Debug)]
#[command(name = "webbook")]
#[command(about = "Follow a paginated web book page by page and bind it into an EPUB")]
#[command(
    after_help = "Config file keys (output_dir, user_agent, request_delay_secs, timeout_secs, retry_count, retry_backoff_secs, language, toc_ncx, [presets.<name>]) are read from ./webbook.toml or the user config directory. CLI flags override config."
)]
pub struct Args {
    /// URL of the first page of the book.
    pub url: String,

    /// Output path. Default: ./{sanitized-title}.epub
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Read config from this file instead of the default locations.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Named site preset (built-in or from the config file).
    #[arg(long)]
    pub preset: Option<String>,

    /// Regular expression matched against the whole text of the next-page link.
    #[arg(long)]
    pub link_next: Option<String>,

    /// Tag of the element holding the book content.
    #[arg(long)]
    pub root_tag: Option<String>,

    /// Id of the content element.
    #[arg(long)]
    pub root_id: Option<String>,

    /// Class of the content element.
    #[arg(long)]
    pub root_class: Option<String>,

    /// Where to look for the next-page link: document (default) or root.
    #[arg(long, value_parser = preset::parse_link_scope)]
    pub link_scope: Option<crate::extract::LinkScope>,

    /// Book title.
    #[arg(long)]
    pub title: Option<String>,

    #[arg(long)]
    pub subtitle: Option<String>,

    /// Author name, optionally with its sort form: "Franz Kafka=Kafka, Franz". Repeatable.
    #[arg(long = "author")]
    pub authors: Vec<String>,

    /// Editor name, same syntax as --author; repeatable.
    #[arg(long = "editor")]
    pub editors: Vec<String>,

    /// Open the crawled pages with a heading page and nest them under it in the contents.
    #[arg(long)]
    pub part: Option<String>,

    /// Language code, e.g. en or de (overrides config; default en).
    #[arg(long)]
    pub lang: Option<String>,

    /// Unique identifier. Default: derived from the title.
    #[arg(long)]
    pub id: Option<String>,

    /// Publication date: YYYY, YYYY-MM or YYYY-MM-DD.
    #[arg(long)]
    pub date: Option<String>,

    #[arg(long)]
    pub publisher: Option<String>,

    #[arg(long)]
    pub rights: Option<String>,

    /// Add a title page.
    #[arg(long)]
    pub titlepage: bool,

    /// CSS file appended to the default stylesheet.
    #[arg(long)]
    pub stylesheet: Option<PathBuf>,

    /// Extra file for the package (images, fonts); repeatable.
    #[arg(long)]
    pub include: Vec<PathBuf>,

    /// Extra XHTML document placed in reading order after the crawled pages; repeatable.
    #[arg(long)]
    pub include_linear: Vec<PathBuf>,

    /// Generate EPUB 2 instead of EPUB 3.
    #[arg(long)]
    pub epub_2: bool,

    /// Include toc.ncx in EPUB 3 output for legacy readers (EPUB 2 always includes NCX).
    #[arg(long)]
    pub ncx: bool,

    /// HTTP User-Agent (overrides config).
    #[arg(long)]
    pub user_agent: Option<String>,

    /// Delay between requests in seconds (overrides config; default 1).
    #[arg(long)]
    pub delay: Option<u64>,

    /// Request timeout in seconds (overrides config; default 30).
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Suppress progress output (errors only).
    #[arg(short, long)]
    pub quiet: bool,

    /// Log each page and print the full error chain.
    #[arg(short, long)]
    pub verbose: bool,

    /// After writing the EPUB, run epubcheck to validate it (epubcheck must be on PATH).
    #[arg(long)]
    pub validate: bool,
}

impl Args {
    /// Extractor fields given on the command line, as a preset layer.
    fn preset_overrides(&self) -> PresetConfig {
        PresetConfig {
            link_next: self.link_next.clone(),
            root_tag: self.root_tag.clone(),
            root_id: self.root_id.clone(),
            root_class: self.root_class.clone(),
            link_scope: self.link_scope.map(|s| match s {
                crate::extract::LinkScope::Document => "document".to_string(),
                crate::extract::LinkScope::Root => "root".to_string(),
            }),
            ..PresetConfig::default()
        }
    }
}

/// `Name` or `Name=File As`.
fn parse_author(value: &str) -> Author {
    match value.split_once('=') {
        Some((name, file_as)) if !file_as.trim().is_empty() => {
            Author::new(name.trim()).with_file_as(file_as.trim())
        }
        Some((name, _)) => Author::new(name.trim()),
        None => Author::new(value.trim()),
    }
}

/// Sanitize book title to a safe filename: lowercase, replace spaces/special with `-`.
fn sanitize_title(title: &str) -> String {
    let mut s = title
        .chars()
        .map(|c| {
            if c.is_alphanumeric() {
                c.to_lowercase().next().unwrap_or(c)
            } else {
                '-'
            }
        })
        .collect::<String>();
    // Collapse multiple dashes and trim
    while s.contains("--") {
        s = s.replace("--", "-");
    }
    s = s.trim_matches('-').to_string();
    if s.is_empty() {
        s = "book".to_string();
    }
    s
}

/// Ensure output path parent exists.
fn validate_output_path(path: &Path) -> Result<(), CliRunError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            return Err(CliRunError::InvalidInput(format!(
                "Cannot write output: {}: parent directory does not exist.",
                path.display()
            )));
        }
    }
    Ok(())
}

/// Build the extractor from the named preset (if any) with command-line fields on top.
fn build_extractor(args: &Args, config: &Config) -> Result<Extractor, CliRunError> {
    let base = match &args.preset {
        Some(name) => config.preset(name).ok_or_else(|| {
            CliRunError::InvalidInput(format!(
                "Unknown preset '{}'. Available: {}.",
                name,
                config.preset_names().join(", ")
            ))
        })?,
        None => PresetConfig::default(),
    };
    let extractor_config = base
        .overlay(args.preset_overrides())
        .to_extractor_config()
        .map_err(|e| CliRunError::InvalidInput(e.to_string()))?;
    Extractor::new(extractor_config).map_err(|e| CliRunError::InvalidInput(e.to_string()))
}

fn build_client(args: &Args, config: &Config) -> Result<PoliteClient, CliRunError> {
    let mut builder = PoliteClient::builder();
    if let Some(delay) = args.delay.or(config.request_delay_secs) {
        builder = builder.delay_secs(delay);
    }
    if let Some(timeout) = args.timeout.or(config.timeout_secs) {
        builder = builder.timeout_secs(timeout);
    }
    if let Some(n) = config.retry_count {
        builder = builder.retry_count(n);
    }
    if let Some(backoff) = config.retry_backoff_secs.clone() {
        builder = builder.retry_backoff_secs(backoff);
    }
    if let Some(ua) = args.user_agent.clone().or_else(|| config.user_agent.clone()) {
        builder = builder.user_agent(ua);
    }
    builder
        .build()
        .map_err(|e| CliRunError::InvalidInput(format!("Failed to create HTTP client: {}", e)))
}

/// Metadata, title page and manifest-only files; everything that goes in before the crawl.
fn prepare_book(b: &mut EpubBuilder, args: &Args, config: &Config, title: &str) -> Result<(), CliRunError> {
    b.set_title(title)?;
    if let Some(sub) = &args.subtitle {
        b.set_subtitle(sub.as_str())?;
    }
    for name in &args.authors {
        b.add_author(parse_author(name))?;
    }
    for name in &args.editors {
        b.add_author(parse_author(name).with_role("edt"))?;
    }
    let lang = args
        .lang
        .as_deref()
        .or(config.language.as_deref())
        .unwrap_or(DEFAULT_LANGUAGE);
    b.set_language(lang)
        .map_err(|e| CliRunError::InvalidInput(e.to_string()))?;
    if let Some(id) = &args.id {
        b.set_identifier(id)?;
    }
    if let Some(date) = &args.date {
        b.set_date(date)
            .map_err(|e| CliRunError::InvalidInput(e.to_string()))?;
    }
    if let Some(publisher) = &args.publisher {
        b.set_publisher(publisher.as_str())?;
    }
    if let Some(rights) = &args.rights {
        b.set_rights(rights.as_str())?;
    }
    if let Some(path) = &args.stylesheet {
        let css = std::fs::read_to_string(path).map_err(|e| {
            CliRunError::InvalidInput(format!("Cannot read stylesheet {}: {}", path.display(), e))
        })?;
        b.append_stylesheet(&css)?;
    }
    if args.titlepage {
        b.add_titlepage(None, None)?;
    }
    for path in &args.include {
        b.insert_file(path, None, false)?;
    }
    Ok(())
}

/// Entry point for the CLI. Returns Ok(()) on success; Err with exit code and message on failure.
pub fn run(args: &Args) -> Result<(), CliRunError> {
    let config = match &args.config {
        Some(path) => config::load_config_from(path).map_err(CliRunError::InvalidInput)?,
        None => config::load_config()
            .map_err(CliRunError::InvalidInput)?
            .unwrap_or_default(),
    };

    let extractor = build_extractor(args, &config)?;
    let title = args
        .title
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| CliRunError::InvalidInput("Missing --title: the book needs a title.".to_string()))?;

    let output_path = match &args.output {
        Some(p) => p.clone(),
        None => config
            .output_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(format!("{}.epub", sanitize_title(title))),
    };
    validate_output_path(&output_path)?;

    let client = build_client(args, &config)?;
    let mut crawler = Crawler::new(client, extractor, &args.url).map_err(|e| match e {
        CrawlError::InvalidUrl { url, reason } => CliRunError::InvalidInput(format!(
            "Expected the URL of the first page, e.g. https://example.com/book/1.html. Invalid: {}: {}",
            url, reason
        )),
        other => CliRunError::Crawl(other),
    })?;

    let spinner = if args.quiet {
        None
    } else {
        let pb = indicatif::ProgressBar::new_spinner();
        if let Ok(style) = indicatif::ProgressStyle::default_spinner()
            .template("{spinner} {msg} ({elapsed})")
        {
            pb.set_style(style.tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ "));
        }
        pb.enable_steady_tick(Duration::from_millis(80));
        pb.set_message(format!("Fetching {}", args.url));
        Some(pb)
    };
    let progress_cb = |n: u32, url: &str| {
        if let Some(pb) = &spinner {
            pb.set_message(format!("Page {}: {}", n, url));
        }
    };
    crawler = crawler.with_progress(&progress_cb);

    let version = if args.epub_2 {
        EpubVersion::Epub2
    } else {
        EpubVersion::Epub3
    };
    let include_ncx = args.ncx || config.toc_ncx.unwrap_or(false);
    let result = EpubBuilder::new(&output_path)
        .with_version(version)
        .with_ncx(include_ncx)
        .scoped(|b| -> Result<CrawlSummary, CliRunError> {
            prepare_book(b, args, &config, title)?;
            if let Some(part) = &args.part {
                b.add_heading_page(part, None, None)?.begin_subsections()?;
            }
            let summary = crawler.run(b)?;
            if args.part.is_some() {
                b.end_subsections()?;
            }
            for path in &args.include_linear {
                b.insert_file(path, None, true)?;
            }
            Ok(summary)
        });

    if let Some(pb) = &spinner {
        pb.disable_steady_tick();
        pb.finish_and_clear();
    }
    let (summary, package) = result?;

    if args.validate {
        validate_epub(&package.path)?;
    }
    if !args.quiet {
        let cycle = if summary.cycle_detected {
            ", stopped at a link back to a visited page"
        } else {
            ""
        };
        eprintln!(
            "Wrote {} ({} page{}{})",
            package.path.display(),
            summary.pages,
            if summary.pages == 1 { "" } else { "s" },
            cycle
        );
    }
    Ok(())
}
