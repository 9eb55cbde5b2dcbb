//! EPUB builder. Accumulates metadata, chapters and auxiliary files, then writes an EPUB 2 or
//! EPUB 3 package exactly once.

mod media;
mod write;

pub use media::media_type_for;

use crate::model::{Author, AuxFile, Block, Book, Chapter, Inline};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// EPUB format version.
///
/// Default is EPUB 3 (OPF 3.0, nav.xhtml, HTML5 chapters). Use `Epub2` for legacy readers
/// (OPF 2.0, NCX, XHTML 1.1).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EpubVersion {
    /// EPUB 3: OPF 3.0, nav.xhtml, HTML5 chapters. Optional toc.ncx for compatibility.
    #[default]
    Epub3,
    /// EPUB 2: OPF 2.0, toc.ncx only, XHTML 1.1 chapters.
    Epub2,
}

/// Errors from the EPUB builder. Maps to CLI exit code 3.
#[derive(Debug, Error)]
pub enum EpubError {
    #[error("Cannot write EPUB: {field} is not set.")]
    IncompleteMetadata { field: &'static str },

    #[error("EPUB has already been finalized; the book can no longer change.")]
    AlreadyFinalized,

    #[error("Book already has a title page.")]
    DuplicateTitlepage,

    #[error("Invalid date {value:?}: expected YYYY, YYYY-MM or YYYY-MM-DD.")]
    InvalidDate { value: String },

    #[error("Invalid language code {value:?}: expected e.g. en, de or de-AT.")]
    InvalidLanguage { value: String },

    #[error("Cannot infer media type of {name:?} from its extension.")]
    UnknownMediaType { name: String },

    #[error("Package already contains a resource named {name:?}.")]
    DuplicateResource { name: String },

    #[error("Invalid resource name {name:?}: must be a relative path inside the package.")]
    InvalidResourceName { name: String },

    #[error("Cannot write EPUB: book has no chapters.")]
    NoContent,

    #[error("No subsection level is open.")]
    UnbalancedSections,

    #[error("Cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to create EPUB file: {path}: {source}")]
    CreateFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write EPUB archive: {0}")]
    Zip(#[from] zip::result::ZipError),
}

impl From<std::io::Error> for EpubError {
    fn from(e: std::io::Error) -> Self {
        EpubError::Zip(zip::result::ZipError::Io(e))
    }
}

/// Stylesheet every package starts with. Class names are the ones the builder and the default
/// presets emit.
pub const DEFAULT_STYLESHEET: &str = "\
h1, h2, h3, h4, h5, h6 {
  text-align: center;
}
p {
  text-align: justify;
  margin-top: 0.125em;
  margin-bottom: 0;
  text-indent: 1em;
}
.wb-tp {
  margin-top: 8em;
}
.wb-tp-authors {
  font-size: 2em;
  text-align: center;
  margin-bottom: 1em;
}
.wb-tp-title {
  font-weight: bold;
  font-size: 3em;
  text-align: center;
}
.wb-tp-sub {
  text-align: center;
  font-weight: normal;
  font-size: 0.8em;
  margin-top: 1em;
}
.wb-false-h {
  font-weight: bold;
  font-size: 1.5em;
  text-indent: 0;
}
.wb-small-h {
  font-style: normal;
  font-weight: normal;
  font-size: 0.8em;
}
";

/// One manifest entry of a written package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestItem {
    pub id: String,
    /// Path relative to the OPF.
    pub href: String,
    pub media_type: &'static str,
    pub properties: Option<&'static str>,
}

impl ManifestItem {
    fn new(id: &str, href: &str, media_type: &'static str) -> Self {
        Self {
            id: id.to_string(),
            href: href.to_string(),
            media_type,
            properties: None,
        }
    }

    fn with_properties(mut self, properties: &'static str) -> Self {
        self.properties = Some(properties);
        self
    }
}

/// Summary of a written package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Package {
    pub path: PathBuf,
    pub identifier: String,
    pub version: EpubVersion,
    pub manifest: Vec<ManifestItem>,
    /// Manifest ids in reading order.
    pub spine: Vec<String>,
}

/// Builds one EPUB at `path`. Every mutating call fails with [EpubError::AlreadyFinalized]
/// once [EpubBuilder::finalize] has started writing.
#[derive(Debug)]
pub struct EpubBuilder {
    path: PathBuf,
    version: EpubVersion,
    include_ncx: bool,
    book: Book,
    /// Navigation level new chapters are added at.
    depth: usize,
    sealed: bool,
}

impl EpubBuilder {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            version: EpubVersion::default(),
            include_ncx: false,
            book: Book {
                stylesheet: DEFAULT_STYLESHEET.to_string(),
                ..Book::default()
            },
            depth: 0,
            sealed: false,
        }
    }

    pub fn with_version(mut self, version: EpubVersion) -> Self {
        self.version = version;
        self
    }

    /// Also write toc.ncx in EPUB 3 packages (EPUB 2 always has one).
    pub fn with_ncx(mut self, include: bool) -> Self {
        self.include_ncx = include;
        self
    }

    /// Run `f` against a fresh builder and finalize it exactly once if `f` succeeds. When `f`
    /// fails nothing is written.
    pub fn scoped<T, E>(
        self,
        f: impl FnOnce(&mut EpubBuilder) -> Result<T, E>,
    ) -> Result<(T, Package), E>
    where
        E: From<EpubError>,
    {
        let mut builder = self;
        let value = f(&mut builder)?;
        let package = builder.finalize()?;
        Ok((value, package))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn book(&self) -> &Book {
        &self.book
    }

    pub fn is_finalized(&self) -> bool {
        self.sealed
    }

    fn open(&mut self) -> Result<&mut Book, EpubError> {
        if self.sealed {
            return Err(EpubError::AlreadyFinalized);
        }
        Ok(&mut self.book)
    }

    pub fn set_title(&mut self, title: impl Into<String>) -> Result<&mut Self, EpubError> {
        self.open()?.title = Some(title.into());
        Ok(self)
    }

    pub fn set_subtitle(&mut self, subtitle: impl Into<String>) -> Result<&mut Self, EpubError> {
        self.open()?.subtitle = Some(subtitle.into());
        Ok(self)
    }

    /// Replace all authors with one.
    pub fn set_author(&mut self, author: Author) -> Result<&mut Self, EpubError> {
        self.open()?.authors = vec![author];
        Ok(self)
    }

    pub fn add_author(&mut self, author: Author) -> Result<&mut Self, EpubError> {
        self.open()?.authors.push(author);
        Ok(self)
    }

    /// Language tag such as `en`, `de` or `de-AT`.
    pub fn set_language(&mut self, language: &str) -> Result<&mut Self, EpubError> {
        let language = language.trim();
        if language.is_empty() {
            return Err(EpubError::IncompleteMetadata { field: "language" });
        }
        if !is_language_tag(language) {
            return Err(EpubError::InvalidLanguage {
                value: language.to_string(),
            });
        }
        self.open()?.language = Some(language.to_string());
        Ok(self)
    }

    pub fn set_identifier(&mut self, identifier: &str) -> Result<&mut Self, EpubError> {
        let identifier = identifier.trim();
        if identifier.is_empty() {
            return Err(EpubError::IncompleteMetadata {
                field: "identifier",
            });
        }
        self.open()?.identifier = Some(identifier.to_string());
        Ok(self)
    }

    /// Publication date as `YYYY`, `YYYY-MM` or `YYYY-MM-DD`.
    pub fn set_date(&mut self, date: &str) -> Result<&mut Self, EpubError> {
        let date = date.trim();
        if !is_valid_date(date) {
            return Err(EpubError::InvalidDate {
                value: date.to_string(),
            });
        }
        self.open()?.date = Some(date.to_string());
        Ok(self)
    }

    pub fn set_publisher(&mut self, publisher: impl Into<String>) -> Result<&mut Self, EpubError> {
        self.open()?.publisher = Some(publisher.into());
        Ok(self)
    }

    pub fn set_rights(&mut self, rights: impl Into<String>) -> Result<&mut Self, EpubError> {
        self.open()?.rights = Some(rights.into());
        Ok(self)
    }

    pub fn append_stylesheet(&mut self, css: &str) -> Result<&mut Self, EpubError> {
        let book = self.open()?;
        if !book.stylesheet.is_empty() && !book.stylesheet.ends_with('\n') {
            book.stylesheet.push('\n');
        }
        book.stylesheet.push_str(css);
        Ok(self)
    }

    pub fn set_stylesheet(&mut self, css: impl Into<String>) -> Result<&mut Self, EpubError> {
        self.open()?.stylesheet = css.into();
        Ok(self)
    }

    /// Synthesize a title page from the authors, `main_title` (or the book title) and
    /// `subtitle` (or the book subtitle). It always comes first in reading order.
    pub fn add_titlepage(
        &mut self,
        main_title: Option<&str>,
        subtitle: Option<&str>,
    ) -> Result<&mut Self, EpubError> {
        let book = self.open()?;
        if book.has_titlepage {
            return Err(EpubError::DuplicateTitlepage);
        }
        let title = main_title
            .or(book.title.as_deref())
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(EpubError::IncompleteMetadata { field: "title" })?
            .to_string();
        let subtitle = subtitle
            .or(book.subtitle.as_deref())
            .filter(|s| !s.trim().is_empty());

        let mut markup = String::from("<div class=\"wb-tp\">\n");
        if !book.authors.is_empty() {
            markup.push_str(&format!(
                "<div class=\"wb-tp-authors\">{}</div>\n",
                xml_escape(&join_names(&book.authors))
            ));
        }
        markup.push_str(&format!(
            "<div class=\"wb-tp-title\">{}</div>\n",
            xml_escape(&title)
        ));
        if let Some(sub) = subtitle {
            markup.push_str(&format!(
                "<div class=\"wb-tp-sub\">{}</div>\n",
                xml_escape(sub)
            ));
        }
        markup.push_str("</div>");

        let mut page = Chapter::new(0, vec![Block::RawBlock(markup)]);
        page.nav_label = Some("Title Page".to_string());
        book.chapters.insert(0, page);
        book.has_titlepage = true;
        Ok(self)
    }

    /// Add a page holding only a large heading, e.g. to open a part of the book. The
    /// navigation label defaults to the heading.
    pub fn add_heading_page(
        &mut self,
        heading: &str,
        subtitle: Option<&str>,
        nav_label: Option<&str>,
    ) -> Result<&mut Self, EpubError> {
        let index = self.body_chapters() as u32 + 1;
        let mut blocks = vec![Block::Heading {
            level: (self.depth + 1).min(6) as u8,
            class: Some("wb-tp-title".to_string()),
            content: vec![Inline::Text(heading.trim().to_string())],
        }];
        if let Some(sub) = subtitle.filter(|s| !s.trim().is_empty()) {
            blocks.push(Block::Paragraph {
                class: Some("wb-tp-sub".to_string()),
                content: vec![Inline::Text(sub.trim().to_string())],
            });
        }
        let mut page = Chapter::new(index, blocks);
        page.nav_label = nav_label.map(String::from);
        self.add_chapter(page)
    }

    pub fn add_chapter(&mut self, mut chapter: Chapter) -> Result<&mut Self, EpubError> {
        chapter.nav_depth = self.depth;
        self.open()?.chapters.push(chapter);
        Ok(self)
    }

    /// Nest the chapters added from now on under the last one added, typically a heading
    /// page. Calls nest; close each level with [EpubBuilder::end_subsections].
    pub fn begin_subsections(&mut self) -> Result<&mut Self, EpubError> {
        self.open()?;
        self.depth += 1;
        Ok(self)
    }

    pub fn end_subsections(&mut self) -> Result<&mut Self, EpubError> {
        self.open()?;
        if self.depth == 0 {
            return Err(EpubError::UnbalancedSections);
        }
        self.depth -= 1;
        Ok(self)
    }

    /// Register `data` as a package resource at `name` (relative to the content directory).
    /// Reading-order files enter the spine after the chapters added so far.
    pub fn add_file(
        &mut self,
        name: &str,
        data: impl Into<Vec<u8>>,
        in_spine: bool,
    ) -> Result<&mut Self, EpubError> {
        let name = normalize_resource_name(name)?;
        let media_type = media_type_for(&name).ok_or_else(|| EpubError::UnknownMediaType {
            name: name.clone(),
        })?;
        let position = self.body_chapters();
        let book = self.open()?;
        let taken = write::is_reserved(&name)
            || book
                .auxiliary
                .iter()
                .any(|f| f.name.eq_ignore_ascii_case(&name));
        if taken {
            return Err(EpubError::DuplicateResource { name });
        }
        tracing::debug!(name = %name, media_type, in_spine, position, "Added file");
        book.auxiliary.push(AuxFile {
            name,
            media_type,
            data: data.into(),
            in_spine,
            position,
        });
        Ok(self)
    }

    /// Read a file from disk and register it under `name`, or its file name when `None`.
    pub fn insert_file(
        &mut self,
        path: &Path,
        name: Option<&str>,
        in_spine: bool,
    ) -> Result<&mut Self, EpubError> {
        if self.sealed {
            return Err(EpubError::AlreadyFinalized);
        }
        let name = match name {
            Some(n) => n.to_string(),
            None => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .ok_or_else(|| EpubError::InvalidResourceName {
                    name: path.display().to_string(),
                })?,
        };
        let data = std::fs::read(path).map_err(|e| EpubError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        self.add_file(&name, data, in_spine)
    }

    fn body_chapters(&self) -> usize {
        self.book.chapters.len() - usize::from(self.book.has_titlepage)
    }

    /// Identifier the package will carry: the one set, or one derived from the title.
    pub fn identifier(&self) -> Option<String> {
        self.book
            .identifier
            .clone()
            .or_else(|| self.book.title.as_deref().map(slug).filter(|s| !s.is_empty()))
    }

    /// Validate and write the package. Validation failures leave the builder open; once
    /// writing starts the builder is sealed, whether or not writing succeeds.
    pub fn finalize(&mut self) -> Result<Package, EpubError> {
        if self.sealed {
            return Err(EpubError::AlreadyFinalized);
        }
        let book = &self.book;
        if book.title.as_deref().map_or(true, |t| t.trim().is_empty()) {
            return Err(EpubError::IncompleteMetadata { field: "title" });
        }
        if book.language.is_none() {
            return Err(EpubError::IncompleteMetadata { field: "language" });
        }
        let has_spine_file = book.auxiliary.iter().any(|f| f.in_spine);
        if self.body_chapters() == 0 && !has_spine_file {
            return Err(EpubError::NoContent);
        }
        let identifier = self.identifier().ok_or(EpubError::IncompleteMetadata {
            field: "identifier",
        })?;
        if book.identifier.is_none() {
            tracing::info!(identifier = %identifier, "No identifier set; derived one from the title");
        }

        self.sealed = true;
        write::write_package(
            &self.path,
            &self.book,
            &identifier,
            self.version,
            self.include_ncx,
        )
    }
}

/// Lower-case, whitespace runs to `-`, periods removed: "Der Prozess" becomes "der-prozess".
pub fn slug(title: &str) -> String {
    title
        .split_whitespace()
        .map(|w| w.replace('.', "").to_lowercase())
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

/// "A", "A and B", "A, B, and C".
fn join_names(authors: &[Author]) -> String {
    let names: Vec<&str> = authors.iter().map(|a| a.name.as_str()).collect();
    match names.as_slice() {
        [] => String::new(),
        [one] => (*one).to_string(),
        [a, b] => format!("{} and {}", a, b),
        [rest @ .., last] => format!("{}, and {}", rest.join(", "), last),
    }
}

fn is_valid_date(date: &str) -> bool {
    let parts: Vec<&str> = date.split('-').collect();
    let number = |s: &str, len: usize| -> Option<u32> {
        if s.len() == len && s.bytes().all(|b| b.is_ascii_digit()) {
            s.parse().ok()
        } else {
            None
        }
    };
    match parts.as_slice() {
        [y] => number(y, 4).is_some(),
        [y, m] => matches!((number(y, 4), number(m, 2)), (Some(_), Some(m)) if (1..=12).contains(&m)),
        [y, m, d] => match (number(y, 4), number(m, 2), number(d, 2)) {
            (Some(y), Some(m), Some(d)) => {
                chrono::NaiveDate::from_ymd_opt(y as i32, m, d).is_some()
            }
            _ => false,
        },
        _ => false,
    }
}

/// Primary subtag of 2-3 letters, then alphanumeric subtags of up to 8 characters.
fn is_language_tag(tag: &str) -> bool {
    let mut parts = tag.split('-');
    let primary = parts.next().unwrap_or("");
    (2..=3).contains(&primary.len())
        && primary.bytes().all(|b| b.is_ascii_alphabetic())
        && parts.all(|p| (1..=8).contains(&p.len()) && p.bytes().all(|b| b.is_ascii_alphanumeric()))
}

/// Resource names are relative `/`-separated paths without `.` or `..` segments.
fn normalize_resource_name(name: &str) -> Result<String, EpubError> {
    let normalized = name.trim().replace('\\', "/");
    let valid = !normalized.is_empty()
        && !normalized.starts_with('/')
        && normalized
            .split('/')
            .all(|seg| !seg.is_empty() && seg != "." && seg != "..");
    if valid {
        Ok(normalized)
    } else {
        Err(EpubError::InvalidResourceName {
            name: name.to_string(),
        })
    }
}

/// Characters allowed by XML 1.0. Tab, newline and carriage return are the only C0 controls.
pub(crate) fn is_xml_char(c: char) -> bool {
    !matches!(
        c,
        '\u{0}'..='\u{8}' | '\u{b}' | '\u{c}' | '\u{e}'..='\u{1f}' | '\u{fffe}' | '\u{ffff}'
    )
}

/// Escape markup characters and drop characters XML cannot carry.
pub(crate) fn xml_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c if is_xml_char(c) => out.push(c),
            _ => {}
        }
    }
    out
}
