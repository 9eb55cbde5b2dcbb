//! Package serialization: lays out the accumulated [Book] and writes the zip container.

use super::media;
use super::{xml_escape, EpubError, EpubVersion, ManifestItem, Package};
use crate::model::{Block, Book, Chapter, Inline};
use std::io::{Seek, Write};
use std::path::{Path, PathBuf};
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

const MIMETYPE: &[u8] = b"application/epub+zip";
const OEBPS_PREFIX: &str = "OEBPS/";
const CONTAINER_XML: &[u8] = b"<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<container version=\"1.0\" xmlns=\"urn:oasis:names:tc:opendocument:xmlns:container\">\n  <rootfiles>\n    <rootfile full-path=\"OEBPS/content.opf\" media-type=\"application/oebps-package+xml\"/>\n  </rootfiles>\n</container>\n";

/// Names the writer generates inside `OEBPS/`. Auxiliary files may not use them.
pub(crate) const RESERVED_NAMES: &[&str] = &[
    "content.opf",
    "nav.xhtml",
    "toc.ncx",
    "style.css",
    "titlepage.xhtml",
];

/// Generated chapter documents are `chapter-001.xhtml`, `chapter-002.xhtml`, ...
pub(crate) fn is_reserved(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    RESERVED_NAMES.contains(&lower.as_str())
        || (lower.starts_with("chapter-") && lower.ends_with(".xhtml"))
}

/// A generated content document and the chapter it renders.
struct Doc<'b> {
    id: String,
    href: String,
    label: String,
    depth: usize,
    chapter: &'b Chapter,
}

/// A navigation entry: an index into [Layout::docs] and the entries nested under it.
struct NavEntry {
    doc: usize,
    children: Vec<NavEntry>,
}

impl NavEntry {
    fn depth(&self) -> usize {
        1 + self.children.iter().map(NavEntry::depth).max().unwrap_or(0)
    }
}

/// Nest each document under the last one before it at a lower depth. A depth with no such
/// parent is clamped.
fn nav_tree(docs: &[Doc<'_>]) -> Vec<NavEntry> {
    let mut roots: Vec<NavEntry> = Vec::new();
    for (i, doc) in docs.iter().enumerate() {
        let mut level = &mut roots;
        for _ in 0..doc.depth {
            if level.is_empty() {
                break;
            }
            let last = level.len() - 1;
            level = &mut level[last].children;
        }
        level.push(NavEntry {
            doc: i,
            children: Vec::new(),
        });
    }
    roots
}

/// Everything the OPF, the navigation documents and the archive need, computed once.
struct Layout<'b> {
    docs: Vec<Doc<'b>>,
    manifest: Vec<ManifestItem>,
    spine: Vec<String>,
    with_ncx: bool,
}

impl<'b> Layout<'b> {
    fn new(book: &'b Book, version: EpubVersion, include_ncx: bool) -> Self {
        let with_ncx = include_ncx || version == EpubVersion::Epub2;
        let mut manifest = Vec::new();
        if version == EpubVersion::Epub3 {
            manifest.push(ManifestItem::new("nav", "nav.xhtml", media::XHTML).with_properties("nav"));
        }
        if with_ncx {
            manifest.push(ManifestItem::new("ncx", "toc.ncx", media::NCX));
        }
        manifest.push(ManifestItem::new("style", "style.css", media::CSS));

        let (front, body) = match book.chapters.split_first() {
            Some((first, rest)) if book.has_titlepage => (Some(first), rest),
            _ => (None, book.chapters.as_slice()),
        };
        let mut docs = Vec::with_capacity(book.chapters.len());
        if let Some(chapter) = front {
            docs.push(Doc {
                id: "titlepage".to_string(),
                href: "titlepage.xhtml".to_string(),
                label: chapter.label(0),
                depth: chapter.nav_depth,
                chapter,
            });
        }
        for (i, chapter) in body.iter().enumerate() {
            docs.push(Doc {
                id: format!("chapter-{:03}", i + 1),
                href: format!("chapter-{:03}.xhtml", i + 1),
                label: chapter.label(i + 1),
                depth: chapter.nav_depth,
                chapter,
            });
        }
        for doc in &docs {
            manifest.push(ManifestItem::new(&doc.id, &doc.href, media::XHTML));
        }
        for (i, file) in book.auxiliary.iter().enumerate() {
            manifest.push(ManifestItem::new(
                &aux_id(i),
                &file.name,
                file.media_type,
            ));
        }

        // Reading order: title page, then body chapters with reading-order files at the
        // position they were registered at.
        let mut spine = Vec::new();
        let body_docs = if front.is_some() {
            spine.push("titlepage".to_string());
            &docs[1..]
        } else {
            &docs[..]
        };
        let aux_before = |pos: usize, spine: &mut Vec<String>| {
            for (i, file) in book.auxiliary.iter().enumerate() {
                if file.in_spine && file.position == pos {
                    spine.push(aux_id(i));
                }
            }
        };
        for (pos, doc) in body_docs.iter().enumerate() {
            aux_before(pos, &mut spine);
            spine.push(doc.id.clone());
        }
        // Files registered after the last chapter (or beyond it).
        for (i, file) in book.auxiliary.iter().enumerate() {
            if file.in_spine && file.position >= body_docs.len() {
                spine.push(aux_id(i));
            }
        }

        Self {
            docs,
            manifest,
            spine,
            with_ncx,
        }
    }
}

fn aux_id(i: usize) -> String {
    format!("file-{}", i + 1)
}

/// Serialize `book` into a temporary file beside `path`, then move it into place. On error
/// the temporary file is removed and `path` is left untouched.
pub(crate) fn write_package(
    path: &Path,
    book: &Book,
    identifier: &str,
    version: EpubVersion,
    include_ncx: bool,
) -> Result<Package, EpubError> {
    let layout = Layout::new(book, version, include_ncx);
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let tmp = tempfile::Builder::new()
        .prefix(".webbook-")
        .suffix(".part")
        .tempfile_in(&dir)
        .map_err(|e| EpubError::CreateFile {
            path: path.to_path_buf(),
            source: e,
        })?;

    let mut zip = ZipWriter::new(tmp);
    write_entries(&mut zip, book, &layout, identifier, version)?;
    let tmp = zip.finish()?;
    // Temp files are created owner-only; the book is an ordinary document.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tmp.as_file()
            .set_permissions(std::fs::Permissions::from_mode(0o644))
            .map_err(|e| EpubError::CreateFile {
                path: path.to_path_buf(),
                source: e,
            })?;
    }
    tmp.persist(path).map_err(|e| EpubError::CreateFile {
        path: path.to_path_buf(),
        source: e.error,
    })?;
    tracing::info!(
        path = %path.display(),
        documents = layout.docs.len(),
        files = book.auxiliary.len(),
        "Wrote EPUB"
    );

    Ok(Package {
        path: path.to_path_buf(),
        identifier: identifier.to_string(),
        version,
        manifest: layout.manifest,
        spine: layout.spine,
    })
}

fn write_entries(
    zip: &mut ZipWriter<impl Write + Seek>,
    book: &Book,
    layout: &Layout<'_>,
    identifier: &str,
    version: EpubVersion,
) -> Result<(), EpubError> {
    let options_stored = SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Stored)
        .unix_permissions(0o644);
    let options_deflate = SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated)
        .unix_permissions(0o644);

    // Mimetype first, uncompressed
    zip.start_file("mimetype", options_stored)?;
    zip.write_all(MIMETYPE)?;

    zip.start_file("META-INF/container.xml", options_deflate)?;
    zip.write_all(CONTAINER_XML)?;

    let opf = opf(book, layout, identifier, version);
    put(zip, "content.opf", opf.as_bytes(), options_deflate)?;
    if version == EpubVersion::Epub3 {
        put(zip, "nav.xhtml", nav_xhtml(book, layout).as_bytes(), options_deflate)?;
    }
    if layout.with_ncx {
        let ncx = ncx(book, layout, identifier);
        put(zip, "toc.ncx", ncx.as_bytes(), options_deflate)?;
    }
    for doc in &layout.docs {
        let html = content_document(book, doc, version);
        put(zip, &doc.href, html.as_bytes(), options_deflate)?;
    }
    put(zip, "style.css", book.stylesheet.as_bytes(), options_deflate)?;
    for file in &book.auxiliary {
        put(zip, &file.name, &file.data, options_deflate)?;
    }
    Ok(())
}

fn put(
    zip: &mut ZipWriter<impl Write + Seek>,
    name: &str,
    data: &[u8],
    options: SimpleFileOptions,
) -> Result<(), EpubError> {
    zip.start_file(format!("{}{}", OEBPS_PREFIX, name), options)?;
    zip.write_all(data)?;
    Ok(())
}

fn language(book: &Book) -> &str {
    book.language.as_deref().unwrap_or("en")
}

fn title(book: &Book) -> &str {
    book.title.as_deref().unwrap_or("")
}

fn opf(book: &Book, layout: &Layout<'_>, identifier: &str, version: EpubVersion) -> String {
    let mut meta = String::new();
    meta.push_str(&format!(
        "    <dc:identifier id=\"book-id\">{}</dc:identifier>\n",
        xml_escape(identifier)
    ));
    match version {
        EpubVersion::Epub3 => {
            meta.push_str(&format!(
                "    <dc:title id=\"title\">{}</dc:title>\n",
                xml_escape(title(book))
            ));
            if let Some(sub) = &book.subtitle {
                meta.push_str("    <meta refines=\"#title\" property=\"title-type\">main</meta>\n");
                meta.push_str(&format!(
                    "    <dc:title id=\"subtitle\">{}</dc:title>\n",
                    xml_escape(sub)
                ));
                meta.push_str(
                    "    <meta refines=\"#subtitle\" property=\"title-type\">subtitle</meta>\n",
                );
            }
            for (i, author) in book.authors.iter().enumerate() {
                let id = format!("creator{}", i + 1);
                meta.push_str(&format!(
                    "    <dc:creator id=\"{}\">{}</dc:creator>\n",
                    id,
                    xml_escape(&author.name)
                ));
                meta.push_str(&format!(
                    "    <meta refines=\"#{}\" property=\"file-as\">{}</meta>\n",
                    id,
                    xml_escape(&author.file_as)
                ));
                meta.push_str(&format!(
                    "    <meta refines=\"#{}\" property=\"role\" scheme=\"marc:relators\">{}</meta>\n",
                    id,
                    xml_escape(&author.role)
                ));
            }
        }
        EpubVersion::Epub2 => {
            meta.push_str(&format!(
                "    <dc:title>{}</dc:title>\n",
                xml_escape(title(book))
            ));
            for author in &book.authors {
                meta.push_str(&format!(
                    "    <dc:creator opf:file-as=\"{}\" opf:role=\"{}\">{}</dc:creator>\n",
                    xml_escape(&author.file_as),
                    xml_escape(&author.role),
                    xml_escape(&author.name)
                ));
            }
        }
    }
    meta.push_str(&format!(
        "    <dc:language>{}</dc:language>\n",
        xml_escape(language(book))
    ));
    if let Some(date) = &book.date {
        meta.push_str(&format!("    <dc:date>{}</dc:date>\n", xml_escape(date)));
    }
    if let Some(publisher) = &book.publisher {
        meta.push_str(&format!(
            "    <dc:publisher>{}</dc:publisher>\n",
            xml_escape(publisher)
        ));
    }
    if let Some(rights) = &book.rights {
        meta.push_str(&format!("    <dc:rights>{}</dc:rights>\n", xml_escape(rights)));
    }
    if version == EpubVersion::Epub3 {
        meta.push_str(&format!(
            "    <meta property=\"dcterms:modified\">{}</meta>\n",
            chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ")
        ));
    }

    let mut manifest = String::new();
    for item in &layout.manifest {
        let properties = item
            .properties
            .map(|p| format!(" properties=\"{}\"", p))
            .unwrap_or_default();
        manifest.push_str(&format!(
            "    <item id=\"{}\" href=\"{}\" media-type=\"{}\"{}/>\n",
            item.id,
            xml_escape(&item.href),
            item.media_type,
            properties
        ));
    }

    let mut spine = String::new();
    for idref in &layout.spine {
        spine.push_str(&format!("    <itemref idref=\"{}\"/>\n", idref));
    }
    let spine_open = if layout.with_ncx {
        "<spine toc=\"ncx\">"
    } else {
        "<spine>"
    };

    let guide = if book.has_titlepage {
        "  <guide>\n    <reference type=\"title-page\" title=\"Title Page\" href=\"titlepage.xhtml\"/>\n  </guide>\n"
    } else {
        ""
    };

    let (version_attr, opf_ns) = match version {
        EpubVersion::Epub3 => ("3.0", ""),
        EpubVersion::Epub2 => ("2.0", " xmlns:opf=\"http://www.idpf.org/2007/opf\""),
    };

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" unique-identifier="book-id" version="{version_attr}">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/"{opf_ns}>
{meta}  </metadata>
  <manifest>
{manifest}  </manifest>
  {spine_open}
{spine}  </spine>
{guide}</package>
"#
    )
}

fn nav_xhtml(book: &Book, layout: &Layout<'_>) -> String {
    let mut links = String::new();
    nav_items(&nav_tree(&layout.docs), &layout.docs, 3, &mut links);
    let lang = xml_escape(language(book));
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops" xml:lang="{lang}" lang="{lang}">
<head>
  <meta charset="UTF-8"/>
  <title>{title}</title>
</head>
<body>
  <nav epub:type="toc" id="toc">
    <h1>Contents</h1>
    <ol>
{links}    </ol>
  </nav>
</body>
</html>
"#,
        title = xml_escape(title(book))
    )
}

fn nav_items(entries: &[NavEntry], docs: &[Doc<'_>], indent: usize, out: &mut String) {
    let pad = "  ".repeat(indent);
    for entry in entries {
        let doc = &docs[entry.doc];
        out.push_str(&format!(
            "{pad}<li><a href=\"{}\">{}</a>",
            doc.href,
            xml_escape(&doc.label)
        ));
        if !entry.children.is_empty() {
            out.push_str(&format!("\n{pad}  <ol>\n"));
            nav_items(&entry.children, docs, indent + 2, out);
            out.push_str(&format!("{pad}  </ol>\n{pad}"));
        }
        out.push_str("</li>\n");
    }
}

fn nav_points(entries: &[NavEntry], docs: &[Doc<'_>], indent: usize, out: &mut String) {
    let pad = "  ".repeat(indent);
    for entry in entries {
        let doc = &docs[entry.doc];
        out.push_str(&format!(
            "{pad}<navPoint id=\"navpoint-{n}\" playOrder=\"{n}\">\n\
             {pad}  <navLabel><text>{label}</text></navLabel>\n\
             {pad}  <content src=\"{href}\"/>\n",
            n = entry.doc + 1,
            label = xml_escape(&doc.label),
            href = doc.href
        ));
        nav_points(&entry.children, docs, indent + 1, out);
        out.push_str(&format!("{pad}</navPoint>\n"));
    }
}

fn ncx(book: &Book, layout: &Layout<'_>, identifier: &str) -> String {
    let mut authors = String::new();
    for author in &book.authors {
        authors.push_str(&format!(
            "  <docAuthor>\n    <text>{}</text>\n  </docAuthor>\n",
            xml_escape(&author.name)
        ));
    }
    let tree = nav_tree(&layout.docs);
    let depth = tree.iter().map(NavEntry::depth).max().unwrap_or(1);
    let mut points = String::new();
    nav_points(&tree, &layout.docs, 2, &mut points);
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<ncx xmlns="http://www.daisy.org/z3986/2005/ncx/" version="2005-1" xml:lang="{lang}">
  <head>
    <meta name="dtb:uid" content="{uid}"/>
    <meta name="dtb:depth" content="{depth}"/>
    <meta name="dtb:totalPageCount" content="0"/>
    <meta name="dtb:maxPageNumber" content="0"/>
  </head>
  <docTitle>
    <text>{title}</text>
  </docTitle>
{authors}  <navMap>
{points}  </navMap>
</ncx>
"#,
        lang = xml_escape(language(book)),
        uid = xml_escape(identifier),
        title = xml_escape(title(book)),
    )
}

fn content_document(book: &Book, doc: &Doc<'_>, version: EpubVersion) -> String {
    let mut body = String::new();
    for block in &doc.chapter.blocks {
        render_block(block, &mut body);
    }
    if body.is_empty() {
        body.push_str("<div></div>\n");
    }
    let lang = xml_escape(language(book));
    let title = xml_escape(&doc.label);
    match version {
        EpubVersion::Epub3 => format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops" xml:lang="{lang}" lang="{lang}">
<head>
  <meta charset="UTF-8"/>
  <title>{title}</title>
  <link href="style.css" rel="stylesheet" type="text/css"/>
</head>
<body>
{body}</body>
</html>
"#
        ),
        EpubVersion::Epub2 => format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE html PUBLIC "-//W3C//DTD XHTML 1.1//EN" "http://www.w3.org/TR/xhtml11/DTD/xhtml11.dtd">
<html xmlns="http://www.w3.org/1999/xhtml" xml:lang="{lang}">
<head>
  <meta http-equiv="Content-Type" content="application/xhtml+xml; charset=utf-8"/>
  <title>{title}</title>
  <link href="style.css" rel="stylesheet" type="text/css"/>
</head>
<body>
{body}</body>
</html>
"#
        ),
    }
}

fn render_block(block: &Block, out: &mut String) {
    match block {
        Block::Heading {
            level,
            class,
            content,
        } => {
            out.push_str(&format!("<h{}{}>", level, class_attr(class)));
            render_inline(content, out);
            out.push_str(&format!("</h{}>\n", level));
        }
        Block::Paragraph { class, content } => {
            out.push_str(&format!("<p{}>", class_attr(class)));
            render_inline(content, out);
            out.push_str("</p>\n");
        }
        Block::RawBlock(markup) => {
            out.push_str(markup);
            out.push('\n');
        }
    }
}

fn class_attr(class: &Option<String>) -> String {
    match class {
        Some(c) => format!(" class=\"{}\"", xml_escape(c)),
        None => String::new(),
    }
}

fn render_inline(content: &[Inline], out: &mut String) {
    for item in content {
        match item {
            Inline::Text(t) => out.push_str(&xml_escape(t)),
            Inline::Emphasis(inner) => {
                out.push_str("<em>");
                render_inline(inner, out);
                out.push_str("</em>");
            }
            Inline::Strong(inner) => {
                out.push_str("<strong>");
                render_inline(inner, out);
                out.push_str("</strong>");
            }
            Inline::Styled { class, content } => {
                out.push_str(&format!("<span class=\"{}\">", xml_escape(class)));
                render_inline(content, out);
                out.push_str("</span>");
            }
            Inline::LineBreak => out.push_str("<br/>"),
        }
    }
}
