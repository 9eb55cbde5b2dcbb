//! Media types of package resources, inferred from file extensions.

pub const XHTML: &str = "application/xhtml+xml";
pub const CSS: &str = "text/css";
pub const NCX: &str = "application/x-dtbncx+xml";

/// Media type for `name`, or `None` when the extension is not one a reading system accepts.
pub fn media_type_for(name: &str) -> Option<&'static str> {
    let ext = name.rsplit_once('.')?.1.to_ascii_lowercase();
    let media_type = match ext.as_str() {
        "xhtml" | "html" | "htm" => XHTML,
        "css" => CSS,
        "png" => "image/png",
        "gif" => "image/gif",
        "jpg" | "jpeg" => "image/jpeg",
        "svg" => "image/svg+xml",
        "ncx" => NCX,
        "ttf" => "font/ttf",
        "otf" => "font/otf",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        _ => return None,
    };
    Some(media_type)
}
