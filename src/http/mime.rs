//! Content types for the static file allow-list.
//!
//! Files whose extension is not listed here are never served.

use std::path::Path;

/// Returns the content type for `path`, or `None` when the extension is
/// not on the allow-list.
///
/// # Example
///
/// ```
/// # use wicket::http::mime::content_type_for;
/// # use std::path::Path;
/// assert_eq!(content_type_for(Path::new("site/INDEX.HTM")), Some("text/html"));
/// assert_eq!(content_type_for(Path::new("app.config")), None);
/// ```
pub fn content_type_for(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();

    let content_type = match ext.as_str() {
        "htm" | "html" => "text/html",
        "css" => "text/css",
        "js" => "application/javascript",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        "ico" => "image/x-icon",
        "jpe" | "jpeg" | "jpg" => "image/jpeg",
        _ => return None,
    };

    Some(content_type)
}
