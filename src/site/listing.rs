//! Generated HTML index for directories without a default document.

use std::path::Path;
use std::time::SystemTime;

use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use tokio::io::AsyncWrite;
use tracing::debug;

use crate::http::headers::HeaderMap;
use crate::http::pages::escape_html;
use crate::http::response::StatusCode;
use crate::http::writer::ResponseWriter;

/// Bytes escaped when an entry name becomes a relative link.
const SEGMENT_ESCAPES: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'?')
    .add(b'<')
    .add(b'>');

/// One row of a listing.
#[derive(Debug, Clone)]
pub struct ListingEntry {
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
    pub modified: Option<SystemTime>,
}

/// Reads the entries of `dir`, directories first, each group sorted by name.
///
/// Unreadable entries are skipped; an unreadable directory lists as empty.
pub async fn read_entries(dir: &Path) -> Vec<ListingEntry> {
    let mut entries = Vec::new();

    let mut reader = match tokio::fs::read_dir(dir).await {
        Ok(reader) => reader,
        Err(e) => {
            debug!(dir = %dir.display(), error = %e, "Cannot read directory");
            return entries;
        }
    };

    while let Ok(Some(entry)) = reader.next_entry().await {
        let Ok(meta) = entry.metadata().await else {
            continue;
        };
        entries.push(ListingEntry {
            name: entry.file_name().to_string_lossy().into_owned(),
            is_dir: meta.is_dir(),
            size: meta.len(),
            modified: meta.modified().ok(),
        });
    }

    entries.sort_by(|a, b| b.is_dir.cmp(&a.is_dir).then_with(|| a.name.cmp(&b.name)));
    entries
}

/// Renders the listing page for the URL `path` (ending in `/`).
pub fn render_listing(path: &str, parent: Option<&str>, entries: &[ListingEntry]) -> String {
    let title = escape_html(path);
    let mut page = format!(
        "<html>\r\n<head>\r\n<title>Directory Listing -- {title}</title>\r\n</head>\r\n\
         <body bgcolor=\"white\">\r\n\
         <h2> <i>Directory Listing -- {title}</i> </h2>\r\n\
         <hr width=100% size=1 color=silver>\r\n<pre>\r\n"
    );

    if let Some(parent) = parent {
        let href = if parent.ends_with('/') {
            parent.to_string()
        } else {
            format!("{parent}/")
        };
        page.push_str(&format!(
            "<a href=\"{}\">[To Parent Directory]</a>\r\n\r\n",
            escape_html(&href)
        ));
    }

    for entry in entries {
        let modified = entry
            .modified
            .map(httpdate::fmt_http_date)
            .unwrap_or_default();
        let size = if entry.is_dir {
            "&lt;dir&gt;".to_string()
        } else {
            entry.size.to_string()
        };
        let slash = if entry.is_dir { "/" } else { "" };
        let encoded = utf8_percent_encode(&entry.name, SEGMENT_ESCAPES).to_string();
        let href = escape_html(&encoded);
        let name = escape_html(&entry.name);

        page.push_str(&format!(
            "{modified:>29} {size:>12} <a href=\"{href}{slash}\">{name}</a>\r\n"
        ));
    }

    page.push_str("</pre>\r\n<hr width=100% size=1 color=silver>\r\n</body>\r\n</html>\r\n");
    page
}

/// Writes the listing for `dir` as a complete response and closes.
pub async fn serve_listing<W>(
    resp: &mut ResponseWriter<'_, W>,
    path: &str,
    parent: Option<&str>,
    dir: &Path,
) -> bool
where
    W: AsyncWrite + Unpin + Send,
{
    let entries = read_entries(dir).await;
    let page = render_listing(path, parent, &entries);

    let mut extra = HeaderMap::new();
    extra.insert("Content-Type", "text/html; charset=utf-8");
    resp.write_full(StatusCode::Ok, Some(&extra), page, false).await
}
