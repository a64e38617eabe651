//! Fixed HTML bodies for error, redirect and failure responses.

use std::borrow::Cow;

use crate::http::response::StatusCode;
use crate::http::writer::ServerInfo;

const STYLE: &str = "body {font-family:\"Verdana\";font-weight:normal;font-size: .7em;color:black;} \
h1 {font-family:\"Verdana\";font-weight:normal;font-size:18pt;color:red } \
h2 {font-family:\"Verdana\";font-weight:normal;font-size:14pt;color:maroon } \
pre {font-family:\"Lucida Console\";font-size: .9em}";

/// Error page for `status`.
///
/// `diagnostic`, when given, is embedded as an HTML comment only; it never
/// shows up as page content.
pub fn error_page(status: StatusCode, info: &ServerInfo, diagnostic: Option<&str>) -> String {
    let headline = format!(
        "HTTP Error {} - {}.",
        status.as_u16(),
        status.reason_phrase()
    );
    let mut page = frame(status.reason_phrase(), info, &headline, "");

    if let Some(diagnostic) = diagnostic.filter(|d| !d.trim().is_empty()) {
        page.push_str("\r\n<!--\r\n");
        page.push_str(&diagnostic.replace("--", "- -"));
        page.push_str("\r\n-->");
    }

    page
}

/// Body sent with a 500 when the request handler fails.
pub fn unhandled_page(info: &ServerInfo) -> String {
    frame(
        StatusCode::InternalServerError.reason_phrase(),
        info,
        "An unhandled exception occurred while processing the request.",
        "<b>Description:</b> The request could not be completed. \
         Details have been written to the server log.<br><br>",
    )
}

/// Body sent with a 302 redirect.
pub fn moved_page(location: &str) -> String {
    format!(
        "<html><head><title>Object moved</title></head><body>\r\n\
         <h2>Object moved to <a href='{}'>here</a>.</h2>\r\n\
         </body></html>\r\n",
        escape_html(location)
    )
}

fn frame(title: &str, info: &ServerInfo, headline: &str, detail: &str) -> String {
    format!(
        "<html>\r\n\
         <head>\r\n\
         <title>{title}</title>\r\n\
         <style>{STYLE}</style>\r\n\
         </head>\r\n\
         <body bgcolor=\"white\">\r\n\
         <span><h1>Server Error in '{vpath}' Application.<hr width=100% size=1 color=silver></h1>\r\n\
         <h2> <i>{headline}</i> </h2></span>\r\n\
         {detail}\r\n\
         <hr width=100% size=1 color=silver>\r\n\
         <b>Version Information:</b>&nbsp;{product}\r\n\
         </body>\r\n\
         </html>\r\n",
        title = escape_html(title),
        vpath = escape_html(&info.virtual_path),
        headline = escape_html(headline),
        product = escape_html(&info.product()),
    )
}

pub fn escape_html(text: &str) -> Cow<'_, str> {
    if !text.contains(['&', '<', '>', '"', '\'']) {
        return Cow::Borrowed(text);
    }

    let mut out = String::with_capacity(text.len() + 8);
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    Cow::Owned(out)
}
