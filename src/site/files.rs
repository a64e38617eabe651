use tokio::io::AsyncWrite;
use tracing::debug;

use crate::config::Config;
use crate::http::pages;
use crate::http::request::{Method, Request};
use crate::http::response::StatusCode;
use crate::http::writer::ResponseWriter;
use crate::server::handler::Handler;
use crate::site::Site;

/// Serves files from the site root.
///
/// A missing file is answered with a buffered 404 so the connection can
/// still replace it with a directory listing.
#[derive(Debug, Clone)]
pub struct StaticFiles {
    site: Site,
}

impl StaticFiles {
    pub fn new(site: Site) -> Self {
        Self { site }
    }

    pub fn from_config(cfg: &Config) -> anyhow::Result<Self> {
        Ok(Self::new(Site::from_config(cfg)?))
    }

    pub fn site(&self) -> &Site {
        &self.site
    }
}

impl Handler for StaticFiles {
    async fn handle<W>(&self, req: &Request, resp: &mut ResponseWriter<'_, W>) -> anyhow::Result<()>
    where
        W: AsyncWrite + Unpin + Send,
    {
        if req.method != Method::GET {
            let page = pages::error_page(StatusCode::MethodNotAllowed, resp.info(), None);
            resp.set_status(StatusCode::MethodNotAllowed);
            resp.append_header("Allow", "GET");
            resp.append_header("Content-Type", "text/html; charset=utf-8");
            resp.send_body(page);
            return Ok(());
        }

        let path = self.site.map_path(req.file_path());
        let is_file = tokio::fs::metadata(&path)
            .await
            .is_ok_and(|meta| meta.is_file());

        if !is_file {
            debug!(path = %req.path, "No such file");
            let page = pages::error_page(StatusCode::NotFound, resp.info(), None);
            resp.set_status(StatusCode::NotFound);
            resp.append_header("Content-Type", "text/html; charset=utf-8");
            resp.send_body(page);
            return Ok(());
        }

        let keep_alive = resp.keep_alive();
        resp.write_from_file(&path, keep_alive).await;
        Ok(())
    }
}
