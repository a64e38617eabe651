//! The seam between connection handling and request processing.

use std::future::Future;
use std::sync::Arc;

use tokio::io::AsyncWrite;
use tokio::sync::OnceCell;
use tracing::info;

use crate::config::Config;
use crate::http::request::Request;
use crate::http::writer::ResponseWriter;

/// Processes one framed request.
///
/// The handler answers through the [`ResponseWriter`], either by buffering
/// (`set_status`, `append_header`, `send_body`) or by writing directly.
/// Whatever is still buffered when it returns is flushed by the connection.
/// Returning an error produces a 500 if nothing has been sent yet.
pub trait Handler: Send + Sync + 'static {
    fn handle<W>(
        &self,
        req: &Request,
        resp: &mut ResponseWriter<'_, W>,
    ) -> impl Future<Output = anyhow::Result<()>> + Send
    where
        W: AsyncWrite + Unpin + Send;
}

type Factory<H> = Box<dyn Fn(&Config) -> anyhow::Result<H> + Send + Sync>;

/// Lazily builds the shared handler on first use.
///
/// Construction happens at most once; concurrent first requests wait for
/// the same initialisation. A failed construction is not cached, so the
/// next request tries again.
pub struct HandlerSlot<H> {
    cell: OnceCell<Arc<H>>,
    factory: Factory<H>,
    config: Arc<Config>,
}

impl<H: Handler> HandlerSlot<H> {
    pub fn new<F>(config: Arc<Config>, factory: F) -> Self
    where
        F: Fn(&Config) -> anyhow::Result<H> + Send + Sync + 'static,
    {
        Self {
            cell: OnceCell::new(),
            factory: Box::new(factory),
            config,
        }
    }

    pub async fn get(&self) -> anyhow::Result<Arc<H>> {
        self.cell
            .get_or_try_init(|| async {
                let handler = (self.factory)(&self.config)?;
                info!("Request handler initialised");
                Ok::<_, anyhow::Error>(Arc::new(handler))
            })
            .await
            .cloned()
    }

    pub fn is_initialized(&self) -> bool {
        self.cell.initialized()
    }
}
