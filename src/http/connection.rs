use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, error, info, trace, warn};

use crate::config::Config;
use crate::http::headers::HeaderMap;
use crate::http::pages;
use crate::http::parser::{FrameState, RequestFramer, Verdict};
use crate::http::request::{Method, Request};
use crate::http::response::{Response, StatusCode};
use crate::http::writer::{ResponseWriter, ServerInfo};
use crate::server::handler::{Handler, HandlerSlot};
use crate::server::shutdown_signalled;
use crate::site::{DirectoryRoute, Site, listing};

/// Everything a connection needs that is shared across connections.
pub struct ConnectionContext<H> {
    pub config: Arc<Config>,
    pub info: ServerInfo,
    pub site: Site,
    pub handler: HandlerSlot<H>,
}

impl<H: Handler> ConnectionContext<H> {
    pub fn new<F>(config: Arc<Config>, factory: F) -> anyhow::Result<Self>
    where
        F: Fn(&Config) -> anyhow::Result<H> + Send + Sync + 'static,
    {
        Ok(Self {
            info: ServerInfo::from_config(&config),
            site: Site::from_config(&config)?,
            handler: HandlerSlot::new(Arc::clone(&config), factory),
            config,
        })
    }
}

pub enum ConnectionState {
    Reading,
    Dispatching(Box<Request>),
    Rejecting(StatusCode),
    Closed,
}

enum ReadOutcome {
    Request(Box<Request>),
    Reject(StatusCode),
    Closed,
}

/// One client connection, owned by exactly one task for its lifetime.
pub struct Connection<S, H> {
    stream: S,
    ctx: Arc<ConnectionContext<H>>,
    shutdown: watch::Receiver<bool>,
    remote_addr: Option<SocketAddr>,
    local_addr: Option<SocketAddr>,
    carry_over: Bytes,
    state: ConnectionState,
    requests_served: usize,
    closed: bool,
}

impl<S, H> Connection<S, H>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
    H: Handler,
{
    pub fn new(stream: S, ctx: Arc<ConnectionContext<H>>, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            stream,
            ctx,
            shutdown,
            remote_addr: None,
            local_addr: None,
            carry_over: Bytes::new(),
            state: ConnectionState::Reading,
            requests_served: 0,
            closed: false,
        }
    }

    pub fn with_addrs(mut self, remote: Option<SocketAddr>, local: Option<SocketAddr>) -> Self {
        self.remote_addr = remote;
        self.local_addr = local;
        self
    }

    pub fn requests_served(&self) -> usize {
        self.requests_served
    }

    pub async fn run(&mut self) -> anyhow::Result<()> {
        loop {
            match std::mem::replace(&mut self.state, ConnectionState::Closed) {
                ConnectionState::Reading => {
                    self.state = match self.read_request().await {
                        ReadOutcome::Request(req) => ConnectionState::Dispatching(req),
                        ReadOutcome::Reject(status) => ConnectionState::Rejecting(status),
                        ReadOutcome::Closed => ConnectionState::Closed,
                    };
                }

                ConnectionState::Dispatching(req) => {
                    let keep_alive = self.dispatch(*req).await;
                    self.requests_served += 1;

                    self.state = if keep_alive && !self.is_shutting_down() {
                        debug!(peer = ?self.remote_addr, "Keeping connection alive");
                        ConnectionState::Reading
                    } else {
                        ConnectionState::Closed
                    };
                }

                ConnectionState::Rejecting(status) => {
                    let mut resp = ResponseWriter::new(&mut self.stream, &self.ctx.info, false);
                    resp.write_error(status, None).await;
                    self.state = ConnectionState::Closed;
                }

                ConnectionState::Closed => {
                    self.close().await;
                    break;
                }
            }
        }

        Ok(())
    }

    /// Shuts the write side down. Safe to call more than once.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.stream.shutdown().await {
            trace!(error = %e, "Shutdown after close failed");
        }
    }

    fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    async fn read_request(&mut self) -> ReadOutcome {
        let limits = self.ctx.config.limits.clone();
        let carry_over = std::mem::take(&mut self.carry_over);
        let mut framer = RequestFramer::with_carry_over(limits.framer_limits(), carry_over);
        let mut verdict = framer.poll();
        let mut buf = vec![0u8; limits.read_buffer_bytes];
        let mut continue_sent = false;

        loop {
            match verdict {
                Verdict::Ready => {
                    return match framer.into_request(self.remote_addr, self.local_addr) {
                        Ok((req, rest)) => {
                            self.carry_over = rest;
                            ReadOutcome::Request(Box::new(req))
                        }
                        Err(e) => ReadOutcome::Reject(e.status()),
                    };
                }
                Verdict::Error(e) => {
                    warn!(error = %e, peer = ?self.remote_addr, "Rejecting request");
                    return ReadOutcome::Reject(e.status());
                }
                Verdict::NeedMoreData => {}
            }

            if framer.state() == FrameState::AwaitingBody && !continue_sent {
                continue_sent = true;
                let http11 = framer
                    .accumulator()
                    .head()
                    .is_some_and(|head| head.version == "HTTP/1.1");
                if http11 {
                    debug!(peer = ?self.remote_addr, "Sending 100 Continue");
                    let mut resp = ResponseWriter::new(&mut self.stream, &self.ctx.info, true);
                    if !resp.write_interim_continue().await {
                        return ReadOutcome::Closed;
                    }
                }
            }

            let read = if framer.has_data() {
                tokio::select! {
                    biased;
                    read = timeout(limits.body_idle_timeout(), self.stream.read(&mut buf)) => match read {
                        Ok(read) => read,
                        Err(_) => {
                            debug!(peer = ?self.remote_addr, "Client stalled mid-request");
                            return ReadOutcome::Reject(StatusCode::RequestTimeout);
                        }
                    },
                    _ = shutdown_signalled(&mut self.shutdown) => {
                        debug!(peer = ?self.remote_addr, "Dropping partial request on shutdown");
                        return ReadOutcome::Closed;
                    }
                }
            } else {
                match self.wait_first_byte(&mut buf).await {
                    Some(read) => read,
                    None => return ReadOutcome::Closed,
                }
            };

            let n = match read {
                Ok(0) => {
                    trace!(peer = ?self.remote_addr, "Client closed connection");
                    return ReadOutcome::Closed;
                }
                Ok(n) => n,
                Err(e) => {
                    debug!(error = %e, peer = ?self.remote_addr, "Read failed");
                    return ReadOutcome::Closed;
                }
            };

            trace!(bytes = n, peer = ?self.remote_addr, "Read request bytes");
            verdict = framer.feed(&buf[..n]);
        }
    }

    /// Waits for the first bytes of a request: a short poll, then a long
    /// wait. `None` means nothing arrived in time or the server is stopping.
    async fn wait_first_byte(&mut self, buf: &mut [u8]) -> Option<std::io::Result<usize>> {
        let limits = &self.ctx.config.limits;

        if let Ok(read) = timeout(limits.first_byte_poll(), self.stream.read(buf)).await {
            return Some(read);
        }
        if self.is_shutting_down() {
            return None;
        }

        trace!(peer = ?self.remote_addr, "No data yet, waiting longer");
        tokio::select! {
            read = timeout(limits.first_byte_timeout(), self.stream.read(buf)) => match read {
                Ok(read) => Some(read),
                Err(_) => {
                    debug!(peer = ?self.remote_addr, "Idle connection timed out");
                    None
                }
            },
            _ = shutdown_signalled(&mut self.shutdown) => None,
        }
    }

    /// Answers one request. Returns whether the connection may be reused.
    async fn dispatch(&mut self, mut req: Request) -> bool {
        let keep_alive = req.keep_alive() && !self.is_shutting_down();
        let ctx = Arc::clone(&self.ctx);
        let site = &ctx.site;
        let mut resp = ResponseWriter::new(&mut self.stream, &ctx.info, keep_alive);

        if !site.is_in_app(&req.path) {
            debug!(path = %req.path, "Outside virtual path");
            resp.write_error(StatusCode::NotFound, None).await;
            return false;
        }

        if site.requires_authentication() && req.header("Authorization").is_none() {
            let mut extra = html_headers();
            extra.insert(
                "WWW-Authenticate",
                format!("Basic realm=\"{}\"", site.virtual_path()),
            );
            let page = pages::error_page(StatusCode::Unauthorized, &ctx.info, None);
            resp.write_full(StatusCode::Unauthorized, Some(&extra), page, false)
                .await;
            return false;
        }

        let mut listing_dir = None;
        if req.method == Method::GET {
            match site.route_directory(&req).await {
                DirectoryRoute::Redirect(location) => {
                    let page = pages::moved_page(&format!("{}/", req.path));
                    resp.write_response(&Response::redirect(&location, page), false)
                        .await;
                    return false;
                }
                DirectoryRoute::DefaultDocument(path) => {
                    trace!(from = %req.path, to = %path, "Serving default document");
                    req.set_path(path);
                }
                DirectoryRoute::Directory(dir) => listing_dir = Some(dir),
                DirectoryRoute::NotDirectory => {}
            }
        }

        let handler = match ctx.handler.get().await {
            Ok(handler) => handler,
            Err(e) => {
                error!(error = %e, "Failed to initialise request handler");
                resp.write_error(StatusCode::InternalServerError, None).await;
                return false;
            }
        };

        if let Err(e) = handler.handle(&req, &mut resp).await {
            error!(error = %e, method = req.method.as_str(), path = %req.path, "Request handler failed");
            if resp.headers_sent() {
                resp.close();
            } else {
                let page = pages::unhandled_page(&ctx.info);
                resp.write_full(
                    StatusCode::InternalServerError,
                    Some(&html_headers()),
                    page,
                    false,
                )
                .await;
            }
            return false;
        }

        if resp.status() == StatusCode::NotFound
            && !resp.headers_sent()
            && req.method == Method::GET
            && site.directory_listing()
        {
            if let Some(dir) = listing_dir {
                let parent = site.parent_link(&req.path);
                listing::serve_listing(&mut resp, &req.path, parent.as_deref(), &dir).await;
                return false;
            }
        }

        if *self.shutdown.borrow() {
            resp.disable_keep_alive();
        }
        resp.flush(true).await;
        info!(
            method = req.method.as_str(),
            path = %req.path,
            status = resp.status().as_u16(),
            bytes = resp.bytes_written(),
            "Request served"
        );

        resp.keep_alive()
    }
}

fn html_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert("Content-Type", "text/html; charset=utf-8");
    headers
}
