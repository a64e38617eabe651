use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::{Config, ServerConfig};
use crate::http::connection::{Connection, ConnectionContext};
use crate::server::handler::Handler;
use crate::server::{ShutdownHandle, shutdown_signalled};

/// Pause after a failed `accept` before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

pub struct Server<H> {
    listeners: Vec<TcpListener>,
    ctx: Arc<ConnectionContext<H>>,
    shutdown: ShutdownHandle,
    shutdown_rx: watch::Receiver<bool>,
}

impl<H: Handler> Server<H> {
    /// Binds the listening sockets and prepares the shared connection
    /// context. The handler itself is built on the first request.
    pub async fn bind<F>(config: Config, factory: F) -> anyhow::Result<Self>
    where
        F: Fn(&Config) -> anyhow::Result<H> + Send + Sync + 'static,
    {
        let listeners = bind_listeners(&config.server)?;
        let ctx = ConnectionContext::new(Arc::new(config), factory)?;
        let (shutdown, shutdown_rx) = ShutdownHandle::new();

        for listener in &listeners {
            if let Ok(addr) = listener.local_addr() {
                info!("Listening on {}", addr);
            }
        }

        Ok(Self {
            listeners,
            ctx: Arc::new(ctx),
            shutdown,
            shutdown_rx,
        })
    }

    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.listeners
            .iter()
            .filter_map(|listener| listener.local_addr().ok())
            .collect()
    }

    /// Port the server ended up on; useful when configured with port 0.
    pub fn port(&self) -> Option<u16> {
        self.local_addrs().first().map(SocketAddr::port)
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Accepts connections until shutdown is requested, then waits for the
    /// live connections to finish.
    pub async fn run(self) -> anyhow::Result<()> {
        let Self {
            listeners,
            ctx,
            shutdown: _shutdown,
            shutdown_rx,
        } = self;

        let mut loops = JoinSet::new();
        for listener in listeners {
            loops.spawn(accept_loop(listener, Arc::clone(&ctx), shutdown_rx.clone()));
        }

        while let Some(res) = loops.join_next().await {
            if let Err(e) = res {
                error!("Accept loop panicked: {}", e);
            }
        }

        info!("Server stopped");
        Ok(())
    }
}

async fn accept_loop<H: Handler>(
    listener: TcpListener,
    ctx: Arc<ConnectionContext<H>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((socket, peer)) => {
                    debug!("Accepted connection from {}", peer);
                    let local = socket.local_addr().ok();
                    let ctx = Arc::clone(&ctx);
                    let rx = shutdown.clone();

                    connections.spawn(async move {
                        let mut conn = Connection::new(socket, ctx, rx).with_addrs(Some(peer), local);
                        if let Err(e) = conn.run().await {
                            error!("Connection error from {}: {}", peer, e);
                        }
                    });
                }
                Err(e) => {
                    error!("Accept failed: {}", e);
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            },
            Some(res) = connections.join_next(), if !connections.is_empty() => {
                reap(res);
            }
            _ = shutdown_signalled(&mut shutdown) => break,
        }
    }

    drop(listener);
    if !connections.is_empty() {
        info!("Waiting for {} connection(s) to finish", connections.len());
    }
    while let Some(res) = connections.join_next().await {
        reap(res);
    }
}

fn reap(res: Result<(), tokio::task::JoinError>) {
    if let Err(e) = res {
        error!("Connection task panicked: {}", e);
    }
}

/// Binds `[::]` (v6-only) when enabled, then `0.0.0.0` on the same port.
///
/// An address-in-use error on IPv6 is fatal; any other IPv6 failure just
/// leaves the server IPv4-only. IPv4 failure is fatal only when there is
/// no IPv6 listener.
pub fn bind_listeners(cfg: &ServerConfig) -> anyhow::Result<Vec<TcpListener>> {
    let mut listeners = Vec::new();
    let mut port = cfg.port;

    if cfg.ipv6 {
        let addr = SocketAddr::from((Ipv6Addr::UNSPECIFIED, port));
        match bind_socket(addr, cfg.backlog) {
            Ok(listener) => {
                if port == 0 {
                    port = listener.local_addr()?.port();
                }
                listeners.push(listener);
            }
            Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
                return Err(e).with_context(|| format!("port {port} is already in use"));
            }
            Err(e) => warn!("IPv6 listener unavailable: {}", e),
        }
    }

    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    match bind_socket(addr, cfg.backlog) {
        Ok(listener) => listeners.push(listener),
        Err(e) if listeners.is_empty() => {
            return Err(e).with_context(|| format!("failed to bind {addr}"));
        }
        Err(e) => warn!("IPv4 listener unavailable: {}", e),
    }

    Ok(listeners)
}

fn bind_socket(addr: SocketAddr, backlog: i32) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;

    socket.set_reuse_address(true)?;
    if addr.is_ipv6() {
        socket.set_only_v6(true)?;
    }
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;

    TcpListener::from_std(socket.into())
}
