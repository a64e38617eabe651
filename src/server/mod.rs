//! Listening sockets, the accept loop, and the request handler seam.

pub mod handler;
pub mod listener;

use std::sync::Arc;

use tokio::sync::watch;

/// Flips the server-wide shutdown flag.
///
/// Accept loops stop on the flag; live connections finish the response
/// they are writing and close before their next read.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    pub fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { tx: Arc::new(tx) }, rx)
    }

    pub fn shutdown(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_shutdown(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// Resolves once shutdown has been requested. Never resolves if the
/// sender is gone without having signalled.
pub(crate) async fn shutdown_signalled(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|down| *down).await.is_err() {
        std::future::pending::<()>().await;
    }
}
