//! SIGINT/SIGTERM handling
//!
//! Handlers only record the request; the main loop notices it and tears
//! down advertising itself.

use std::sync::Arc;

use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::watch;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    Interrupt,
    Terminate,
}

/// Process-wide termination request
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: Arc<watch::Sender<Option<Reason>>>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    pub fn request(&self, reason: Reason) {
        self.tx.send_replace(Some(reason));
    }

    pub fn reason(&self) -> Option<Reason> {
        *self.tx.borrow()
    }

    pub fn is_requested(&self) -> bool {
        self.reason().is_some()
    }

    /// Resolves once termination has been requested
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(Option::is_some).await;
    }
}

/// Route SIGINT and SIGTERM into `shutdown`
pub fn install(shutdown: Shutdown) -> std::io::Result<JoinHandle<()>> {
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;

    Ok(tokio::spawn(async move {
        let reason = tokio::select! {
            _ = interrupt.recv() => Reason::Interrupt,
            _ = terminate.recv() => Reason::Terminate,
        };
        log::info!("received {reason:?}, shutting down");
        shutdown.request(reason);
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn wait_returns_after_request() {
        let shutdown = Shutdown::new();
        assert!(!shutdown.is_requested());

        let waiter = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { shutdown.wait().await })
        };
        tokio::task::yield_now().await;
        shutdown.request(Reason::Terminate);
        waiter.await.unwrap();
        assert_eq!(shutdown.reason(), Some(Reason::Terminate));

        // late waiters see the request too
        shutdown.wait().await;
    }
}
