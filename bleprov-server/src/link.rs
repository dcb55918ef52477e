//! Transport seams between the session engine and the Bluetooth sockets

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;

use crate::error::ListenError;

/// Outgoing half of an ATT bearer
pub trait Link {
    /// Send one ATT PDU
    fn send(&self, pdu: &[u8]) -> impl Future<Output = std::io::Result<()>>;

    /// False as soon as the peer is gone, even while a PDU is being handled
    fn is_connected(&self) -> bool;
}

/// Liveness flag cleared by whoever notices the disconnect first
#[derive(Debug, Clone)]
pub struct Liveness(Arc<AtomicBool>);

impl Liveness {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub fn is_alive(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn mark_lost(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}

/// An accepted client: the outgoing link plus the stream of PDUs it sends.
/// The receiver yields `None` once the peer disconnects.
pub struct Connection<L> {
    pub link: L,
    pub incoming: mpsc::Receiver<Vec<u8>>,
    pub peer: String,
}

/// Source of client connections
pub trait Acceptor {
    type Link: Link;

    /// Wait for exactly one client
    fn accept(&mut self) -> impl Future<Output = Result<Connection<Self::Link>, ListenError>>;
}
