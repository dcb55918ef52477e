//! L2CAP ATT channel listener and the per-client link

use std::io::{Read, Write};
use std::sync::Arc;

use socket2::Socket;
use tokio::io::unix::AsyncFd;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::bt;
use crate::error::ListenError;
use crate::link::{Acceptor, Connection, Link, Liveness};

const LISTEN_BACKLOG: i32 = 10;

/// Largest ATT PDU we accept from a client
const MAX_PDU: usize = 517;

/// Binds a fresh listener for every accept and closes it once a client is
/// in, so at most one client is ever admitted
#[derive(Debug, Default)]
pub struct L2capAcceptor;

impl L2capAcceptor {
    pub fn new() -> Self {
        Self
    }

    fn listen() -> Result<AsyncFd<Socket>, ListenError> {
        let socket = bt::l2cap_socket().map_err(ListenError::Socket)?;
        bt::bind_att(&socket).map_err(ListenError::Bind)?;
        bt::set_security_low(&socket).map_err(ListenError::Security)?;
        socket.listen(LISTEN_BACKLOG).map_err(ListenError::Listen)?;
        socket.set_nonblocking(true).map_err(ListenError::Listen)?;
        AsyncFd::new(socket).map_err(ListenError::Listen)
    }
}

impl Acceptor for L2capAcceptor {
    type Link = L2capLink;

    async fn accept(&mut self) -> Result<Connection<L2capLink>, ListenError> {
        let listener = Self::listen()?;
        log::debug!("listening on L2CAP ATT channel");

        let (socket, peer) = loop {
            let mut guard = listener.readable().await.map_err(ListenError::Accept)?;
            match guard.try_io(|inner| bt::accept_l2(inner.get_ref())) {
                Ok(result) => break result.map_err(ListenError::Accept)?,
                Err(_would_block) => continue,
            }
        };
        drop(listener);

        let fd = Arc::new(AsyncFd::new(socket).map_err(ListenError::Accept)?);
        let alive = Liveness::new();
        let (tx, incoming) = mpsc::channel(16);
        let reader = tokio::spawn(read_pdus(fd.clone(), alive.clone(), tx));

        Ok(Connection { link: L2capLink { fd, alive, reader }, incoming, peer })
    }
}

async fn recv(fd: &AsyncFd<Socket>, buf: &mut [u8]) -> std::io::Result<usize> {
    loop {
        let mut guard = fd.readable().await?;
        match guard.try_io(|inner| (&*inner.get_ref()).read(buf)) {
            Ok(result) => return result,
            Err(_would_block) => continue,
        }
    }
}

/// Forward PDUs until the peer goes away. The liveness flag is cleared
/// before the channel closes.
async fn read_pdus(fd: Arc<AsyncFd<Socket>>, alive: Liveness, tx: mpsc::Sender<Vec<u8>>) {
    let mut buf = vec![0u8; MAX_PDU];
    loop {
        match recv(&fd, &mut buf).await {
            Ok(0) => {
                log::debug!("L2CAP EOF");
                break;
            }
            Ok(n) => {
                if tx.send(buf[..n].to_vec()).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                log::info!("L2CAP link closed: {e}");
                break;
            }
        }
    }
    alive.mark_lost();
}

pub struct L2capLink {
    fd: Arc<AsyncFd<Socket>>,
    alive: Liveness,
    reader: JoinHandle<()>,
}

impl Link for L2capLink {
    async fn send(&self, pdu: &[u8]) -> std::io::Result<()> {
        loop {
            let mut guard = self.fd.writable().await?;
            match guard.try_io(|inner| (&*inner.get_ref()).write(pdu)) {
                Ok(result) => return result.map(|_| ()),
                Err(_would_block) => continue,
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.alive.is_alive()
    }
}

impl Drop for L2capLink {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
