//! In-memory stand-ins for the radio, the ATT link and the external tools

#![allow(dead_code)]

use std::collections::VecDeque;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};

use bleprov_proto::att;
use bleprov_server::link::{Acceptor, Connection, Link, Liveness};
use bleprov_server::radio::Advertiser;
use bleprov_server::{Association, CommandError, ListenError, NetworkTool, RadioError, Signal, StatusRelay};
use tokio::sync::mpsc;

pub const WIFI_VALUE: u16 = 0x000C;
pub const WIFI_CCCD: u16 = 0x000D;
const LE_SET_ADV_ENABLE: u16 = 0x200A;

pub const IP: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 42);

pub fn write_request(handle: u16, value: &[u8]) -> Vec<u8> {
    let mut pdu = vec![att::OP_WRITE_REQ];
    pdu.extend_from_slice(&handle.to_le_bytes());
    pdu.extend_from_slice(value);
    pdu
}

pub fn write_command(handle: u16, value: &[u8]) -> Vec<u8> {
    let mut pdu = vec![att::OP_WRITE_CMD];
    pdu.extend_from_slice(&handle.to_le_bytes());
    pdu.extend_from_slice(value);
    pdu
}

pub fn subscribe() -> Vec<u8> {
    write_request(WIFI_CCCD, &[0x01, 0x00])
}

#[derive(Clone, Default)]
pub struct MemLink {
    pub sent: Arc<Mutex<Vec<Vec<u8>>>>,
    pub alive: Liveness,
}

impl MemLink {
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.sent.lock().unwrap().clone()
    }

    /// Payloads of the notifications sent on the WiFi characteristic
    pub fn notifications(&self) -> Vec<Vec<u8>> {
        self.sent()
            .into_iter()
            .filter_map(|pdu| match pdu.as_slice() {
                [att::OP_HANDLE_VALUE_NTF, 0x0C, 0x00, rest @ ..] => Some(rest.to_vec()),
                _ => None,
            })
            .collect()
    }
}

impl Link for MemLink {
    async fn send(&self, pdu: &[u8]) -> std::io::Result<()> {
        self.sent.lock().unwrap().push(pdu.to_vec());
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.alive.is_alive()
    }
}

/// A connection whose client sends `pdus` and then hangs up
pub fn connection(link: &MemLink, pdus: Vec<Vec<u8>>) -> Connection<MemLink> {
    let (tx, incoming) = mpsc::channel(pdus.len().max(1));
    for pdu in pdus {
        tx.try_send(pdu).unwrap();
    }
    Connection { link: link.clone(), incoming, peer: "8C:1D:96:B9:FE:EC".to_string() }
}

/// A connection whose client sends `pdus` and stays connected until the
/// returned sender is dropped
pub fn open_connection(link: &MemLink, pdus: Vec<Vec<u8>>) -> (mpsc::Sender<Vec<u8>>, Connection<MemLink>) {
    let (tx, incoming) = mpsc::channel(pdus.len().max(1));
    for pdu in pdus {
        tx.try_send(pdu).unwrap();
    }
    (tx, Connection { link: link.clone(), incoming, peer: "8C:1D:96:B9:FE:EC".to_string() })
}

/// Hands out queued connections, then waits forever
#[derive(Default)]
pub struct MemAcceptor {
    pub queue: VecDeque<Connection<MemLink>>,
}

impl Acceptor for MemAcceptor {
    type Link = MemLink;

    async fn accept(&mut self) -> Result<Connection<MemLink>, ListenError> {
        match self.queue.pop_front() {
            Some(conn) => Ok(conn),
            None => std::future::pending().await,
        }
    }
}

/// Every accept fails with a socket error
pub struct FailingAcceptor;

impl Acceptor for FailingAcceptor {
    type Link = MemLink;

    async fn accept(&mut self) -> Result<Connection<MemLink>, ListenError> {
        Err(ListenError::Accept(std::io::Error::from(std::io::ErrorKind::ConnectionAborted)))
    }
}

#[derive(Clone, Default)]
pub struct FakeRadio {
    pub events: Arc<Mutex<Vec<&'static str>>>,
    advertising: bool,
    failing_stops: u32,
}

impl FakeRadio {
    /// The first `n` stops fail and leave advertising marked as on
    pub fn failing_stops(n: u32) -> Self {
        Self { failing_stops: n, ..Self::default() }
    }

    pub fn events(&self) -> Vec<&'static str> {
        self.events.lock().unwrap().clone()
    }
}

impl Advertiser for FakeRadio {
    async fn start(&mut self) -> Result<(), RadioError> {
        if !self.advertising {
            self.advertising = true;
            self.events.lock().unwrap().push("start");
        }
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), RadioError> {
        if !self.advertising {
            return Ok(());
        }
        if self.failing_stops > 0 {
            self.failing_stops -= 1;
            self.events.lock().unwrap().push("stop failed");
            return Err(RadioError::Timeout(LE_SET_ADV_ENABLE));
        }
        self.advertising = false;
        self.events.lock().unwrap().push("stop");
        Ok(())
    }

    fn reset(&mut self) {
        self.advertising = false;
    }
}

#[derive(Default)]
pub struct ToolState {
    pub associations: VecDeque<Association>,
    pub addresses: VecDeque<Option<Ipv4Addr>>,
    pub calls: Vec<String>,
    /// Cleared when the association command runs
    pub drop_link: Option<Liveness>,
}

#[derive(Clone, Default)]
pub struct FakeTool(pub Arc<Mutex<ToolState>>);

impl FakeTool {
    pub fn new(associations: &[Association], addresses: &[Option<Ipv4Addr>]) -> Self {
        let tool = Self::default();
        {
            let mut state = tool.0.lock().unwrap();
            state.associations = associations.iter().cloned().collect();
            state.addresses = addresses.iter().copied().collect();
        }
        tool
    }

    pub fn calls(&self) -> Vec<String> {
        self.0.lock().unwrap().calls.clone()
    }
}

impl NetworkTool for FakeTool {
    async fn associate(&self, ssid: &str, password: Option<&str>) -> Result<Association, CommandError> {
        let mut state = self.0.lock().unwrap();
        state.calls.push(format!("associate {ssid} {}", password.unwrap_or("-")));
        if let Some(alive) = state.drop_link.take() {
            alive.mark_lost();
        }
        state.associations.pop_front().ok_or_else(|| CommandError::Spawn {
            program: "nmcli".to_string(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        })
    }

    async fn current_network(&self) -> Option<String> {
        None
    }

    async fn current_address(&self) -> Option<Ipv4Addr> {
        self.0.lock().unwrap().addresses.pop_front().flatten()
    }

    async fn scan(&self) {
        self.0.lock().unwrap().calls.push("scan".to_string());
    }

    async fn forget_profiles_except(&self, ssid: &str) {
        self.0.lock().unwrap().calls.push(format!("forget except {ssid}"));
    }
}

#[derive(Clone, Default)]
pub struct Recorder(pub Arc<Mutex<Vec<Signal>>>);

impl Recorder {
    pub fn signals(&self) -> Vec<Signal> {
        self.0.lock().unwrap().clone()
    }
}

impl StatusRelay for Recorder {
    async fn signal(&self, signal: Signal) {
        self.0.lock().unwrap().push(signal);
    }
}
