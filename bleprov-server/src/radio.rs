//! LE advertising through a raw HCI socket

use std::future::Future;
use std::io::{Read, Write};
use std::time::Duration;

use bleprov_proto::adv;
use bleprov_proto::ble::SERVICE_UUID_128;
use socket2::Socket;
use tokio::io::unix::AsyncFd;

use crate::bt::{self, HciFilter};
use crate::error::RadioError;

// LE controller commands (OGF 0x08)
pub const LE_SET_ADV_PARAMETERS: u16 = 0x2006;
pub const LE_SET_ADV_DATA: u16 = 0x2008;
pub const LE_SET_SCAN_RSP_DATA: u16 = 0x2009;
pub const LE_SET_ADV_ENABLE: u16 = 0x200A;

const COMMAND_TIMEOUT: Duration = Duration::from_secs(1);
const SETTLE_BEFORE_START: Duration = Duration::from_millis(100);
const SETTLE_AFTER_TOGGLE: Duration = Duration::from_millis(50);

/// Advertising on/off, idempotent against the current state
pub trait Advertiser {
    fn start(&mut self) -> impl Future<Output = Result<(), RadioError>>;
    fn stop(&mut self) -> impl Future<Output = Result<(), RadioError>>;

    /// Forget the cached state so the next `start` runs the full sequence
    fn reset(&mut self);
}

/// LE Set Advertising Parameters: slow, connectable undirected advertising
/// on all three channels from the public address
pub fn adv_parameters() -> [u8; 15] {
    let mut p = [0u8; 15];
    p[0..2].copy_from_slice(&0x0100u16.to_le_bytes()); // min interval, 160 ms
    p[2..4].copy_from_slice(&0x0200u16.to_le_bytes()); // max interval, 320 ms
    p[4] = 0x00; // ADV_IND
    p[5] = 0x00; // own address: public
    // peer address type + address stay zero
    p[13] = 0x07; // channel map
    p[14] = 0x00; // no filter
    p
}

pub struct HciRadio {
    fd: AsyncFd<Socket>,
    name: String,
    advertising: bool,
}

impl HciRadio {
    pub fn open(index: u16, name: &str) -> Result<Self, RadioError> {
        let socket = bt::hci_socket().map_err(RadioError::Open)?;
        bt::bind_hci(&socket, index, bt::HCI_CHANNEL_RAW)
            .map_err(|source| RadioError::Bind { index, source })?;
        let filter = HciFilter {
            type_mask: 1 << bt::HCI_EVENT_PKT,
            event_mask: [
                1 << bt::EVT_CMD_COMPLETE | 1 << bt::EVT_CMD_STATUS,
                0,
            ],
            opcode: 0,
        };
        bt::set_hci_filter(&socket, &filter).map_err(RadioError::Filter)?;
        socket.set_nonblocking(true).map_err(RadioError::Open)?;
        let fd = AsyncFd::new(socket).map_err(RadioError::Open)?;
        log::info!("opened hci{index}");
        Ok(Self { fd, name: name.to_string(), advertising: false })
    }

    fn write_command(&self, opcode: u16, params: &[u8]) -> Result<(), RadioError> {
        let packet = bt::command_packet(opcode, params);
        (&*self.fd.get_ref())
            .write_all(&packet)
            .map_err(|source| RadioError::Write { opcode, source })
    }

    async fn read_event(&self, buf: &mut [u8]) -> std::io::Result<usize> {
        loop {
            let mut guard = self.fd.readable().await?;
            match guard.try_io(|inner| (&*inner.get_ref()).read(buf)) {
                Ok(result) => return result,
                Err(_would_block) => continue,
            }
        }
    }

    /// Send a command and wait for its completion status
    async fn command(&self, opcode: u16, params: &[u8]) -> Result<(), RadioError> {
        self.write_command(opcode, params)?;
        let wait = async {
            let mut buf = [0u8; 260];
            loop {
                let n = self
                    .read_event(&mut buf)
                    .await
                    .map_err(|source| RadioError::Write { opcode, source })?;
                if let Some(status) = bt::command_result(&buf[..n], opcode) {
                    return Ok(status);
                }
            }
        };
        let status = tokio::time::timeout(COMMAND_TIMEOUT, wait)
            .await
            .map_err(|_| RadioError::Timeout(opcode))??;
        if status != 0 {
            return Err(RadioError::Status { opcode, status });
        }
        log::debug!("hci command 0x{opcode:04x} ok");
        Ok(())
    }

    /// Disabling an idle controller is refused by some chips; that is fine
    async fn disable(&self) {
        if let Err(e) = self.command(LE_SET_ADV_ENABLE, &[0x00]).await {
            log::debug!("disable advertising: {e}");
        }
    }
}

impl Advertiser for HciRadio {
    async fn start(&mut self) -> Result<(), RadioError> {
        if self.advertising {
            return Ok(());
        }
        self.disable().await;
        tokio::time::sleep(SETTLE_BEFORE_START).await;

        self.command(LE_SET_ADV_PARAMETERS, &adv_parameters()).await?;
        let data = adv::advertising_data(SERVICE_UUID_128);
        self.command(LE_SET_ADV_DATA, &adv::hci_data_param(&data)).await?;
        let scan_rsp = adv::scan_response_data(&self.name);
        self.command(LE_SET_SCAN_RSP_DATA, &adv::hci_data_param(&scan_rsp)).await?;
        self.command(LE_SET_ADV_ENABLE, &[0x01]).await?;
        tokio::time::sleep(SETTLE_AFTER_TOGGLE).await;

        self.advertising = true;
        log::info!("advertising as {}", self.name);
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), RadioError> {
        if !self.advertising {
            return Ok(());
        }
        self.disable().await;
        tokio::time::sleep(SETTLE_AFTER_TOGGLE).await;
        self.disable().await;
        // the controller is off from here on, even if clearing the data fails
        self.advertising = false;
        self.command(LE_SET_ADV_DATA, &adv::hci_data_param(&[])).await?;
        self.command(LE_SET_SCAN_RSP_DATA, &adv::hci_data_param(&[])).await?;
        log::info!("advertising stopped");
        Ok(())
    }

    fn reset(&mut self) {
        self.advertising = false;
    }
}

impl Drop for HciRadio {
    /// Last-chance disable on every exit path; the completion is not awaited
    fn drop(&mut self) {
        if self.advertising {
            let _ = self.write_command(LE_SET_ADV_ENABLE, &[0x00]);
        }
    }
}
