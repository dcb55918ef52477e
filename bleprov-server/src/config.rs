//! Runtime configuration shared by every component

use std::path::PathBuf;
use std::time::Duration;

use bleprov_proto::ble::DEFAULT_MTU;

pub const DEFAULT_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_SUPERVISOR: &str = "/usr/local/bin/supervisor";

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Exit if nobody connects while advertising for this long
    pub no_client_timeout: Duration,
    /// Exit after this many successful provisionings
    pub success_limit: u32,
    /// Address polls after a successful association, one per second
    pub poll_attempts: u32,
    /// Wireless interface handed to the network tool
    pub interface: String,
    /// HCI controller index (hci0 = 0)
    pub hci_index: u16,
    /// Receive MTU offered in MTU exchange
    pub mtu: u16,
    /// Status relay executable
    pub supervisor: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            no_client_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            success_limit: 1,
            poll_attempts: 1,
            interface: "wlan0".to_string(),
            hci_index: 0,
            mtu: DEFAULT_MTU,
            supervisor: PathBuf::from(DEFAULT_SUPERVISOR),
        }
    }
}
