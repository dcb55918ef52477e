//! BLE GATT service constants for WiFi provisioning
//!
//! These identifiers are what the companion app looks for: one custom service
//! with a single write/notify characteristic carrying newline-terminated JSON.

/// WiFi configuration service
pub const SERVICE_UUID_128: u128 = 0x6e400000_0000_4e98_8024_bc5b71e0893e;

/// WiFi configuration characteristic (write, write-without-response, notify)
pub const WIFI_CONFIG_UUID_128: u128 = 0x6e400001_0000_4e98_8024_bc5b71e0893e;

/// Advertised name prefix, followed by a hardware-derived suffix
pub const DEVICE_NAME_PREFIX: &str = "3RHUB-";

/// Default ATT MTU before (or without) an MTU exchange
pub const DEFAULT_MTU: u16 = 23;

/// Notification overhead: opcode (1) + handle (2)
pub const NOTIFY_HEADER_LEN: usize = 3;

/// Responses up to this length go out as one packet without a terminator
pub const SHORT_RESPONSE_LIMIT: usize = 20;

/// End-of-message marker for requests and fragmented responses
pub const TERMINATOR: u8 = b'\n';

/// CCCD bits
pub mod cccd {
    pub const NOTIFY: u16 = 0x0001;
    pub const INDICATE: u16 = 0x0002;
}
