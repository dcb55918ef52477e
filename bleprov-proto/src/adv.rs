//! LE advertising and scan response payloads

/// Max payload of a legacy advertising / scan response packet
pub const MAX_ADV_DATA: usize = 31;

/// Longest local name that fits in a scan response (31 - length - type)
pub const MAX_NAME_LEN: usize = 29;

// AD types
const AD_FLAGS: u8 = 0x01;
const AD_COMPLETE_128: u8 = 0x07;
const AD_COMPLETE_NAME: u8 = 0x09;
const AD_TX_POWER: u8 = 0x0A;

/// LE General Discoverable is not set on purpose; only BR/EDR Not Supported
const FLAGS_BREDR_NOT_SUPPORTED: u8 = 0x04;

/// Flags, the complete list of 128-bit services (just ours) and TX power
pub fn advertising_data(service: u128) -> Vec<u8> {
    let mut data = Vec::with_capacity(MAX_ADV_DATA);
    data.extend_from_slice(&[2, AD_FLAGS, FLAGS_BREDR_NOT_SUPPORTED]);
    data.push(17);
    data.push(AD_COMPLETE_128);
    data.extend_from_slice(&service.to_le_bytes());
    data.extend_from_slice(&[2, AD_TX_POWER, 0x00]);
    data
}

/// Complete local name, truncated to fit
pub fn scan_response_data(name: &str) -> Vec<u8> {
    let name = truncate_name(name);
    let mut data = Vec::with_capacity(name.len() + 2);
    data.push(name.len() as u8 + 1);
    data.push(AD_COMPLETE_NAME);
    data.extend_from_slice(name);
    data
}

fn truncate_name(name: &str) -> &[u8] {
    let bytes = name.as_bytes();
    &bytes[..bytes.len().min(MAX_NAME_LEN)]
}

/// Parameter block for LE Set Advertising Data / Set Scan Response Data:
/// one significant-length byte followed by 31 zero-padded bytes
pub fn hci_data_param(data: &[u8]) -> [u8; 32] {
    let mut param = [0u8; 32];
    let len = data.len().min(MAX_ADV_DATA);
    param[0] = len as u8;
    param[1..=len].copy_from_slice(&data[..len]);
    param
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::SERVICE_UUID_128;

    #[test]
    fn advertising_payload_fits() {
        let data = advertising_data(SERVICE_UUID_128);
        assert_eq!(data.len(), 24);
        assert_eq!(&data[..3], &[2, 0x01, 0x04]);
        assert_eq!(&data[3..5], &[17, 0x07]);
        // UUID goes out reversed
        assert_eq!(data[5], 0x3e);
        assert_eq!(data[20], 0x6e);
        assert_eq!(&data[21..], &[2, 0x0a, 0x00]);
    }

    #[test]
    fn long_names_are_truncated() {
        let data = scan_response_data("3RHUB-0123456789ABCDEF0123456789ABCDEF");
        assert_eq!(data.len(), MAX_ADV_DATA);
        assert_eq!(data[0], 30);
        assert_eq!(data[1], 0x09);
        assert_eq!(&data[2..8], b"3RHUB-");
    }

    #[test]
    fn hci_param_is_padded() {
        let param = hci_data_param(&scan_response_data("3RHUB-AB"));
        assert_eq!(param[0], 10);
        assert_eq!(&param[1..3], &[9, 0x09]);
        assert!(param[11..].iter().all(|b| *b == 0));
    }
}
