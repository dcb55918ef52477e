//! Advertised device name, derived from hardware identifiers

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bleprov_proto::ble::DEVICE_NAME_PREFIX;
use tokio::sync::OnceCell;

const MAC_ATTEMPTS: u32 = 3;
const MAC_RETRY_DELAY: Duration = Duration::from_millis(500);
const MACHINE_ID_PATH: &str = "/etc/machine-id";

static NAME: OnceCell<String> = OnceCell::const_new();

/// The device name, computed once per process
pub async fn device_name(interface: &str) -> &'static str {
    NAME.get_or_init(|| async {
        let mac = read_mac(interface).await;
        let machine_id = tokio::fs::read_to_string(MACHINE_ID_PATH).await.ok();
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        let name = derive_name(mac.as_deref(), machine_id.as_deref(), now);
        log::info!("device name: {name}");
        name
    })
    .await
}

/// `3RHUB-` followed by the last 8 MAC digits, the last 6 characters of
/// the machine id, or 4 hex digits of the clock, whichever is available
pub fn derive_name(mac: Option<&str>, machine_id: Option<&str>, unix_secs: u64) -> String {
    if let Some(mac) = mac.and_then(normalize_mac) {
        return format!("{DEVICE_NAME_PREFIX}{}", &mac[mac.len() - 8..]);
    }
    if let Some(id) = machine_id.map(str::trim).filter(|id| id.len() >= 6 && id.is_ascii()) {
        return format!("{DEVICE_NAME_PREFIX}{}", &id[id.len() - 6..]);
    }
    format!("{DEVICE_NAME_PREFIX}{:04X}", unix_secs & 0xFFFF)
}

/// `aa:bb:cc:dd:ee:ff` -> `AABBCCDDEEFF`, if it is a MAC at all
fn normalize_mac(raw: &str) -> Option<String> {
    let hex: String = raw.trim().chars().filter(|c| *c != ':').collect();
    if hex.len() == 12 && hex.chars().all(|c| c.is_ascii_hexdigit()) {
        Some(hex.to_ascii_uppercase())
    } else {
        None
    }
}

async fn read_mac(interface: &str) -> Option<String> {
    let path = format!("/sys/class/net/{interface}/address");
    for attempt in 1..=MAC_ATTEMPTS {
        if attempt > 1 {
            tokio::time::sleep(MAC_RETRY_DELAY).await;
        }
        match tokio::fs::read_to_string(&path).await {
            Ok(raw) if normalize_mac(&raw).is_some() => return Some(raw),
            Ok(raw) => log::warn!("unexpected MAC {:?} ({attempt}/{MAC_ATTEMPTS})", raw.trim()),
            Err(e) => log::warn!("cannot read {path}: {e} ({attempt}/{MAC_ATTEMPTS})"),
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_from_mac() {
        assert_eq!(derive_name(Some("8c:1d:96:b9:fe:ec\n"), None, 0), "3RHUB-96B9FEEC");
    }

    #[test]
    fn falls_back_to_machine_id() {
        let id = "4f1b3c2a9d8e4b7f8a6c5d4e3f2a1b0c\n";
        assert_eq!(derive_name(Some("not-a-mac"), Some(id), 0), "3RHUB-2a1b0c");
        assert_eq!(derive_name(None, Some(id), 0), "3RHUB-2a1b0c");
    }

    #[test]
    fn falls_back_to_clock() {
        assert_eq!(derive_name(None, Some("abc"), 0x1234_BEEF), "3RHUB-BEEF");
        assert_eq!(derive_name(None, None, 0x0001_000A), "3RHUB-000A");
    }
}
