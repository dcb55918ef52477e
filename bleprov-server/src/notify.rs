//! Response delivery over Handle Value Notifications

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bleprov_proto::att;
use bleprov_proto::ble::{DEFAULT_MTU, NOTIFY_HEADER_LEN, SHORT_RESPONSE_LIMIT, TERMINATOR};

use crate::link::Link;

/// Gap between fragments so slow centrals keep up
pub const FRAGMENT_DELAY: Duration = Duration::from_millis(50);

/// CCCD state of the WiFi characteristic. Notifications and indications
/// both count as subscribed.
#[derive(Debug, Default)]
pub struct Subscription {
    enabled: AtomicBool,
}

impl Subscription {
    pub fn set(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn is_notifying(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }
}

/// Split a response into notification payloads.
///
/// Short responses go out as-is. Longer ones get a terminator and are cut
/// into `mtu - 3` byte pieces so the client knows when to stop collecting.
pub fn fragment(message: &[u8], mtu: u16) -> Vec<Vec<u8>> {
    if message.len() <= SHORT_RESPONSE_LIMIT {
        return vec![message.to_vec()];
    }
    let mut data = message.to_vec();
    data.push(TERMINATOR);
    let max = mtu.max(DEFAULT_MTU) as usize - NOTIFY_HEADER_LEN;
    data.chunks(max).map(<[u8]>::to_vec).collect()
}

/// Send `message` to the subscribed client. Returns the number of packets
/// sent; zero when the client is gone or not subscribed.
pub async fn deliver<L: Link>(
    link: &L,
    subscription: &Subscription,
    handle: u16,
    mtu: u16,
    message: &[u8],
) -> std::io::Result<usize> {
    if !subscription.is_notifying() || !link.is_connected() {
        log::debug!("not notifying, client unsubscribed or gone");
        return Ok(0);
    }

    let fragments = fragment(message, mtu);
    let total = fragments.len();
    for (i, payload) in fragments.iter().enumerate() {
        if i > 0 {
            tokio::time::sleep(FRAGMENT_DELAY).await;
            if !link.is_connected() {
                log::warn!("link lost after {i}/{total} fragments");
                return Ok(i);
            }
        }
        link.send(&att::notification(handle, payload)).await?;
    }
    if total > 1 {
        log::debug!("sent {} bytes in {total} fragments", message.len());
    }
    Ok(total)
}
