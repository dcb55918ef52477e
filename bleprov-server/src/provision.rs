//! WiFi provisioning workflow
//!
//! Takes one reassembled request, associates the appliance with the
//! requested network and reports the outcome. The network tool and the
//! status relay are collaborators behind traits so the workflow can be
//! exercised without NetworkManager or the supervisor daemon.

use std::future::Future;
use std::net::Ipv4Addr;
use std::time::Duration;

use bleprov_proto::{CredentialRequest, FailureReason, ProvisionResponse};

use crate::error::CommandError;

/// Pause between a rescan and the retried association
pub const RESCAN_SETTLE: Duration = Duration::from_secs(1);

/// Interval between address polls
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// What the association command reported
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Association {
    Activated,
    /// The network is not in the tool's scan cache
    NotFound,
    Failed(String),
}

/// Operations on the host's network configuration
pub trait NetworkTool {
    fn associate(
        &self,
        ssid: &str,
        password: Option<&str>,
    ) -> impl Future<Output = Result<Association, CommandError>>;

    /// SSID of the network the wireless interface is on, if any
    fn current_network(&self) -> impl Future<Output = Option<String>>;

    /// IPv4 address of the wireless interface, if it has one
    fn current_address(&self) -> impl Future<Output = Option<Ipv4Addr>>;

    /// Refresh the scan cache
    fn scan(&self) -> impl Future<Output = ()>;

    /// Delete every stored WiFi profile except `ssid`
    fn forget_profiles_except(&self, ssid: &str) -> impl Future<Output = ()>;
}

/// Coarse progress signals for the device's status indicators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Pending,
    Configuring,
    Success,
    Stopped,
    /// Ask the orchestration daemon to re-read WiFi settings
    SettingsNotify,
}

impl Signal {
    pub fn args(&self) -> &'static [&'static str] {
        match self {
            Signal::Pending => &["led", "sys_wifi_config_pending"],
            Signal::Configuring => &["led", "sys_wifi_configuring"],
            Signal::Success => &["led", "sys_wifi_config_success"],
            Signal::Stopped => &["led", "sys_wifi_config_stopped"],
            Signal::SettingsNotify => &["setting", "wifi_notify"],
        }
    }
}

/// Fire-and-forget status side channel
pub trait StatusRelay {
    fn signal(&self, signal: Signal) -> impl Future<Output = ()>;
}

/// Outcome of one provisioning attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisioningResult {
    Connected(Ipv4Addr),
    /// Associated, but no address within the polling window
    Pending,
    Failed(FailureReason),
}

impl ProvisioningResult {
    pub fn is_success(&self) -> bool {
        matches!(self, ProvisioningResult::Connected(_))
    }

    pub fn response(&self) -> ProvisionResponse {
        match self {
            ProvisioningResult::Connected(ip) => ProvisionResponse::connected(ip.to_string()),
            ProvisioningResult::Pending => ProvisionResponse::pending(),
            ProvisioningResult::Failed(reason) => ProvisionResponse::failed(*reason),
        }
    }
}

pub struct Workflow<'a, N, R> {
    tool: &'a N,
    relay: &'a R,
    poll_attempts: u32,
}

impl<'a, N: NetworkTool, R: StatusRelay> Workflow<'a, N, R> {
    pub fn new(tool: &'a N, relay: &'a R, poll_attempts: u32) -> Self {
        Self { tool, relay, poll_attempts }
    }

    /// Run the workflow for one message. `connected` is polled before each
    /// address check; once it reports false the attempt is abandoned.
    pub async fn run(&self, message: &[u8], connected: impl Fn() -> bool) -> ProvisioningResult {
        let request = match CredentialRequest::parse(message) {
            Ok(r) => r,
            Err(e) => {
                let reason = FailureReason::from(e);
                log::warn!("rejecting request: {reason}");
                return ProvisioningResult::Failed(reason);
            }
        };
        log::info!(
            "provisioning ssid={:?} ({})",
            request.ssid,
            if request.pw.is_some() { "with password" } else { "open" }
        );
        self.relay.signal(Signal::Configuring).await;

        if self.tool.current_network().await.as_deref() == Some(request.ssid.as_str()) {
            if let Some(ip) = self.tool.current_address().await {
                log::info!("already on {:?} with {ip}", request.ssid);
                self.relay.signal(Signal::Success).await;
                return ProvisioningResult::Connected(ip);
            }
            log::debug!("already on {:?} but without an address", request.ssid);
        }

        if let Err(reason) = self.associate(&request).await {
            return ProvisioningResult::Failed(reason);
        }

        for attempt in 1..=self.poll_attempts {
            tokio::time::sleep(POLL_INTERVAL).await;
            if !connected() {
                log::warn!("client disconnected while waiting for an address");
                return ProvisioningResult::Failed(FailureReason::LinkLost);
            }
            if let Some(ip) = self.tool.current_address().await {
                log::info!("associated with {:?}, address {ip} after {attempt}s", request.ssid);
                self.relay.signal(Signal::Success).await;
                self.tool.forget_profiles_except(&request.ssid).await;
                return ProvisioningResult::Connected(ip);
            }
            log::debug!("no address yet ({attempt}/{})", self.poll_attempts);
        }

        log::warn!("no address for {:?} after {} polls", request.ssid, self.poll_attempts);
        self.relay.signal(Signal::Pending).await;
        ProvisioningResult::Pending
    }

    /// Association with a single rescan-and-retry when the network is not
    /// in the scan cache
    async fn associate(&self, request: &CredentialRequest) -> Result<(), FailureReason> {
        let password = request.pw.as_deref().filter(|p| !p.is_empty());
        let mut outcome = self.try_associate(&request.ssid, password).await?;

        if outcome == Association::NotFound {
            log::info!("{:?} not in scan cache, rescanning", request.ssid);
            self.tool.scan().await;
            tokio::time::sleep(RESCAN_SETTLE).await;
            outcome = self.try_associate(&request.ssid, password).await?;
        }

        match outcome {
            Association::Activated => Ok(()),
            Association::NotFound => {
                log::warn!("{:?} still not found after rescan", request.ssid);
                Err(FailureReason::ConnectionFailed)
            }
            Association::Failed(output) => {
                log::warn!("association with {:?} failed: {output}", request.ssid);
                Err(FailureReason::ConnectionFailed)
            }
        }
    }

    async fn try_associate(
        &self,
        ssid: &str,
        password: Option<&str>,
    ) -> Result<Association, FailureReason> {
        self.tool.associate(ssid, password).await.map_err(|e| {
            log::error!("{e}");
            FailureReason::CommandFailed
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;

    #[derive(Default)]
    struct FakeTool {
        network: Option<String>,
        addresses: RefCell<VecDeque<Option<Ipv4Addr>>>,
        associations: RefCell<VecDeque<Result<Association, ()>>>,
        calls: RefCell<Vec<String>>,
    }

    impl NetworkTool for FakeTool {
        async fn associate(&self, ssid: &str, password: Option<&str>) -> Result<Association, CommandError> {
            self.calls.borrow_mut().push(format!("associate {ssid} {password:?}"));
            match self.associations.borrow_mut().pop_front() {
                Some(Ok(a)) => Ok(a),
                _ => Err(CommandError::Spawn {
                    program: "nmcli".into(),
                    source: std::io::Error::from(std::io::ErrorKind::NotFound),
                }),
            }
        }

        async fn current_network(&self) -> Option<String> {
            self.network.clone()
        }

        async fn current_address(&self) -> Option<Ipv4Addr> {
            self.addresses.borrow_mut().pop_front().flatten()
        }

        async fn scan(&self) {
            self.calls.borrow_mut().push("scan".into());
        }

        async fn forget_profiles_except(&self, ssid: &str) {
            self.calls.borrow_mut().push(format!("forget except {ssid}"));
        }
    }

    #[derive(Default)]
    struct Signals(RefCell<Vec<Signal>>);

    impl StatusRelay for Signals {
        async fn signal(&self, signal: Signal) {
            self.0.borrow_mut().push(signal);
        }
    }

    const IP: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 42);

    #[tokio::test(start_paused = true)]
    async fn associates_and_cleans_up() {
        let tool = FakeTool::default();
        tool.associations.borrow_mut().push_back(Ok(Association::Activated));
        tool.addresses.borrow_mut().push_back(Some(IP));
        let relay = Signals::default();

        let result = Workflow::new(&tool, &relay, 1)
            .run(br#"{"ssid":"Home","pw":"secret123"}"#, || true)
            .await;

        assert_eq!(result, ProvisioningResult::Connected(IP));
        assert_eq!(
            *tool.calls.borrow(),
            vec![
                "associate Home Some(\"secret123\")".to_string(),
                "forget except Home".to_string()
            ]
        );
        assert_eq!(*relay.0.borrow(), vec![Signal::Configuring, Signal::Success]);
    }

    #[tokio::test(start_paused = true)]
    async fn already_connected_short_circuits() {
        let tool = FakeTool { network: Some("Home".into()), ..Default::default() };
        tool.addresses.borrow_mut().push_back(Some(IP));
        let relay = Signals::default();

        let result = Workflow::new(&tool, &relay, 1).run(br#"{"ssid":"Home"}"#, || true).await;
        assert_eq!(result, ProvisioningResult::Connected(IP));
        assert!(tool.calls.borrow().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn rescans_once_when_not_found() {
        let tool = FakeTool::default();
        tool.associations.borrow_mut().push_back(Ok(Association::NotFound));
        tool.associations.borrow_mut().push_back(Ok(Association::NotFound));
        let relay = Signals::default();

        let result = Workflow::new(&tool, &relay, 1).run(br#"{"ssid":"Ghost"}"#, || true).await;
        assert_eq!(result, ProvisioningResult::Failed(FailureReason::ConnectionFailed));
        assert_eq!(tool.calls.borrow().iter().filter(|c| *c == "scan").count(), 1);
        assert_eq!(tool.calls.borrow().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn spawn_failure_is_cmd_fail() {
        let tool = FakeTool::default();
        tool.associations.borrow_mut().push_back(Err(()));
        let relay = Signals::default();
        let result = Workflow::new(&tool, &relay, 1).run(br#"{"ssid":"x"}"#, || true).await;
        assert_eq!(result, ProvisioningResult::Failed(FailureReason::CommandFailed));
    }

    #[tokio::test(start_paused = true)]
    async fn silent_association_is_conn_fail() {
        let tool = FakeTool::default();
        tool.associations.borrow_mut().push_back(Ok(Association::Failed(String::new())));
        let relay = Signals::default();
        let result = Workflow::new(&tool, &relay, 1).run(br#"{"ssid":"Home"}"#, || true).await;
        assert_eq!(result, ProvisioningResult::Failed(FailureReason::ConnectionFailed));
        assert_eq!(result.response().to_json(), r#"{"err":"conn fail"}"#);
        assert_eq!(tool.calls.borrow().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn other_failures_do_not_retry() {
        let tool = FakeTool::default();
        tool.associations
            .borrow_mut()
            .push_back(Ok(Association::Failed("Error: Secrets were required".into())));
        let relay = Signals::default();
        let result = Workflow::new(&tool, &relay, 1).run(br#"{"ssid":"x","pw":"bad"}"#, || true).await;
        assert_eq!(result, ProvisioningResult::Failed(FailureReason::ConnectionFailed));
        assert_eq!(tool.calls.borrow().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_aborts_before_cleanup() {
        let tool = FakeTool::default();
        tool.associations.borrow_mut().push_back(Ok(Association::Activated));
        tool.addresses.borrow_mut().push_back(Some(IP));
        let relay = Signals::default();

        let result = Workflow::new(&tool, &relay, 1).run(br#"{"ssid":"Home"}"#, || false).await;
        assert_eq!(result, ProvisioningResult::Failed(FailureReason::LinkLost));
        assert!(!tool.calls.borrow().iter().any(|c| c.starts_with("forget")));
        assert!(!relay.0.borrow().contains(&Signal::Success));
    }

    #[tokio::test(start_paused = true)]
    async fn polling_window_elapses_to_pending() {
        let tool = FakeTool::default();
        tool.associations.borrow_mut().push_back(Ok(Association::Activated));
        let relay = Signals::default();

        let start = tokio::time::Instant::now();
        let result = Workflow::new(&tool, &relay, 3).run(br#"{"ssid":"Slow"}"#, || true).await;
        assert_eq!(result, ProvisioningResult::Pending);
        assert_eq!(start.elapsed(), Duration::from_secs(3));
        assert_eq!(relay.0.borrow().last(), Some(&Signal::Pending));
        assert_eq!(result.response().to_json(), r#"{"ip":""}"#);
    }

    #[tokio::test]
    async fn bad_requests_touch_nothing() {
        let tool = FakeTool::default();
        let relay = Signals::default();
        let workflow = Workflow::new(&tool, &relay, 1);
        assert_eq!(
            workflow.run(b"not json", || true).await,
            ProvisioningResult::Failed(FailureReason::BadFormat)
        );
        assert_eq!(
            workflow.run(br#"{"pw":"x"}"#, || true).await,
            ProvisioningResult::Failed(FailureReason::BadSsid)
        );
        assert!(tool.calls.borrow().is_empty());
        assert!(relay.0.borrow().is_empty());
    }
}
