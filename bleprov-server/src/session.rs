//! Session: services a single connected client

use std::time::Duration;

use bleprov_proto::ProvisionResponse;
use bleprov_proto::att::ErrorCode;
use bleprov_proto::ble::cccd;

use crate::bearer::{AttServer, GattHandler};
use crate::context::ProcessContext;
use crate::database::{AttrId, Database};
use crate::link::{Connection, Link};
use crate::notify::{self, Subscription};
use crate::provision::{NetworkTool, StatusRelay, Workflow};
use crate::reassembly::{Outcome, Reassembler, WriteKind};

/// Wait before answering an acknowledged write, so the client has settled
/// after the write response
pub const RESPONSE_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delivery {
    /// Acknowledged writes: re-check the link after a short delay
    Deferred,
    /// Write commands: send as soon as the result is ready
    Immediate,
}

#[derive(Debug)]
enum Job {
    Process(Vec<u8>, Delivery),
    Respond(ProvisionResponse, Delivery),
}

/// Attribute callbacks for one connection
#[derive(Debug, Default)]
struct Handler {
    reassembler: Reassembler,
    subscription: Subscription,
    service_changed_cccd: u16,
    job: Option<Job>,
}

impl Handler {
    fn cccd_value(value: &[u8]) -> Result<u16, ErrorCode> {
        match value {
            [lo, hi] => Ok(u16::from_le_bytes([*lo, *hi])),
            _ => Err(ErrorCode::InvalidAttributeValueLength),
        }
    }

    fn wifi_write(&mut self, kind: WriteKind, offset: u16, value: &[u8]) {
        log::debug!("{kind:?} offset={offset} value={value:02x?}");
        let delivery = match kind {
            WriteKind::Command => Delivery::Immediate,
            _ => Delivery::Deferred,
        };
        match self.reassembler.write(kind, offset, value) {
            Outcome::Message(message) => self.job = Some(Job::Process(message, delivery)),
            Outcome::Empty => self.job = Some(Job::Respond(ProvisionResponse::pending(), delivery)),
            Outcome::Pending => log::debug!("buffered {} bytes", self.reassembler.buffered()),
            Outcome::Ignored => log::debug!("ignoring {kind:?}"),
            Outcome::Overflow => log::warn!("write buffer overflow, message dropped"),
        }
    }
}

impl GattHandler for Handler {
    fn read(&mut self, attr: AttrId) -> Result<Vec<u8>, ErrorCode> {
        match attr {
            AttrId::WifiConfigCccd => Ok(vec![self.subscription.is_notifying() as u8, 0]),
            AttrId::ServiceChangedCccd => Ok(self.service_changed_cccd.to_le_bytes().to_vec()),
            AttrId::WifiConfig | AttrId::ServiceChanged => Err(ErrorCode::ReadNotPermitted),
        }
    }

    fn write(
        &mut self,
        attr: AttrId,
        kind: WriteKind,
        offset: u16,
        value: &[u8],
    ) -> Result<(), ErrorCode> {
        match attr {
            AttrId::WifiConfig => {
                self.wifi_write(kind, offset, value);
                Ok(())
            }
            AttrId::WifiConfigCccd | AttrId::ServiceChangedCccd
                if matches!(kind, WriteKind::Prepare | WriteKind::Execute) =>
            {
                Err(ErrorCode::RequestNotSupported)
            }
            AttrId::WifiConfigCccd => {
                let bits = Self::cccd_value(value)?;
                let enabled = bits & (cccd::NOTIFY | cccd::INDICATE) != 0;
                log::info!("notifications {}", if enabled { "enabled" } else { "disabled" });
                self.subscription.set(enabled);
                Ok(())
            }
            AttrId::ServiceChangedCccd => {
                self.service_changed_cccd = Self::cccd_value(value)?;
                Ok(())
            }
            AttrId::ServiceChanged => Err(ErrorCode::WriteNotPermitted),
        }
    }

    fn cancel_prepared(&mut self) {
        log::debug!("prepared writes cancelled");
        self.reassembler.cancel();
    }
}

/// How a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    Disconnected,
    Shutdown,
}

pub struct Session<'a, L, N, R> {
    conn: Connection<L>,
    att: AttServer,
    handler: Handler,
    wifi_handle: u16,
    ctx: &'a ProcessContext,
    workflow: Workflow<'a, N, R>,
}

impl<'a, L: Link, N: NetworkTool, R: StatusRelay> Session<'a, L, N, R> {
    pub fn new(
        conn: Connection<L>,
        db: Database,
        ctx: &'a ProcessContext,
        tool: &'a N,
        relay: &'a R,
    ) -> Self {
        // build() always allocates the WiFi characteristic
        let wifi_handle = db.handle_of(AttrId::WifiConfig).unwrap_or_default();
        Self {
            conn,
            att: AttServer::new(db, ctx.config.mtu),
            handler: Handler::default(),
            wifi_handle,
            ctx,
            workflow: Workflow::new(tool, relay, ctx.config.poll_attempts),
        }
    }

    pub async fn run(mut self) -> std::io::Result<SessionEnd> {
        loop {
            tokio::select! {
                pdu = self.conn.incoming.recv() => {
                    let Some(pdu) = pdu else {
                        log::info!("client {} disconnected", self.conn.peer);
                        return Ok(SessionEnd::Disconnected);
                    };
                    self.handle_pdu(&pdu).await?;
                }
                _ = self.ctx.shutdown.wait() => {
                    return Ok(SessionEnd::Shutdown);
                }
            }
        }
    }

    async fn handle_pdu(&mut self, pdu: &[u8]) -> std::io::Result<()> {
        log::debug!("rx {pdu:02x?}");
        if let Some(rsp) = self.att.handle(pdu, &mut self.handler) {
            log::debug!("tx {rsp:02x?}");
            self.conn.link.send(&rsp).await?;
        }
        if let Some(job) = self.handler.job.take() {
            self.run_job(job).await?;
        }
        Ok(())
    }

    async fn run_job(&mut self, job: Job) -> std::io::Result<()> {
        let (response, delivery) = match job {
            Job::Respond(response, delivery) => (response, delivery),
            Job::Process(message, delivery) => {
                if !self.conn.link.is_connected() {
                    log::warn!("client gone before the request could be processed");
                    return Ok(());
                }
                let link = &self.conn.link;
                let result = self.workflow.run(&message, || link.is_connected()).await;
                if result.is_success() {
                    let n = self.ctx.record_success();
                    log::info!("provisioning succeeded ({n} so far)");
                }
                (result.response(), delivery)
            }
        };
        self.respond(&response, delivery).await
    }

    async fn respond(&self, response: &ProvisionResponse, delivery: Delivery) -> std::io::Result<()> {
        let json = response.to_json();
        if delivery == Delivery::Deferred {
            if !self.conn.link.is_connected() {
                log::warn!("client gone, dropping {json}");
                return Ok(());
            }
            tokio::time::sleep(RESPONSE_DELAY).await;
        }
        let sent = notify::deliver(
            &self.conn.link,
            &self.handler.subscription,
            self.wifi_handle,
            self.att.mtu(),
            json.as_bytes(),
        )
        .await?;
        if sent > 0 {
            log::info!("sent {json}");
        } else {
            log::warn!("could not deliver {json}");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cccd_toggles_subscription() {
        let mut h = Handler::default();
        assert_eq!(h.read(AttrId::WifiConfigCccd), Ok(vec![0, 0]));

        h.write(AttrId::WifiConfigCccd, WriteKind::Request, 0, &[0x01, 0x00]).unwrap();
        assert!(h.subscription.is_notifying());
        assert_eq!(h.read(AttrId::WifiConfigCccd), Ok(vec![1, 0]));

        // indications count as a subscription too
        h.write(AttrId::WifiConfigCccd, WriteKind::Request, 0, &[0x00, 0x00]).unwrap();
        h.write(AttrId::WifiConfigCccd, WriteKind::Request, 0, &[0x02, 0x00]).unwrap();
        assert!(h.subscription.is_notifying());

        h.write(AttrId::WifiConfigCccd, WriteKind::Command, 0, &[0x00, 0x00]).unwrap();
        assert!(!h.subscription.is_notifying());
    }

    #[test]
    fn cccd_requires_two_bytes() {
        let mut h = Handler::default();
        assert_eq!(
            h.write(AttrId::WifiConfigCccd, WriteKind::Request, 0, &[0x01]),
            Err(ErrorCode::InvalidAttributeValueLength)
        );
        assert_eq!(
            h.write(AttrId::ServiceChangedCccd, WriteKind::Request, 0, &[0x02, 0x00, 0x00]),
            Err(ErrorCode::InvalidAttributeValueLength)
        );
        h.write(AttrId::ServiceChangedCccd, WriteKind::Request, 0, &[0x02, 0x00]).unwrap();
        assert_eq!(h.read(AttrId::ServiceChangedCccd), Ok(vec![0x02, 0x00]));
        assert!(!h.subscription.is_notifying());
    }

    #[test]
    fn wifi_writes_queue_jobs() {
        let mut h = Handler::default();
        h.write(AttrId::WifiConfig, WriteKind::Command, 0, b"{\"ssid\"").unwrap();
        assert!(h.job.is_none());
        h.write(AttrId::WifiConfig, WriteKind::Command, 0, b":\"a\"}\n").unwrap();
        assert!(matches!(
            h.job.take(),
            Some(Job::Process(m, Delivery::Immediate)) if m == b"{\"ssid\":\"a\"}"
        ));

        h.write(AttrId::WifiConfig, WriteKind::Request, 3, b"{}").unwrap();
        assert!(matches!(h.job.take(), Some(Job::Respond(_, Delivery::Deferred))));

        h.write(AttrId::WifiConfig, WriteKind::Execute, 0, &[]).unwrap();
        assert!(matches!(h.job.take(), Some(Job::Respond(r, _)) if r == ProvisionResponse::pending()));
    }

    #[test]
    fn wifi_value_is_write_only() {
        let mut h = Handler::default();
        assert_eq!(h.read(AttrId::WifiConfig), Err(ErrorCode::ReadNotPermitted));
        assert_eq!(
            h.write(AttrId::WifiConfigCccd, WriteKind::Prepare, 0, &[1, 0]),
            Err(ErrorCode::RequestNotSupported)
        );
    }
}
