//! Advertising / connection lifecycle: one client at a time, until the
//! no-client timer fires, the success limit is reached or a signal arrives

use std::pin::pin;
use std::time::Duration;

use tokio::time::Instant;

use crate::context::ProcessContext;
use crate::database::Database;
use crate::error::ServerError;
use crate::link::Acceptor;
use crate::provision::{NetworkTool, Signal, StatusRelay};
use crate::radio::Advertiser;
use crate::session::{Session, SessionEnd};

/// Pause between a disconnect and advertising again
pub const RESTART_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Advertising,
    Connecting,
    Connected,
    Disconnected,
    Terminating,
}

/// Why the server stopped on its own
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    NoClient,
    SuccessLimit,
    Terminated,
}

pub struct Server<A, V, N, R> {
    ctx: ProcessContext,
    acceptor: A,
    radio: V,
    tool: N,
    relay: R,
    name: String,
    state: State,
}

impl<A, V, N, R> Server<A, V, N, R>
where
    A: Acceptor,
    V: Advertiser,
    N: NetworkTool,
    R: StatusRelay,
{
    pub fn new(ctx: ProcessContext, acceptor: A, radio: V, tool: N, relay: R, name: &str) -> Self {
        Self {
            ctx,
            acceptor,
            radio,
            tool,
            relay,
            name: name.to_string(),
            state: State::Disconnected,
        }
    }

    pub fn context(&self) -> &ProcessContext {
        &self.ctx
    }

    fn enter(&mut self, state: State) {
        if self.state != state {
            log::info!("{:?} -> {state:?}", self.state);
            self.state = state;
        }
    }

    /// Serve clients until done. The relay hears `Stopped` and then
    /// `SettingsNotify` exactly once, whichever way this returns.
    pub async fn run(&mut self) -> Result<Exit, ServerError> {
        self.relay.signal(Signal::Pending).await;
        let result = self.serve().await;

        self.enter(State::Terminating);
        if let Err(e) = self.radio.stop().await {
            log::warn!("failed to stop advertising: {e}");
        }
        match &result {
            Ok(exit) => log::info!("exiting: {exit:?}, {} successful", self.ctx.successes()),
            Err(e) => log::error!("fatal: {e}"),
        }
        self.relay.signal(Signal::Stopped).await;
        self.relay.signal(Signal::SettingsNotify).await;
        result
    }

    async fn serve(&mut self) -> Result<Exit, ServerError> {
        let timeout = self.ctx.config.no_client_timeout;
        let mut no_client = pin!(tokio::time::sleep(timeout));

        loop {
            if self.ctx.shutdown.is_requested() {
                return Ok(Exit::Terminated);
            }

            self.radio.start().await?;
            self.enter(State::Advertising);
            no_client.as_mut().reset(Instant::now() + timeout);

            self.enter(State::Connecting);
            let conn = tokio::select! {
                conn = self.acceptor.accept() => conn?,
                _ = no_client.as_mut() => {
                    log::info!("no client within {}s", timeout.as_secs());
                    return Ok(Exit::NoClient);
                }
                _ = self.ctx.shutdown.wait() => return Ok(Exit::Terminated),
            };

            if let Err(e) = self.radio.stop().await {
                log::warn!("failed to stop advertising: {e}");
            }
            self.enter(State::Connected);
            log::info!("client {} connected", conn.peer);

            let db = Database::build(&self.name)?;
            let end = Session::new(conn, db, &self.ctx, &self.tool, &self.relay).run().await;
            self.enter(State::Disconnected);
            match end {
                Ok(SessionEnd::Disconnected) => {}
                Ok(SessionEnd::Shutdown) => return Ok(Exit::Terminated),
                Err(e) => log::warn!("link error: {e}"),
            }

            if self.ctx.limit_reached() {
                return Ok(Exit::SuccessLimit);
            }
            tokio::time::sleep(RESTART_DELAY).await;
            self.radio.reset();
        }
    }
}
