use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use bleprov_server::config::{DEFAULT_SUPERVISOR, DEFAULT_TIMEOUT_SECS};
use bleprov_server::listener::L2capAcceptor;
use bleprov_server::nmcli::Nmcli;
use bleprov_server::radio::HciRadio;
use bleprov_server::supervisor::Supervisor;
use bleprov_server::{
    ProcessContext, Server, ServerConfig, ServerError, Shutdown, Signal, StatusRelay, signals,
};

#[derive(clap::Parser)]
#[command(name = "bleprov-server")]
#[command(about = "Provision WiFi credentials over Bluetooth LE")]
struct Cli {
    /// Exit if no client connects within this many seconds
    #[arg(short, long, default_value_t = DEFAULT_TIMEOUT_SECS, value_parser = clap::value_parser!(u64).range(1..))]
    timeout: u64,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Exit after this many successful provisionings
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    success_limit: u32,

    /// Address polls (one per second) after a successful association
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    poll_attempts: u32,

    /// Wireless interface to configure
    #[arg(long, default_value = "wlan0")]
    interface: String,

    /// HCI controller index
    #[arg(long, default_value_t = 0)]
    hci: u16,

    /// Receive MTU offered to clients
    #[arg(long, default_value_t = 23, value_parser = clap::value_parser!(u16).range(23..))]
    mtu: u16,

    /// Status relay executable
    #[arg(long, default_value = DEFAULT_SUPERVISOR)]
    supervisor: PathBuf,
}

impl Cli {
    fn config(&self) -> ServerConfig {
        ServerConfig {
            no_client_timeout: Duration::from_secs(self.timeout),
            success_limit: self.success_limit,
            poll_attempts: self.poll_attempts,
            interface: self.interface.clone(),
            hci_index: self.hci,
            mtu: self.mtu,
            supervisor: self.supervisor.clone(),
        }
    }
}

fn init_logging(verbose: bool) {
    let level = if verbose { log::LevelFilter::Debug } else { log::LevelFilter::Info };
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .filter_module("bleprov_server", level)
        .parse_default_env()
        .init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli: Cli = clap::Parser::parse();
    init_logging(cli.verbose);
    let config = cli.config();
    let relay = Supervisor::new(&config.supervisor);
    let tool = Nmcli::new(config.interface.clone());

    let (ctx, radio, name) = match startup(config).await {
        Ok(parts) => parts,
        Err(e) => {
            log::error!("{e}");
            relay.signal(Signal::Stopped).await;
            relay.signal(Signal::SettingsNotify).await;
            return ExitCode::FAILURE;
        }
    };

    // the server reports its own exit to the relay
    let mut server = Server::new(ctx, L2capAcceptor::new(), radio, tool, relay, name);
    match server.run().await {
        Ok(exit) => {
            log::info!("done: {exit:?}");
            ExitCode::SUCCESS
        }
        Err(_) => ExitCode::FAILURE,
    }
}

async fn startup(
    config: ServerConfig,
) -> Result<(ProcessContext, HciRadio, &'static str), ServerError> {
    let shutdown = Shutdown::new();
    signals::install(shutdown.clone()).map_err(ServerError::Signals)?;

    let name = bleprov_server::device_name(&config.interface).await;
    let radio = HciRadio::open(config.hci_index, name)?;
    Ok((ProcessContext::new(config, shutdown), radio, name))
}
