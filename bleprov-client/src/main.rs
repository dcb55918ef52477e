//! Companion tool for bleprov devices
//!
//! Scans for devices and sends WiFi credentials over BLE, then prints the
//! address (or error) the device reports back.

use std::time::Duration;

use bleprov_proto::ble::{
    DEFAULT_MTU, DEVICE_NAME_PREFIX, NOTIFY_HEADER_LEN, SERVICE_UUID_128, SHORT_RESPONSE_LIMIT,
    TERMINATOR, WIFI_CONFIG_UUID_128,
};
use bleprov_proto::{CredentialRequest, ProvisionResponse};
use btleplug::api::{Central, Manager as _, Peripheral as _, ScanFilter, WriteType};
use btleplug::platform::{Adapter, Manager, Peripheral};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use uuid::Uuid;

const SERVICE_UUID: Uuid = Uuid::from_u128(SERVICE_UUID_128);
const WIFI_CONFIG_UUID: Uuid = Uuid::from_u128(WIFI_CONFIG_UUID_128);

/// Association plus address polling can take a while on the device
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(name = "bleprov")]
#[command(about = "Send WiFi credentials to bleprov devices over BLE")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan for nearby devices
    Scan {
        /// Scan duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Send WiFi credentials to a device
    Provision {
        /// Network name
        #[arg(long)]
        ssid: String,
        /// Network password; omit for open networks
        #[arg(long)]
        password: Option<String>,
        /// Device name or address to connect to
        #[arg(short, long)]
        device: Option<String>,
        /// Send the request as MTU-sized write commands
        #[arg(long)]
        without_response: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let manager = Manager::new().await?;
    let adapters = manager.adapters().await?;
    let adapter = adapters.into_iter().next().ok_or("No Bluetooth adapter found")?;

    match cli.command {
        Commands::Scan { duration } => scan_devices(&adapter, duration).await?,
        Commands::Provision { ssid, password, device, without_response } => {
            let request = CredentialRequest { ssid, pw: password };
            provision_device(&adapter, device, &request, without_response).await?;
        }
    }

    Ok(())
}

fn is_provisioning_device(name: &str, services: &[Uuid]) -> bool {
    name.starts_with(DEVICE_NAME_PREFIX) || services.contains(&SERVICE_UUID)
}

async fn scan_devices(adapter: &Adapter, duration: u64) -> Result<(), Box<dyn std::error::Error>> {
    println!("Scanning ({} seconds)...", duration);

    adapter.start_scan(ScanFilter::default()).await?;
    tokio::time::sleep(Duration::from_secs(duration)).await;

    let peripherals = adapter.peripherals().await?;

    println!("\nFound {} devices:", peripherals.len());
    for peripheral in peripherals {
        if let Some(props) = peripheral.properties().await? {
            let name = props.local_name.unwrap_or_else(|| "Unknown".to_string());
            let rssi = props.rssi.map(|r| format!("{} dBm", r)).unwrap_or_else(|| "N/A".to_string());
            let marker = if is_provisioning_device(&name, &props.services) { " [WIFI]" } else { "" };
            println!("  {} ({}) RSSI: {}{}", name, peripheral.address(), rssi, marker);
        }
    }

    adapter.stop_scan().await?;
    Ok(())
}

async fn find_device(
    adapter: &Adapter,
    target: Option<String>,
) -> Result<Peripheral, Box<dyn std::error::Error>> {
    println!("Scanning for provisioning devices...");

    adapter.start_scan(ScanFilter { services: vec![SERVICE_UUID] }).await?;
    tokio::time::sleep(Duration::from_secs(5)).await;

    for peripheral in adapter.peripherals().await? {
        if let Some(props) = peripheral.properties().await? {
            let name = props.local_name.unwrap_or_default();
            let addr = peripheral.address().to_string();

            let matches = match &target {
                Some(t) => name.contains(t.as_str()) || addr.eq_ignore_ascii_case(t),
                None => is_provisioning_device(&name, &props.services),
            };

            if matches {
                adapter.stop_scan().await?;
                println!("Found device: {} ({})", name, addr);
                return Ok(peripheral);
            }
        }
    }

    adapter.stop_scan().await?;
    Err("No provisioning device found".into())
}

/// Reassembles the notification stream into one response
#[derive(Debug, Default)]
struct ResponseCollector {
    data: Vec<u8>,
}

impl ResponseCollector {
    /// Add one notification; returns the complete response once the
    /// terminator arrives or a short single-packet response is seen
    fn push(&mut self, packet: &[u8]) -> Option<Vec<u8>> {
        if self.data.is_empty() && packet.len() <= SHORT_RESPONSE_LIMIT && !packet.contains(&TERMINATOR)
        {
            if let Ok(text) = std::str::from_utf8(packet) {
                if text.starts_with('{') && text.ends_with('}') {
                    return Some(packet.to_vec());
                }
            }
        }
        self.data.extend_from_slice(packet);
        let end = self.data.iter().position(|b| *b == TERMINATOR)?;
        Some(self.data[..end].to_vec())
    }
}

async fn provision_device(
    adapter: &Adapter,
    target: Option<String>,
    request: &CredentialRequest,
    without_response: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let device = find_device(adapter, target).await?;

    println!("Connecting...");
    device.connect().await?;
    println!("Connected!");

    println!("Discovering services...");
    device.discover_services().await?;

    let wifi_char = device
        .characteristics()
        .into_iter()
        .find(|c| c.uuid == WIFI_CONFIG_UUID)
        .ok_or("WiFi configuration characteristic not found")?;

    device.subscribe(&wifi_char).await?;
    let mut notifications = device.notifications().await?;

    println!("Sending WiFi credentials for {:?}...", request.ssid);
    let line = request.to_line()?;
    if without_response {
        let chunk = DEFAULT_MTU as usize - NOTIFY_HEADER_LEN;
        for part in line.chunks(chunk) {
            device.write(&wifi_char, part, WriteType::WithoutResponse).await?;
        }
    } else {
        device.write(&wifi_char, &line, WriteType::WithResponse).await?;
    }

    println!("Waiting for the device to join the network...");
    let mut collector = ResponseCollector::default();
    let wait = async {
        while let Some(n) = notifications.next().await {
            if n.uuid != WIFI_CONFIG_UUID {
                continue;
            }
            if let Some(message) = collector.push(&n.value) {
                return Some(message);
            }
        }
        None
    };
    let message = tokio::time::timeout(RESPONSE_TIMEOUT, wait)
        .await
        .map_err(|_| "Timed out waiting for a response")?
        .ok_or("Device disconnected before responding")?;

    match ProvisionResponse::from_bytes(&message)? {
        ProvisionResponse::Ip { ip } if ip.is_empty() => {
            println!("Credentials accepted, no address yet. Try again shortly.")
        }
        ProvisionResponse::Ip { ip } => println!("Connected! Device address: {}", ip),
        ProvisionResponse::Err { err } => println!("Provisioning failed: {}", err),
    }

    let _ = device.disconnect().await;
    Ok(())
}
