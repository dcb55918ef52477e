//! NetworkManager (`nmcli`) and iproute2 backed network tool

use std::net::Ipv4Addr;
use std::process::Output;

use tokio::process::Command;

use crate::error::CommandError;
use crate::provision::{Association, NetworkTool};

const NMCLI: &str = "nmcli";
const WIFI_PROFILE_TYPE: &str = "802-11-wireless";
const SUCCESS_MARKER: &str = "successfully activated";
const NOT_FOUND_MARKER: &str = "No network with SSID";

pub struct Nmcli {
    interface: String,
}

impl Nmcli {
    pub fn new(interface: impl Into<String>) -> Self {
        Self { interface: interface.into() }
    }

    async fn run(program: &str, args: &[&str]) -> Result<Output, CommandError> {
        Command::new(program)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| CommandError::Spawn { program: program.to_string(), source })
    }

    /// Stdout of a query; failures are logged and read as "nothing"
    async fn query(program: &str, args: &[&str]) -> Option<String> {
        match Self::run(program, args).await {
            Ok(out) => Some(String::from_utf8_lossy(&out.stdout).into_owned()),
            Err(e) => {
                log::warn!("{e}");
                None
            }
        }
    }
}

impl NetworkTool for Nmcli {
    async fn associate(
        &self,
        ssid: &str,
        password: Option<&str>,
    ) -> Result<Association, CommandError> {
        let mut args = vec!["device", "wifi", "connect", ssid];
        if let Some(pw) = password {
            args.extend(["password", pw]);
        }
        args.extend(["ifname", self.interface.as_str()]);

        let out = Self::run(NMCLI, &args).await?;
        Ok(association_result(&out))
    }

    async fn current_network(&self) -> Option<String> {
        let out = Self::query(NMCLI, &["-t", "-f", "active,ssid", "dev", "wifi"]).await?;
        parse_active_ssid(&out)
    }

    async fn current_address(&self) -> Option<Ipv4Addr> {
        let out = Self::query("ip", &["-4", "addr", "show", self.interface.as_str()]).await?;
        parse_inet_address(&out)
    }

    async fn scan(&self) {
        let args = ["dev", "wifi", "list", "ifname", self.interface.as_str()];
        if let Some(out) = Self::query(NMCLI, &args).await {
            for line in out.lines() {
                log::debug!("scan: {line}");
            }
        }
    }

    async fn forget_profiles_except(&self, ssid: &str) {
        let Some(out) = Self::query(NMCLI, &["-t", "-f", "name,type", "connection", "show"]).await
        else {
            return;
        };
        for name in parse_wifi_profiles(&out) {
            if name == ssid {
                continue;
            }
            log::info!("removing stale WiFi profile {name:?}");
            match Self::run(NMCLI, &["connection", "delete", name.as_str()]).await {
                Ok(o) if !o.status.success() => {
                    log::warn!("failed to delete profile {name:?}: {}", first_line(&o).unwrap_or_default())
                }
                Ok(_) => {}
                Err(e) => log::warn!("{e}"),
            }
        }
    }
}

/// First non-empty line of stdout, falling back to stderr
fn first_line(out: &Output) -> Option<String> {
    [&out.stdout, &out.stderr]
        .into_iter()
        .find_map(|s| {
            String::from_utf8_lossy(s)
                .lines()
                .map(str::trim)
                .find(|l| !l.is_empty())
                .map(str::to_string)
        })
}

/// Silent output counts as a failed association, not a missing tool
pub fn association_result(out: &Output) -> Association {
    match first_line(out) {
        Some(line) => {
            log::debug!("nmcli: {line} (exit {:?})", out.status.code());
            classify_association(&line, out.status.success())
        }
        None => {
            log::warn!("nmcli printed nothing (exit {:?})", out.status.code());
            Association::Failed(String::new())
        }
    }
}

pub fn classify_association(line: &str, exit_ok: bool) -> Association {
    if line.contains(SUCCESS_MARKER) && exit_ok {
        Association::Activated
    } else if line.contains(NOT_FOUND_MARKER) {
        Association::NotFound
    } else {
        Association::Failed(line.to_string())
    }
}

/// Undo nmcli terse-mode escaping of `:` and `\`
fn unescape(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    let mut chars = field.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Split a terse-mode line on unescaped colons
fn split_terse(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut escaped = false;
    for c in line.chars() {
        match c {
            _ if escaped => {
                current.push('\\');
                current.push(c);
                escaped = false;
            }
            '\\' => escaped = true,
            ':' => fields.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    fields.push(current);
    fields.iter().map(|f| unescape(f)).collect()
}

/// `nmcli -t -f active,ssid dev wifi` -> SSID of the `yes` row
pub fn parse_active_ssid(output: &str) -> Option<String> {
    output.lines().find_map(|line| {
        let fields = split_terse(line.trim_end());
        match fields.as_slice() {
            [active, ssid] if active == "yes" && !ssid.is_empty() => Some(ssid.clone()),
            _ => None,
        }
    })
}

/// `ip -4 addr show <iface>` -> first inet address
pub fn parse_inet_address(output: &str) -> Option<Ipv4Addr> {
    output.lines().find_map(|line| {
        let mut words = line.split_whitespace();
        if words.next()? != "inet" {
            return None;
        }
        let cidr = words.next()?;
        let addr = cidr.split('/').next()?;
        addr.parse().ok()
    })
}

/// `nmcli -t -f name,type connection show` -> names of WiFi profiles
pub fn parse_wifi_profiles(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| {
            let fields = split_terse(line.trim_end());
            match fields.as_slice() {
                [name, kind] if kind == WIFI_PROFILE_TYPE => Some(name.clone()),
                _ => None,
            }
        })
        .collect()
}
