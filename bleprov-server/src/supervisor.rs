//! Status relay backed by the supervisor executable

use std::path::PathBuf;

use tokio::process::Command;

use crate::provision::{Signal, StatusRelay};

pub struct Supervisor {
    path: PathBuf,
}

impl Supervisor {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl StatusRelay for Supervisor {
    async fn signal(&self, signal: Signal) {
        if !self.path.exists() {
            log::warn!("{} not found, skipping {:?}", self.path.display(), signal);
            return;
        }
        let args = signal.args();
        log::debug!("{} {}", self.path.display(), args.join(" "));
        match Command::new(&self.path).args(args).status().await {
            Ok(status) if status.success() => {}
            Ok(status) => log::warn!("supervisor {} exited with {status}", args.join(" ")),
            Err(e) => log::warn!("failed to run {}: {e}", self.path.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_executable_is_skipped() {
        let relay = Supervisor::new("/nonexistent/bleprov-supervisor");
        relay.signal(Signal::Stopped).await;
    }

    #[test]
    fn signal_arguments() {
        assert_eq!(Signal::Stopped.args(), &["led", "sys_wifi_config_stopped"]);
        assert_eq!(Signal::SettingsNotify.args(), &["setting", "wifi_notify"]);
    }
}
