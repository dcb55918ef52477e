//! Process-lifetime state shared by the main loop and the session

use std::sync::atomic::{AtomicU32, Ordering};

use crate::config::ServerConfig;
use crate::signals::Shutdown;

pub struct ProcessContext {
    pub config: ServerConfig,
    pub shutdown: Shutdown,
    successes: AtomicU32,
}

impl ProcessContext {
    pub fn new(config: ServerConfig, shutdown: Shutdown) -> Self {
        Self { config, shutdown, successes: AtomicU32::new(0) }
    }

    pub fn record_success(&self) -> u32 {
        self.successes.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn successes(&self) -> u32 {
        self.successes.load(Ordering::SeqCst)
    }

    /// True once the configured number of provisionings has succeeded
    pub fn limit_reached(&self) -> bool {
        self.successes() >= self.config.success_limit
    }
}
