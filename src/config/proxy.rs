//! Diagnostic proxy settings
//!
//! Timeouts bound how long a relay waits on the upstream service; the byte
//! limits bound memory spent on message heads and on logged body previews.

use serde::Deserialize;
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Proxy configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ProxyConfig {
    /// Interface the proxy listens on (the port comes from the command line)
    pub bind_ip: IpAddr,
    /// Upper bound on establishing the upstream connection
    pub connect_timeout_ms: u64,
    /// Upper bound on waiting for the upstream's response head
    pub exchange_timeout_ms: u64,
    /// Longest a body relay waits for the next bytes from its sender
    pub idle_timeout_ms: u64,
    /// Largest request or response head accepted
    pub max_head_bytes: usize,
    /// Body bytes kept for printing and logging per message
    pub log_body_bytes: usize,
    /// Optional JSON Lines file that receives every observed exchange
    pub capture_file: Option<PathBuf>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            bind_ip: IpAddr::from([127, 0, 0, 1]),
            connect_timeout_ms: 2_000,
            exchange_timeout_ms: 10_000,
            idle_timeout_ms: 30_000,
            max_head_bytes: 64 * 1024,
            log_body_bytes: 4 * 1024,
            capture_file: None,
        }
    }
}

impl ProxyConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn exchange_timeout(&self) -> Duration {
        Duration::from_millis(self.exchange_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    /// Create from file config with defaults
    pub fn from_file(file: Option<FileProxy>) -> anyhow::Result<Self> {
        let file = file.unwrap_or_default();
        let defaults = Self::default();

        let bind_ip = match file.bind_ip {
            Some(ip) => ip
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid [proxy].bind_ip {:?}: {}", ip, e))?,
            None => defaults.bind_ip,
        };

        Ok(Self {
            bind_ip,
            connect_timeout_ms: file
                .connect_timeout_ms
                .unwrap_or(defaults.connect_timeout_ms),
            exchange_timeout_ms: file
                .exchange_timeout_ms
                .unwrap_or(defaults.exchange_timeout_ms),
            idle_timeout_ms: file.idle_timeout_ms.unwrap_or(defaults.idle_timeout_ms),
            max_head_bytes: file.max_head_bytes.unwrap_or(defaults.max_head_bytes),
            log_body_bytes: file.log_body_bytes.unwrap_or(defaults.log_body_bytes),
            capture_file: file.capture_file.map(PathBuf::from),
        })
    }
}

/// Proxy settings as loaded from config file
#[derive(Debug, Deserialize, Default)]
pub struct FileProxy {
    pub bind_ip: Option<String>,
    pub connect_timeout_ms: Option<u64>,
    pub exchange_timeout_ms: Option<u64>,
    pub idle_timeout_ms: Option<u64>,
    pub max_head_bytes: Option<usize>,
    pub log_body_bytes: Option<usize>,
    pub capture_file: Option<String>,
}
