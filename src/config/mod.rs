//! Configuration for the evaluation service and its admin tool
//!
//! Configuration is loaded in order of precedence:
//! 1. Command-line flags (applied by the binaries)
//! 2. Environment variables
//! 3. Config file (~/.config/evaluation/config.toml)
//! 4. Built-in defaults (lowest priority)

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;

use crate::protocol::QueryId;

// ─────────────────────────────────────────────────────────────────────────────
// Submodules
// ─────────────────────────────────────────────────────────────────────────────

mod observability;
mod proxy;
mod serialization;

#[cfg(test)]
mod tests;

// ─────────────────────────────────────────────────────────────────────────────
// Re-exports (maintain public API)
// ─────────────────────────────────────────────────────────────────────────────

pub use observability::{FileLogging, LogRotation, LoggingConfig};
pub use proxy::{FileProxy, ProxyConfig};

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

/// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// ─────────────────────────────────────────────────────────────────────────────
// Application Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Application configuration
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Address the evaluation service listens on
    pub bind_addr: SocketAddr,

    /// Listen backlog for the service socket
    pub backlog: u32,

    /// First identifier GetQueryID hands out
    pub first_query_id: QueryId,

    /// Largest num_suggestions GetAutofill accepts
    pub max_suggestions: usize,

    /// Directory for the report journal (None = memory only)
    pub data_dir: Option<PathBuf>,

    /// Service address the admin tool and proxy talk to
    pub upstream: SocketAddr,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Diagnostic proxy settings
    pub proxy: ProxyConfig,
}

impl Default for Config {
    fn default() -> Self {
        let addr: SocketAddr = SocketAddr::from(([127, 0, 0, 1], 8080));
        Self {
            bind_addr: addr,
            backlog: 10,
            first_query_id: 1,
            max_suggestions: 1000,
            data_dir: None,
            upstream: addr,
            logging: LoggingConfig::default(),
            proxy: ProxyConfig::default(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// File Configuration (deserialization layer)
// ─────────────────────────────────────────────────────────────────────────────

/// Config file structure (subset of Config that makes sense to persist)
#[derive(Debug, Deserialize, Default)]
pub(crate) struct FileConfig {
    pub bind_addr: Option<String>,
    pub backlog: Option<i64>,
    pub first_query_id: Option<QueryId>,
    pub max_suggestions: Option<usize>,
    pub data_dir: Option<String>,
    pub upstream: Option<String>,

    /// Optional [logging] section
    pub logging: Option<FileLogging>,

    /// Optional [proxy] section
    pub proxy: Option<FileProxy>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Configuration Loading
// ─────────────────────────────────────────────────────────────────────────────

impl Config {
    /// Get the config file path: ~/.config/evaluation/config.toml
    /// Uses Unix-style ~/.config on all platforms for consistency
    pub fn config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|p| p.join(".config").join("evaluation").join("config.toml"))
    }

    /// Create config file with defaults if it doesn't exist
    /// Called during service startup to help users discover configuration options
    pub fn ensure_config_exists() {
        let Some(path) = Self::config_path() else {
            return;
        };

        // Don't overwrite existing config
        if path.exists() {
            return;
        }

        if let Some(parent) = path.parent() {
            if std::fs::create_dir_all(parent).is_err() {
                return; // Config is optional
            }
        }

        // Config::default().to_toml() is the single source of truth
        let _ = std::fs::write(&path, Self::default().to_toml());
    }

    /// Load file config if it exists
    ///
    /// A missing file means defaults. A file that exists but cannot be read or
    /// parsed is an error: silently falling back would hide the broken file.
    fn load_file_config() -> Result<FileConfig> {
        let Some(path) = Self::config_path() else {
            return Ok(FileConfig::default());
        };

        match std::fs::read_to_string(&path) {
            Ok(contents) => toml::from_str(&contents).with_context(|| {
                format!(
                    "Failed to parse {} (check quoting, booleans and section names)",
                    path.display()
                )
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(FileConfig::default()),
            Err(e) => Err(e).with_context(|| format!("Cannot read {}", path.display())),
        }
    }

    /// Load configuration: env vars > file > defaults
    pub fn from_env() -> Result<Self> {
        let file = Self::load_file_config()?;
        Self::from_sources(file, |key| std::env::var(key).ok())
    }

    /// Re-render an existing config file in the current layout
    ///
    /// Only values present in the file are carried over, so environment
    /// overrides never end up written to disk.
    pub fn refresh_file_toml(contents: &str) -> Result<String> {
        let file: FileConfig =
            toml::from_str(contents).context("Failed to parse existing config")?;
        Ok(Self::from_sources(file, |_| None)?.to_toml())
    }

    /// Merge a parsed file with an environment lookup
    pub(crate) fn from_sources(
        file: FileConfig,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let defaults = Self::default();

        // Bind address: env > file > default
        let bind_addr = match env("EVALUATION_BIND").or(file.bind_addr) {
            Some(raw) => raw
                .parse()
                .with_context(|| format!("Invalid bind address {:?}", raw))?,
            None => defaults.bind_addr,
        };

        // Upstream for the admin tool: env > file > default
        let upstream = match env("EVALUATION_UPSTREAM").or(file.upstream) {
            Some(raw) => raw
                .parse()
                .with_context(|| format!("Invalid upstream address {:?}", raw))?,
            None => defaults.upstream,
        };

        // Data directory: env > file > none
        let data_dir = env("EVALUATION_DATA_DIR")
            .or(file.data_dir)
            .filter(|d| !d.trim().is_empty())
            .map(PathBuf::from);

        let backlog = match file.backlog {
            Some(b) => validate_backlog(b)?,
            None => defaults.backlog,
        };

        let first_query_id = file.first_query_id.unwrap_or(defaults.first_query_id);
        let max_suggestions = file.max_suggestions.unwrap_or(defaults.max_suggestions);

        let logging = LoggingConfig::from_file(file.logging);
        let proxy = ProxyConfig::from_file(file.proxy)?;

        Ok(Self {
            bind_addr,
            backlog,
            first_query_id,
            max_suggestions,
            data_dir,
            upstream,
            logging,
            proxy,
        })
    }
}

/// The listen backlog must be positive
pub fn validate_backlog(backlog: i64) -> Result<u32> {
    if backlog < 1 {
        bail!("Backlog size must be positive, got {}", backlog);
    }
    u32::try_from(backlog).with_context(|| format!("Backlog size {} is too large", backlog))
}
