//! Configuration for a DSTC node.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $DSTC_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/dstc/config.toml
//!   3. ~/.config/dstc/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

use crate::wire::{DEFAULT_MULTICAST_GROUP, DEFAULT_MULTICAST_PORT};

/// Maximum number of concurrent peer nodes tracked by default.
pub const DEFAULT_MAX_CONNECTIONS: usize = 32;

/// Node configuration. Every field has a default, so an empty file (or no
/// file at all) yields a working single-LAN setup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DstcConfig {
    /// Node id. 0 = assign randomly at setup.
    pub node_id: u32,

    /// Upper bound on tracked peers.
    pub max_connections: usize,

    /// Multicast group for call and announcement traffic.
    pub multicast_group: String,

    /// Multicast port.
    pub multicast_port: u16,

    /// Local interface address to send/receive multicast on.
    /// Empty = any interface.
    pub multicast_iface: String,

    /// Multicast TTL. 0 = within the host only, 1 = link-local.
    pub multicast_ttl: u32,

    /// Interface address for the TCP control endpoint. Empty = 0.0.0.0.
    pub control_listen_iface: String,

    /// TCP port for the control endpoint. 0 = OS-assigned.
    pub control_listen_port: u16,

    /// Log verbosity.
    pub log_level: LogLevel,
}

impl Default for DstcConfig {
    fn default() -> Self {
        Self {
            node_id: 0,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            multicast_group: DEFAULT_MULTICAST_GROUP.to_string(),
            multicast_port: DEFAULT_MULTICAST_PORT,
            multicast_iface: String::new(),
            multicast_ttl: 1,
            control_listen_iface: String::new(),
            control_listen_port: 0,
            log_level: LogLevel::Info,
        }
    }
}

// ── Log levels ────────────────────────────────────────────────────────────────

/// Log verbosity ladder, kept nameable in config files and env vars.
///
/// Maps onto tracing filters: none→off, fatal/error→error, warning→warn,
/// info→info, comment→debug, debug→trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    None,
    Fatal,
    Error,
    Warning,
    Info,
    Comment,
    Debug,
}

impl LogLevel {
    /// The equivalent tracing filter directive.
    pub fn as_filter(self) -> &'static str {
        match self {
            LogLevel::None => "off",
            LogLevel::Fatal | LogLevel::Error => "error",
            LogLevel::Warning => "warn",
            LogLevel::Info => "info",
            LogLevel::Comment => "debug",
            LogLevel::Debug => "trace",
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(LogLevel::None),
            "fatal" => Ok(LogLevel::Fatal),
            "error" => Ok(LogLevel::Error),
            "warning" => Ok(LogLevel::Warning),
            "info" => Ok(LogLevel::Info),
            "comment" => Ok(LogLevel::Comment),
            "debug" => Ok(LogLevel::Debug),
            other => Err(format!("unknown log level '{other}'")),
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_or_tmp().join(".config"))
        .join("dstc")
}

fn home_or_tmp() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl DstcConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            DstcConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("DSTC_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Apply DSTC_* env var overrides.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("DSTC_NODE_ID") {
            if let Ok(id) = v.parse() {
                self.node_id = id;
            }
        }
        if let Ok(v) = std::env::var("DSTC_MAX_CONNECTIONS") {
            if let Ok(n) = v.parse() {
                self.max_connections = n;
            }
        }
        if let Ok(v) = std::env::var("DSTC_MULTICAST_GROUP") {
            self.multicast_group = v;
        }
        if let Ok(v) = std::env::var("DSTC_MULTICAST_PORT") {
            if let Ok(p) = v.parse() {
                self.multicast_port = p;
            }
        }
        if let Ok(v) = std::env::var("DSTC_MULTICAST_IFACE") {
            self.multicast_iface = v;
        }
        if let Ok(v) = std::env::var("DSTC_MULTICAST_TTL") {
            if let Ok(ttl) = v.parse() {
                self.multicast_ttl = ttl;
            }
        }
        if let Ok(v) = std::env::var("DSTC_CONTROL_LISTEN_IFACE") {
            self.control_listen_iface = v;
        }
        if let Ok(v) = std::env::var("DSTC_CONTROL_LISTEN_PORT") {
            if let Ok(p) = v.parse() {
                self.control_listen_port = p;
            }
        }
        if let Ok(v) = std::env::var("DSTC_LOG_LEVEL") {
            if let Ok(level) = v.parse() {
                self.log_level = level;
            }
        }
    }
}
