use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ProxyError;
use crate::request::MessageLimits;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl Default for LogLevel {
    fn default() -> Self {
        LogLevel::Info
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "trace"),
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

impl Default for LogFormat {
    fn default() -> Self {
        LogFormat::Text
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: LogLevel,
    #[serde(default)]
    pub format: LogFormat,
}

/// Which staleness predicate the local-origin forwarder applies to cached payloads.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum FreshnessKind {
    CacheControl,
    AlwaysFresh,
    Parity,
}

impl Default for FreshnessKind {
    fn default() -> Self {
        FreshnessKind::CacheControl
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8888))
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("./cache")
}

fn default_local_origin_addr() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_local_origin_hostnames() -> Vec<String> {
    vec!["localhost".to_string()]
}

fn default_uri_size_limit() -> u64 {
    32 * 1024
}

fn default_request_timeout() -> u64 {
    30
}

fn default_tunnel_idle_timeout() -> u64 {
    300
}

fn default_max_connections() -> usize {
    1000
}

fn default_listen_backlog() -> u32 {
    1024
}

fn default_max_header_size() -> usize {
    16 * 1024 // 16KB default header size limit
}

fn default_max_body_size() -> usize {
    16 * 1024 * 1024
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
    /// Maximum number of resident cache entries. Must be positive.
    pub cache_capacity: usize,
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    /// `host:port` of the managed local origin.
    #[serde(default = "default_local_origin_addr")]
    pub local_origin_addr: String,
    /// Additional Host names routed to the local origin besides loopback addresses.
    #[serde(default = "default_local_origin_hostnames")]
    pub local_origin_hostnames: Vec<String>,
    /// Requests for `/<n>` with `n >= uri_size_limit` are rejected as too long.
    #[serde(default = "default_uri_size_limit")]
    pub uri_size_limit: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_tunnel_idle_timeout")]
    pub tunnel_idle_timeout_secs: u64,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default = "default_listen_backlog")]
    pub listen_backlog: u32,
    #[serde(default = "default_max_header_size")]
    pub max_header_size: usize,
    /// Largest request body, or buffered local-origin response body, accepted.
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,
    #[serde(default)]
    pub freshness: FreshnessKind,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            cache_capacity: 5,
            cache_dir: default_cache_dir(),
            local_origin_addr: default_local_origin_addr(),
            local_origin_hostnames: default_local_origin_hostnames(),
            uri_size_limit: default_uri_size_limit(),
            request_timeout_secs: default_request_timeout(),
            tunnel_idle_timeout_secs: default_tunnel_idle_timeout(),
            max_connections: default_max_connections(),
            listen_backlog: default_listen_backlog(),
            max_header_size: default_max_header_size(),
            max_body_size: default_max_body_size(),
            freshness: FreshnessKind::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self, ProxyError> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| ProxyError::Config(format!("Invalid configuration file {}: {}", path, e)))
    }

    pub fn to_file(&self, path: &str) -> Result<(), ProxyError> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ProxyError::Config(format!("Failed to serialize configuration: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ProxyError> {
        if self.cache_capacity == 0 {
            return Err(ProxyError::Config("cache_capacity must be a positive integer".to_string()));
        }
        if self.max_connections == 0 {
            return Err(ProxyError::Config("max_connections must be greater than zero".to_string()));
        }
        if self.max_header_size == 0 {
            return Err(ProxyError::Config("max_header_size must be greater than zero".to_string()));
        }
        if self.max_body_size == 0 {
            return Err(ProxyError::Config("max_body_size must be greater than zero".to_string()));
        }
        if self.request_timeout_secs == 0 {
            return Err(ProxyError::Config("request_timeout_secs must be greater than zero".to_string()));
        }
        if self.tunnel_idle_timeout_secs == 0 {
            return Err(ProxyError::Config("tunnel_idle_timeout_secs must be greater than zero".to_string()));
        }
        if self.uri_size_limit == 0 {
            return Err(ProxyError::Config("uri_size_limit must be greater than zero".to_string()));
        }
        let (host, port) = self
            .local_origin_addr
            .rsplit_once(':')
            .ok_or_else(|| ProxyError::Config("local_origin_addr must be in host:port form".to_string()))?;
        if host.is_empty() || port.parse::<u16>().is_err() {
            return Err(ProxyError::Config(format!(
                "Invalid local_origin_addr: {}",
                self.local_origin_addr
            )));
        }
        Ok(())
    }

    /// Host part of `local_origin_addr`.
    pub fn local_origin_host(&self) -> &str {
        self.local_origin_addr
            .rsplit_once(':')
            .map(|(host, _)| host)
            .unwrap_or(&self.local_origin_addr)
    }

    pub fn message_limits(&self) -> MessageLimits {
        MessageLimits {
            max_header_size: self.max_header_size,
            max_body_size: self.max_body_size,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn tunnel_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.tunnel_idle_timeout_secs)
    }
}
