//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the proxy binary.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    /// Listener configuration (bind address, TLS, limits).
    pub listener: ListenerConfig,

    /// Backend target.
    pub upstream: UpstreamConfig,

    /// Timeouts enforced by the host server.
    pub timeouts: TimeoutConfig,

    /// Logging and metrics settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Optional TLS for inbound connections.
    pub tls: Option<TlsConfig>,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,

    /// Largest request head accepted before answering 431.
    pub max_header_bytes: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            tls: None,
            max_connections: 10_000,
            max_header_bytes: 64 * 1024,
        }
    }
}

/// TLS configuration for the listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate chain (PEM).
    pub cert_path: String,

    /// Path to private key (PEM).
    pub key_path: String,
}

/// Backend target configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Target URL, `ws://` or `wss://`. Its query is merged with each request's.
    pub target: String,

    /// Extra CA certificates (PEM) trusted for `wss` backends.
    pub ca_file: Option<String>,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            target: "ws://127.0.0.1:9000/".to_string(),
            ca_file: None,
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Time allowed for a client to send its request head.
    pub header_read_secs: u64,

    /// Time allowed for open connections to finish on shutdown.
    pub drain_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            header_read_secs: 10,
            drain_secs: 30,
        }
    }
}

impl TimeoutConfig {
    pub fn header_read(&self) -> Duration {
        Duration::from_secs(self.header_read_secs)
    }

    pub fn drain(&self) -> Duration {
        Duration::from_secs(self.drain_secs)
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub log_format: LogFormat,

    /// Serve Prometheus metrics.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
