//! Transport and client configuration.
//!
//! All durations are milliseconds. Every struct deserializes with defaults
//! for missing fields, so applications can embed these in their own config.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::limiter::DEFAULT_WRITE_LIMIT;
use crate::protocol::{DEFAULT_MAX_DATAGRAM_SIZE, DEFAULT_MAX_FRAME_SIZE};

/// Port the collector listens on by default, for both TCP and UDP.
pub const DEFAULT_PORT: u16 = 5555;

/// Default host.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// PEM files for a TLS connection to the collector.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsConfig {
    /// CA certificate(s) used to verify the collector.
    pub ca_cert_path: PathBuf,
    /// Client certificate chain, for mutual TLS.
    pub cert_path: Option<PathBuf>,
    /// Client private key, for mutual TLS.
    pub key_path: Option<PathBuf>,
    /// Name to verify the server certificate against; defaults to `host`.
    pub server_name: Option<String>,
}

/// Configuration for the streaming (TCP/TLS) transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TcpConfig {
    /// Collector host name or address.
    pub host: String,
    /// Collector port (default 5555).
    pub port: u16,
    /// Local address to bind before connecting.
    pub local_address: Option<SocketAddr>,
    /// Maximum writes in flight before sends fail as overloaded (default 8192).
    pub write_limit: usize,
    /// Delay before a lost channel is re-established (default 5000).
    pub reconnect_delay_ms: u64,
    /// Timeout for establishing a channel, TLS handshake included (default 5000).
    pub connect_timeout_ms: u64,
    /// Timeout for one socket write (default 5000).
    pub write_timeout_ms: u64,
    /// Buffered bytes at which the writer stops coalescing and flushes (default 32 KiB).
    pub low_watermark: usize,
    /// Hard cap on bytes buffered by the writer before a flush is forced (default 64 KiB).
    pub high_watermark: usize,
    /// Whether to resolve the host once and reuse the answer (default true).
    pub cache_dns: bool,
    /// Threads driving socket I/O (default 2).
    pub io_threads: usize,
    /// Largest frame accepted or sent (default 64 MiB).
    pub max_frame_size: usize,
    /// TLS settings; plain TCP when absent.
    pub tls: Option<TlsConfig>,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            local_address: None,
            write_limit: DEFAULT_WRITE_LIMIT,
            reconnect_delay_ms: 5000,
            connect_timeout_ms: 5000,
            write_timeout_ms: 5000,
            low_watermark: 32 * 1024,
            high_watermark: 64 * 1024,
            cache_dns: true,
            io_threads: 2,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            tls: None,
        }
    }
}

impl TcpConfig {
    /// Defaults pointed at `host:port`.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    /// Checks the settings that would otherwise fail at runtime.
    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(Error::Config("host must not be empty".into()));
        }
        if self.write_limit == 0 {
            return Err(Error::Config("write_limit must be at least 1".into()));
        }
        if self.low_watermark == 0 || self.high_watermark < self.low_watermark {
            return Err(Error::Config(format!(
                "watermarks must satisfy 0 < low ({}) <= high ({})",
                self.low_watermark, self.high_watermark
            )));
        }
        if self.io_threads == 0 {
            return Err(Error::Config("io_threads must be at least 1".into()));
        }
        Ok(())
    }

    /// `host:port` for log messages and errors.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub(crate) fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub(crate) fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub(crate) fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

/// Configuration for the datagram (UDP) transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UdpConfig {
    /// Collector host name or address.
    pub host: String,
    /// Collector port (default 5555).
    pub port: u16,
    /// Local address to bind; an ephemeral port when absent.
    pub local_address: Option<SocketAddr>,
    /// Largest datagram sent; bigger messages are refused (default 16384).
    pub max_size: usize,
    /// Whether to resolve the host once and reuse the answer (default true).
    pub cache_dns: bool,
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            local_address: None,
            max_size: DEFAULT_MAX_DATAGRAM_SIZE,
            cache_dns: true,
        }
    }
}

impl UdpConfig {
    /// Defaults pointed at `host:port`.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }
}

/// Configuration for the batching client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Events per wire message; reaching it triggers a flush (default 10).
    pub batch_size: usize,
    /// Flush whatever is buffered at this interval, if set.
    pub flush_interval_ms: Option<u64>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            flush_interval_ms: None,
        }
    }
}

impl BatchConfig {
    /// Batches of `batch_size` with no periodic flush.
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size,
            flush_interval_ms: None,
        }
    }

    /// Checks the batch size.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::Config("batch_size must be at least 1".into()));
        }
        Ok(())
    }
}
