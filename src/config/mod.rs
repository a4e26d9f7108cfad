//! Configuration module for Tidelog
//!
//! This module is organized into submodules:
//! - `defaults` - Default constants and values
//! - `tcp` - TCP socket options
//! - `tls` - TLS listener configuration
//!
//! Configuration *loading* (files, CLI, environment) is the embedding
//! application's concern; these structs are the configuration surface.

mod defaults;
mod tcp;
mod tls;

pub use defaults::*;
pub use tcp::TcpConfig;
pub use tls::TlsConfig;

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// A single listen endpoint, plaintext or TLS
///
/// The presence of enabled TLS credentials switches the listener to TLS,
/// mirroring the broker convention that credentials select the transport.
/// Socket options (keepalive, buffers) are per listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerConfig {
    /// Address to bind
    pub addr: SocketAddr,
    /// Optional TLS credentials; `enabled: true` switches this listener to TLS
    pub tls: Option<TlsConfig>,
    /// TCP socket options applied to connections accepted here
    #[serde(default)]
    pub tcp: TcpConfig,
}

impl ListenerConfig {
    /// Plaintext listener on the given address
    pub fn plaintext(addr: SocketAddr) -> Self {
        Self {
            addr,
            tls: None,
            tcp: TcpConfig::default(),
        }
    }

    /// Whether this listener serves TLS
    pub fn is_tls(&self) -> bool {
        self.tls.as_ref().map(|t| t.enabled).unwrap_or(false)
    }
}

/// Admission policy for request memory reservations
///
/// A request of wire size `s` reserves `s * estimate_factor +
/// estimate_overhead` bytes of the shard budget before its header is read.
/// The estimate covers buffer copies and per-request bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AdmissionConfig {
    /// Multiplier applied to the wire size
    pub estimate_factor: usize,
    /// Fixed overhead added to every estimate, in bytes
    pub estimate_overhead: usize,
}

impl AdmissionConfig {
    /// Memory estimate for a request of the given wire size
    pub fn estimate(&self, size: usize) -> usize {
        size * self.estimate_factor + self.estimate_overhead
    }
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            estimate_factor: DEFAULT_MEMORY_ESTIMATE_FACTOR,
            estimate_overhead: DEFAULT_MEMORY_ESTIMATE_OVERHEAD,
        }
    }
}

/// Client quota configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaConfig {
    /// Enable per-client throughput quotas
    pub enabled: bool,
    /// Allowed byte rate per client id in bytes/sec (0 = unlimited)
    pub byte_rate: u64,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            byte_rate: DEFAULT_QUOTA_BYTE_RATE,
        }
    }
}

/// Shutdown behavior configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownConfig {
    /// Maximum time to wait for graceful shutdown before forcing
    pub timeout_secs: u64,
    /// Whether to wait for in-flight requests to complete
    pub wait_for_requests: bool,
    /// Time to wait for active connections to drain before forcibly closing
    pub drain_timeout_secs: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_SHUTDOWN_TIMEOUT_SECS,
            wait_for_requests: true,
            drain_timeout_secs: DEFAULT_DRAIN_TIMEOUT_SECS,
        }
    }
}

/// Complete configuration for the Kafka protocol server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen endpoints; each may be plaintext or TLS
    pub listeners: Vec<ListenerConfig>,

    /// Shard admission capacity: upper bound on summed in-flight request
    /// memory estimates, in bytes
    pub max_request_memory: usize,

    /// Memory estimate policy
    pub admission: AdmissionConfig,

    /// Per-client quotas
    pub quotas: QuotaConfig,

    /// Shutdown behavior
    pub shutdown: ShutdownConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listeners: vec![ListenerConfig::plaintext(DEFAULT_KAFKA_SOCKET_ADDR)],
            max_request_memory: DEFAULT_MAX_REQUEST_MEMORY,
            admission: AdmissionConfig::default(),
            quotas: QuotaConfig::default(),
            shutdown: ShutdownConfig::default(),
        }
    }
}

/// Heartbeat manager configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Tick period in milliseconds; also the per-RPC deadline
    pub interval_ms: u64,
    /// Peer connect timeout in milliseconds
    pub connect_timeout_ms: u64,
}

impl HeartbeatConfig {
    /// Tick period as a `Duration`
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Connect timeout as a `Duration`
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_HEARTBEAT_INTERVAL_MS,
            connect_timeout_ms: DEFAULT_HEARTBEAT_CONNECT_TIMEOUT_MS,
        }
    }
}
