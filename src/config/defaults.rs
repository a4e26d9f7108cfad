//! Default constants for Tidelog configuration
//!
//! These constants define the default values used throughout the
//! configuration system when no explicit value is provided.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// Default listen address for the Kafka protocol
pub const DEFAULT_KAFKA_ADDR: &str = "0.0.0.0:9092";

/// Default Kafka socket address (const, no parsing needed)
pub(crate) const DEFAULT_KAFKA_SOCKET_ADDR: SocketAddr =
    SocketAddr::new(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)), 9092);

/// Default shard admission capacity in bytes (40 MB)
///
/// Upper bound on the summed memory estimates of all in-flight requests.
pub const DEFAULT_MAX_REQUEST_MEMORY: usize = 40 * 1024 * 1024;

/// Default multiplier applied to the wire size when estimating request memory
pub const DEFAULT_MEMORY_ESTIMATE_FACTOR: usize = 2;

/// Default fixed overhead added to the memory estimate, in bytes
///
/// Covers per-request bookkeeping and buffer copies beyond the payload.
pub const DEFAULT_MEMORY_ESTIMATE_OVERHEAD: usize = 8000;

/// Maximum accepted client id length in bytes
pub const MAX_CLIENT_ID_LENGTH: usize = 256;

/// Default TCP keepalive enabled state
pub const DEFAULT_TCP_KEEPALIVE_ENABLED: bool = true;

/// Default TCP keepalive idle time in seconds
pub const DEFAULT_TCP_KEEPALIVE_IDLE_SECS: u32 = 60;

/// Default TCP keepalive probe interval in seconds
pub const DEFAULT_TCP_KEEPALIVE_INTERVAL_SECS: u32 = 10;

/// Default TCP keepalive retry count
pub const DEFAULT_TCP_KEEPALIVE_RETRIES: u32 = 3;

/// Default TCP receive buffer size (0 = OS default)
pub const DEFAULT_TCP_RECV_BUFFER_SIZE: u32 = 0;

/// Default TCP send buffer size (0 = OS default)
pub const DEFAULT_TCP_SEND_BUFFER_SIZE: u32 = 0;

/// Default minimum TLS version
pub const DEFAULT_TLS_MIN_VERSION: &str = "1.2";

/// Default client quota byte rate in bytes/sec (0 = quotas disabled)
pub const DEFAULT_QUOTA_BYTE_RATE: u64 = 0;

/// Cap on a single computed throttle delay in milliseconds
pub const MAX_THROTTLE_DELAY_MS: u64 = 30_000;

/// Default shutdown timeout in seconds
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

/// Default connection drain timeout in seconds
pub const DEFAULT_DRAIN_TIMEOUT_SECS: u64 = 10;

/// Default Raft heartbeat interval in milliseconds
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 150;

/// Default heartbeat peer connect timeout in milliseconds
pub const DEFAULT_HEARTBEAT_CONNECT_TIMEOUT_MS: u64 = 100;
