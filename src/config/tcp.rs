//! TCP socket configuration
//!
//! Controls keepalive settings and buffer sizes for accepted client
//! connections. TCP_NODELAY is always enabled for the request/response
//! workload regardless of these settings.

use serde::{Deserialize, Serialize};

use super::defaults::{
    DEFAULT_TCP_KEEPALIVE_ENABLED, DEFAULT_TCP_KEEPALIVE_IDLE_SECS,
    DEFAULT_TCP_KEEPALIVE_INTERVAL_SECS, DEFAULT_TCP_KEEPALIVE_RETRIES,
    DEFAULT_TCP_RECV_BUFFER_SIZE, DEFAULT_TCP_SEND_BUFFER_SIZE,
};

/// TCP socket configuration for accepted connections
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TcpConfig {
    /// Enable TCP keepalive
    pub keepalive_enabled: bool,

    /// TCP keepalive idle time in seconds (time before first keepalive probe)
    pub keepalive_idle_secs: u32,

    /// TCP keepalive interval in seconds (time between keepalive probes)
    pub keepalive_interval_secs: u32,

    /// TCP keepalive retry count (failed probes before closing the connection)
    pub keepalive_retries: u32,

    /// TCP receive buffer size in bytes (SO_RCVBUF), 0 = OS default
    pub recv_buffer_size: u32,

    /// TCP send buffer size in bytes (SO_SNDBUF), 0 = OS default
    pub send_buffer_size: u32,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            keepalive_enabled: DEFAULT_TCP_KEEPALIVE_ENABLED,
            keepalive_idle_secs: DEFAULT_TCP_KEEPALIVE_IDLE_SECS,
            keepalive_interval_secs: DEFAULT_TCP_KEEPALIVE_INTERVAL_SECS,
            keepalive_retries: DEFAULT_TCP_KEEPALIVE_RETRIES,
            recv_buffer_size: DEFAULT_TCP_RECV_BUFFER_SIZE,
            send_buffer_size: DEFAULT_TCP_SEND_BUFFER_SIZE,
        }
    }
}

impl TcpConfig {
    /// Keepalive probe settings, `None` when keepalive is disabled
    ///
    /// Retries are honored only on platforms that expose TCP_KEEPCNT.
    pub fn keepalive(&self) -> Option<socket2::TcpKeepalive> {
        if !self.keepalive_enabled {
            return None;
        }

        let keepalive = socket2::TcpKeepalive::new()
            .with_time(std::time::Duration::from_secs(u64::from(
                self.keepalive_idle_secs,
            )))
            .with_interval(std::time::Duration::from_secs(u64::from(
                self.keepalive_interval_secs,
            )));

        #[cfg(any(target_os = "linux", target_os = "android"))]
        let keepalive = keepalive.with_retries(self.keepalive_retries);

        Some(keepalive)
    }

    /// SO_RCVBUF override, `None` when the OS default applies
    pub fn recv_buffer(&self) -> Option<usize> {
        (self.recv_buffer_size > 0).then_some(self.recv_buffer_size as usize)
    }

    /// SO_SNDBUF override, `None` when the OS default applies
    pub fn send_buffer(&self) -> Option<usize> {
        (self.send_buffer_size > 0).then_some(self.send_buffer_size as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tcp_config_defaults() {
        let config = TcpConfig::default();
        assert!(config.keepalive_enabled);
        assert_eq!(config.keepalive_idle_secs, 60);
        assert_eq!(config.keepalive_interval_secs, 10);
        assert_eq!(config.keepalive_retries, 3);
        assert_eq!(config.recv_buffer_size, 0);
        assert_eq!(config.send_buffer_size, 0);
    }

    #[test]
    fn test_tcp_config_roundtrips_through_serde() {
        let config = TcpConfig {
            keepalive_enabled: false,
            recv_buffer_size: 256 * 1024,
            ..Default::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let parsed: TcpConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_keepalive_none_when_disabled() {
        let config = TcpConfig {
            keepalive_enabled: false,
            ..Default::default()
        };
        assert!(config.keepalive().is_none());
        assert!(TcpConfig::default().keepalive().is_some());
    }

    #[test]
    fn test_buffer_overrides_only_when_nonzero() {
        let config = TcpConfig::default();
        assert_eq!(config.recv_buffer(), None);
        assert_eq!(config.send_buffer(), None);

        let tuned = TcpConfig {
            recv_buffer_size: 128 * 1024,
            send_buffer_size: 64 * 1024,
            ..Default::default()
        };
        assert_eq!(tuned.recv_buffer(), Some(128 * 1024));
        assert_eq!(tuned.send_buffer(), Some(64 * 1024));
    }
}
