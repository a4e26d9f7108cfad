//! TLS configuration
//!
//! A listener with TLS enabled accepts through a `tokio_rustls::TlsAcceptor`
//! built from these settings; see `server::tls` for the loader.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::defaults::DEFAULT_TLS_MIN_VERSION;

/// TLS configuration for a listener
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsConfig {
    /// Enable TLS (default: false)
    pub enabled: bool,
    /// Path to certificate chain file (PEM format)
    pub cert_path: PathBuf,
    /// Path to private key file (PEM format)
    pub key_path: PathBuf,
    /// Minimum TLS version ("1.2" or "1.3")
    pub min_version: String,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            cert_path: PathBuf::new(),
            key_path: PathBuf::new(),
            min_version: DEFAULT_TLS_MIN_VERSION.to_string(),
        }
    }
}
