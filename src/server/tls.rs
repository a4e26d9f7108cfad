//! TLS acceptor loading
//!
//! Builds a `tokio_rustls::TlsAcceptor` from PEM credentials. A listener
//! configured with enabled TLS credentials serves the same request pipeline
//! over the encrypted stream.

use crate::config::TlsConfig;
use crate::error::{Result, TidelogError};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::version::{TLS12, TLS13};
use rustls::{ServerConfig as RustlsServerConfig, SupportedProtocolVersion};
use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;
use tokio_rustls::TlsAcceptor;
use tracing::info;

fn supported_versions(min_version: &str) -> Result<Vec<&'static SupportedProtocolVersion>> {
    match min_version {
        "1.3" => Ok(vec![&TLS13]),
        "1.2" => Ok(vec![&TLS12, &TLS13]),
        other => Err(TidelogError::Config(format!(
            "invalid TLS minimum version: {}. Must be '1.2' or '1.3'",
            other
        ))),
    }
}

/// Load TLS credentials and build an acceptor
pub fn load_tls_acceptor(config: &TlsConfig) -> Result<TlsAcceptor> {
    if !config.enabled {
        return Err(TidelogError::Config("TLS not enabled".to_string()));
    }

    let certs = load_certs(config)?;
    let key = load_private_key(config)?;
    let versions = supported_versions(&config.min_version)?;

    let rustls_config = RustlsServerConfig::builder_with_protocol_versions(&versions)
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| TidelogError::Config(format!("invalid TLS configuration: {}", e)))?;

    info!(
        cert_path = %config.cert_path.display(),
        min_version = %config.min_version,
        "TLS credentials loaded"
    );

    Ok(TlsAcceptor::from(Arc::new(rustls_config)))
}

fn load_certs(config: &TlsConfig) -> Result<Vec<CertificateDer<'static>>> {
    let file = File::open(&config.cert_path).map_err(|e| {
        TidelogError::Config(format!(
            "failed to open certificate file {}: {}",
            config.cert_path.display(),
            e
        ))
    })?;
    let mut reader = BufReader::new(file);
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| TidelogError::Config(format!("failed to parse certificates: {}", e)))?;

    if certs.is_empty() {
        return Err(TidelogError::Config(format!(
            "no certificates found in {}",
            config.cert_path.display()
        )));
    }
    Ok(certs)
}

fn load_private_key(config: &TlsConfig) -> Result<PrivateKeyDer<'static>> {
    let file = File::open(&config.key_path).map_err(|e| {
        TidelogError::Config(format!(
            "failed to open private key file {}: {}",
            config.key_path.display(),
            e
        ))
    })?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| TidelogError::Config(format!("failed to parse private key: {}", e)))?
        .ok_or_else(|| {
            TidelogError::Config(format!(
                "no private key found in {}",
                config.key_path.display()
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_disabled_config_rejected() {
        let err = match load_tls_acceptor(&TlsConfig::default()) {
            Err(e) => e,
            Ok(_) => panic!("expected error"),
        };
        assert!(matches!(err, TidelogError::Config(_)));
    }

    #[test]
    fn test_invalid_min_version_rejected() {
        assert!(supported_versions("1.1").is_err());
        assert!(supported_versions("1.2").is_ok());
        assert!(supported_versions("1.3").is_ok());
    }

    #[test]
    fn test_missing_cert_file_reported() {
        let config = TlsConfig {
            enabled: true,
            cert_path: PathBuf::from("/nonexistent/server.crt"),
            key_path: PathBuf::from("/nonexistent/server.key"),
            min_version: "1.2".to_string(),
        };
        let err = match load_tls_acceptor(&config) {
            Err(e) => e,
            Ok(_) => panic!("expected error"),
        };
        assert!(err.to_string().contains("certificate"));
    }
}
