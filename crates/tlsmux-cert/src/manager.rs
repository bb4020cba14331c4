//! ACME certificate manager

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use futures::StreamExt;
use rustls::server::ResolvesServerCert;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_rustls_acme::caches::DirCache;
use tokio_rustls_acme::{AcmeConfig, AcmeState};
use tracing::{debug, error};

/// Certificate manager errors, reported at startup.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CertError {
    #[error("host whitelist is empty")]
    NoHostnames,

    #[error("invalid ACME contact email: {0:?}")]
    InvalidContactEmail(String),
}

/// Configuration for the certificate manager.
#[derive(Debug, Clone)]
pub struct CertManagerConfig {
    /// Hostnames eligible for certificate acquisition. Handshakes for any
    /// other SNI are refused by the resolver.
    pub hostnames: Vec<String>,
    /// Directory the ACME library caches account and certificate state in.
    pub cache_dir: PathBuf,
    /// Contact email for the ACME account; `None` registers without one.
    pub contact_email: Option<String>,
    /// Use the production directory; `false` selects staging.
    pub production: bool,
}

/// Certificate manager.
///
/// Owns the autocert state machine. [`CertManager::resolver`] is the
/// per-handshake certificate callback for the TLS configuration;
/// [`CertManager::spawn_driver`] moves the state machine onto a background
/// task so orders, renewals, and cache writes never run on the accept path.
pub struct CertManager {
    resolver: Arc<dyn ResolvesServerCert>,
    state: AcmeState<io::Error, io::Error>,
}

impl std::fmt::Debug for CertManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertManager").finish_non_exhaustive()
    }
}

impl CertManager {
    pub fn new(config: CertManagerConfig) -> Result<Self, CertError> {
        if config.hostnames.is_empty() {
            return Err(CertError::NoHostnames);
        }
        let contact = match config.contact_email.filter(|e| !e.is_empty()) {
            Some(email) if !email.contains('@') => {
                return Err(CertError::InvalidContactEmail(email));
            }
            other => other,
        };

        let mut acme = AcmeConfig::new(&config.hostnames)
            .cache(DirCache::new(config.cache_dir))
            .directory_lets_encrypt(config.production);
        if let Some(email) = contact {
            acme = acme.contact_push(format!("mailto:{email}"));
        }
        let state = acme.state();
        let resolver = state.resolver();
        Ok(Self { resolver, state })
    }

    /// Certificate-selection callback for the shared TLS configuration.
    /// Also answers TLS-ALPN-01 validation handshakes.
    pub fn resolver(&self) -> Arc<dyn ResolvesServerCert> {
        Arc::clone(&self.resolver)
    }

    /// Consume the manager and drive certificate acquisition and renewal
    /// on a background task. ACME failures are logged and retried by the
    /// library; they never take the process down.
    pub fn spawn_driver(self) -> JoinHandle<()> {
        let mut state = self.state;
        tokio::spawn(async move {
            loop {
                match state.next().await {
                    Some(Ok(event)) => debug!("acme event: {:?}", event),
                    Some(Err(err)) => error!("acme error: {:?}", err),
                    None => {
                        error!("acme state stream ended");
                        return;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(hostnames: &[&str], email: Option<&str>) -> CertManagerConfig {
        CertManagerConfig {
            hostnames: hostnames.iter().map(|h| h.to_string()).collect(),
            cache_dir: std::env::temp_dir().join("tlsmux-cert-test"),
            contact_email: email.map(str::to_string),
            production: false,
        }
    }

    #[test]
    fn test_manager_builds_resolver() {
        let manager = CertManager::new(config(
            &["a.example.com", "b.example.com"],
            Some("ops@example.com"),
        ))
        .unwrap();
        // The resolver must be constructible without touching the network;
        // acquisition only happens once the driver task runs.
        let _resolver = manager.resolver();
    }

    #[test]
    fn test_empty_email_is_ignored() {
        let manager = CertManager::new(config(&["a.example.com"], Some(""))).unwrap();
        let _resolver = manager.resolver();
    }

    #[test]
    fn test_empty_whitelist_rejected() {
        let err = CertManager::new(config(&[], None)).unwrap_err();
        assert_eq!(err, CertError::NoHostnames);
    }

    #[test]
    fn test_malformed_email_rejected() {
        let err = CertManager::new(config(&["a.example.com"], Some("not-an-email"))).unwrap_err();
        assert_eq!(
            err,
            CertError::InvalidContactEmail("not-an-email".to_string())
        );
    }
}
