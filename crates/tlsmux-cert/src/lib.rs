//! Certificate management for the TLS proxy
//!
//! Wraps the ACME autocert library: certificates for whitelisted hostnames
//! are acquired, renewed, and cached on disk by the library itself; this
//! crate only wires its per-handshake certificate resolver into the shared
//! TLS configuration and drives the library's event stream in the
//! background. Domain validation uses TLS-ALPN-01, answered on the proxy's
//! own HTTPS listener.

pub mod manager;

pub use manager::{CertError, CertManager, CertManagerConfig};
pub use tokio_rustls_acme::acme::ACME_TLS_ALPN_NAME;
