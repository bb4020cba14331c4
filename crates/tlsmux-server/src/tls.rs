//! Shared TLS server configuration

use std::sync::Arc;

use rustls::server::{ProducesTickets, ResolvesServerCert};
use rustls::ServerConfig;
use tlsmux_cert::ACME_TLS_ALPN_NAME;

/// Build the server configuration shared by every handshake: the
/// certificate-selection callback, the advertised ALPN order, TLS >= 1.2,
/// and the rotating ticketer. The callback and ALPN list are frozen here;
/// only the ticketer's key vector changes afterwards.
///
/// rustls applies server-side cipher-suite preference unconditionally, so
/// no flag is needed for it.
pub fn build_server_config(
    resolver: Arc<dyn ResolvesServerCert>,
    alpn: Vec<Vec<u8>>,
    ticketer: Arc<dyn ProducesTickets>,
) -> ServerConfig {
    let mut config = ServerConfig::builder_with_protocol_versions(&[
        &rustls::version::TLS13,
        &rustls::version::TLS12,
    ])
    .with_no_client_auth()
    .with_cert_resolver(resolver);

    // The TLS-ALPN-01 validation identifier goes last so it never
    // outranks a configured protocol.
    config.alpn_protocols = alpn;
    config.alpn_protocols.push(ACME_TLS_ALPN_NAME.to_vec());
    config.ticketer = ticketer;
    config
}
