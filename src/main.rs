//! tlsmux - TLS-terminating multiplexing reverse proxy
//!
//! Listens on port 443, terminates TLS with ACME-managed certificates, and
//! forwards the decrypted stream to a local backend picked by the
//! negotiated (ALPN, SNI) pair.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinSet;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tlsmux_cert::{CertManager, CertManagerConfig};
use tlsmux_router::Router;
use tlsmux_server::{
    bind_interface, build_server_config, spawn_rotation, RotatingTicketer, TlsProxy,
};

mod config;

/// TLS-terminating multiplexing reverse proxy
#[derive(Parser, Debug)]
#[command(name = "tlsmux", version)]
struct Cli {
    /// Path to the configuration file
    #[arg(
        short = 'c',
        long = "config",
        default_value = "/usr/local/etc/tlsmux/config.json"
    )]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(fmt::layer())
        .init();

    // Ignore the result: a provider may already be installed.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let cli = Cli::parse();
    let cfg = config::Config::load(&cli.config)?;

    let router = Arc::new(Router::new(&cfg.default_proto, &cfg.protos)?);

    let certs = CertManager::new(CertManagerConfig {
        hostnames: router.hostnames().to_vec(),
        cache_dir: PathBuf::from(&cfg.cache_dir),
        contact_email: (!cfg.email.is_empty()).then(|| cfg.email.clone()),
        production: true,
    })
    .context("configuring the certificate manager")?;

    // The initial ticket key must exist before any listener serves.
    let ticketer =
        Arc::new(RotatingTicketer::new().context("generating the initial session ticket key")?);

    let tls = build_server_config(
        certs.resolver(),
        router.alpn_protocols().to_vec(),
        Arc::clone(&ticketer) as Arc<dyn rustls::server::ProducesTickets>,
    );
    let proxy = Arc::new(TlsProxy::new(Arc::new(tls), router));

    certs.spawn_driver();
    spawn_rotation(ticketer);

    let mut listeners = JoinSet::new();
    for iface in &cfg.bind_interfaces {
        let listener = bind_interface(iface)
            .await
            .with_context(|| format!("binding {:?} on port 443", iface))?;
        listeners.spawn(Arc::clone(&proxy).serve(listener));
    }

    info!("initialized");

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = sigint.recv() => {
            info!("terminating");
            Ok(())
        }
        _ = sigterm.recv() => {
            info!("terminating");
            Ok(())
        }
        res = listeners.join_next() => match res {
            Some(Ok(Err(e))) => Err(e).context("listener failed"),
            Some(Err(e)) => Err(e).context("listener task panicked"),
            Some(Ok(Ok(()))) | None => bail!("listener exited unexpectedly"),
        },
    }
}
