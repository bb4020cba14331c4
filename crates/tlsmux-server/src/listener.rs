//! Listener binding and the accept loop

use std::io;
use std::net::{Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, TcpKeepalive, Type};
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};

use tlsmux_router::Router;

use crate::pool::BufferPool;

/// Listener errors. A bind failure or a non-transient accept error is
/// fatal to its listener; nothing restarts one.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("accept failed on {address}: {source}")]
    Accept {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Port every bind interface listens on.
pub const HTTPS_PORT: u16 = 443;

const KEEPALIVE_PERIOD: Duration = Duration::from_secs(30);
const LISTEN_BACKLOG: i32 = 1024;

const BACKOFF_FLOOR: Duration = Duration::from_millis(5);
const BACKOFF_CEIL: Duration = Duration::from_secs(1);

/// The proxy's shared per-connection state: the TLS acceptor built from
/// the shared server configuration, the immutable routing table, and the
/// copy-buffer pool. One instance serves every listener.
pub struct TlsProxy {
    pub(crate) acceptor: TlsAcceptor,
    pub(crate) router: Arc<Router>,
    pub(crate) pool: Arc<BufferPool>,
}

impl TlsProxy {
    pub fn new(config: Arc<rustls::ServerConfig>, router: Arc<Router>) -> Self {
        Self {
            acceptor: TlsAcceptor::from(config),
            router,
            pool: BufferPool::with_defaults(),
        }
    }

    /// Accept loop for one bound listener. Transient accept errors back
    /// off exponentially (5 ms doubling to 1 s); anything else ends the
    /// loop with the error. Returns only on such an error.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<(), ServerError> {
        let local = listener.local_addr()?;
        info!("listening on {}", local);

        let mut backoff = Duration::ZERO;
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    backoff = Duration::ZERO;
                    if let Err(e) = enable_keepalive(&stream) {
                        debug!("keep-alive setup failed for {}: {}", peer, e);
                    }
                    let proxy = Arc::clone(&self);
                    tokio::spawn(async move {
                        proxy.handle(stream, peer).await;
                    });
                }
                Err(e) if is_transient(&e) => {
                    backoff = next_backoff(backoff);
                    warn!(
                        "transient accept error on {}: {}; retrying in {:?}",
                        local, e, backoff
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => {
                    return Err(ServerError::Accept {
                        address: local.to_string(),
                        source: e,
                    })
                }
            }
        }
    }
}

/// Bind a listener on one configured interface. The empty string binds
/// the wildcard address.
pub async fn bind_interface(host: &str) -> Result<TcpListener, ServerError> {
    let addr = resolve_bind_addr(host, HTTPS_PORT)
        .await
        .map_err(|source| ServerError::Bind {
            address: format!("{host:?}:{HTTPS_PORT}"),
            source,
        })?;
    bind(addr).map_err(|source| ServerError::Bind {
        address: addr.to_string(),
        source,
    })
}

fn bind(addr: SocketAddr) -> io::Result<TcpListener> {
    // SO_REUSEADDR so a restart can rebind while old connections sit in
    // TIME_WAIT.
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;
    socket.set_nonblocking(true)?;
    TcpListener::from_std(socket.into())
}

async fn resolve_bind_addr(host: &str, port: u16) -> io::Result<SocketAddr> {
    if host.is_empty() {
        return Ok(SocketAddr::from((Ipv6Addr::UNSPECIFIED, port)));
    }
    tokio::net::lookup_host((host, port))
        .await?
        .next()
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                format!("no address for {host:?}"),
            )
        })
}

fn enable_keepalive(stream: &TcpStream) -> io::Result<()> {
    let keepalive = TcpKeepalive::new().with_time(KEEPALIVE_PERIOD);
    socket2::SockRef::from(stream).set_tcp_keepalive(&keepalive)
}

fn next_backoff(current: Duration) -> Duration {
    if current.is_zero() {
        BACKOFF_FLOOR
    } else {
        (current * 2).min(BACKOFF_CEIL)
    }
}

/// Accept errors worth retrying: resource exhaustion and per-connection
/// failures surfaced by accept. Everything else ends the listener.
fn is_transient(err: &io::Error) -> bool {
    if let Some(code) = err.raw_os_error() {
        if matches!(
            code,
            libc::EMFILE | libc::ENFILE | libc::ENOBUFS | libc::ENOMEM
        ) {
            return true;
        }
    }
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    )
}
