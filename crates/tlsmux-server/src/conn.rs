//! Per-connection pipeline: handshake, route lookup, backend dial, splice

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::server::TlsStream;
use tracing::{debug, info, warn};

use tlsmux_cert::ACME_TLS_ALPN_NAME;
use tlsmux_router::Backend;

use crate::listener::TlsProxy;

const DIAL_TIMEOUT: Duration = Duration::from_secs(3);

impl TlsProxy {
    /// Drive one accepted connection to completion. Every failure is
    /// contained here: the connection is dropped (closing it) and the
    /// error logged.
    pub(crate) async fn handle(&self, stream: TcpStream, peer: SocketAddr) {
        let tls_stream = match self.acceptor.accept(stream).await {
            Ok(stream) => stream,
            Err(e) => {
                debug!("TLS handshake failed from {}: {}", peer, e);
                return;
            }
        };

        let (alpn, sni) = {
            let (_, session) = tls_stream.get_ref();
            (
                session.alpn_protocol().map(<[u8]>::to_vec).unwrap_or_default(),
                session.server_name().unwrap_or_default().to_string(),
            )
        };

        // TLS-ALPN-01 probes carry no application data; the certificate
        // resolver already answered the challenge during the handshake.
        if alpn == ACME_TLS_ALPN_NAME {
            debug!("completed acme-tls/1 validation handshake from {}", peer);
            return;
        }

        let alpn = String::from_utf8(alpn).unwrap_or_default();
        let backend = match self.router.lookup(&alpn, &sni) {
            Some(backend) => backend,
            None => {
                warn!("no route for ({:?}, {:?}) from {}", alpn, sni, peer);
                return;
            }
        };

        let upstream = match timeout(DIAL_TIMEOUT, TcpStream::connect(backend.addr())).await {
            Ok(Ok(upstream)) => upstream,
            Ok(Err(e)) => {
                warn!("{}: dial {} failed: {}", backend, backend.addr(), e);
                return;
            }
            Err(_) => {
                warn!("{}: dial {} timed out", backend, backend.addr());
                return;
            }
        };

        info!("{}: accepted {}", backend, peer);
        self.splice(tls_stream, upstream, &backend).await;
        info!("{}: disconnected {}", backend, peer);
    }

    /// Copy bytes in both directions until either direction finishes with
    /// EOF or an error, then close both endpoints. Full-close by design:
    /// the TLS wrapper exposes no write-side half-close, and propagating
    /// half-closes through it is a known source of hangs. The losing
    /// direction is cancelled by the select and cleans up silently; every
    /// stream half drops before this returns, so both sockets close
    /// exactly once, and the drop guards hand the copy buffers back to
    /// the pool.
    async fn splice(&self, client: TlsStream<TcpStream>, upstream: TcpStream, backend: &Backend) {
        let (mut client_read, mut client_write) = tokio::io::split(client);
        let (mut upstream_read, mut upstream_write) = upstream.into_split();

        let mut client_buf = self.pool.acquire();
        let mut upstream_buf = self.pool.acquire();

        let client_to_upstream =
            copy_with(&mut client_read, &mut upstream_write, &mut client_buf);
        let upstream_to_client =
            copy_with(&mut upstream_read, &mut client_write, &mut upstream_buf);

        tokio::select! {
            res = client_to_upstream => log_copy_end(backend, "client", res),
            res = upstream_to_client => log_copy_end(backend, "backend", res),
        }
    }
}

async fn copy_with<R, W>(reader: &mut R, writer: &mut W, buf: &mut [u8]) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut total = 0u64;
    loop {
        let n = reader.read(buf).await?;
        if n == 0 {
            return Ok(total);
        }
        writer.write_all(&buf[..n]).await?;
        total += n as u64;
    }
}

fn log_copy_end(backend: &Backend, from: &str, res: io::Result<u64>) {
    match res {
        Ok(n) => debug!("{}: {} side finished after {} bytes", backend, from, n),
        Err(e) => warn!("{}: copy from {} failed: {}", backend, from, e),
    }
}
