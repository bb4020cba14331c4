//! TLS termination server for the tlsmux proxy
//!
//! Accepts TCP connections on the HTTPS port, terminates TLS with the
//! shared server configuration, resolves the negotiated (ALPN, SNI) pair
//! against the routing table, dials the backend, and splices bytes in both
//! directions until either side finishes.

mod conn;
pub mod listener;
pub mod pool;
pub mod ticket;
pub mod tls;

pub use listener::{bind_interface, ServerError, TlsProxy, HTTPS_PORT};
pub use pool::{BufferPool, BUFFER_SIZE};
pub use ticket::{
    spawn_rotation, RotatingTicketer, TicketError, MAX_TICKET_KEYS, ROTATION_PERIOD,
};
pub use tls::build_server_config;
