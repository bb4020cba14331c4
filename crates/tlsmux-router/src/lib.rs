//! Routing logic for the TLS proxy
//!
//! Maps the (ALPN protocol, SNI hostname) pair negotiated during a TLS
//! handshake to a local backend address. The table is built once from
//! configuration and is immutable afterwards, so lookups on the accept
//! path need no synchronization.

pub mod backend;
pub mod table;

pub use backend::Backend;
pub use table::{ProtocolConfig, Router, RouterError};
