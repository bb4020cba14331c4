//! Backend endpoints referenced by the routing table

use std::fmt;

/// An upstream TCP endpoint receiving decrypted bytes.
///
/// Allocated once at router construction and shared by every table slot
/// that routes to it. The label is the route's display name, used as the
/// prefix of per-connection log lines.
#[derive(Debug, PartialEq, Eq)]
pub struct Backend {
    label: String,
    addr: String,
}

impl Backend {
    pub(crate) fn new(proto: &str, sni: &str, addr: String) -> Self {
        Self {
            label: format!("{proto:?}.{sni:?}"),
            addr,
        }
    }

    /// Backend network address (host:port).
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Route label, e.g. `"h2"."example.com"`.
    pub fn label(&self) -> &str {
        &self.label
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label)
    }
}
