//! The (ALPN, SNI) -> Backend table and its construction rules

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;
use tracing::trace;

use crate::Backend;

/// One protocol entry from the configuration file: an ALPN identifier plus
/// a map from SNI hostname to backend address.
#[derive(Debug, Clone, Deserialize)]
pub struct ProtocolConfig {
    pub name: String,
    pub hosts: BTreeMap<String, String>,
}

/// Configuration errors reported by [`Router::new`]. Messages carry the
/// offending configuration path.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RouterError {
    #[error("defaultProto is empty or missing")]
    DefaultProtoMissing,

    #[error("protos is empty")]
    NoProtos,

    #[error("protos[{0}].name is empty")]
    ProtoNameEmpty(usize),

    #[error("protos[{index}].hosts ({name:?}) is empty")]
    HostsEmpty { index: usize, name: String },

    #[error("protos[{index}].hosts ({name:?}) contains an empty hostname")]
    HostEmpty { index: usize, name: String },

    #[error("protos[{index}].hosts[{host:?}] ({name:?}) has an empty backend address")]
    BackendAddrEmpty {
        index: usize,
        name: String,
        host: String,
    },

    #[error("defaultProto {0:?} does not name any protos entry")]
    DefaultProtoUnknown(String),
}

type SniTable = HashMap<String, Arc<Backend>>;

/// Immutable two-dimensional routing table: ALPN protocol -> SNI hostname
/// -> backend.
///
/// The empty-string ALPN key aliases the default protocol's SNI table (the
/// same `Arc`, not a copy), so clients that negotiated no ALPN fall into
/// the default protocol. Lookups are strict in the SNI dimension: an
/// unknown hostname is a miss, and the caller drops the connection.
#[derive(Debug)]
pub struct Router {
    table: HashMap<String, Arc<SniTable>>,
    alpn: Vec<Vec<u8>>,
    hostnames: Vec<String>,
}

impl Router {
    /// Build the table from configuration. Fails on any empty protocol
    /// name, host map, hostname, or backend address, and when
    /// `default_proto` does not name a configured protocol.
    pub fn new(default_proto: &str, protos: &[ProtocolConfig]) -> Result<Self, RouterError> {
        if default_proto.is_empty() {
            return Err(RouterError::DefaultProtoMissing);
        }
        if protos.is_empty() {
            return Err(RouterError::NoProtos);
        }

        let mut table = HashMap::with_capacity(protos.len() + 1);
        let mut alpn = Vec::with_capacity(protos.len());
        let mut hostnames: Vec<String> = Vec::new();

        for (index, proto) in protos.iter().enumerate() {
            if proto.name.is_empty() {
                return Err(RouterError::ProtoNameEmpty(index));
            }
            if proto.hosts.is_empty() {
                return Err(RouterError::HostsEmpty {
                    index,
                    name: proto.name.clone(),
                });
            }

            let mut sub = SniTable::with_capacity(proto.hosts.len());
            for (host, addr) in &proto.hosts {
                if host.is_empty() {
                    return Err(RouterError::HostEmpty {
                        index,
                        name: proto.name.clone(),
                    });
                }
                if addr.is_empty() {
                    return Err(RouterError::BackendAddrEmpty {
                        index,
                        name: proto.name.clone(),
                        host: host.clone(),
                    });
                }
                let backend = Backend::new(&proto.name, host, addr.clone());
                sub.insert(host.clone(), Arc::new(backend));
                if !hostnames.iter().any(|h| h == host) {
                    hostnames.push(host.clone());
                }
            }

            alpn.push(proto.name.clone().into_bytes());
            table.insert(proto.name.clone(), Arc::new(sub));
        }

        // Alias the default protocol's sub-table under the empty ALPN key.
        // Cloning the Arc keeps the alias reference-equal to the original.
        let default = table
            .get(default_proto)
            .cloned()
            .ok_or_else(|| RouterError::DefaultProtoUnknown(default_proto.to_string()))?;
        table.insert(String::new(), default);

        Ok(Self {
            table,
            alpn,
            hostnames,
        })
    }

    /// Resolve the negotiated (ALPN, SNI) pair to a backend.
    ///
    /// An ALPN value the server never advertised only occurs as the empty
    /// string (client negotiated no protocol); it falls into the default
    /// protocol's SNI table. An SNI miss returns `None`.
    pub fn lookup(&self, alpn: &str, sni: &str) -> Option<Arc<Backend>> {
        let sub = match self.table.get(alpn) {
            Some(sub) => sub,
            None => self.table.get("")?,
        };
        let backend = sub.get(sni)?;
        trace!("route ({:?}, {:?}) -> {}", alpn, sni, backend.addr());
        Some(Arc::clone(backend))
    }

    /// ALPN identifiers to advertise, in configuration order.
    pub fn alpn_protocols(&self) -> &[Vec<u8>] {
        &self.alpn
    }

    /// Distinct SNI hostnames across all protocols, in order of first
    /// occurrence. This is the host whitelist handed to the certificate
    /// manager.
    pub fn hostnames(&self) -> &[String] {
        &self.hostnames
    }
}
