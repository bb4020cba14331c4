//! Property tests for routing-table construction and lookup

use proptest::prelude::*;
use tlsmux_router::{ProtocolConfig, Router};

/// Generate 1..=4 protocols with unique ALPN names, each with 1..=4 hosts.
fn protos_strategy() -> impl Strategy<Value = Vec<ProtocolConfig>> {
    prop::collection::btree_map(
        "[a-z][a-z0-9/.]{0,7}",
        prop::collection::btree_map("[a-z]{1,8}", 1024u16..u16::MAX, 1..=4),
        1..=4,
    )
    .prop_map(|protos| {
        protos
            .into_iter()
            .map(|(name, hosts)| ProtocolConfig {
                name,
                hosts: hosts
                    .into_iter()
                    .map(|(host, port)| (host, format!("127.0.0.1:{port}")))
                    .collect(),
            })
            .collect()
    })
}

fn config_strategy() -> impl Strategy<Value = (Vec<ProtocolConfig>, usize)> {
    protos_strategy().prop_flat_map(|protos| {
        let count = protos.len();
        (Just(protos), 0..count)
    })
}

proptest! {
    /// Every configured (proto, host) pair resolves to its configured
    /// backend address.
    #[test]
    fn lookup_returns_configured_backend((protos, default_index) in config_strategy()) {
        let default_proto = protos[default_index].name.clone();
        let router = Router::new(&default_proto, &protos).unwrap();

        for proto in &protos {
            for (host, addr) in &proto.hosts {
                let backend = router.lookup(&proto.name, host).unwrap();
                prop_assert_eq!(backend.addr(), addr.as_str());
            }
        }
    }

    /// An empty negotiated ALPN routes exactly like the default protocol,
    /// for hits and misses alike.
    #[test]
    fn empty_alpn_aliases_default_proto((protos, default_index) in config_strategy()) {
        let default_proto = protos[default_index].name.clone();
        let router = Router::new(&default_proto, &protos).unwrap();

        for host in router.hostnames() {
            let via_alias = router.lookup("", host);
            let via_default = router.lookup(&default_proto, host);
            match (via_alias, via_default) {
                (Some(a), Some(b)) => prop_assert!(std::sync::Arc::ptr_eq(&a, &b)),
                (None, None) => {}
                (a, b) => prop_assert!(false, "alias mismatch: {:?} vs {:?}", a, b),
            }
        }
    }

    /// The host whitelist is the union of SNI keys across all protocols,
    /// first occurrence wins, no duplicates.
    #[test]
    fn hostnames_are_first_occurrence_union((protos, default_index) in config_strategy()) {
        let default_proto = protos[default_index].name.clone();
        let router = Router::new(&default_proto, &protos).unwrap();

        let mut expected: Vec<&str> = Vec::new();
        for proto in &protos {
            for host in proto.hosts.keys() {
                if !expected.contains(&host.as_str()) {
                    expected.push(host);
                }
            }
        }
        let actual: Vec<&str> = router.hostnames().iter().map(String::as_str).collect();
        prop_assert_eq!(actual, expected);
    }

    /// Advertised ALPN identifiers match the protocol names in
    /// configuration order.
    #[test]
    fn advertised_alpn_matches_config_order((protos, default_index) in config_strategy()) {
        let default_proto = protos[default_index].name.clone();
        let router = Router::new(&default_proto, &protos).unwrap();

        let expected: Vec<Vec<u8>> = protos
            .iter()
            .map(|p| p.name.clone().into_bytes())
            .collect();
        prop_assert_eq!(router.alpn_protocols(), expected.as_slice());
    }
}
