//! Daemon configuration file

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use tlsmux_router::ProtocolConfig;

/// The configuration file (JSON, camelCase keys).
///
/// Routing-table fields (`defaultProto`, `protos`) are validated by the
/// router during construction so every violation reports the offending
/// path; this type only checks the fields it owns.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// ACME contact email; may be empty.
    #[serde(default)]
    pub email: String,

    /// Directory the certificate manager caches ACME state in.
    #[serde(default)]
    pub cache_dir: String,

    /// Interfaces to bind on port 443; the empty string means all.
    #[serde(default = "default_bind_interfaces")]
    pub bind_interfaces: Vec<String>,

    /// Protocol serving clients that negotiated no ALPN.
    #[serde(default)]
    pub default_proto: String,

    #[serde(default)]
    pub protos: Vec<ProtocolConfig>,
}

fn default_bind_interfaces() -> Vec<String> {
    vec![String::new()]
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let file =
            File::open(path).with_context(|| format!("opening {}", path.display()))?;
        let config: Config = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("decoding {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.cache_dir.is_empty() {
            bail!("cacheDir is empty or missing");
        }
        if self.bind_interfaces.is_empty() {
            bail!("bindInterfaces is empty");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Config {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_full_config_decodes() {
        let config = parse(
            r#"{
                "email": "ops@example.com",
                "cacheDir": "/var/cache/tlsmux",
                "bindInterfaces": ["192.0.2.1", "198.51.100.1"],
                "defaultProto": "h2",
                "protos": [
                    {"name": "h2", "hosts": {"a": "127.0.0.1:81"}},
                    {"name": "http/1.1", "hosts": {"a": "127.0.0.1:80"}}
                ]
            }"#,
        );
        config.validate().unwrap();
        assert_eq!(config.email, "ops@example.com");
        assert_eq!(config.cache_dir, "/var/cache/tlsmux");
        assert_eq!(config.bind_interfaces.len(), 2);
        assert_eq!(config.default_proto, "h2");
        assert_eq!(config.protos.len(), 2);
        assert_eq!(config.protos[0].hosts["a"], "127.0.0.1:81");
    }

    #[test]
    fn test_bind_interfaces_defaults_to_all() {
        let config = parse(r#"{"cacheDir": "/tmp/c", "defaultProto": "h2"}"#);
        assert_eq!(config.bind_interfaces, vec![String::new()]);
    }

    #[test]
    fn test_missing_cache_dir_rejected() {
        let config = parse(r#"{"defaultProto": "h2"}"#);
        let err = config.validate().unwrap_err();
        assert_eq!(err.to_string(), "cacheDir is empty or missing");
    }

    #[test]
    fn test_empty_bind_interfaces_rejected() {
        let config = parse(r#"{"cacheDir": "/tmp/c", "bindInterfaces": []}"#);
        let err = config.validate().unwrap_err();
        assert_eq!(err.to_string(), "bindInterfaces is empty");
    }

    #[test]
    fn test_missing_default_proto_decodes_empty() {
        // The router reports "defaultProto is empty or missing" for this;
        // decoding itself must not fail.
        let config = parse(r#"{"cacheDir": "/tmp/c"}"#);
        assert!(config.default_proto.is_empty());
    }
}
