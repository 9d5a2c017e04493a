use std::net::{Ipv4Addr, SocketAddr};

use serde::{Deserialize, Serialize};

use crate::exchange::ExchangeConfig;
use crate::fabric::{IrohFabricConfig, PeerAddr};
use crate::file::{CatOptions, DEFAULT_CHUNK_SIZE};
use crate::name::NameConfig;

/// Routing backends a node publishes to and resolves from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Directory,
    Broadcast,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Leaf size for added files. Changing it changes the CIDs files get.
    pub chunk_size: usize,
    pub listen_addr: SocketAddr,
    /// Peers dialed on start and asked for blocks on a local miss
    #[serde(with = "peer_addrs")]
    pub bootstrap: Vec<PeerAddr>,
    /// Directory servers name records are put on and fetched from
    #[serde(with = "peer_addrs")]
    pub directory_servers: Vec<PeerAddr>,
    /// Keep a directory of this node's own and answer directory requests
    ///  from other nodes
    pub host_directory: bool,
    pub backends: Vec<BackendKind>,
    pub fabric: IrohFabricConfig,
    pub exchange: ExchangeConfig,
    pub names: NameConfig,
    pub cat: CatOptions,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            listen_addr: SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), 0),
            bootstrap: Vec::new(),
            directory_servers: Vec::new(),
            host_directory: true,
            backends: vec![BackendKind::Directory, BackendKind::Broadcast],
            fabric: IrohFabricConfig::default(),
            exchange: ExchangeConfig::default(),
            names: NameConfig::default(),
            cat: CatOptions::default(),
        }
    }
}

impl NodeConfig {
    pub fn uses(&self, backend: BackendKind) -> bool {
        self.backends.contains(&backend)
    }
}

/// Peer addresses in their `<peer-id>@<ip:port>,..` text form
mod peer_addrs {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use crate::fabric::PeerAddr;

    pub fn serialize<S: Serializer>(addrs: &[PeerAddr], s: S) -> Result<S::Ok, S::Error> {
        addrs
            .iter()
            .map(|a| a.to_string())
            .collect::<Vec<_>>()
            .serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<PeerAddr>, D::Error> {
        Vec::<String>::deserialize(d)?
            .iter()
            .map(|s| s.parse().map_err(D::Error::custom))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::SecretKey;

    #[test]
    fn test_defaults_fill_missing_fields() {
        let config: NodeConfig = serde_json::from_str(r#"{ "chunk_size": 1024 }"#).unwrap();
        assert_eq!(config.chunk_size, 1024);
        assert!(config.uses(BackendKind::Directory));
        assert!(config.uses(BackendKind::Broadcast));
        assert_eq!(config.exchange.max_concurrent_probes, 2);
        assert!(config.host_directory);
    }

    #[test]
    fn test_peer_addrs_as_strings() {
        let id = SecretKey::generate().public();
        let text = format!("{}@127.0.0.1:4001", id);
        let json = format!(
            r#"{{ "bootstrap": ["{}"], "backends": ["broadcast"] }}"#,
            text
        );
        let config: NodeConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config.bootstrap.len(), 1);
        assert_eq!(config.bootstrap[0].id, id);
        assert!(!config.uses(BackendKind::Directory));

        let value = serde_json::to_value(&config).unwrap();
        assert_eq!(value["bootstrap"][0], text);
    }
}
