//! Shared helpers for the multi-node integration tests
#![allow(dead_code)]

use common::node::NodeConfig;
use common::testkit::TestNetwork;

/// Route test logs through `RUST_LOG`, once per test binary
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Deterministic, non-repeating-per-chunk test content
pub fn patterned_bytes(len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| ((i * 31 + i / 251) % 256) as u8)
        .collect()
}

/// Small chunks so multi-level DAGs stay cheap to build
pub fn small_chunks() -> NodeConfig {
    NodeConfig {
        chunk_size: 64,
        ..Default::default()
    }
}

/// A started network of the named peers, all connected to each other
pub async fn connected_network(names: &[&str], config: NodeConfig) -> TestNetwork {
    init_tracing();
    let mut net = TestNetwork::new();
    for name in names {
        net.add_peer_with(*name, config.clone()).await.unwrap();
    }
    net.connect_all().await.unwrap();
    net
}
