//! Integration tests for publishing and resolving names across nodes

mod common;

use std::sync::Arc;
use std::time::Duration;

use ::common::crypto::SecretKey;
use ::common::fabric::{MemoryNetwork, PeerAddr};
use ::common::name::FileSequenceStore;
use ::common::node::{BackendKind, Node, NodeConfig};
use ::common::testkit::TestNetwork;
use tempfile::TempDir;

#[tokio::test]
async fn test_publish_then_resolve_on_same_node() {
    let mut net = common::connected_network(&["alice"], Default::default()).await;
    let alice = net.get("alice").unwrap();

    let cid = alice.add_bytes(b"Hello World ZPP@").await.unwrap();
    alice.publish(&cid).await.unwrap();
    assert_eq!(alice.resolve(&alice.id()).await.unwrap(), cid);

    net.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_resolve_through_directory_server() {
    common::init_tracing();
    let mut net = TestNetwork::new();
    let server = net.add_peer("server").await.unwrap().id();

    let client = NodeConfig {
        backends: vec![BackendKind::Directory],
        directory_servers: vec![PeerAddr::from(server)],
        host_directory: false,
        ..Default::default()
    };
    net.add_peer_with("alice", client.clone()).await.unwrap();
    net.add_peer_with("bob", client).await.unwrap();

    let alice = net.get("alice").unwrap();
    let bob = net.get("bob").unwrap();

    let first = alice.add_bytes(b"first").await.unwrap();
    let second = alice.add_bytes(b"second").await.unwrap();
    alice.publish(&first).await.unwrap();
    let report = alice.publish(&second).await.unwrap();
    assert_eq!(report.record.sequence, 1);
    assert_eq!(report.failed().count(), 0);

    assert_eq!(bob.resolve(&alice.id()).await.unwrap(), second);
    assert_eq!(
        net.get("server").unwrap().node().directory().len(),
        1,
        "the server keeps only the newest record"
    );

    net.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_broadcast_reaches_the_end_of_a_line() {
    common::init_tracing();
    let config = NodeConfig {
        backends: vec![BackendKind::Broadcast],
        ..Default::default()
    };
    let mut net = TestNetwork::new();
    for name in ["alice", "bob", "carol"] {
        net.add_peer_with(name, config.clone()).await.unwrap();
    }
    // alice - bob - carol, alice and carol never meet
    net.connect("alice", "bob").await.unwrap();
    net.connect("bob", "carol").await.unwrap();

    let alice = net.get("alice").unwrap();
    let carol = net.get("carol").unwrap();
    let cid = alice.add_bytes(b"flooded").await.unwrap();
    alice.publish(&cid).await.unwrap();

    let identity = alice.id();
    net.eventually(Duration::from_secs(2), || async {
        Ok::<_, anyhow::Error>(carol.node().broadcast().cached(&identity).is_some())
    })
    .await
    .unwrap();
    assert_eq!(carol.resolve(&identity).await.unwrap(), cid);

    net.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_resolver_follows_successive_publishes() {
    let mut net = common::connected_network(&["alice", "bob"], Default::default()).await;
    let alice = net.get("alice").unwrap();
    let bob = net.get("bob").unwrap();

    let x = alice.add_bytes(b"x").await.unwrap();
    let y = alice.add_bytes(b"y").await.unwrap();

    alice.publish(&x).await.unwrap();
    net.eventually(Duration::from_secs(2), || async {
        Ok::<_, anyhow::Error>(bob.resolve(&alice.id()).await? == x)
    })
    .await
    .unwrap();

    alice.publish(&y).await.unwrap();
    net.eventually(Duration::from_secs(2), || async {
        Ok::<_, anyhow::Error>(bob.resolve(&alice.id()).await? == y)
    })
    .await
    .unwrap();

    // stays on y from here on
    assert_eq!(bob.resolve(&alice.id()).await.unwrap(), y);

    net.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_sequence_survives_restart() {
    common::init_tracing();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("sequences.json");
    let secret = SecretKey::generate();

    let build = |net: &MemoryNetwork| {
        Node::builder()
            .fabric(Arc::new(net.fabric(secret.public())))
            .secret_key(secret.clone())
            .sequences(Arc::new(FileSequenceStore::new(&path)))
            .build()
            .unwrap()
    };

    let node = build(&MemoryNetwork::new());
    let cid = node.add_bytes(&b"persisted"[..]).await.unwrap();
    assert_eq!(node.publish(&cid).await.unwrap().record.sequence, 0);
    assert_eq!(node.publish(&cid).await.unwrap().record.sequence, 1);
    drop(node);

    // a fresh network: nothing to learn the old sequence from but the file
    let restarted = build(&MemoryNetwork::new());
    let report = restarted.publish(&cid).await.unwrap();
    assert_eq!(report.record.sequence, 2);
}
