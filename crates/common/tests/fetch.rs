//! Integration tests for moving files between nodes

mod common;

use std::sync::Arc;

use ::common::blockstore::{BlockStore, FsBlockStore};
use ::common::fabric::MemoryNetwork;
use ::common::linked_data::Cid;
use ::common::node::NodeError;
use ::common::testkit::TestPeer;
use tempfile::TempDir;

const HELLO: &[u8] = b"Hello World ZPP@";

#[tokio::test]
async fn test_fetch_hello_world_from_peer() {
    let mut net = common::connected_network(&["alice", "bob"], Default::default()).await;
    let alice = net.get("alice").unwrap();
    let bob = net.get("bob").unwrap();

    let cid = alice.add_bytes(HELLO).await.unwrap();
    assert!(!bob.has_block(&cid).await.unwrap());

    let data = bob.fetch_from(alice, &cid).await.unwrap();
    assert_eq!(data, HELLO);
    // written through on success
    assert!(bob.has_block(&cid).await.unwrap());

    net.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_cat_multi_level_file_across_nodes() {
    let mut net = common::connected_network(&["alice", "bob"], common::small_chunks()).await;
    let alice = net.get("alice").unwrap();
    let bob = net.get("bob").unwrap();

    // 64 byte chunks and 174 links per node: a three level DAG
    let data = common::patterned_bytes(64 * 200 + 17);
    let cid = alice.add_bytes(&data).await.unwrap();
    let stat = alice.node().stat(cid).await.unwrap();
    assert_eq!(stat.leaves, 201);
    assert!(stat.nodes >= 3);

    assert_eq!(bob.cat(&cid).await.unwrap(), data);
    // a second read is served locally
    assert_eq!(bob.cat(&cid).await.unwrap(), data);

    net.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_empty_file_round_trips_across_nodes() {
    let mut net = common::connected_network(&["alice", "bob"], Default::default()).await;
    let alice = net.get("alice").unwrap();
    let bob = net.get("bob").unwrap();

    let cid = alice.add_bytes(b"").await.unwrap();
    assert!(bob.cat(&cid).await.unwrap().is_empty());

    net.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_same_bytes_same_cid_across_fs_stores() {
    common::init_tracing();
    let net = MemoryNetwork::new();
    let (dir_a, dir_b) = (TempDir::new().unwrap(), TempDir::new().unwrap());
    let store_a: Arc<dyn BlockStore> = Arc::new(FsBlockStore::open(dir_a.path()).await.unwrap());
    let store_b: Arc<dyn BlockStore> = Arc::new(FsBlockStore::open(dir_b.path()).await.unwrap());

    let a = TestPeer::with_store("a", &net, None, Some(common::small_chunks()), store_a).unwrap();
    let b = TestPeer::with_store("b", &net, None, Some(common::small_chunks()), store_b).unwrap();

    let data = common::patterned_bytes(1000);
    let cid_a = a.add_bytes(&data).await.unwrap();
    let cid_b = b.add_bytes(&data).await.unwrap();
    assert_eq!(cid_a, cid_b);
    assert_eq!(a.cat(&cid_a).await.unwrap(), b.cat(&cid_b).await.unwrap());

    assert_eq!(cid_a.to_string().parse::<Cid>().unwrap(), cid_a);
}

#[tokio::test]
async fn test_missing_content_is_unavailable() {
    let mut net = common::connected_network(&["alice", "bob"], Default::default()).await;
    let alice = net.get("alice").unwrap();

    let nobody_has_this = Cid::raw(b"never added anywhere");
    let err = alice
        .node()
        .cat_to_end(nobody_has_this)
        .await
        .unwrap_err();
    match err {
        NodeError::File(e) => assert!(e.is_unavailable(), "unexpected error: {}", e),
        other => panic!("unexpected error: {}", other),
    }

    net.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_fetch_survives_a_departed_peer() {
    let mut net = common::connected_network(&["alice", "bob", "carol"], Default::default()).await;
    let cid = {
        let alice = net.get("alice").unwrap();
        let bob = net.get("bob").unwrap();
        let cid = alice.add_bytes(HELLO).await.unwrap();
        bob.fetch_from(alice, &cid).await.unwrap();
        cid
    };
    net.remove_peer("alice").await.unwrap();

    let carol = net.get("carol").unwrap();
    assert_eq!(carol.cat(&cid).await.unwrap(), HELLO);

    net.shutdown().await.unwrap();
}
