/// Lightweight test harness for multi-node integration tests
///
/// This module provides a simple way to create and test multiple nodes
/// talking to each other in-process over a [`MemoryNetwork`](crate::fabric::MemoryNetwork),
/// without sockets or any external infrastructure.
///
/// # Example
///
/// ```rust,ignore
/// use common::testkit::TestNetwork;
///
/// #[tokio::test]
/// async fn test_fetch() -> anyhow::Result<()> {
///     let mut net = TestNetwork::new();
///     net.add_peer("alice").await?;
///     net.add_peer("bob").await?;
///     net.connect_all().await?;
///
///     let alice = net.get("alice")?;
///     let cid = alice.add_bytes(b"Hello World ZPP@").await?;
///
///     // Bob fetches the block from Alice
///     let bob = net.get("bob")?;
///     assert_eq!(bob.fetch_from(alice, &cid).await?, b"Hello World ZPP@");
///
///     net.shutdown().await?;
///     Ok(())
/// }
/// ```
mod network;
mod peer;

pub use network::TestNetwork;
pub use peer::TestPeer;
