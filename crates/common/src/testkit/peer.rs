use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use bytes::Bytes;

use crate::blockstore::{BlockStore, MemoryBlockStore};
use crate::crypto::{PublicKey, SecretKey};
use crate::fabric::{MemoryNetwork, PeerId};
use crate::linked_data::Cid;
use crate::name::PublishReport;
use crate::node::{Node, NodeConfig};

/// A test node on an in-memory network, with convenience methods for
///  integration testing
pub struct TestPeer {
    /// The name of this peer (for debugging)
    pub name: String,
    node: Node,
    /// Addresses the fabric bound, empty until started
    bound: Vec<SocketAddr>,
}

impl TestPeer {
    /// Create a new test peer
    ///
    /// # Arguments
    /// * `name` - A name for this peer (useful for debugging)
    /// * `net` - The in-memory network the peer joins
    /// * `secret` - Optional secret key (generates random if None)
    /// * `config` - Optional node configuration (defaults if None)
    pub fn new(
        name: impl Into<String>,
        net: &MemoryNetwork,
        secret: Option<SecretKey>,
        config: Option<NodeConfig>,
    ) -> Result<Self> {
        Self::with_store(
            name,
            net,
            secret,
            config,
            Arc::new(MemoryBlockStore::new()),
        )
    }

    /// Create a test peer over a caller-provided block store
    pub fn with_store(
        name: impl Into<String>,
        net: &MemoryNetwork,
        secret: Option<SecretKey>,
        config: Option<NodeConfig>,
        store: Arc<dyn BlockStore>,
    ) -> Result<Self> {
        let name = name.into();
        let secret = secret.unwrap_or_else(SecretKey::generate);

        let node = Node::builder()
            .fabric(Arc::new(net.fabric(secret.public())))
            .secret_key(secret)
            .store(store)
            .config(config.unwrap_or_default())
            .build()?;

        Ok(Self {
            name,
            node,
            bound: Vec::new(),
        })
    }

    /// Register the peer's responders and start listening
    pub async fn start(&mut self) -> Result<()> {
        if !self.bound.is_empty() {
            return Err(anyhow!("Peer already started"));
        }
        self.bound = self.node.spawn().await?;
        tracing::info!(
            "[{}] Peer started with ID: {} on {:?}",
            self.name,
            self.id(),
            self.bound
        );
        Ok(())
    }

    /// Stop the peer, dropping its connections
    pub async fn stop(&mut self) -> Result<()> {
        if !self.bound.is_empty() {
            tracing::info!("[{}] Stopping peer", self.name);
            self.node.shutdown().await?;
            self.bound.clear();
        }
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        !self.bound.is_empty()
    }

    pub fn id(&self) -> PeerId {
        self.node.id()
    }

    pub fn public_key(&self) -> PublicKey {
        self.node.id()
    }

    pub fn bound_addrs(&self) -> &[SocketAddr] {
        &self.bound
    }

    /// Get reference to the underlying node
    pub fn node(&self) -> &Node {
        &self.node
    }

    // ========================================
    // Block Operations
    // ========================================

    pub async fn add_bytes(&self, data: &[u8]) -> Result<Cid> {
        Ok(self.node.add_bytes(Bytes::copy_from_slice(data)).await?)
    }

    /// Read a whole file, fetching missing blocks from peers
    pub async fn cat(&self, root: &Cid) -> Result<Vec<u8>> {
        Ok(self.node.cat_to_end(*root).await?.to_vec())
    }

    /// Fetch one block from a specific peer
    pub async fn fetch_from(&self, other: &TestPeer, cid: &Cid) -> Result<Vec<u8>> {
        Ok(self.node.fetch(cid, &[other.id()]).await?.to_vec())
    }

    /// Check if a block exists locally
    pub async fn has_block(&self, cid: &Cid) -> Result<bool> {
        Ok(self.node.store().has(cid).await?)
    }

    // ========================================
    // Name Operations
    // ========================================

    pub async fn publish(&self, cid: &Cid) -> Result<PublishReport> {
        Ok(self.node.publish(cid).await?)
    }

    pub async fn resolve(&self, identity: &PublicKey) -> Result<Cid> {
        Ok(self.node.resolve(identity).await?)
    }
}

impl std::fmt::Debug for TestPeer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestPeer")
            .field("name", &self.name)
            .field("id", &self.id().short())
            .field("bound", &self.bound)
            .finish()
    }
}
