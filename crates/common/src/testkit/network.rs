use super::peer::TestPeer;
use crate::fabric::{MemoryNetwork, PeerAddr};
use crate::node::NodeConfig;
use anyhow::Result;
use std::collections::HashMap;
use std::time::Duration;

/// A coordinator for multiple test peers
///
/// TestNetwork manages the lifecycle of multiple peers on one in-memory
/// network and provides utilities for eventual consistency testing.
pub struct TestNetwork {
    net: MemoryNetwork,
    /// All peers in the network, indexed by name
    peers: HashMap<String, TestPeer>,
}

impl TestNetwork {
    pub fn new() -> Self {
        Self {
            net: MemoryNetwork::new(),
            peers: HashMap::new(),
        }
    }

    pub fn memory(&self) -> &MemoryNetwork {
        &self.net
    }

    /// Add a new peer with the default configuration and start it
    pub async fn add_peer(&mut self, name: impl Into<String>) -> Result<&TestPeer> {
        self.add_peer_with(name, NodeConfig::default()).await
    }

    /// Add a new peer and start it
    ///
    /// # Arguments
    /// * `name` - Unique name for this peer
    /// * `config` - Node configuration for the peer
    pub async fn add_peer_with(
        &mut self,
        name: impl Into<String>,
        config: NodeConfig,
    ) -> Result<&TestPeer> {
        let name = name.into();

        if self.peers.contains_key(&name) {
            return Err(anyhow::anyhow!("Peer '{}' already exists", name));
        }

        let mut peer = TestPeer::new(name.clone(), &self.net, None, Some(config))?;
        peer.start().await?;

        Ok(self.peers.entry(name).or_insert(peer))
    }

    /// Get a peer by name
    pub fn peer(&self, name: &str) -> Option<&TestPeer> {
        self.peers.get(name)
    }

    /// Get a peer by name, failing the test setup if it is missing
    pub fn get(&self, name: &str) -> Result<&TestPeer> {
        self.peers
            .get(name)
            .ok_or_else(|| anyhow::anyhow!("no peer named '{}'", name))
    }

    /// Get all peer names
    pub fn peer_names(&self) -> Vec<String> {
        self.peers.keys().cloned().collect()
    }

    /// Connect `a` to `b`, both must be running
    pub async fn connect(&self, a: &str, b: &str) -> Result<()> {
        let (a, b) = (self.get(a)?, self.get(b)?);
        let addr = PeerAddr::new(b.id(), b.bound_addrs().to_vec());
        a.node().fabric().dial(&addr).await?;
        tracing::trace!("Connected {} to {}", a.name, b.name);
        Ok(())
    }

    /// Connect every peer to every other peer
    pub async fn connect_all(&self) -> Result<()> {
        let names = self.peer_names();
        tracing::debug!("Connecting {} peers to each other", names.len());
        for a in &names {
            for b in &names {
                if a < b {
                    self.connect(a, b).await?;
                }
            }
        }
        tracing::info!("All peers connected to each other");
        Ok(())
    }

    /// Remove a peer from the network and stop it
    pub async fn remove_peer(&mut self, name: &str) -> Result<()> {
        if let Some(mut peer) = self.peers.remove(name) {
            peer.stop().await?;
        }
        Ok(())
    }

    /// Shutdown all peers in the network
    pub async fn shutdown(&mut self) -> Result<()> {
        tracing::info!("Shutting down test network with {} peers", self.peers.len());

        for (name, peer) in self.peers.iter_mut() {
            tracing::debug!("Stopping peer: {}", name);
            if let Err(e) = peer.stop().await {
                tracing::error!("Error stopping peer {}: {}", name, e);
            }
        }

        self.peers.clear();
        tracing::info!("Test network shut down complete");

        Ok(())
    }

    /// Poll a condition until it succeeds or times out
    ///
    /// This is useful for testing eventual consistency across peers,
    /// e.g. waiting for a broadcast record to reach the far end of a line.
    pub async fn eventually<F, Fut>(&self, timeout: Duration, condition: F) -> Result<()>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<bool>>,
    {
        let start = std::time::Instant::now();
        let poll_interval = Duration::from_millis(20);

        loop {
            match condition().await {
                Ok(true) => {
                    tracing::debug!("Eventual condition met after {:?}", start.elapsed());
                    return Ok(());
                }
                Ok(false) => {}
                Err(e) => {
                    // transient errors are expected while state propagates
                    tracing::debug!("Eventual condition check error: {}", e);
                }
            }

            if start.elapsed() > timeout {
                return Err(anyhow::anyhow!(
                    "Condition not met within timeout ({:?})",
                    timeout
                ));
            }

            tokio::time::sleep(poll_interval).await;
        }
    }
}

impl Default for TestNetwork {
    fn default() -> Self {
        Self::new()
    }
}
