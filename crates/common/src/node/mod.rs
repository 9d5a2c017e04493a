//! The node handle
//!
//! A [`Node`] ties one identity to a block store, a fabric, a block
//!  exchange and a naming service. Nothing is ambient: every operation
//!  goes through the handles the node was built with, and two nodes in
//!  one process share nothing unless they were given the same handles.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use futures::stream::BoxStream;

mod builder;
mod config;

pub use builder::NodeBuilder;
pub use config::{BackendKind, NodeConfig};

use crate::blockstore::{BlockStore, BlockStoreError};
use crate::crypto::{PublicKey, SecretKey};
use crate::exchange::{BlockExchange, ExchangeError, EXCHANGE_ALPN};
use crate::fabric::{Fabric, FabricError, PeerId};
use crate::file::{self, Chunker, FileError, FileStat, FileWriter};
use crate::keychain::{Keychain, KeychainError};
use crate::linked_data::Cid;
use crate::name::{
    BroadcastService, DirectoryService, NameError, NameService, PublishReport, BROADCAST_ALPN,
    DIRECTORY_ALPN,
};

#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("invalid node configuration: {0}")]
    Config(String),
    #[error("fabric error: {0}")]
    Fabric(#[from] FabricError),
    #[error("file error: {0}")]
    File(#[from] FileError),
    #[error("block store error: {0}")]
    Store(#[from] BlockStoreError),
    #[error("exchange error: {0}")]
    Exchange(#[from] ExchangeError),
    #[error("name error: {0}")]
    Name(#[from] NameError),
    #[error("keychain error: {0}")]
    Keychain(#[from] KeychainError),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct Node {
    pub(crate) secret: SecretKey,
    pub(crate) config: NodeConfig,
    pub(crate) chunker: Chunker,
    pub(crate) store: Arc<dyn BlockStore>,
    pub(crate) fabric: Arc<dyn Fabric>,
    pub(crate) exchange: BlockExchange,
    pub(crate) names: NameService,
    pub(crate) keychain: Keychain,
    pub(crate) directory: DirectoryService,
    pub(crate) broadcast: BroadcastService,
}

impl Node {
    pub fn builder() -> NodeBuilder {
        NodeBuilder::new()
    }

    pub fn id(&self) -> PeerId {
        self.secret.public()
    }

    pub fn secret(&self) -> &SecretKey {
        &self.secret
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn BlockStore> {
        &self.store
    }

    pub fn fabric(&self) -> &Arc<dyn Fabric> {
        &self.fabric
    }

    pub fn exchange(&self) -> &BlockExchange {
        &self.exchange
    }

    pub fn names(&self) -> &NameService {
        &self.names
    }

    pub fn keychain(&self) -> &Keychain {
        &self.keychain
    }

    pub fn directory(&self) -> &DirectoryService {
        &self.directory
    }

    pub fn broadcast(&self) -> &BroadcastService {
        &self.broadcast
    }

    pub fn writer(&self) -> FileWriter {
        FileWriter::new(self.store.clone()).with_chunker(self.chunker)
    }

    /// Register this node's responders and start listening.
    ///
    /// Bootstrap peers are remembered as block providers and dialed once;
    ///  a bootstrap peer that cannot be reached is logged and skipped.
    pub async fn spawn(&self) -> Result<Vec<SocketAddr>, NodeError> {
        self.fabric
            .accept(EXCHANGE_ALPN, Arc::new(self.exchange.service()));
        self.fabric
            .accept(BROADCAST_ALPN, Arc::new(self.broadcast.clone()));
        if self.config.host_directory {
            self.fabric
                .accept(DIRECTORY_ALPN, Arc::new(self.directory.clone()));
        }

        let bound = self.fabric.listen(self.config.listen_addr).await?;
        tracing::info!("node {} listening on {:?}", self.id(), bound);

        for addr in &self.config.directory_servers {
            self.fabric.add_peer_addr(addr.clone());
        }
        for addr in &self.config.bootstrap {
            self.fabric.add_peer_addr(addr.clone());
            self.exchange.add_provider(addr.id);
        }
        let dials = self.config.bootstrap.iter().map(|addr| async move {
            if let Err(e) = self.fabric.dial(addr).await {
                tracing::warn!("bootstrap peer {} unreachable: {}", addr.id.short(), e);
            }
        });
        futures::future::join_all(dials).await;

        Ok(bound)
    }

    pub async fn shutdown(&self) -> Result<(), NodeError> {
        tracing::info!("node {} shutting down", self.id().short());
        self.fabric.shutdown().await?;
        Ok(())
    }

    pub async fn add_bytes(&self, data: impl Into<Bytes>) -> Result<Cid, NodeError> {
        Ok(self.writer().add_bytes(data).await?)
    }

    pub async fn add_file(&self, path: impl AsRef<Path>) -> Result<Cid, NodeError> {
        let file = tokio::fs::File::open(path.as_ref()).await?;
        let cid = self.writer().add_reader(file).await?;
        tracing::info!("added {} as {}", path.as_ref().display(), cid);
        Ok(cid)
    }

    /// Stream a file, fetching missing blocks from peers
    pub fn cat(&self, root: Cid) -> BoxStream<'static, Result<Bytes, FileError>> {
        file::cat(Arc::new(self.exchange.clone()), root, self.config.cat)
    }

    pub async fn cat_to_end(&self, root: Cid) -> Result<Bytes, NodeError> {
        Ok(file::read_to_end(Arc::new(self.exchange.clone()), root).await?)
    }

    pub async fn stat(&self, root: Cid) -> Result<FileStat, NodeError> {
        Ok(file::stat(Arc::new(self.exchange.clone()), root).await?)
    }

    /// Fetch a single block, asking `peers` or every known provider
    pub async fn fetch(&self, cid: &Cid, peers: &[PeerId]) -> Result<Bytes, NodeError> {
        let candidates = if peers.is_empty() {
            self.exchange.candidates()
        } else {
            peers.to_vec()
        };
        Ok(self.exchange.fetch(cid, &candidates).await?)
    }

    /// Point this node's own identity at `cid`
    pub async fn publish(&self, cid: &Cid) -> Result<PublishReport, NodeError> {
        Ok(self.names.publish(&self.secret, cid).await?)
    }

    /// Point the keychain identity `key` at `cid`
    pub async fn publish_as(&self, key: &str, cid: &Cid) -> Result<PublishReport, NodeError> {
        let secret = self.keychain.get(key)?;
        Ok(self.names.publish(&secret, cid).await?)
    }

    pub async fn resolve(&self, identity: &PublicKey) -> Result<Cid, NodeError> {
        Ok(self.names.resolve(identity).await?)
    }
}
