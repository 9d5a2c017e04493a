use std::sync::Arc;

use super::{BackendKind, Node, NodeConfig, NodeError};
use crate::blockstore::{BlockStore, MemoryBlockStore};
use crate::crypto::SecretKey;
use crate::exchange::BlockExchange;
use crate::fabric::{Fabric, IrohFabric, MAX_MESSAGE_SIZE};
use crate::file::Chunker;
use crate::keychain::Keychain;
use crate::name::{
    BroadcastBackend, BroadcastService, DirectoryBackend, DirectoryService, MemorySequenceStore,
    NameService, RoutingBackend, SequenceStore,
};

/// Headroom for the wire envelope around a block
const ENVELOPE_OVERHEAD: usize = 1024;

#[derive(Debug, Default)]
pub struct NodeBuilder {
    /// the identity of the node
    ///  if not set, a fresh one is generated
    secret_key: Option<SecretKey>,
    /// where blocks live, in memory if not set
    store: Option<Arc<dyn BlockStore>>,
    /// how the node reaches peers, an iroh endpoint if not set
    fabric: Option<Arc<dyn Fabric>>,
    sequences: Option<Arc<dyn SequenceStore>>,
    keychain: Option<Keychain>,
    /// extra routing backends on top of the configured ones
    backends: Vec<Arc<dyn RoutingBackend>>,
    config: NodeConfig,
}

impl NodeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn secret_key(mut self, secret_key: SecretKey) -> Self {
        self.secret_key = Some(secret_key);
        self
    }

    pub fn store(mut self, store: Arc<dyn BlockStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn fabric(mut self, fabric: Arc<dyn Fabric>) -> Self {
        self.fabric = Some(fabric);
        self
    }

    pub fn sequences(mut self, sequences: Arc<dyn SequenceStore>) -> Self {
        self.sequences = Some(sequences);
        self
    }

    pub fn keychain(mut self, keychain: Keychain) -> Self {
        self.keychain = Some(keychain);
        self
    }

    pub fn backend(mut self, backend: Arc<dyn RoutingBackend>) -> Self {
        self.backends.push(backend);
        self
    }

    pub fn config(mut self, config: NodeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<Node, NodeError> {
        let config = self.config;
        if config.chunk_size == 0 || config.chunk_size + ENVELOPE_OVERHEAD > MAX_MESSAGE_SIZE {
            return Err(NodeError::Config(format!(
                "chunk size {} must be between 1 and {}",
                config.chunk_size,
                MAX_MESSAGE_SIZE - ENVELOPE_OVERHEAD
            )));
        }

        let secret = self.secret_key.unwrap_or_else(SecretKey::generate);
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryBlockStore::new()));
        let fabric = match self.fabric {
            Some(fabric) => fabric,
            None => Arc::new(IrohFabric::new(secret.clone(), config.fabric.clone())),
        };
        if fabric.local_identity() != secret.public() {
            return Err(NodeError::Config(format!(
                "fabric identity {} does not match node key {}",
                fabric.local_identity(),
                secret.public()
            )));
        }
        let sequences = self
            .sequences
            .unwrap_or_else(|| Arc::new(MemorySequenceStore::new()));
        let keychain = self.keychain.unwrap_or_else(Keychain::memory);

        let exchange = BlockExchange::new(store.clone(), fabric.clone(), config.exchange.clone());
        let directory = DirectoryService::new();
        let broadcast = BroadcastService::new(fabric.clone());

        let mut backends: Vec<Arc<dyn RoutingBackend>> = Vec::new();
        for kind in &config.backends {
            match kind {
                BackendKind::Directory => {
                    let servers = config.directory_servers.iter().map(|a| a.id).collect();
                    let mut backend = DirectoryBackend::new(fabric.clone(), servers);
                    if config.host_directory {
                        backend = backend.with_local(directory.clone());
                    }
                    backends.push(Arc::new(backend));
                }
                BackendKind::Broadcast => {
                    backends.push(Arc::new(BroadcastBackend::new(broadcast.clone())));
                }
            }
        }
        backends.extend(self.backends);
        let names = NameService::new(backends, sequences, config.names.clone());

        tracing::debug!(
            "built node {} with {} routing backends",
            secret.public().short(),
            names.backends().len()
        );

        Ok(Node {
            chunker: Chunker::fixed(config.chunk_size),
            secret,
            config,
            store,
            fabric,
            exchange,
            names,
            keychain,
            directory,
            broadcast,
        })
    }
}
