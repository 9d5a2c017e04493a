//! Network fabric
//!
//! The narrow interface the rest of the node uses to talk to peers. A
//!  fabric hands out connections to peers by identity and opens
//!  protocol-tagged substreams on them; encryption, multiplexing and hole
//!  punching are the implementation's business.
//!
//! Every substream carries a single request/response exchange: each side
//!  sends at most one message, which closes its direction, and `receive`
//!  yields the peer's message once before returning `None`. An empty
//!  message cannot be told apart from a closed direction.
//!
//! Two implementations exist: [`IrohFabric`] over an iroh endpoint, and
//!  [`MemoryFabric`], an in-process network for tests.

use std::fmt::Debug;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

mod addr;
mod iroh_fabric;
mod memory;

pub use addr::PeerAddr;
pub use iroh_fabric::{IrohFabric, IrohFabricConfig};
pub use memory::{MemoryFabric, MemoryNetwork};

use crate::crypto::PublicKey;

/// Peers are identified by their public key
pub type PeerId = PublicKey;

/// Largest single message a substream will accept
pub const MAX_MESSAGE_SIZE: usize = 4 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum FabricError {
    #[error("failed to dial {0}: {1}")]
    Dial(PeerId, String),
    #[error("fabric is not listening")]
    NotListening,
    #[error("peer {0} does not handle protocol {1}")]
    UnknownProtocol(PeerId, String),
    #[error("stream closed")]
    Closed,
    #[error("message of {0} bytes exceeds the limit")]
    TooLarge(usize),
    #[error("invalid peer address: {0}")]
    InvalidAddr(String),
    #[error("fabric error: {0}")]
    Default(#[from] anyhow::Error),
}

/// One direction-pair of a protocol exchange with a peer
#[async_trait]
pub trait Substream: Send {
    /// Send this side's message and close the sending direction
    async fn send(&mut self, data: Bytes) -> Result<(), FabricError>;

    /// Receive the peer's message, or `None` once the peer closed
    ///  its direction
    async fn receive(&mut self) -> Result<Option<Bytes>, FabricError>;
}

pub type BoxSubstream = Box<dyn Substream>;

#[async_trait]
pub trait Connection: Send + Sync {
    fn remote(&self) -> PeerId;

    async fn open_stream(&self, protocol: &'static [u8]) -> Result<BoxSubstream, FabricError>;
}

/// Responder side of a protocol
#[async_trait]
pub trait StreamHandler: Send + Sync + Debug + 'static {
    async fn handle(&self, remote: PeerId, stream: BoxSubstream) -> Result<(), FabricError>;
}

#[async_trait]
pub trait Fabric: Send + Sync + Debug + 'static {
    fn local_identity(&self) -> PeerId;

    /// Register the responder for `protocol`. Must happen before `listen`.
    fn accept(&self, protocol: &'static [u8], handler: Arc<dyn StreamHandler>);

    /// Start accepting connections on `addr`, returning the bound addresses
    async fn listen(&self, addr: SocketAddr) -> Result<Vec<SocketAddr>, FabricError>;

    /// Remember how to reach a peer, e.g. from a static bootstrap list
    fn add_peer_addr(&self, addr: PeerAddr);

    async fn dial(&self, addr: &PeerAddr) -> Result<Arc<dyn Connection>, FabricError>;

    fn connected_peers(&self) -> Vec<PeerId>;

    async fn shutdown(&self) -> Result<(), FabricError>;

    /// Dial a peer by identity alone, relying on remembered addresses
    async fn dial_peer(&self, peer: &PeerId) -> Result<Arc<dyn Connection>, FabricError> {
        self.dial(&PeerAddr::from(*peer)).await
    }

    /// Open a substream, send one request and wait for the reply
    async fn request(
        &self,
        peer: &PeerId,
        protocol: &'static [u8],
        message: Bytes,
    ) -> Result<Bytes, FabricError> {
        let conn = self.dial_peer(peer).await?;
        let mut stream = conn.open_stream(protocol).await?;
        stream.send(message).await?;
        stream.receive().await?.ok_or(FabricError::Closed)
    }

    /// Open a substream and send one message without waiting for a reply
    async fn notify(
        &self,
        peer: &PeerId,
        protocol: &'static [u8],
        message: Bytes,
    ) -> Result<(), FabricError> {
        let conn = self.dial_peer(peer).await?;
        let mut stream = conn.open_stream(protocol).await?;
        stream.send(message).await
    }
}
