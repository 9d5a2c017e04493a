use std::fmt::Debug;

use async_trait::async_trait;
use futures::stream::BoxStream;

use super::NameRecord;
use crate::crypto::PublicKey;
use crate::fabric::FabricError;

#[derive(Debug, thiserror::Error)]
pub enum RoutingError {
    #[error("no peers to route through")]
    NoPeers,
    #[error("record rejected: {0}")]
    Rejected(String),
    #[error("fabric error: {0}")]
    Fabric(#[from] FabricError),
    #[error("routing message error: {0}")]
    Message(#[from] bincode::Error),
    #[error("routing error: {0}")]
    Default(#[from] anyhow::Error),
}

/// A mechanism name records are propagated and looked up through
///
/// Backends pass records along as they find them; none of them is
///  trusted to have checked signatures or validity, that is left to
///  the resolver.
#[async_trait]
pub trait RoutingBackend: Send + Sync + Debug + 'static {
    /// Short label for logs and publish reports
    fn name(&self) -> &str;

    async fn publish(&self, record: &NameRecord) -> Result<(), RoutingError>;

    /// Every record this backend can find for `identity`. The stream
    ///  ends once the backend has nothing more to offer.
    fn query(&self, identity: &PublicKey) -> BoxStream<'static, NameRecord>;
}
