use clap::Args;
use common::crypto::PublicKey;

#[derive(Args, Debug, Clone)]
pub struct Resolve {
    /// Identity to resolve (defaults to this node's own)
    pub identity: Option<PublicKey>,

    /// Resolve the identity of this keychain key
    #[arg(long, conflicts_with = "identity")]
    pub key: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("state error: {0}")]
    State(#[from] crate::state::StateError),
    #[error("keychain error: {0}")]
    Keychain(#[from] common::keychain::KeychainError),
    #[error("resolve failed: {0}")]
    Node(#[from] common::node::NodeError),
}

#[async_trait::async_trait]
impl crate::op::Op for Resolve {
    type Error = ResolveError;
    type Output = String;

    async fn execute(&self, ctx: &crate::op::OpContext) -> Result<Self::Output, Self::Error> {
        let node = ctx.online_node().await?;
        let identity = match (&self.identity, &self.key) {
            (Some(identity), _) => *identity,
            (None, Some(key)) => node.keychain().get(key)?.public(),
            (None, None) => node.id(),
        };
        let result = node.resolve(&identity).await;
        node.shutdown().await?;
        Ok(result?.to_string())
    }
}
