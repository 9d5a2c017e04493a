use std::path::PathBuf;

use clap::Args;

#[derive(Args, Debug, Clone)]
pub struct Add {
    /// File to add
    pub path: PathBuf,
}

#[derive(Debug, thiserror::Error)]
pub enum AddError {
    #[error("state error: {0}")]
    State(#[from] crate::state::StateError),
    #[error("add failed: {0}")]
    Node(#[from] common::node::NodeError),
}

#[async_trait::async_trait]
impl crate::op::Op for Add {
    type Error = AddError;
    type Output = String;

    async fn execute(&self, ctx: &crate::op::OpContext) -> Result<Self::Output, Self::Error> {
        // adding is local only, nothing goes over the network
        let node = ctx.node().await?;
        let cid = node.add_file(&self.path).await?;
        Ok(cid.to_string())
    }
}
