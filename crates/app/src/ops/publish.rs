use clap::Args;
use common::linked_data::Cid;

#[derive(Args, Debug, Clone)]
pub struct Publish {
    /// CID the name should point at
    pub cid: Cid,

    /// Publish under this keychain key instead of the node identity
    #[arg(long)]
    pub key: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("state error: {0}")]
    State(#[from] crate::state::StateError),
    #[error("publish failed: {0}")]
    Node(#[from] common::node::NodeError),
}

#[async_trait::async_trait]
impl crate::op::Op for Publish {
    type Error = PublishError;
    type Output = String;

    async fn execute(&self, ctx: &crate::op::OpContext) -> Result<Self::Output, Self::Error> {
        let node = ctx.online_node().await?;
        let result = match &self.key {
            Some(key) => node.publish_as(key, &self.cid).await,
            None => node.publish(&self.cid).await,
        };
        node.shutdown().await?;
        let report = result?;

        let mut output = format!(
            "published {} -> {} (seq {})",
            report.record.public_key, self.cid, report.record.sequence
        );
        for outcome in report.failed() {
            if let Err(e) = &outcome.result {
                output.push_str(&format!("\n  {} failed: {}", outcome.backend, e));
            }
        }
        Ok(output)
    }
}
