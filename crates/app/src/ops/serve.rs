use clap::Args;

use crate::process::{graceful_shutdown_blocker, report_build_info};

#[derive(Args, Debug, Clone)]
pub struct Serve {}

#[derive(Debug, thiserror::Error)]
pub enum ServeError {
    #[error("state error: {0}")]
    State(#[from] crate::state::StateError),
    #[error("node error: {0}")]
    Node(#[from] common::node::NodeError),
}

#[async_trait::async_trait]
impl crate::op::Op for Serve {
    type Error = ServeError;
    type Output = String;

    async fn execute(&self, ctx: &crate::op::OpContext) -> Result<Self::Output, Self::Error> {
        report_build_info();
        let (blocker, mut shutdown_rx) = graceful_shutdown_blocker();

        let node = ctx.node().await?;
        let bound = node.spawn().await?;
        tracing::info!("serving as {} on {:?}", node.id(), bound);
        for addr in &bound {
            println!("{}@{}", node.id(), addr);
        }

        let _ = shutdown_rx.changed().await;
        node.shutdown().await?;
        let _ = blocker.await;

        Ok(format!("node {} stopped", node.id()))
    }
}
