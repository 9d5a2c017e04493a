use std::path::PathBuf;

use clap::Args;
use common::linked_data::Cid;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;

/// Stream a file to stdout or a path, fetching missing blocks from peers.
///
/// Files added by cairn (raw leaves under dag-cbor nodes) can be read.
///  DAG-PB roots, including every CIDv0 `Qm...` string, are rejected.
#[derive(Args, Debug, Clone)]
pub struct Cat {
    /// Root CID of the file (raw or dag-cbor)
    pub cid: Cid,

    /// Write to this file instead of stdout
    #[arg(long, short)]
    pub output: Option<PathBuf>,
}

#[derive(Debug, thiserror::Error)]
pub enum CatError {
    #[error("state error: {0}")]
    State(#[from] crate::state::StateError),
    #[error("{0}")]
    File(#[from] common::file::FileError),
    #[error("node error: {0}")]
    Node(#[from] common::node::NodeError),
    #[error("write failed: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait::async_trait]
impl crate::op::Op for Cat {
    type Error = CatError;
    type Output = String;

    async fn execute(&self, ctx: &crate::op::OpContext) -> Result<Self::Output, Self::Error> {
        let node = ctx.online_node().await?;
        let result = self.copy_out(&node).await;
        node.shutdown().await?;

        let written = result?;
        Ok(match &self.output {
            Some(path) => format!("wrote {} bytes to {}", written, path.display()),
            None => String::new(),
        })
    }
}

impl Cat {
    async fn copy_out(&self, node: &common::node::Node) -> Result<u64, CatError> {
        let mut out: Box<dyn tokio::io::AsyncWrite + Send + Unpin> = match &self.output {
            Some(path) => Box::new(tokio::fs::File::create(path).await?),
            None => Box::new(tokio::io::stdout()),
        };

        let mut written = 0;
        let mut chunks = node.cat(self.cid);
        while let Some(chunk) = chunks.next().await {
            let chunk = chunk?;
            out.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        out.flush().await?;
        Ok(written)
    }
}
