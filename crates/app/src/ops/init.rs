use std::net::SocketAddr;

use clap::Args;
use common::fabric::PeerAddr;

use crate::state::{AppConfig, AppState};

#[derive(Args, Debug, Clone)]
pub struct Init {
    /// Fabric listen address (defaults to an ephemeral port on all interfaces)
    #[arg(long)]
    pub listen: Option<SocketAddr>,

    /// Bootstrap peer as <peer-id>[@ip:port,..], repeatable
    #[arg(long = "bootstrap")]
    pub bootstrap: Vec<PeerAddr>,

    /// Directory server as <peer-id>[@ip:port,..], repeatable
    #[arg(long = "directory-server")]
    pub directory_servers: Vec<PeerAddr>,

    /// Leaf size in bytes for added files
    #[arg(long)]
    pub chunk_size: Option<usize>,

    /// Do not answer directory requests from other nodes
    #[arg(long)]
    pub no_host_directory: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("init failed: {0}")]
    StateFailed(#[from] crate::state::StateError),
}

#[async_trait::async_trait]
impl crate::op::Op for Init {
    type Error = InitError;
    type Output = String;

    async fn execute(&self, ctx: &crate::op::OpContext) -> Result<Self::Output, Self::Error> {
        let mut config = AppConfig::default();
        if let Some(addr) = self.listen {
            config.node.listen_addr = addr;
        }
        if let Some(size) = self.chunk_size {
            config.node.chunk_size = size;
        }
        config.node.bootstrap = self.bootstrap.clone();
        config.node.directory_servers = self.directory_servers.clone();
        config.node.host_directory = !self.no_host_directory;

        let state = AppState::init(ctx.config_path.clone(), Some(config))?;
        let identity = state.load_key()?.public();

        Ok(format!(
            "Initialized cairn directory at: {}\n\
             - Identity: {}\n\
             - Key: {}\n\
             - Blocks: {}\n\
             - Keys: {}\n\
             - Config: {}\n\
             - Listen address: {}",
            state.cairn_dir.display(),
            identity,
            state.key_path.display(),
            state.blocks_path.display(),
            state.keys_path.display(),
            state.config_path.display(),
            state.config.node.listen_addr,
        ))
    }
}
