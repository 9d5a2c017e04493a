use clap::{Args, Subcommand};

pub mod export;
pub mod import;
pub mod list;
pub mod new;

use crate::op::Op;

crate::command_enum! {
    (New, new::New),
    (List, list::List),
    (Export, export::Export),
    (Import, import::Import),
}

pub type KeyCommand = Command;

/// Manage the named keys names can be published under
#[derive(Args, Debug, Clone)]
pub struct Key {
    #[command(subcommand)]
    pub command: KeyCommand,
}

#[async_trait::async_trait]
impl Op for Key {
    type Error = OpError;
    type Output = OpOutput;

    async fn execute(&self, ctx: &crate::op::OpContext) -> Result<Self::Output, Self::Error> {
        self.command.execute(ctx).await
    }
}

#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("state error: {0}")]
    State(#[from] crate::state::StateError),
    #[error("{0}")]
    Keychain(#[from] common::keychain::KeychainError),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
