use std::path::PathBuf;

use clap::Args;

use super::KeyError;

#[derive(Args, Debug, Clone)]
pub struct Import {
    pub name: String,

    /// PEM file holding the secret key
    pub path: PathBuf,
}

#[async_trait::async_trait]
impl crate::op::Op for Import {
    type Error = KeyError;
    type Output = String;

    async fn execute(&self, ctx: &crate::op::OpContext) -> Result<Self::Output, Self::Error> {
        let pem = tokio::fs::read_to_string(&self.path).await?;
        let identity = ctx.state()?.keychain()?.import_pem(&self.name, &pem)?;
        Ok(format!("{} {}", self.name, identity))
    }
}
