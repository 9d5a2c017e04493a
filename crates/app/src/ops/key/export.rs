use std::path::PathBuf;

use clap::Args;

use super::KeyError;

#[derive(Args, Debug, Clone)]
pub struct Export {
    pub name: String,

    /// Write the PEM here instead of printing it
    #[arg(long, short)]
    pub output: Option<PathBuf>,
}

#[async_trait::async_trait]
impl crate::op::Op for Export {
    type Error = KeyError;
    type Output = String;

    async fn execute(&self, ctx: &crate::op::OpContext) -> Result<Self::Output, Self::Error> {
        let pem = ctx.state()?.keychain()?.export_pem(&self.name)?;
        match &self.output {
            Some(path) => {
                tokio::fs::write(path, pem).await?;
                Ok(format!("exported {} to {}", self.name, path.display()))
            }
            None => Ok(pem.trim_end().to_string()),
        }
    }
}
