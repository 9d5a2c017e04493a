use clap::Args;

use super::KeyError;

#[derive(Args, Debug, Clone)]
pub struct New {
    /// Name for the new key
    pub name: String,
}

#[async_trait::async_trait]
impl crate::op::Op for New {
    type Error = KeyError;
    type Output = String;

    async fn execute(&self, ctx: &crate::op::OpContext) -> Result<Self::Output, Self::Error> {
        let keychain = ctx.state()?.keychain()?;
        let identity = keychain.create_key(&self.name)?;
        Ok(format!("{} {}", self.name, identity))
    }
}
