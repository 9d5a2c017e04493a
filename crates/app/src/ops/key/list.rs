use clap::Args;

use super::KeyError;

#[derive(Args, Debug, Clone)]
pub struct List;

#[async_trait::async_trait]
impl crate::op::Op for List {
    type Error = KeyError;
    type Output = String;

    async fn execute(&self, ctx: &crate::op::OpContext) -> Result<Self::Output, Self::Error> {
        let state = ctx.state()?;
        let mut lines = vec![format!("self {}", state.load_key()?.public())];
        for (name, identity) in state.keychain()?.list() {
            lines.push(format!("{} {}", name, identity));
        }
        Ok(lines.join("\n"))
    }
}
