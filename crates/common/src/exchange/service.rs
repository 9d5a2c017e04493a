use std::sync::Arc;

use async_trait::async_trait;

use super::messages::{Want, WantReply};
use crate::blockstore::BlockStore;
use crate::fabric::{BoxSubstream, FabricError, PeerId, StreamHandler};

/// Answers [`Want`]s from the local block store
#[derive(Debug, Clone)]
pub struct ExchangeService {
    store: Arc<dyn BlockStore>,
}

impl ExchangeService {
    pub fn new(store: Arc<dyn BlockStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl StreamHandler for ExchangeService {
    async fn handle(&self, remote: PeerId, mut stream: BoxSubstream) -> Result<(), FabricError> {
        let Some(request) = stream.receive().await? else {
            return Ok(());
        };
        let want = Want::decode(&request).map_err(|e| anyhow::anyhow!(e))?;

        let reply = match self.store.get(&want.cid).await {
            Ok(data) => WantReply::Have {
                data: data.to_vec(),
            },
            Err(e) => {
                if !e.is_not_found() {
                    tracing::warn!("failed to read {} for {}: {}", want.cid, remote.short(), e);
                }
                WantReply::DontHave
            }
        };
        tracing::debug!("want {} from {}: {:?}", want.cid, remote.short(), reply);

        let reply = reply.encode().map_err(|e| anyhow::anyhow!(e))?;
        stream.send(reply).await
    }
}
