use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::{NameRecord, RoutingBackend, RoutingError};
use crate::crypto::PublicKey;
use crate::fabric::{BoxSubstream, Fabric, FabricError, PeerId, StreamHandler};

/// ALPN identifier for the record directory protocol
pub const DIRECTORY_ALPN: &[u8] = b"/cairn/directory/1";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DirectoryRequest {
    Put(NameRecord),
    Get(PublicKey),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DirectoryReply {
    Stored,
    Rejected(String),
    Record(Option<NameRecord>),
}

/// A record host: keeps the newest valid record per identity and hands
///  it out on request.
#[derive(Debug, Clone, Default)]
pub struct DirectoryService {
    records: Arc<RwLock<HashMap<PublicKey, NameRecord>>>,
}

impl DirectoryService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `record` if it is valid and newer than what is held
    pub fn put(&self, record: NameRecord) -> Result<(), RoutingError> {
        record
            .verify_self(Utc::now())
            .map_err(|e| RoutingError::Rejected(e.to_string()))?;

        let mut records = self.records.write();
        if let Some(held) = records.get(&record.public_key) {
            if held.sequence > record.sequence
                || (held.sequence == record.sequence && held != &record)
            {
                return Err(RoutingError::Rejected(format!(
                    "stale sequence {}, holding {}",
                    record.sequence, held.sequence
                )));
            }
        }
        tracing::debug!(
            "directory stored record {} for {}",
            record.sequence,
            record.public_key.short()
        );
        records.insert(record.public_key, record);
        Ok(())
    }

    pub fn get(&self, identity: &PublicKey) -> Option<NameRecord> {
        self.records.read().get(identity).cloned()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[async_trait]
impl StreamHandler for DirectoryService {
    async fn handle(&self, remote: PeerId, mut stream: BoxSubstream) -> Result<(), FabricError> {
        let Some(request) = stream.receive().await? else {
            return Ok(());
        };
        let request: DirectoryRequest =
            bincode::deserialize(&request).map_err(|e| anyhow::anyhow!(e))?;

        let reply = match request {
            DirectoryRequest::Put(record) => match self.put(record) {
                Ok(()) => DirectoryReply::Stored,
                Err(e) => {
                    tracing::debug!("rejected record from {}: {}", remote.short(), e);
                    DirectoryReply::Rejected(e.to_string())
                }
            },
            DirectoryRequest::Get(identity) => DirectoryReply::Record(self.get(&identity)),
        };

        let reply = bincode::serialize(&reply).map_err(|e| anyhow::anyhow!(e))?;
        stream.send(Bytes::from(reply)).await
    }
}

/// Publishes to and queries a set of directory servers
#[derive(Debug, Clone)]
pub struct DirectoryBackend {
    fabric: Arc<dyn Fabric>,
    servers: Vec<PeerId>,
    /// This node's own directory, if it hosts one
    local: Option<DirectoryService>,
}

impl DirectoryBackend {
    pub fn new(fabric: Arc<dyn Fabric>, servers: Vec<PeerId>) -> Self {
        Self {
            fabric,
            servers,
            local: None,
        }
    }

    /// Also publish into and query this node's own directory
    pub fn with_local(mut self, local: DirectoryService) -> Self {
        self.local = Some(local);
        self
    }

    pub fn servers(&self) -> &[PeerId] {
        &self.servers
    }

    async fn put_remote(&self, server: &PeerId, request: Bytes) -> Result<(), RoutingError> {
        let reply = self.fabric.request(server, DIRECTORY_ALPN, request).await?;
        let reply: DirectoryReply = bincode::deserialize(&reply)?;
        match reply {
            DirectoryReply::Stored => Ok(()),
            DirectoryReply::Rejected(reason) => Err(RoutingError::Rejected(reason)),
            DirectoryReply::Record(_) => Err(anyhow::anyhow!("unexpected reply to put").into()),
        }
    }
}

#[async_trait]
impl RoutingBackend for DirectoryBackend {
    fn name(&self) -> &str {
        "directory"
    }

    async fn publish(&self, record: &NameRecord) -> Result<(), RoutingError> {
        let mut stored = 0;
        let mut last_err = None;

        if let Some(local) = &self.local {
            match local.put(record.clone()) {
                Ok(()) => stored += 1,
                Err(e) => last_err = Some(e),
            }
        }

        let request = Bytes::from(bincode::serialize(&DirectoryRequest::Put(record.clone()))?);
        let puts = self
            .servers
            .iter()
            .map(|server| self.put_remote(server, request.clone()));
        for (server, result) in self
            .servers
            .iter()
            .zip(futures::future::join_all(puts).await)
        {
            match result {
                Ok(()) => stored += 1,
                Err(e) => {
                    tracing::debug!("directory {} did not take the record: {}", server.short(), e);
                    last_err = Some(e);
                }
            }
        }

        match (stored, last_err) {
            (0, Some(e)) => Err(e),
            (0, None) => Err(RoutingError::NoPeers),
            _ => Ok(()),
        }
    }

    fn query(&self, identity: &PublicKey) -> BoxStream<'static, NameRecord> {
        let local = self
            .local
            .as_ref()
            .and_then(|local| local.get(identity));

        let fabric = self.fabric.clone();
        let identity = *identity;
        let concurrency = self.servers.len().max(1);
        let remote = stream::iter(self.servers.clone())
            .map(move |server| {
                let fabric = fabric.clone();
                async move {
                    let request = bincode::serialize(&DirectoryRequest::Get(identity)).ok()?;
                    let reply = fabric
                        .request(&server, DIRECTORY_ALPN, Bytes::from(request))
                        .await
                        .map_err(|e| {
                            tracing::debug!("directory {} query failed: {}", server.short(), e)
                        })
                        .ok()?;
                    match bincode::deserialize::<DirectoryReply>(&reply).ok()? {
                        DirectoryReply::Record(record) => record,
                        _ => None,
                    }
                }
            })
            .buffer_unordered(concurrency)
            .filter_map(futures::future::ready);

        stream::iter(local).chain(remote).boxed()
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use chrono::Duration;

    use super::*;
    use crate::crypto::SecretKey;
    use crate::fabric::{MemoryFabric, MemoryNetwork};
    use crate::linked_data::Cid;

    fn any_addr() -> SocketAddr {
        "0.0.0.0:0".parse().unwrap()
    }

    async fn server(network: &MemoryNetwork) -> (Arc<MemoryFabric>, DirectoryService) {
        let fabric = Arc::new(network.fabric(SecretKey::generate().public()));
        let service = DirectoryService::new();
        fabric.accept(DIRECTORY_ALPN, Arc::new(service.clone()));
        fabric.listen(any_addr()).await.unwrap();
        (fabric, service)
    }

    #[test]
    fn test_service_rejects_stale_and_invalid() {
        let service = DirectoryService::new();
        let secret = SecretKey::generate();
        let cid = Cid::raw(b"x");

        service
            .put(NameRecord::sign(&secret, &cid, 2, Duration::hours(1)))
            .unwrap();
        assert!(service
            .put(NameRecord::sign(&secret, &cid, 1, Duration::hours(1)))
            .is_err());

        let mut forged = NameRecord::sign(&secret, &cid, 9, Duration::hours(1));
        forged.sequence = 10;
        assert!(service.put(forged).is_err());
        assert_eq!(service.get(&secret.public()).unwrap().sequence, 2);
    }

    #[tokio::test]
    async fn test_publish_and_query_through_server() {
        let network = MemoryNetwork::new();
        let (server_fabric, service) = server(&network).await;
        let client = Arc::new(network.fabric(SecretKey::generate().public()));
        client.listen(any_addr()).await.unwrap();

        let backend = DirectoryBackend::new(client, vec![server_fabric.local_identity()]);
        let secret = SecretKey::generate();
        let record = NameRecord::sign(&secret, &Cid::raw(b"x"), 0, Duration::hours(1));
        backend.publish(&record).await.unwrap();
        assert_eq!(service.len(), 1);

        let found: Vec<NameRecord> = backend.query(&secret.public()).collect().await;
        assert_eq!(found, vec![record]);
    }

    #[tokio::test]
    async fn test_publish_fails_when_no_server_takes_it() {
        let network = MemoryNetwork::new();
        let client = Arc::new(network.fabric(SecretKey::generate().public()));
        client.listen(any_addr()).await.unwrap();
        let secret = SecretKey::generate();
        let record = NameRecord::sign(&secret, &Cid::raw(b"x"), 0, Duration::hours(1));

        let empty = DirectoryBackend::new(client.clone(), vec![]);
        assert!(matches!(
            empty.publish(&record).await,
            Err(RoutingError::NoPeers)
        ));

        let unreachable = DirectoryBackend::new(client, vec![SecretKey::generate().public()]);
        assert!(unreachable.publish(&record).await.is_err());
        assert_eq!(unreachable.query(&secret.public()).count().await, 0);
    }

    #[tokio::test]
    async fn test_local_directory() {
        let network = MemoryNetwork::new();
        let client = Arc::new(network.fabric(SecretKey::generate().public()));
        let local = DirectoryService::new();
        let backend = DirectoryBackend::new(client, vec![]).with_local(local.clone());

        let secret = SecretKey::generate();
        let record = NameRecord::sign(&secret, &Cid::raw(b"x"), 0, Duration::hours(1));
        backend.publish(&record).await.unwrap();
        let found: Vec<NameRecord> = backend.query(&secret.public()).collect().await;
        assert_eq!(found, vec![record]);
    }
}
