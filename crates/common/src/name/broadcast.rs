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

/// ALPN identifier for the record broadcast protocol
pub const BROADCAST_ALPN: &[u8] = b"/cairn/broadcast/1";

/// The topic records for `identity` are broadcast on
pub fn topic(identity: &PublicKey) -> String {
    format!("/record/{}", identity.to_hex())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BroadcastMessage {
    /// A record pushed to a topic. One way, never answered.
    Publish { topic: String, record: NameRecord },
    /// Ask for the newest record a peer has seen on a topic
    Fetch { topic: String },
}

/// Flood-style record relay
///
/// Keeps the newest valid record seen per topic. A record that is new
///  to this node is relayed once to every connected peer other than the
///  one it came from; records already seen stop here, which is what
///  ends the flood.
#[derive(Debug, Clone)]
pub struct BroadcastService {
    fabric: Arc<dyn Fabric>,
    topics: Arc<RwLock<HashMap<String, NameRecord>>>,
}

impl BroadcastService {
    pub fn new(fabric: Arc<dyn Fabric>) -> Self {
        Self {
            fabric,
            topics: Arc::default(),
        }
    }

    pub fn cached(&self, identity: &PublicKey) -> Option<NameRecord> {
        self.topics.read().get(&topic(identity)).cloned()
    }

    /// Take in a record on `topic`. Returns whether it was new.
    fn observe(&self, topic_name: &str, record: &NameRecord) -> Result<bool, RoutingError> {
        if topic_name != topic(&record.public_key) {
            return Err(RoutingError::Rejected(format!(
                "record for {} sent on {}",
                record.public_key.short(),
                topic_name
            )));
        }
        record
            .verify_self(Utc::now())
            .map_err(|e| RoutingError::Rejected(e.to_string()))?;

        let mut topics = self.topics.write();
        match topics.get(topic_name) {
            Some(held) if held.sequence >= record.sequence => Ok(false),
            _ => {
                topics.insert(topic_name.to_string(), record.clone());
                Ok(true)
            }
        }
    }

    /// Send a record to every connected peer except `except`,
    ///  returning how many took delivery
    async fn relay(&self, record: &NameRecord, except: Option<PeerId>) -> Result<usize, RoutingError> {
        let message = BroadcastMessage::Publish {
            topic: topic(&record.public_key),
            record: record.clone(),
        };
        let message = Bytes::from(bincode::serialize(&message)?);

        let local = self.fabric.local_identity();
        let peers: Vec<PeerId> = self
            .fabric
            .connected_peers()
            .into_iter()
            .filter(|peer| *peer != local && Some(*peer) != except)
            .collect();

        let sends = peers
            .iter()
            .map(|peer| self.fabric.notify(peer, BROADCAST_ALPN, message.clone()));
        let mut delivered = 0;
        for (peer, result) in peers.iter().zip(futures::future::join_all(sends).await) {
            match result {
                Ok(()) => delivered += 1,
                Err(e) => tracing::debug!("failed to relay record to {}: {}", peer.short(), e),
            }
        }
        Ok(delivered)
    }
}

#[async_trait]
impl StreamHandler for BroadcastService {
    async fn handle(&self, remote: PeerId, mut stream: BoxSubstream) -> Result<(), FabricError> {
        let Some(message) = stream.receive().await? else {
            return Ok(());
        };
        let message: BroadcastMessage =
            bincode::deserialize(&message).map_err(|e| anyhow::anyhow!(e))?;

        match message {
            BroadcastMessage::Publish { topic, record } => match self.observe(&topic, &record) {
                Ok(true) => {
                    tracing::debug!(
                        "relaying record {} on {} from {}",
                        record.sequence,
                        topic,
                        remote.short()
                    );
                    let service = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = service.relay(&record, Some(remote)).await {
                            tracing::debug!("relay failed: {}", e);
                        }
                    });
                }
                Ok(false) => {}
                Err(e) => tracing::debug!("dropped broadcast from {}: {}", remote.short(), e),
            },
            BroadcastMessage::Fetch { topic } => {
                let record = self.topics.read().get(&topic).cloned();
                let reply = bincode::serialize(&record).map_err(|e| anyhow::anyhow!(e))?;
                stream.send(Bytes::from(reply)).await?;
            }
        }
        Ok(())
    }
}

/// Publishes by broadcasting on the identity's topic, and resolves from
///  the local topic cache plus whatever connected peers have seen.
#[derive(Debug, Clone)]
pub struct BroadcastBackend {
    service: BroadcastService,
}

impl BroadcastBackend {
    pub fn new(service: BroadcastService) -> Self {
        Self { service }
    }

    pub fn service(&self) -> &BroadcastService {
        &self.service
    }
}

#[async_trait]
impl RoutingBackend for BroadcastBackend {
    fn name(&self) -> &str {
        "broadcast"
    }

    async fn publish(&self, record: &NameRecord) -> Result<(), RoutingError> {
        let topic_name = topic(&record.public_key);
        self.service.observe(&topic_name, record)?;
        match self.service.relay(record, None).await? {
            0 => Err(RoutingError::NoPeers),
            delivered => {
                tracing::debug!("broadcast record {} to {} peers", record.sequence, delivered);
                Ok(())
            }
        }
    }

    fn query(&self, identity: &PublicKey) -> BoxStream<'static, NameRecord> {
        let cached = self.service.cached(identity);
        let fabric = self.service.fabric.clone();
        let local = fabric.local_identity();
        let peers: Vec<PeerId> = fabric
            .connected_peers()
            .into_iter()
            .filter(|peer| *peer != local)
            .collect();
        let request = bincode::serialize(&BroadcastMessage::Fetch {
            topic: topic(identity),
        })
        .map(Bytes::from);

        let remote = match request {
            Ok(request) => {
                let concurrency = peers.len().max(1);
                stream::iter(peers)
                    .map(move |peer| {
                        let fabric = fabric.clone();
                        let request = request.clone();
                        async move {
                            let reply = fabric.request(&peer, BROADCAST_ALPN, request).await.ok()?;
                            bincode::deserialize::<Option<NameRecord>>(&reply)
                                .ok()
                                .flatten()
                        }
                    })
                    .buffer_unordered(concurrency)
                    .filter_map(futures::future::ready)
                    .boxed()
            }
            Err(e) => {
                tracing::warn!("failed to encode topic fetch: {}", e);
                stream::empty().boxed()
            }
        };

        stream::iter(cached).chain(remote).boxed()
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::time::Duration as StdDuration;

    use chrono::Duration;

    use super::*;
    use crate::crypto::SecretKey;
    use crate::fabric::MemoryNetwork;
    use crate::linked_data::Cid;

    fn any_addr() -> SocketAddr {
        "0.0.0.0:0".parse().unwrap()
    }

    async fn node(network: &MemoryNetwork) -> BroadcastBackend {
        let fabric = Arc::new(network.fabric(SecretKey::generate().public()));
        let service = BroadcastService::new(fabric.clone());
        fabric.accept(BROADCAST_ALPN, Arc::new(service.clone()));
        fabric.listen(any_addr()).await.unwrap();
        BroadcastBackend::new(service)
    }

    fn id(backend: &BroadcastBackend) -> PeerId {
        backend.service.fabric.local_identity()
    }

    async fn connect(a: &BroadcastBackend, b: &BroadcastBackend) {
        a.service.fabric.dial_peer(&id(b)).await.unwrap();
    }

    async fn wait_for(backend: &BroadcastBackend, identity: &PublicKey, sequence: u64) -> bool {
        for _ in 0..50 {
            if backend.service.cached(identity).map(|r| r.sequence) == Some(sequence) {
                return true;
            }
            tokio::time::sleep(StdDuration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_flood_reaches_peers_of_peers() {
        let network = MemoryNetwork::new();
        let (a, b, c) = (node(&network).await, node(&network).await, node(&network).await);
        // a - b - c, a and c never talk directly
        connect(&a, &b).await;
        connect(&b, &c).await;

        let secret = SecretKey::generate();
        let record = NameRecord::sign(&secret, &Cid::raw(b"x"), 4, Duration::hours(1));
        a.publish(&record).await.unwrap();

        assert!(wait_for(&b, &secret.public(), 4).await);
        assert!(wait_for(&c, &secret.public(), 4).await);
    }

    #[tokio::test]
    async fn test_publish_without_peers_is_reported() {
        let network = MemoryNetwork::new();
        let a = node(&network).await;
        let secret = SecretKey::generate();
        let record = NameRecord::sign(&secret, &Cid::raw(b"x"), 0, Duration::hours(1));

        assert!(matches!(a.publish(&record).await, Err(RoutingError::NoPeers)));
        // still cached locally
        assert_eq!(a.service.cached(&secret.public()), Some(record));
    }

    #[tokio::test]
    async fn test_query_fetches_from_connected_peers() {
        let network = MemoryNetwork::new();
        let (a, b) = (node(&network).await, node(&network).await);
        let secret = SecretKey::generate();
        let record = NameRecord::sign(&secret, &Cid::raw(b"x"), 1, Duration::hours(1));
        let _ = b.publish(&record).await;

        connect(&a, &b).await;
        let found: Vec<NameRecord> = a.query(&secret.public()).collect().await;
        assert_eq!(found, vec![record]);
    }

    #[test]
    fn test_invalid_records_are_not_cached() {
        let network = MemoryNetwork::new();
        let fabric = Arc::new(network.fabric(SecretKey::generate().public()));
        let service = BroadcastService::new(fabric);
        let secret = SecretKey::generate();

        let mut forged = NameRecord::sign(&secret, &Cid::raw(b"x"), 1, Duration::hours(1));
        forged.sequence = 2;
        assert!(service.observe(&topic(&secret.public()), &forged).is_err());

        let record = NameRecord::sign(&secret, &Cid::raw(b"x"), 1, Duration::hours(1));
        let wrong_topic = topic(&SecretKey::generate().public());
        assert!(service.observe(&wrong_topic, &record).is_err());
        assert!(service.cached(&secret.public()).is_none());

        assert!(service.observe(&topic(&secret.public()), &record).unwrap());
        assert!(!service.observe(&topic(&secret.public()), &record).unwrap());
    }
}
