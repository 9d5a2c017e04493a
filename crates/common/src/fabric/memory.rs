use std::collections::{HashMap, HashSet};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};

use super::{
    BoxSubstream, Connection, Fabric, FabricError, PeerAddr, PeerId, StreamHandler, Substream,
    MAX_MESSAGE_SIZE,
};

/// An in-process network that [`MemoryFabric`]s join by listening.
///
/// Streams are pairs of `flume` channels; every opened stream spawns the
///  remote handler on the current tokio runtime, as a real fabric would.
#[derive(Debug, Clone, Default)]
pub struct MemoryNetwork {
    listeners: Arc<RwLock<HashMap<PeerId, Arc<PeerState>>>>,
    next_port: Arc<AtomicU16>,
}

#[derive(Debug, Default)]
struct PeerState {
    handlers: RwLock<HashMap<&'static [u8], Arc<dyn StreamHandler>>>,
    connected: Mutex<HashSet<PeerId>>,
    known: Mutex<HashMap<PeerId, PeerAddr>>,
    bound: Mutex<Vec<SocketAddr>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self {
            listeners: Arc::default(),
            next_port: Arc::new(AtomicU16::new(10_000)),
        }
    }

    /// Create a fabric for `id` on this network. It is unreachable until it listens.
    pub fn fabric(&self, id: PeerId) -> MemoryFabric {
        MemoryFabric {
            id,
            network: self.clone(),
            state: Arc::new(PeerState::default()),
        }
    }

    fn listener(&self, id: &PeerId) -> Option<Arc<PeerState>> {
        self.listeners.read().get(id).cloned()
    }
}

#[derive(Debug, Clone)]
pub struct MemoryFabric {
    id: PeerId,
    network: MemoryNetwork,
    state: Arc<PeerState>,
}

impl MemoryFabric {
    fn is_listening(&self) -> bool {
        self.network.listener(&self.id).is_some()
    }
}

#[async_trait]
impl Fabric for MemoryFabric {
    fn local_identity(&self) -> PeerId {
        self.id
    }

    fn accept(&self, protocol: &'static [u8], handler: Arc<dyn StreamHandler>) {
        self.state.handlers.write().insert(protocol, handler);
    }

    async fn listen(&self, addr: SocketAddr) -> Result<Vec<SocketAddr>, FabricError> {
        let addr = if addr.port() == 0 {
            let port = self.network.next_port.fetch_add(1, Ordering::Relaxed);
            SocketAddr::new(Ipv4Addr::LOCALHOST.into(), port)
        } else {
            addr
        };
        self.state.bound.lock().push(addr);
        self.network
            .listeners
            .write()
            .insert(self.id, self.state.clone());
        tracing::debug!("memory fabric {} listening on {}", self.id.short(), addr);
        Ok(vec![addr])
    }

    fn add_peer_addr(&self, addr: PeerAddr) {
        let mut known = self.state.known.lock();
        known
            .entry(addr.id)
            .and_modify(|existing| existing.merge(&addr))
            .or_insert(addr);
    }

    async fn dial(&self, addr: &PeerAddr) -> Result<Arc<dyn Connection>, FabricError> {
        if !self.is_listening() {
            return Err(FabricError::NotListening);
        }
        if addr.id == self.id {
            return Err(FabricError::Dial(addr.id, "cannot dial self".to_string()));
        }
        let remote = self
            .network
            .listener(&addr.id)
            .ok_or_else(|| FabricError::Dial(addr.id, "peer unreachable".to_string()))?;

        self.state.connected.lock().insert(addr.id);
        remote.connected.lock().insert(self.id);
        if !addr.addrs.is_empty() {
            self.add_peer_addr(addr.clone());
        }

        Ok(Arc::new(MemoryConnection {
            local: self.id,
            remote: addr.id,
            remote_state: remote,
        }))
    }

    fn connected_peers(&self) -> Vec<PeerId> {
        let connected = self.state.connected.lock().clone();
        // peers that went away are no longer connected
        connected
            .into_iter()
            .filter(|peer| self.network.listener(peer).is_some())
            .collect()
    }

    async fn shutdown(&self) -> Result<(), FabricError> {
        self.network.listeners.write().remove(&self.id);
        let peers: Vec<PeerId> = self.state.connected.lock().drain().collect();
        for peer in peers {
            if let Some(remote) = self.network.listener(&peer) {
                remote.connected.lock().remove(&self.id);
            }
        }
        tracing::debug!("memory fabric {} shut down", self.id.short());
        Ok(())
    }
}

struct MemoryConnection {
    local: PeerId,
    remote: PeerId,
    remote_state: Arc<PeerState>,
}

#[async_trait]
impl Connection for MemoryConnection {
    fn remote(&self) -> PeerId {
        self.remote
    }

    async fn open_stream(&self, protocol: &'static [u8]) -> Result<BoxSubstream, FabricError> {
        let handler = self
            .remote_state
            .handlers
            .read()
            .get(protocol)
            .cloned()
            .ok_or_else(|| {
                FabricError::UnknownProtocol(
                    self.remote,
                    String::from_utf8_lossy(protocol).to_string(),
                )
            })?;

        let (local_tx, remote_rx) = flume::bounded(1);
        let (remote_tx, local_rx) = flume::bounded(1);
        let remote_side = MemorySubstream {
            tx: Some(remote_tx),
            rx: remote_rx,
        };

        let local = self.local;
        tokio::spawn(async move {
            if let Err(e) = handler.handle(local, Box::new(remote_side)).await {
                tracing::debug!("memory stream handler failed: {}", e);
            }
        });

        Ok(Box::new(MemorySubstream {
            tx: Some(local_tx),
            rx: local_rx,
        }))
    }
}

struct MemorySubstream {
    tx: Option<flume::Sender<Bytes>>,
    rx: flume::Receiver<Bytes>,
}

#[async_trait]
impl Substream for MemorySubstream {
    async fn send(&mut self, data: Bytes) -> Result<(), FabricError> {
        if data.len() > MAX_MESSAGE_SIZE {
            return Err(FabricError::TooLarge(data.len()));
        }
        // taking the sender closes this direction once the message is out
        let tx = self.tx.take().ok_or(FabricError::Closed)?;
        tx.send_async(data).await.map_err(|_| FabricError::Closed)
    }

    async fn receive(&mut self) -> Result<Option<Bytes>, FabricError> {
        Ok(self.rx.recv_async().await.ok().filter(|msg| !msg.is_empty()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::SecretKey;

    #[derive(Debug)]
    struct Echo;

    #[async_trait]
    impl StreamHandler for Echo {
        async fn handle(&self, _remote: PeerId, mut stream: BoxSubstream) -> Result<(), FabricError> {
            if let Some(msg) = stream.receive().await? {
                stream.send(msg).await?;
            }
            Ok(())
        }
    }

    fn any_addr() -> SocketAddr {
        "0.0.0.0:0".parse().unwrap()
    }

    async fn pair() -> (MemoryFabric, MemoryFabric) {
        let network = MemoryNetwork::new();
        let a = network.fabric(SecretKey::generate().public());
        let b = network.fabric(SecretKey::generate().public());
        b.accept(b"/echo/1", Arc::new(Echo));
        a.listen(any_addr()).await.unwrap();
        b.listen(any_addr()).await.unwrap();
        (a, b)
    }

    #[tokio::test]
    async fn test_request_reply() {
        let (a, b) = pair().await;
        let reply = a
            .request(&b.local_identity(), b"/echo/1", Bytes::from_static(b"ping"))
            .await
            .unwrap();
        assert_eq!(reply.as_ref(), b"ping");
        assert_eq!(a.connected_peers(), vec![b.local_identity()]);
        assert_eq!(b.connected_peers(), vec![a.local_identity()]);
    }

    #[tokio::test]
    async fn test_unknown_protocol() {
        let (a, b) = pair().await;
        let err = a
            .request(&b.local_identity(), b"/nope/1", Bytes::from_static(b"x"))
            .await
            .unwrap_err();
        assert!(matches!(err, FabricError::UnknownProtocol(..)));
    }

    #[tokio::test]
    async fn test_dial_requires_listening_peer() {
        let network = MemoryNetwork::new();
        let a = network.fabric(SecretKey::generate().public());
        let b = network.fabric(SecretKey::generate().public());
        assert!(matches!(
            a.dial_peer(&b.local_identity()).await.err().unwrap(),
            FabricError::NotListening
        ));

        a.listen(any_addr()).await.unwrap();
        assert!(matches!(
            a.dial_peer(&b.local_identity()).await.err().unwrap(),
            FabricError::Dial(..)
        ));
    }

    #[tokio::test]
    async fn test_shutdown_disconnects() {
        let (a, b) = pair().await;
        a.dial_peer(&b.local_identity()).await.unwrap();
        b.shutdown().await.unwrap();
        assert!(a.connected_peers().is_empty());
        assert!(a.dial_peer(&b.local_identity()).await.is_err());
    }

    #[tokio::test]
    async fn test_one_message_per_direction() {
        let (a, b) = pair().await;
        let conn = a.dial_peer(&b.local_identity()).await.unwrap();
        let mut stream = conn.open_stream(b"/echo/1").await.unwrap();
        stream.send(Bytes::from_static(b"first")).await.unwrap();
        assert!(matches!(
            stream.send(Bytes::from_static(b"second")).await.unwrap_err(),
            FabricError::Closed
        ));
        assert_eq!(stream.receive().await.unwrap().unwrap().as_ref(), b"first");
        assert!(stream.receive().await.unwrap().is_none());
    }
}
