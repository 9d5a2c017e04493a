use std::collections::{HashMap, HashSet};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use bytes::Bytes;
use futures::future::BoxFuture;
use iroh::discovery::pkarr::dht::DhtDiscovery;
use iroh::endpoint::{Connection as QuicConnection, RecvStream, SendStream};
use iroh::protocol::{AcceptError, ProtocolHandler, Router};
use iroh::{Endpoint, NodeAddr, RelayMode};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use super::{
    BoxSubstream, Connection, Fabric, FabricError, PeerAddr, PeerId, StreamHandler, Substream,
    MAX_MESSAGE_SIZE,
};
use crate::crypto::SecretKey;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IrohFabricConfig {
    /// Publish and look up peer addresses on the mainline DHT
    pub dht_discovery: bool,
    /// Reach peers through the default relay servers when no direct
    ///  path works
    pub relay: bool,
}

impl Default for IrohFabricConfig {
    fn default() -> Self {
        Self {
            dht_discovery: true,
            relay: true,
        }
    }
}

/// Held open by `dial` for as long as both ends are up, so a dialed peer
///  counts as connected before any protocol traffic flows
const LINK_ALPN: &[u8] = b"/cairn/fabric/1";

#[derive(Debug)]
struct Running {
    endpoint: Endpoint,
    router: Router,
}

type HandlerMap = Arc<RwLock<HashMap<&'static [u8], Arc<dyn StreamHandler>>>>;
type ConnectionMap = Arc<Mutex<HashMap<(PeerId, &'static [u8]), QuicConnection>>>;

/// Open inbound connections per remote peer, one per ALPN
#[derive(Debug, Clone, Default)]
struct Inbound(Arc<Mutex<HashMap<PeerId, usize>>>);

impl Inbound {
    fn enter(&self, peer: PeerId) {
        *self.0.lock().entry(peer).or_insert(0) += 1;
    }

    fn leave(&self, peer: PeerId) {
        let mut open = self.0.lock();
        if let Some(count) = open.get_mut(&peer) {
            *count -= 1;
            if *count == 0 {
                open.remove(&peer);
            }
        }
    }

    fn peers(&self) -> HashSet<PeerId> {
        self.0.lock().keys().copied().collect()
    }
}

/// A fabric over an iroh endpoint. Each protocol is negotiated as its own ALPN.
#[derive(Debug, Clone)]
pub struct IrohFabric {
    secret: SecretKey,
    config: IrohFabricConfig,
    handlers: HandlerMap,
    running: Arc<Mutex<Option<Running>>>,
    known: Arc<Mutex<HashMap<PeerId, PeerAddr>>>,
    connections: ConnectionMap,
    inbound: Inbound,
}

impl IrohFabric {
    pub fn new(secret: SecretKey, config: IrohFabricConfig) -> Self {
        Self {
            secret,
            config,
            handlers: Arc::default(),
            running: Arc::default(),
            known: Arc::default(),
            connections: Arc::default(),
            inbound: Inbound::default(),
        }
    }

    fn endpoint(&self) -> Result<Endpoint, FabricError> {
        self.running
            .lock()
            .as_ref()
            .map(|running| running.endpoint.clone())
            .ok_or(FabricError::NotListening)
    }

    fn resolve_addr(&self, addr: &PeerAddr) -> PeerAddr {
        let mut resolved = addr.clone();
        if let Some(known) = self.known.lock().get(&addr.id) {
            resolved.merge(known);
        }
        resolved
    }
}

#[async_trait]
impl Fabric for IrohFabric {
    fn local_identity(&self) -> PeerId {
        self.secret.public()
    }

    fn accept(&self, protocol: &'static [u8], handler: Arc<dyn StreamHandler>) {
        self.handlers.write().insert(protocol, handler);
    }

    async fn listen(&self, addr: SocketAddr) -> Result<Vec<SocketAddr>, FabricError> {
        if self.running.lock().is_some() {
            return Err(anyhow!("fabric is already listening").into());
        }

        let mut builder = Endpoint::builder().secret_key(self.secret.0.clone());
        if !self.config.relay {
            builder = builder.relay_mode(RelayMode::Disabled);
        }
        if self.config.dht_discovery {
            let discovery = DhtDiscovery::builder()
                .secret_key(self.secret.0.clone())
                .build()
                .map_err(|e| anyhow!("failed to build dht discovery: {}", e))?;
            builder = builder.discovery(discovery);
        }
        builder = match addr {
            SocketAddr::V4(v4) => builder.bind_addr_v4(v4),
            SocketAddr::V6(v6) => builder
                .bind_addr_v6(v6)
                .bind_addr_v4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0)),
        };
        let endpoint = builder
            .bind()
            .await
            .map_err(|e| anyhow!("failed to bind endpoint on {}: {}", addr, e))?;

        let mut router = Router::builder(endpoint.clone()).accept(
            LINK_ALPN,
            Link {
                inbound: self.inbound.clone(),
            },
        );
        for (protocol, handler) in self.handlers.read().iter() {
            router = router.accept(
                *protocol,
                Dispatch {
                    handler: handler.clone(),
                    inbound: self.inbound.clone(),
                },
            );
        }
        let router = router.spawn();

        let bound = endpoint.bound_sockets();
        tracing::info!(
            "fabric {} listening on {:?}",
            self.local_identity().short(),
            bound
        );
        *self.running.lock() = Some(Running { endpoint, router });
        Ok(bound)
    }

    fn add_peer_addr(&self, addr: PeerAddr) {
        let mut known = self.known.lock();
        known
            .entry(addr.id)
            .and_modify(|existing| existing.merge(&addr))
            .or_insert(addr);
    }

    async fn dial(&self, addr: &PeerAddr) -> Result<Arc<dyn Connection>, FabricError> {
        let endpoint = self.endpoint()?;
        if addr.id == self.local_identity() {
            return Err(FabricError::Dial(addr.id, "cannot dial self".to_string()));
        }
        let connection = IrohConnection {
            endpoint,
            addr: self.resolve_addr(addr),
            connections: self.connections.clone(),
        };
        connection.connection(LINK_ALPN).await?;
        Ok(Arc::new(connection))
    }

    fn connected_peers(&self) -> Vec<PeerId> {
        let mut peers = self.inbound.peers();
        let mut connections = self.connections.lock();
        connections.retain(|_, conn| conn.close_reason().is_none());
        peers.extend(connections.keys().map(|(peer, _)| *peer));
        peers.into_iter().collect()
    }

    async fn shutdown(&self) -> Result<(), FabricError> {
        let running = self.running.lock().take();
        self.connections.lock().clear();
        if let Some(running) = running {
            running
                .router
                .shutdown()
                .await
                .map_err(|e| anyhow!("failed to shut down router: {}", e))?;
            tracing::info!("fabric {} shut down", self.local_identity().short());
        }
        Ok(())
    }
}

struct IrohConnection {
    endpoint: Endpoint,
    addr: PeerAddr,
    connections: ConnectionMap,
}

impl IrohConnection {
    async fn connection(&self, protocol: &'static [u8]) -> Result<QuicConnection, FabricError> {
        let key = (self.addr.id, protocol);
        if let Some(conn) = self.connections.lock().get(&key) {
            if conn.close_reason().is_none() {
                return Ok(conn.clone());
            }
        }

        let node_addr = NodeAddr::from_parts(*self.addr.id, None, self.addr.addrs.clone());
        let conn = self
            .endpoint
            .connect(node_addr, protocol)
            .await
            .map_err(|e| FabricError::Dial(self.addr.id, e.to_string()))?;
        tracing::debug!(
            "connected to {} for {}",
            self.addr.id.short(),
            String::from_utf8_lossy(protocol)
        );
        self.connections.lock().insert(key, conn.clone());
        Ok(conn)
    }
}

#[async_trait]
impl Connection for IrohConnection {
    fn remote(&self) -> PeerId {
        self.addr.id
    }

    async fn open_stream(&self, protocol: &'static [u8]) -> Result<BoxSubstream, FabricError> {
        let conn = self.connection(protocol).await?;
        let (send, recv) = match conn.open_bi().await {
            Ok(streams) => streams,
            Err(e) => {
                // the cached connection went away underneath us
                self.connections.lock().remove(&(self.addr.id, protocol));
                return Err(FabricError::Dial(self.addr.id, e.to_string()));
            }
        };
        Ok(Box::new(IrohSubstream::new(send, recv)))
    }
}

struct IrohSubstream {
    send: Option<SendStream>,
    recv: Option<RecvStream>,
}

impl IrohSubstream {
    fn new(send: SendStream, recv: RecvStream) -> Self {
        Self {
            send: Some(send),
            recv: Some(recv),
        }
    }
}

#[async_trait]
impl Substream for IrohSubstream {
    async fn send(&mut self, data: Bytes) -> Result<(), FabricError> {
        if data.len() > MAX_MESSAGE_SIZE {
            return Err(FabricError::TooLarge(data.len()));
        }
        let mut send = self.send.take().ok_or(FabricError::Closed)?;
        send.write_all(&data)
            .await
            .map_err(|e| anyhow!("failed to write message: {}", e))?;
        send.finish()
            .map_err(|e| anyhow!("failed to finish stream: {}", e))?;
        Ok(())
    }

    async fn receive(&mut self) -> Result<Option<Bytes>, FabricError> {
        let Some(mut recv) = self.recv.take() else {
            return Ok(None);
        };
        let message = recv
            .read_to_end(MAX_MESSAGE_SIZE)
            .await
            .map_err(|e| anyhow!("failed to read message: {}", e))?;
        if message.is_empty() {
            return Ok(None);
        }
        Ok(Some(Bytes::from(message)))
    }
}

/// Routes every bidirectional stream on an accepted connection to one handler
#[derive(Debug, Clone)]
struct Dispatch {
    handler: Arc<dyn StreamHandler>,
    inbound: Inbound,
}

impl ProtocolHandler for Dispatch {
    #[allow(refining_impl_trait)]
    fn accept(&self, conn: QuicConnection) -> BoxFuture<'static, Result<(), AcceptError>> {
        let handler = self.handler.clone();
        let inbound = self.inbound.clone();
        Box::pin(async move {
            let remote: PeerId = conn
                .remote_node_id()
                .map_err(|e| AcceptError::from(std::io::Error::other(e)))?
                .into();
            tracing::debug!("accepted connection from {}", remote.short());
            inbound.enter(remote);

            // serve streams until the peer goes away
            while let Ok((send, recv)) = conn.accept_bi().await {
                let handler = handler.clone();
                tokio::spawn(async move {
                    let stream = Box::new(IrohSubstream::new(send, recv));
                    if let Err(e) = handler.handle(remote, stream).await {
                        tracing::debug!("stream from {} failed: {}", remote.short(), e);
                    }
                });
            }

            inbound.leave(remote);
            tracing::debug!("connection from {} closed", remote.short());
            Ok(())
        })
    }
}

/// Accepts the connection `dial` holds open and tracks it until it closes
#[derive(Debug, Clone)]
struct Link {
    inbound: Inbound,
}

impl ProtocolHandler for Link {
    #[allow(refining_impl_trait)]
    fn accept(&self, conn: QuicConnection) -> BoxFuture<'static, Result<(), AcceptError>> {
        let inbound = self.inbound.clone();
        Box::pin(async move {
            let remote: PeerId = conn
                .remote_node_id()
                .map_err(|e| AcceptError::from(std::io::Error::other(e)))?
                .into();
            inbound.enter(remote);
            tracing::debug!("{} linked", remote.short());
            let reason = conn.closed().await;
            inbound.leave(remote);
            tracing::debug!("{} unlinked: {}", remote.short(), reason);
            Ok(())
        })
    }
}
