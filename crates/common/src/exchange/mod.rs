//! Block exchange
//!
//! Fetches blocks the local store is missing from peers over the
//!  `/cairn/exchange/1` protocol. Every received block is rehashed
//!  before it is stored or returned, so a peer can waste our time but
//!  never hand us the wrong bytes.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::{BoxFuture, FutureExt, Shared};
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

mod messages;
mod service;

pub use messages::{MessageError, Want, WantReply};
pub use service::ExchangeService;

use crate::blockstore::{BlockStore, BlockStoreError};
use crate::fabric::{Fabric, FabricError, PeerId};
use crate::file::{BlockSource, SourceError};
use crate::linked_data::Cid;

/// ALPN identifier for the block exchange protocol
pub const EXCHANGE_ALPN: &[u8] = b"/cairn/exchange/1";

/// How many recently successful peers are remembered for ordering
const PRIORITY_DEPTH: usize = 64;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    /// How long a single peer gets to answer a want
    #[serde(with = "crate::serde_duration::millis")]
    pub peer_timeout: Duration,
    /// How long a caller waits for a fetch as a whole
    #[serde(with = "crate::serde_duration::millis")]
    pub fetch_timeout: Duration,
    /// How many peers may be probed at once for one block
    pub max_concurrent_probes: usize,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            peer_timeout: Duration::from_secs(5),
            fetch_timeout: Duration::from_secs(30),
            max_concurrent_probes: 2,
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ExchangeError {
    #[error("no peer could provide {0}")]
    AllPeersFailed(Cid),
    #[error("timed out fetching {0}")]
    Timeout(Cid),
    #[error("block store error: {0}")]
    Store(String),
    #[error("fetch task failed: {0}")]
    Task(String),
}

impl From<BlockStoreError> for ExchangeError {
    fn from(err: BlockStoreError) -> Self {
        ExchangeError::Store(err.to_string())
    }
}

/// Why a single peer did not give us a block
#[derive(Debug, thiserror::Error)]
enum ProbeError {
    #[error("fabric: {0}")]
    Fabric(#[from] FabricError),
    #[error("message: {0}")]
    Message(#[from] MessageError),
    #[error("timed out")]
    Timeout,
    #[error("peer does not have the block")]
    DontHave,
    #[error("peer sent bytes that do not hash to the cid")]
    Corrupt,
}

type SharedFetch = Shared<BoxFuture<'static, Result<Bytes, ExchangeError>>>;

struct Inner {
    store: Arc<dyn BlockStore>,
    fabric: Arc<dyn Fabric>,
    config: ExchangeConfig,
    /// Most recently successful peer first
    priority: Mutex<VecDeque<PeerId>>,
    /// Peers that sent corrupt data, tried after everyone else
    suspect: Mutex<HashSet<PeerId>>,
    /// Peers to ask when the caller has no candidates of its own
    providers: Mutex<Vec<PeerId>>,
    inflight: Mutex<HashMap<Cid, SharedFetch>>,
}

/// Fetches blocks from the local store, falling back to peers
#[derive(Clone)]
pub struct BlockExchange {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for BlockExchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockExchange")
            .field("store", &self.inner.store)
            .field("fabric", &self.inner.fabric)
            .field("config", &self.inner.config)
            .field("inflight", &self.inner.inflight.lock().len())
            .finish()
    }
}

impl BlockExchange {
    pub fn new(store: Arc<dyn BlockStore>, fabric: Arc<dyn Fabric>, config: ExchangeConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                fabric,
                config,
                priority: Mutex::new(VecDeque::new()),
                suspect: Mutex::new(HashSet::new()),
                providers: Mutex::new(Vec::new()),
                inflight: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn store(&self) -> &Arc<dyn BlockStore> {
        &self.inner.store
    }

    pub fn config(&self) -> &ExchangeConfig {
        &self.inner.config
    }

    /// The responder to register on the fabric for this exchange's store
    pub fn service(&self) -> ExchangeService {
        ExchangeService::new(self.inner.store.clone())
    }

    /// Remember a peer worth asking for blocks, e.g. a bootstrap peer
    pub fn add_provider(&self, peer: PeerId) {
        let mut providers = self.inner.providers.lock();
        if !providers.contains(&peer) {
            providers.push(peer);
        }
    }

    /// Known providers followed by whoever the fabric is connected to
    pub fn candidates(&self) -> Vec<PeerId> {
        let mut candidates = self.inner.providers.lock().clone();
        for peer in self.inner.fabric.connected_peers() {
            if !candidates.contains(&peer) {
                candidates.push(peer);
            }
        }
        candidates
    }

    /// Number of fetches currently waiting on the network
    pub fn inflight(&self) -> usize {
        self.inner.inflight.lock().len()
    }

    /// Fetch a block, waiting at most the configured fetch timeout
    pub async fn fetch(&self, cid: &Cid, candidates: &[PeerId]) -> Result<Bytes, ExchangeError> {
        self.fetch_with_timeout(cid, candidates, self.inner.config.fetch_timeout)
            .await
    }

    /// Fetch a block from the local store, or from the first of
    ///  `candidates` that can provide it.
    ///
    /// Concurrent fetches of the same CID share one network fetch. Giving
    ///  up on the wait (by timeout or by dropping the future) does not
    ///  cancel that shared fetch for the other waiters.
    pub async fn fetch_with_timeout(
        &self,
        cid: &Cid,
        candidates: &[PeerId],
        timeout: Duration,
    ) -> Result<Bytes, ExchangeError> {
        if let Some(data) = self.inner.local(cid).await? {
            return Ok(data);
        }

        let shared = self.shared_fetch(cid, candidates);
        match tokio::time::timeout(timeout, shared).await {
            Ok(result) => result,
            Err(_) => {
                tracing::debug!("gave up waiting on {} after {:?}", cid, timeout);
                Err(ExchangeError::Timeout(*cid))
            }
        }
    }

    fn shared_fetch(&self, cid: &Cid, candidates: &[PeerId]) -> SharedFetch {
        // held across the spawn so the task cannot remove its entry
        //  before it has been inserted
        let mut inflight = self.inner.inflight.lock();
        if let Some(existing) = inflight.get(cid) {
            tracing::debug!("joining in-flight fetch of {}", cid);
            return existing.clone();
        }

        let inner = self.inner.clone();
        let cid = *cid;
        let ordered = self.inner.order(candidates);
        let handle = tokio::spawn(async move {
            let result = inner.network_fetch(cid, ordered).await;
            inner.inflight.lock().remove(&cid);
            result
        });

        let shared = async move {
            handle
                .await
                .map_err(|e| ExchangeError::Task(e.to_string()))?
        }
        .boxed()
        .shared();
        inflight.insert(cid, shared.clone());
        shared
    }
}

impl Inner {
    /// Local lookup. A block the store holds but cannot vouch for counts as missing.
    async fn local(&self, cid: &Cid) -> Result<Option<Bytes>, ExchangeError> {
        match self.store.get(cid).await {
            Ok(data) => Ok(Some(data)),
            Err(BlockStoreError::NotFound(_)) => Ok(None),
            Err(BlockStoreError::Mismatch(_)) => {
                tracing::warn!("local copy of {} is corrupt, refetching", cid);
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Recent successes first, then the rest in the order given, then suspects
    fn order(&self, candidates: &[PeerId]) -> Vec<PeerId> {
        let priority = self.priority.lock();
        let suspect = self.suspect.lock();
        let local = self.fabric.local_identity();

        let mut seen = HashSet::new();
        let mut ordered: Vec<PeerId> = candidates
            .iter()
            .copied()
            .filter(|peer| *peer != local && seen.insert(*peer))
            .collect();
        ordered.sort_by_key(|peer| {
            let rank = priority
                .iter()
                .position(|p| p == peer)
                .unwrap_or(usize::MAX);
            (suspect.contains(peer), rank)
        });
        ordered
    }

    async fn network_fetch(&self, cid: Cid, peers: Vec<PeerId>) -> Result<Bytes, ExchangeError> {
        // a previous fetch may have landed between the caller's check and now
        if let Some(data) = self.local(&cid).await? {
            return Ok(data);
        }

        tracing::debug!("fetching {} from {} candidate peers", cid, peers.len());
        let mut probes = stream::iter(peers)
            .map(|peer| async move { (peer, self.probe(&cid, &peer).await) })
            .buffer_unordered(self.config.max_concurrent_probes.max(1));

        while let Some((peer, outcome)) = probes.next().await {
            match outcome {
                Ok(data) => {
                    if let Err(e) = self.store.put_keyed(&cid, data.clone()).await {
                        tracing::warn!("failed to store fetched block {}: {}", cid, e);
                    }
                    self.promote(peer);
                    tracing::debug!("fetched {} ({} bytes) from {}", cid, data.len(), peer.short());
                    return Ok(data);
                }
                Err(ProbeError::Corrupt) => {
                    tracing::warn!("peer {} sent corrupt data for {}", peer.short(), cid);
                    self.demote(peer);
                }
                Err(e) => {
                    tracing::debug!("peer {} could not provide {}: {}", peer.short(), cid, e);
                }
            }
        }

        tracing::info!("all peers failed to provide {}", cid);
        Err(ExchangeError::AllPeersFailed(cid))
    }

    async fn probe(&self, cid: &Cid, peer: &PeerId) -> Result<Bytes, ProbeError> {
        let want = Want { cid: *cid }.encode()?;
        let reply = tokio::time::timeout(
            self.config.peer_timeout,
            self.fabric.request(peer, EXCHANGE_ALPN, want),
        )
        .await
        .map_err(|_| ProbeError::Timeout)??;

        match WantReply::decode(&reply)? {
            WantReply::Have { data } => {
                // an unknown hash function is as good as a wrong digest here
                if cid.verify(&data).unwrap_or(false) {
                    Ok(Bytes::from(data))
                } else {
                    Err(ProbeError::Corrupt)
                }
            }
            WantReply::DontHave => Err(ProbeError::DontHave),
        }
    }

    fn promote(&self, peer: PeerId) {
        self.suspect.lock().remove(&peer);
        let mut priority = self.priority.lock();
        priority.retain(|p| *p != peer);
        priority.push_front(peer);
        priority.truncate(PRIORITY_DEPTH);
    }

    fn demote(&self, peer: PeerId) {
        self.priority.lock().retain(|p| *p != peer);
        self.suspect.lock().insert(peer);
    }
}

#[async_trait]
impl BlockSource for BlockExchange {
    async fn get_block(&self, cid: &Cid) -> Result<Bytes, SourceError> {
        let candidates = self.candidates();
        Ok(self.fetch(cid, &candidates).await?)
    }
}
