use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::{NameError, NameRecord, RoutingBackend, SequenceStore};
use crate::crypto::{PublicKey, SecretKey};
use crate::linked_data::Cid;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NameConfig {
    /// How long a published record stays valid
    #[serde(with = "crate::serde_duration::secs")]
    pub record_lifetime: Duration,
    /// How long resolve waits on the backends
    #[serde(with = "crate::serde_duration::millis")]
    pub resolve_timeout: Duration,
}

impl Default for NameConfig {
    fn default() -> Self {
        Self {
            record_lifetime: Duration::from_secs(24 * 60 * 60),
            resolve_timeout: Duration::from_secs(5),
        }
    }
}

/// How one backend took a published record
#[derive(Debug, Clone)]
pub struct BackendOutcome {
    pub backend: String,
    pub result: Result<(), String>,
}

#[derive(Debug, Clone)]
pub struct PublishReport {
    pub record: NameRecord,
    pub outcomes: Vec<BackendOutcome>,
}

impl PublishReport {
    pub fn succeeded(&self) -> impl Iterator<Item = &BackendOutcome> {
        self.outcomes.iter().filter(|o| o.result.is_ok())
    }

    pub fn failed(&self) -> impl Iterator<Item = &BackendOutcome> {
        self.outcomes.iter().filter(|o| o.result.is_err())
    }
}

/// Publishes and resolves signed name records over a set of routing backends
#[derive(Debug, Clone)]
pub struct NameService {
    backends: Vec<Arc<dyn RoutingBackend>>,
    sequences: Arc<dyn SequenceStore>,
    config: NameConfig,
    /// Best validated record seen per identity
    best: Arc<RwLock<HashMap<PublicKey, NameRecord>>>,
    /// Serializes publishes per identity, from picking a sequence
    ///  until every backend has answered
    publishing: Arc<parking_lot::Mutex<HashMap<PublicKey, Arc<tokio::sync::Mutex<()>>>>>,
}

impl NameService {
    pub fn new(
        backends: Vec<Arc<dyn RoutingBackend>>,
        sequences: Arc<dyn SequenceStore>,
        config: NameConfig,
    ) -> Self {
        Self {
            backends,
            sequences,
            config,
            best: Arc::default(),
            publishing: Arc::default(),
        }
    }

    pub fn backends(&self) -> &[Arc<dyn RoutingBackend>] {
        &self.backends
    }

    pub fn config(&self) -> &NameConfig {
        &self.config
    }

    pub async fn publish(&self, secret: &SecretKey, cid: &Cid) -> Result<PublishReport, NameError> {
        self.publish_with_lifetime(secret, cid, self.config.record_lifetime)
            .await
    }

    /// Sign a record binding `secret`'s identity to `cid` and hand it to
    ///  every backend. Fails only when there were backends and all of
    ///  them failed.
    pub async fn publish_with_lifetime(
        &self,
        secret: &SecretKey,
        cid: &Cid,
        lifetime: Duration,
    ) -> Result<PublishReport, NameError> {
        let identity = secret.public();
        let lock = self.publish_lock(&identity);
        let _held = lock.lock().await;

        let sequence = self.next_sequence(&identity).await?;
        let lifetime = chrono::Duration::from_std(lifetime)
            .map_err(|e| NameError::Default(anyhow::anyhow!("invalid record lifetime: {}", e)))?;
        let record = NameRecord::sign(secret, cid, sequence, lifetime);

        // persisted before any backend sees the record
        self.sequences.set(&identity, sequence).await?;
        self.observe(&identity, &record);

        let publishes = self.backends.iter().map(|backend| {
            let record = &record;
            async move {
                let result = backend.publish(record).await.map_err(|e| e.to_string());
                BackendOutcome {
                    backend: backend.name().to_string(),
                    result,
                }
            }
        });
        let outcomes = futures::future::join_all(publishes).await;

        for outcome in &outcomes {
            if let Err(e) = &outcome.result {
                tracing::warn!(
                    "publishing {} seq {} to {} failed: {}",
                    identity.short(),
                    sequence,
                    outcome.backend,
                    e
                );
            }
        }

        let report = PublishReport { record, outcomes };
        if !report.outcomes.is_empty() && report.succeeded().next().is_none() {
            return Err(NameError::AllBackendsFailed(report.outcomes));
        }
        tracing::info!("published {} -> {} (seq {})", identity.short(), cid, sequence);
        Ok(report)
    }

    pub async fn resolve(&self, identity: &PublicKey) -> Result<Cid, NameError> {
        self.resolve_with_timeout(identity, self.config.resolve_timeout)
            .await
    }

    /// Resolve `identity` to the CID of the freshest valid record any
    ///  backend offers within `timeout`. Never returns a CID older than
    ///  one this service has already seen for the identity.
    pub async fn resolve_with_timeout(
        &self,
        identity: &PublicKey,
        timeout: Duration,
    ) -> Result<Cid, NameError> {
        let record = self
            .resolve_record(identity, timeout)
            .await
            .ok_or(NameError::NotFound(*identity))?;
        Ok(record.target()?)
    }

    /// The winning record for `identity`, if any survives validation
    pub async fn resolve_record(&self, identity: &PublicKey, timeout: Duration) -> Option<NameRecord> {
        let queries = self.backends.iter().map(|backend| {
            let name = backend.name().to_string();
            backend.query(identity).map(move |record| (name.clone(), record))
        });
        let mut records = stream::select_all(queries);
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        let mut best: Option<NameRecord> = None;
        loop {
            tokio::select! {
                _ = &mut deadline => {
                    tracing::debug!("resolve of {} hit its {:?} deadline", identity.short(), timeout);
                    break;
                }
                next = records.next() => {
                    let Some((backend, record)) = next else { break };
                    if let Err(e) = record.verify(identity, Utc::now()) {
                        tracing::debug!("discarding record from {}: {}", backend, e);
                        continue;
                    }
                    // equal sequence numbers go to the later arrival
                    let newer = match &best {
                        Some(b) => record.sequence >= b.sequence,
                        None => true,
                    };
                    if newer {
                        best = Some(record);
                    }
                }
            }
        }

        self.settle(identity, best)
    }

    /// Fold a fresh candidate into the per-identity cache and return the winner
    fn settle(&self, identity: &PublicKey, candidate: Option<NameRecord>) -> Option<NameRecord> {
        let mut cache = self.best.write();
        let cached = cache
            .get(identity)
            .filter(|cached| cached.verify(identity, Utc::now()).is_ok())
            .cloned();

        let winner = match (cached, candidate) {
            (Some(cached), Some(candidate)) if cached.sequence > candidate.sequence => Some(cached),
            (_, Some(candidate)) => Some(candidate),
            (cached, None) => cached,
        };
        match &winner {
            Some(record) => {
                cache.insert(*identity, record.clone());
            }
            None => {
                cache.remove(identity);
            }
        }
        winner
    }

    fn publish_lock(&self, identity: &PublicKey) -> Arc<tokio::sync::Mutex<()>> {
        self.publishing.lock().entry(*identity).or_default().clone()
    }

    fn observe(&self, identity: &PublicKey, record: &NameRecord) {
        self.settle(identity, Some(record.clone()));
    }

    /// One past the highest sequence known for `identity`, locally or
    ///  from the network, or zero for a first publish
    async fn next_sequence(&self, identity: &PublicKey) -> Result<u64, NameError> {
        let local = self.sequences.last(identity).await?;
        let seen = match local {
            Some(_) => self
                .best
                .read()
                .get(identity)
                .map(|record| record.sequence),
            // nothing remembered here, ask the network before picking a number
            None => self
                .resolve_record(identity, self.config.resolve_timeout)
                .await
                .map(|record| record.sequence),
        };
        Ok(match local.max(seen) {
            Some(last) => last + 1,
            None => 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use futures::stream::BoxStream;

    use super::*;
    use crate::name::{MemorySequenceStore, RoutingError, Validity};

    /// Keeps published records and replays them newest first, the way
    ///  a lagging network might deliver them
    #[derive(Debug, Default)]
    struct Scrambled {
        records: parking_lot::Mutex<Vec<NameRecord>>,
    }

    #[async_trait]
    impl RoutingBackend for Scrambled {
        fn name(&self) -> &str {
            "scrambled"
        }

        async fn publish(&self, record: &NameRecord) -> Result<(), RoutingError> {
            self.records.lock().push(record.clone());
            Ok(())
        }

        fn query(&self, _identity: &PublicKey) -> BoxStream<'static, NameRecord> {
            let mut records = self.records.lock().clone();
            records.reverse();
            stream::iter(records).boxed()
        }
    }

    /// Always fails to publish and never finds anything
    #[derive(Debug)]
    struct Broken;

    #[async_trait]
    impl RoutingBackend for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        async fn publish(&self, _record: &NameRecord) -> Result<(), RoutingError> {
            Err(RoutingError::NoPeers)
        }

        fn query(&self, _identity: &PublicKey) -> BoxStream<'static, NameRecord> {
            stream::empty().boxed()
        }
    }

    /// Offers a fixed set of records, then hangs
    #[derive(Debug)]
    struct Fixed(Vec<NameRecord>);

    #[async_trait]
    impl RoutingBackend for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn publish(&self, _record: &NameRecord) -> Result<(), RoutingError> {
            Ok(())
        }

        fn query(&self, _identity: &PublicKey) -> BoxStream<'static, NameRecord> {
            stream::iter(self.0.clone()).chain(stream::pending()).boxed()
        }
    }

    fn service(backends: Vec<Arc<dyn RoutingBackend>>) -> NameService {
        NameService::new(
            backends,
            Arc::new(MemorySequenceStore::new()),
            NameConfig {
                resolve_timeout: Duration::from_millis(200),
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn test_publish_then_resolve() {
        let names = service(vec![Arc::new(Scrambled::default())]);
        let secret = SecretKey::generate();
        let cid = Cid::raw(b"Hello World ZPP@");

        let report = names.publish(&secret, &cid).await.unwrap();
        assert_eq!(report.record.sequence, 0);
        assert_eq!(names.resolve(&secret.public()).await.unwrap(), cid);
    }

    #[tokio::test]
    async fn test_later_publish_wins_despite_delivery_order() {
        let backend = Arc::new(Scrambled::default());
        let names = service(vec![backend.clone()]);
        let secret = SecretKey::generate();
        let (x, y) = (Cid::raw(b"x"), Cid::raw(b"y"));

        names.publish(&secret, &x).await.unwrap();
        let second = names.publish(&secret, &y).await.unwrap();
        assert_eq!(second.record.sequence, 1);
        assert_eq!(names.resolve(&secret.public()).await.unwrap(), y);

        // a resolver with no history of its own sees the same answer
        let stranger = service(vec![backend]);
        assert_eq!(stranger.resolve(&secret.public()).await.unwrap(), y);
    }

    #[tokio::test]
    async fn test_resolve_never_goes_backwards() {
        let secret = SecretKey::generate();
        let old = NameRecord::sign(&secret, &Cid::raw(b"old"), 1, chrono::Duration::hours(1));
        let new = NameRecord::sign(&secret, &Cid::raw(b"new"), 2, chrono::Duration::hours(1));

        let names = service(vec![Arc::new(Fixed(vec![new]))]);
        assert_eq!(names.resolve(&secret.public()).await.unwrap(), Cid::raw(b"new"));

        let lagging = NameService {
            backends: vec![Arc::new(Fixed(vec![old]))],
            ..names.clone()
        };
        assert_eq!(
            lagging.resolve(&secret.public()).await.unwrap(),
            Cid::raw(b"new")
        );
    }

    #[tokio::test]
    async fn test_invalid_records_lose_even_with_higher_sequence() {
        let secret = SecretKey::generate();
        let now = Utc::now();
        let good = NameRecord::sign(&secret, &Cid::raw(b"good"), 1, chrono::Duration::hours(1));

        let mut forged = NameRecord::sign(&secret, &Cid::raw(b"forged"), 8, chrono::Duration::hours(1));
        forged.sequence = 9;
        let expired = NameRecord::sign_with_validity(
            &secret,
            &Cid::raw(b"expired"),
            10,
            Validity::new(now - chrono::Duration::hours(2), now - chrono::Duration::hours(1)),
        );
        let impostor = NameRecord::sign(
            &SecretKey::generate(),
            &Cid::raw(b"impostor"),
            11,
            chrono::Duration::hours(1),
        );

        let names = service(vec![Arc::new(Fixed(vec![forged, good, expired, impostor]))]);
        assert_eq!(
            names.resolve(&secret.public()).await.unwrap(),
            Cid::raw(b"good")
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_publishes_get_distinct_sequences() {
        let dir = tempfile::tempdir().unwrap();
        let names = NameService::new(
            vec![Arc::new(Scrambled::default())],
            Arc::new(crate::name::FileSequenceStore::new(dir.path().join("sequences.json"))),
            NameConfig::default(),
        );
        let secret = SecretKey::generate();
        names.publish(&secret, &Cid::raw(b"first")).await.unwrap();

        let tasks: Vec<_> = (0..8u8)
            .map(|i| {
                let names = names.clone();
                let secret = secret.clone();
                tokio::spawn(async move { names.publish(&secret, &Cid::raw(&[i])).await })
            })
            .collect();

        let mut sequences = Vec::new();
        for task in tasks {
            sequences.push(task.await.unwrap().unwrap().record.sequence);
        }
        sequences.sort_unstable();
        assert_eq!(sequences, (1..=8).collect::<Vec<u64>>());
    }

    #[tokio::test]
    async fn test_not_found() {
        let names = service(vec![Arc::new(Fixed(vec![]))]);
        let err = names.resolve(&SecretKey::generate().public()).await.unwrap_err();
        assert!(matches!(err, NameError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_one_broken_backend_does_not_fail_publish() {
        let working = Arc::new(Scrambled::default());
        let names = service(vec![Arc::new(Broken), working.clone()]);
        let secret = SecretKey::generate();

        let report = names.publish(&secret, &Cid::raw(b"x")).await.unwrap();
        assert_eq!(report.failed().count(), 1);
        assert_eq!(report.succeeded().count(), 1);
        assert_eq!(working.records.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_all_backends_failing_is_an_error() {
        let names = service(vec![Arc::new(Broken), Arc::new(Broken)]);
        let err = names
            .publish(&SecretKey::generate(), &Cid::raw(b"x"))
            .await
            .unwrap_err();
        assert!(matches!(err, NameError::AllBackendsFailed(ref o) if o.len() == 2));
    }

    #[tokio::test]
    async fn test_sequence_picks_up_from_the_network() {
        let secret = SecretKey::generate();
        let existing = NameRecord::sign(&secret, &Cid::raw(b"a"), 41, chrono::Duration::hours(1));
        // a fresh sequence store, as after losing local state
        let names = service(vec![Arc::new(Fixed(vec![existing]))]);

        let report = names.publish(&secret, &Cid::raw(b"b")).await.unwrap();
        assert_eq!(report.record.sequence, 42);
        let report = names.publish(&secret, &Cid::raw(b"c")).await.unwrap();
        assert_eq!(report.record.sequence, 43);
    }
}
