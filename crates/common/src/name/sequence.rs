use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::crypto::PublicKey;

#[derive(Debug, thiserror::Error)]
pub enum SequenceError {
    #[error("sequence store i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("sequence store is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
    #[error("sequence store error: {0}")]
    Default(#[from] anyhow::Error),
}

/// Remembers the last sequence number published per identity
#[async_trait]
pub trait SequenceStore: Send + Sync + std::fmt::Debug + 'static {
    async fn last(&self, identity: &PublicKey) -> Result<Option<u64>, SequenceError>;

    /// Record that `sequence` was published. Never moves a counter back.
    async fn set(&self, identity: &PublicKey, sequence: u64) -> Result<(), SequenceError>;
}

#[derive(Debug, Clone, Default)]
pub struct MemorySequenceStore {
    inner: Arc<RwLock<HashMap<PublicKey, u64>>>,
}

impl MemorySequenceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SequenceStore for MemorySequenceStore {
    async fn last(&self, identity: &PublicKey) -> Result<Option<u64>, SequenceError> {
        Ok(self.inner.read().get(identity).copied())
    }

    async fn set(&self, identity: &PublicKey, sequence: u64) -> Result<(), SequenceError> {
        let mut inner = self.inner.write();
        let entry = inner.entry(*identity).or_insert(sequence);
        *entry = (*entry).max(sequence);
        Ok(())
    }
}

/// Sequence numbers kept in a JSON file of `{ "<identity hex>": seq }`,
///  rewritten atomically on every update
#[derive(Debug, Clone)]
pub struct FileSequenceStore {
    path: PathBuf,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl FileSequenceStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: Arc::default(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(path: &Path) -> Result<HashMap<String, u64>, SequenceError> {
        match std::fs::read(path) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn store(path: &Path, sequences: &HashMap<String, u64>) -> Result<(), SequenceError> {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)?;
        let mut file = tempfile::NamedTempFile::new_in(dir)?;
        file.write_all(&serde_json::to_vec_pretty(sequences)?)?;
        file.as_file().sync_all()?;
        file.persist(path).map_err(|e| e.error)?;
        Ok(())
    }
}

#[async_trait]
impl SequenceStore for FileSequenceStore {
    async fn last(&self, identity: &PublicKey) -> Result<Option<u64>, SequenceError> {
        let _guard = self.lock.lock().await;
        let path = self.path.clone();
        let key = identity.to_hex();
        tokio::task::spawn_blocking(move || -> Result<Option<u64>, SequenceError> {
            Ok(Self::load(&path)?.get(&key).copied())
        })
        .await
        .map_err(|e| anyhow::anyhow!("sequence store task failed: {}", e))?
    }

    async fn set(&self, identity: &PublicKey, sequence: u64) -> Result<(), SequenceError> {
        let _guard = self.lock.lock().await;
        let path = self.path.clone();
        let key = identity.to_hex();
        tokio::task::spawn_blocking(move || {
            let mut sequences = Self::load(&path)?;
            let entry = sequences.entry(key).or_insert(sequence);
            *entry = (*entry).max(sequence);
            Self::store(&path, &sequences)
        })
        .await
        .map_err(|e| anyhow::anyhow!("sequence store task failed: {}", e))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::SecretKey;

    #[tokio::test]
    async fn test_memory_never_goes_back() {
        let store = MemorySequenceStore::new();
        let id = SecretKey::generate().public();
        assert_eq!(store.last(&id).await.unwrap(), None);
        store.set(&id, 5).await.unwrap();
        store.set(&id, 3).await.unwrap();
        assert_eq!(store.last(&id).await.unwrap(), Some(5));
    }

    #[tokio::test]
    async fn test_file_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sequences.json");
        let a = SecretKey::generate().public();
        let b = SecretKey::generate().public();

        let store = FileSequenceStore::new(&path);
        assert_eq!(store.last(&a).await.unwrap(), None);
        store.set(&a, 0).await.unwrap();
        store.set(&b, 9).await.unwrap();
        store.set(&a, 1).await.unwrap();

        let reopened = FileSequenceStore::new(&path);
        assert_eq!(reopened.last(&a).await.unwrap(), Some(1));
        assert_eq!(reopened.last(&b).await.unwrap(), Some(9));
    }

    #[tokio::test]
    async fn test_file_corruption_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sequences.json");
        std::fs::write(&path, b"{ not json").unwrap();
        let store = FileSequenceStore::new(&path);
        let id = SecretKey::generate().public();
        assert!(matches!(
            store.last(&id).await,
            Err(SequenceError::Corrupt(_))
        ));
    }
}
