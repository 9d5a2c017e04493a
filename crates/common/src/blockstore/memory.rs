use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;

use super::{verify_block, BlockStore, BlockStoreError};
use crate::linked_data::Cid;

/// In-memory block store, keyed by multihash
#[derive(Debug, Clone, Default)]
pub struct MemoryBlockStore {
    inner: Arc<RwLock<HashMap<String, Bytes>>>,
}

impl MemoryBlockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

#[async_trait]
impl BlockStore for MemoryBlockStore {
    async fn put_keyed(&self, cid: &Cid, data: Bytes) -> Result<(), BlockStoreError> {
        verify_block(cid, &data)?;
        // a single insert under the write lock is atomic for readers
        self.inner.write().entry(cid.key()).or_insert(data);
        Ok(())
    }

    async fn get(&self, cid: &Cid) -> Result<Bytes, BlockStoreError> {
        self.inner
            .read()
            .get(&cid.key())
            .cloned()
            .ok_or(BlockStoreError::NotFound(*cid))
    }

    async fn has(&self, cid: &Cid) -> Result<bool, BlockStoreError> {
        Ok(self.inner.read().contains_key(&cid.key()))
    }

    async fn delete(&self, cid: &Cid) -> Result<(), BlockStoreError> {
        self.inner.write().remove(&cid.key());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linked_data::{Codec, HashFn};

    #[tokio::test]
    async fn test_put_and_get() {
        let store = MemoryBlockStore::new();
        let cid = store.put(Bytes::from_static(b"Hello, store!")).await.unwrap();
        assert_eq!(store.get(&cid).await.unwrap().as_ref(), b"Hello, store!");
        assert!(store.has(&cid).await.unwrap());
    }

    #[tokio::test]
    async fn test_put_is_idempotent() {
        let store = MemoryBlockStore::new();
        let a = store.put(Bytes::from_static(b"same")).await.unwrap();
        let b = store.put(Bytes::from_static(b"same")).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_same_cid_across_instances() {
        let a = MemoryBlockStore::new();
        let b = MemoryBlockStore::new();
        let data = Bytes::from_static(b"content addressing");
        assert_eq!(a.put(data.clone()).await.unwrap(), b.put(data).await.unwrap());
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let store = MemoryBlockStore::new();
        let err = store.get(&Cid::raw(b"missing")).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_put_keyed_rejects_mismatch() {
        let store = MemoryBlockStore::new();
        let cid = Cid::raw(b"expected");
        let err = store
            .put_keyed(&cid, Bytes::from_static(b"something else"))
            .await
            .unwrap_err();
        assert!(matches!(err, BlockStoreError::Mismatch(_)));
        assert!(!store.has(&cid).await.unwrap());
    }

    #[tokio::test]
    async fn test_codec_does_not_change_the_key() {
        let store = MemoryBlockStore::new();
        let raw = store
            .put_with(Bytes::from_static(b"node"), HashFn::Sha2_256, Codec::Raw)
            .await
            .unwrap();
        assert!(store.has(&raw.with_codec(Codec::DagCbor)).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete() {
        let store = MemoryBlockStore::new();
        let cid = store.put(Bytes::from_static(b"gone soon")).await.unwrap();
        store.delete(&cid).await.unwrap();
        assert!(!store.has(&cid).await.unwrap());
        // deleting twice is fine
        store.delete(&cid).await.unwrap();
    }
}
