//! Content-addressed block storage
//!
//! A block store maps CIDs to immutable byte blocks. It knows nothing about
//!  the graphs those blocks form: deleting a block that is still linked from
//!  some file root is allowed, and garbage collection is the caller's concern.
//!
//! Blocks are keyed by multihash, so CIDs that only differ by codec or by
//!  string encoding address the same entry.

use std::fmt::Debug;

use async_trait::async_trait;
use bytes::Bytes;

use crate::linked_data::{Cid, CidError, Codec, HashFn};

mod fs;
mod memory;

pub use fs::FsBlockStore;
pub use memory::MemoryBlockStore;

#[derive(Debug, thiserror::Error)]
pub enum BlockStoreError {
    /// Expected outcome for a missing block, callers fall back to the network on it
    #[error("block not found: {0}")]
    NotFound(Cid),
    #[error("block content does not match {0}")]
    Mismatch(Cid),
    #[error("cid error: {0}")]
    Cid(#[from] CidError),
    #[error("block store i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("block store error: {0}")]
    Default(#[from] anyhow::Error),
}

impl BlockStoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, BlockStoreError::NotFound(_))
    }
}

#[async_trait]
pub trait BlockStore: Send + Sync + Debug + 'static {
    /// Store `data` under a CID the caller already computed.
    ///
    /// Implementations must verify the content against the CID and must
    ///  make the write atomic: a concurrent `get` either sees the whole
    ///  block or nothing. Re-putting an existing block is a no-op.
    async fn put_keyed(&self, cid: &Cid, data: Bytes) -> Result<(), BlockStoreError>;

    async fn get(&self, cid: &Cid) -> Result<Bytes, BlockStoreError>;

    async fn has(&self, cid: &Cid) -> Result<bool, BlockStoreError>;

    /// Best-effort removal. Deleting a missing block succeeds.
    async fn delete(&self, cid: &Cid) -> Result<(), BlockStoreError>;

    /// Store a raw block hashed with the default hash function
    async fn put(&self, data: Bytes) -> Result<Cid, BlockStoreError> {
        self.put_with(data, HashFn::default(), Codec::Raw).await
    }

    async fn put_with(
        &self,
        data: Bytes,
        hash_fn: HashFn,
        codec: Codec,
    ) -> Result<Cid, BlockStoreError> {
        let cid = Cid::compute(&data, hash_fn, codec);
        self.put_keyed(&cid, data).await?;
        Ok(cid)
    }
}

pub(crate) fn verify_block(cid: &Cid, data: &[u8]) -> Result<(), BlockStoreError> {
    if cid.verify(data)? {
        Ok(())
    } else {
        Err(BlockStoreError::Mismatch(*cid))
    }
}
