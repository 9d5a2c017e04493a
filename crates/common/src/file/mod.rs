//! Chunked files
//!
//! Files are split into fixed-size raw leaf blocks and linked together
//!  bottom-up by DAG-CBOR nodes until a single root remains:
//!
//! ```text
//!            root (dag-cbor)
//!          /       |        \
//!     node          node      leaf      <- at most MAX_LINKS links per node
//!    / .. \        / .. \
//! leaf .. leaf  leaf .. leaf            <- raw chunks, in file order
//! ```
//!
//! An input that fits in a single chunk (including the empty input) is
//!  stored as a lone raw leaf, and that leaf's CID is the root.
//! Reading walks the DAG depth-first in link order and yields the leaves
//!  as a lazy stream; fetches run ahead of the consumer but the output
//!  order is always the link order.

use async_trait::async_trait;
use bytes::Bytes;

use crate::blockstore::BlockStore;
use crate::linked_data::Cid;

mod chunker;
mod node;
mod reader;
mod writer;

pub use chunker::{Chunker, DEFAULT_CHUNK_SIZE};
pub use node::{DagLink, DagNode, MAX_LINKS};
pub use reader::{cat, read_to_end, stat, CatOptions, FileStat};
pub use writer::FileWriter;

pub type SourceError = Box<dyn std::error::Error + Send + Sync>;

/// Anything blocks can be read from: the local store, or the exchange
///  which falls back to peers on a local miss.
#[async_trait]
pub trait BlockSource: Send + Sync {
    async fn get_block(&self, cid: &Cid) -> Result<Bytes, SourceError>;
}

#[async_trait]
impl BlockSource for dyn BlockStore {
    async fn get_block(&self, cid: &Cid) -> Result<Bytes, SourceError> {
        Ok(self.get(cid).await?)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FileError {
    /// A block of the file could not be obtained from the store or any peer
    #[error("content unavailable: {0}")]
    Unavailable(Cid, #[source] SourceError),
    #[error("failed to decode node {0}: {1}")]
    Decode(Cid, String),
    #[error("failed to encode node: {0}")]
    Encode(String),
    /// Only raw and dag-cbor blocks form files; dag-pb (CIDv0) roots parse
    ///  but cannot be read
    #[error("cannot read {0}: only raw and dag-cbor files are supported")]
    UnsupportedCodec(Cid),
    #[error("leaf {cid} has {actual} bytes, its parent says {expected}")]
    SizeMismatch {
        cid: Cid,
        expected: u64,
        actual: u64,
    },
    #[error("block store error: {0}")]
    Store(#[from] crate::blockstore::BlockStoreError),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl FileError {
    /// True when the failure means "could not get the bytes", as opposed
    ///  to bytes that were obtained but malformed.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, FileError::Unavailable(..))
    }
}
