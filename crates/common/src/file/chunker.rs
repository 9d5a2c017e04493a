use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// 256 KiB, the usual IPFS default
pub const DEFAULT_CHUNK_SIZE: usize = 262_144;

/// Fixed-size chunking policy.
///
/// The chunk size is part of a file's identity: the same bytes chunked
///  with a different size produce a different root CID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunker {
    size: usize,
}

impl Default for Chunker {
    fn default() -> Self {
        Self {
            size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl Chunker {
    pub fn fixed(size: usize) -> Self {
        Self { size: size.max(1) }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Split an in-memory buffer. Always yields at least one chunk.
    pub fn split(&self, data: Bytes) -> Vec<Bytes> {
        if data.is_empty() {
            return vec![data];
        }
        let mut chunks = Vec::with_capacity(data.len().div_ceil(self.size));
        let mut offset = 0;
        while offset < data.len() {
            let end = (offset + self.size).min(data.len());
            chunks.push(data.slice(offset..end));
            offset = end;
        }
        chunks
    }
}
