use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncReadExt};

use super::{Chunker, DagLink, DagNode, FileError, MAX_LINKS};
use crate::blockstore::BlockStore;
use crate::linked_data::{Cid, Codec, HashFn};

/// Writes files into a block store as chunked DAGs
#[derive(Debug, Clone)]
pub struct FileWriter {
    store: Arc<dyn BlockStore>,
    chunker: Chunker,
    hash_fn: HashFn,
}

impl FileWriter {
    pub fn new(store: Arc<dyn BlockStore>) -> Self {
        Self {
            store,
            chunker: Chunker::default(),
            hash_fn: HashFn::default(),
        }
    }

    pub fn with_chunker(mut self, chunker: Chunker) -> Self {
        self.chunker = chunker;
        self
    }

    pub fn with_hash_fn(mut self, hash_fn: HashFn) -> Self {
        self.hash_fn = hash_fn;
        self
    }

    pub fn chunker(&self) -> &Chunker {
        &self.chunker
    }

    /// Add an in-memory buffer, returning the root CID
    pub async fn add_bytes(&self, data: impl Into<Bytes>) -> Result<Cid, FileError> {
        let data = data.into();
        let mut leaves = Vec::new();
        for chunk in self.chunker.split(data) {
            leaves.push(self.put_leaf(chunk).await?);
        }
        self.build(leaves).await
    }

    /// Add everything `reader` yields until EOF
    pub async fn add_reader<R>(&self, mut reader: R) -> Result<Cid, FileError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let size = self.chunker.size();
        let mut leaves = Vec::new();
        loop {
            let mut chunk = BytesMut::with_capacity(size);
            // fill a whole chunk so boundaries don't depend on read sizes
            while chunk.len() < size {
                let n = (&mut reader)
                    .take((size - chunk.len()) as u64)
                    .read_buf(&mut chunk)
                    .await?;
                if n == 0 {
                    break;
                }
            }
            let full = chunk.len() == size;
            if !chunk.is_empty() || leaves.is_empty() {
                leaves.push(self.put_leaf(chunk.freeze()).await?);
            }
            if !full {
                break;
            }
        }
        self.build(leaves).await
    }

    /// Add a stream of byte buffers. Buffer boundaries do not affect the result.
    pub async fn add_stream<S>(&self, mut stream: S) -> Result<Cid, FileError>
    where
        S: Stream<Item = std::io::Result<Bytes>> + Unpin + Send,
    {
        let size = self.chunker.size();
        let mut buffer = BytesMut::new();
        let mut leaves = Vec::new();
        while let Some(bytes) = stream.next().await {
            buffer.extend_from_slice(&bytes?);
            while buffer.len() >= size {
                let chunk = buffer.split_to(size).freeze();
                leaves.push(self.put_leaf(chunk).await?);
            }
        }
        if !buffer.is_empty() || leaves.is_empty() {
            leaves.push(self.put_leaf(buffer.freeze()).await?);
        }
        self.build(leaves).await
    }

    async fn put_leaf(&self, chunk: Bytes) -> Result<DagLink, FileError> {
        let size = chunk.len() as u64;
        let cid = self.store.put_with(chunk, self.hash_fn, Codec::Raw).await?;
        Ok(DagLink { cid, size })
    }

    /// Fold a layer of links into parent nodes until one root is left
    async fn build(&self, leaves: Vec<DagLink>) -> Result<Cid, FileError> {
        let leaf_count = leaves.len();
        let mut layer = leaves;
        let mut depth = 0;
        while layer.len() > 1 {
            let mut parents = Vec::with_capacity(layer.len().div_ceil(MAX_LINKS));
            for links in layer.chunks(MAX_LINKS) {
                let node = DagNode::new(links.to_vec());
                let size = node.size();
                let encoded = Bytes::from(node.encode()?);
                let cid = self
                    .store
                    .put_with(encoded, self.hash_fn, Codec::DagCbor)
                    .await?;
                parents.push(DagLink { cid, size });
            }
            layer = parents;
            depth += 1;
        }

        let root = layer
            .pop()
            .ok_or_else(|| FileError::Encode("no leaves to build a root from".to_string()))?;
        tracing::debug!(
            "built file {} ({} bytes, {} leaves, depth {})",
            root.cid,
            root.size,
            leaf_count,
            depth
        );
        Ok(root.cid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockstore::MemoryBlockStore;
    use futures::stream;

    fn writer(chunk_size: usize) -> (FileWriter, MemoryBlockStore) {
        let store = MemoryBlockStore::new();
        let writer =
            FileWriter::new(Arc::new(store.clone())).with_chunker(Chunker::fixed(chunk_size));
        (writer, store)
    }

    #[tokio::test]
    async fn test_small_input_is_a_leaf() {
        let (writer, _) = writer(1024);
        let cid = writer.add_bytes(&b"Hello World ZPP@"[..]).await.unwrap();
        assert_eq!(cid.codec().unwrap(), Codec::Raw);
        assert_eq!(cid, Cid::raw(b"Hello World ZPP@"));
    }

    #[tokio::test]
    async fn test_empty_input_is_a_leaf() {
        let (writer, store) = writer(1024);
        let cid = writer.add_bytes(Bytes::new()).await.unwrap();
        assert_eq!(cid, Cid::raw(b""));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_multi_chunk_builds_node() {
        let (writer, store) = writer(4);
        let cid = writer.add_bytes(&b"abcdefghij"[..]).await.unwrap();
        assert_eq!(cid.codec().unwrap(), Codec::DagCbor);
        // three leaves and one node
        assert_eq!(store.len(), 4);
    }

    #[tokio::test]
    async fn test_wide_input_adds_a_layer() {
        let (writer, store) = writer(1);
        let data: Vec<u8> = (0..(MAX_LINKS + 1)).map(|i| i as u8).collect();
        let root = writer.add_bytes(data).await.unwrap();

        let bytes = store.get(&root).await.unwrap();
        let node = DagNode::decode(&root, &bytes).unwrap();
        assert_eq!(node.links.len(), 2);
        assert_eq!(node.size(), (MAX_LINKS + 1) as u64);
        assert_eq!(node.links[0].size, MAX_LINKS as u64);
        assert_eq!(node.links[1].size, 1);

        let tail = node.links[1].cid;
        assert_eq!(tail.codec().unwrap(), Codec::DagCbor);
        let tail_node = DagNode::decode(&tail, &store.get(&tail).await.unwrap()).unwrap();
        assert_eq!(tail_node.links.len(), 1);
    }

    #[tokio::test]
    async fn test_all_inputs_agree() {
        let (writer, _) = writer(7);
        let data: Vec<u8> = (0..100u8).collect();

        let from_bytes = writer.add_bytes(data.clone()).await.unwrap();
        let from_reader = writer
            .add_reader(std::io::Cursor::new(data.clone()))
            .await
            .unwrap();
        let pieces: Vec<std::io::Result<Bytes>> = data
            .chunks(13)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        let from_stream = writer.add_stream(stream::iter(pieces)).await.unwrap();

        assert_eq!(from_bytes, from_reader);
        assert_eq!(from_bytes, from_stream);
    }

    #[tokio::test]
    async fn test_empty_reader_and_stream() {
        let (writer, _) = writer(7);
        let empty = Cid::raw(b"");
        assert_eq!(
            writer
                .add_reader(std::io::Cursor::new(Vec::new()))
                .await
                .unwrap(),
            empty
        );
        let nothing: Vec<std::io::Result<Bytes>> = vec![];
        assert_eq!(writer.add_stream(stream::iter(nothing)).await.unwrap(), empty);
    }
}
