use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use futures::future;
use futures::stream::{self, BoxStream};
use futures::{StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};

use super::{BlockSource, DagNode, FileError};
use crate::linked_data::{Cid, Codec};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CatOptions {
    /// How many leaf fetches may be in flight ahead of the consumer
    pub concurrency: usize,
}

impl Default for CatOptions {
    fn default() -> Self {
        Self { concurrency: 8 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    /// Total file bytes
    pub size: u64,
    /// Number of leaf chunks
    pub leaves: u64,
    /// Number of internal nodes
    pub nodes: u64,
}

/// A leaf to fetch, with the size its parent recorded (none for a leaf root)
struct PendingLeaf {
    cid: Cid,
    expected: Option<u64>,
}

/// Stream the bytes of the file rooted at `root`.
///
/// The returned stream is lazy and single pass: nothing is fetched until
///  it is polled, and internal nodes are only resolved when the walk reaches
///  them. Up to `options.concurrency` leaves are fetched ahead, but chunks are
///  always yielded in link order. The first error ends the stream.
pub fn cat<S>(
    source: Arc<S>,
    root: Cid,
    options: CatOptions,
) -> BoxStream<'static, Result<Bytes, FileError>>
where
    S: BlockSource + ?Sized + 'static,
{
    let walker = source.clone();
    let leaves = stream::try_unfold(
        vec![(root, None::<u64>)],
        move |mut stack| {
            let source = walker.clone();
            async move {
                while let Some((cid, expected)) = stack.pop() {
                    match cid.codec().map_err(|_| FileError::UnsupportedCodec(cid))? {
                        Codec::Raw => {
                            return Ok(Some((PendingLeaf { cid, expected }, stack)));
                        }
                        Codec::DagCbor => {
                            let node = load_node(source.as_ref(), &cid).await?;
                            // reversed so the first link is popped first
                            for link in node.links.iter().rev() {
                                stack.push((link.cid, Some(link.size)));
                            }
                        }
                        Codec::DagPb => return Err(FileError::UnsupportedCodec(cid)),
                    }
                }
                Ok(None)
            }
        },
    );

    leaves
        .map_ok(move |leaf| {
            let source = source.clone();
            async move { fetch_leaf(source.as_ref(), leaf).await }
        })
        .try_buffered(options.concurrency.max(1))
        .scan(false, |failed, item| {
            if *failed {
                return future::ready(None);
            }
            *failed = item.is_err();
            future::ready(Some(item))
        })
        .boxed()
}

/// Collect a whole file into memory
pub async fn read_to_end<S>(source: Arc<S>, root: Cid) -> Result<Bytes, FileError>
where
    S: BlockSource + ?Sized + 'static,
{
    let mut stream = cat(source, root, CatOptions::default());
    let mut out = BytesMut::new();
    while let Some(chunk) = stream.next().await {
        out.extend_from_slice(&chunk?);
    }
    Ok(out.freeze())
}

/// Size and shape of a file, resolving internal nodes only
pub async fn stat<S>(source: Arc<S>, root: Cid) -> Result<FileStat, FileError>
where
    S: BlockSource + ?Sized + 'static,
{
    let mut stat = FileStat {
        size: 0,
        leaves: 0,
        nodes: 0,
    };
    let mut stack = vec![root];
    let mut top = true;
    while let Some(cid) = stack.pop() {
        match cid.codec().map_err(|_| FileError::UnsupportedCodec(cid))? {
            Codec::Raw if top => {
                let bytes = source
                    .get_block(&cid)
                    .await
                    .map_err(|e| FileError::Unavailable(cid, e))?;
                stat.size = bytes.len() as u64;
                stat.leaves = 1;
            }
            Codec::Raw => {}
            Codec::DagCbor => {
                let node = load_node(source.as_ref(), &cid).await?;
                if top {
                    stat.size = node.size();
                }
                stat.nodes += 1;
                for link in node.links.iter() {
                    if link.cid.codec().ok() == Some(Codec::Raw) {
                        stat.leaves += 1;
                    } else {
                        stack.push(link.cid);
                    }
                }
            }
            Codec::DagPb => return Err(FileError::UnsupportedCodec(cid)),
        }
        top = false;
    }
    Ok(stat)
}

async fn load_node<S>(source: &S, cid: &Cid) -> Result<DagNode, FileError>
where
    S: BlockSource + ?Sized,
{
    let bytes = source
        .get_block(cid)
        .await
        .map_err(|e| FileError::Unavailable(*cid, e))?;
    DagNode::decode(cid, &bytes)
}

async fn fetch_leaf<S>(source: &S, leaf: PendingLeaf) -> Result<Bytes, FileError>
where
    S: BlockSource + ?Sized,
{
    let bytes = source
        .get_block(&leaf.cid)
        .await
        .map_err(|e| FileError::Unavailable(leaf.cid, e))?;
    if let Some(expected) = leaf.expected {
        if bytes.len() as u64 != expected {
            return Err(FileError::SizeMismatch {
                cid: leaf.cid,
                expected,
                actual: bytes.len() as u64,
            });
        }
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockstore::{BlockStore, MemoryBlockStore};
    use crate::file::{Chunker, FileWriter};

    fn setup(chunk_size: usize) -> (FileWriter, Arc<dyn BlockStore>) {
        let store: Arc<dyn BlockStore> = Arc::new(MemoryBlockStore::new());
        let writer = FileWriter::new(store.clone()).with_chunker(Chunker::fixed(chunk_size));
        (writer, store)
    }

    fn sample(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 251) as u8).collect()
    }

    #[tokio::test]
    async fn test_round_trip_sizes() {
        let (writer, store) = setup(16);
        for len in [0usize, 1, 15, 16, 17, 1000, 16 * 174 + 3] {
            let data = sample(len);
            let root = writer.add_bytes(data.clone()).await.unwrap();
            let out = read_to_end(store.clone(), root).await.unwrap();
            assert_eq!(out.as_ref(), data.as_slice(), "length {}", len);
        }
    }

    #[tokio::test]
    async fn test_chunks_come_out_in_order() {
        let (writer, store) = setup(4);
        let root = writer.add_bytes(&b"aaaabbbbccccdd"[..]).await.unwrap();
        let chunks: Vec<Bytes> = cat(store, root, CatOptions { concurrency: 3 })
            .try_collect()
            .await
            .unwrap();
        let chunks: Vec<&[u8]> = chunks.iter().map(|c| c.as_ref()).collect();
        assert_eq!(chunks, vec![&b"aaaa"[..], b"bbbb", b"cccc", b"dd"]);
    }

    #[tokio::test]
    async fn test_missing_leaf_is_unavailable() {
        let (writer, store) = setup(4);
        let root = writer.add_bytes(&b"aaaabbbbcccc"[..]).await.unwrap();
        store.delete(&Cid::raw(b"bbbb")).await.unwrap();

        let mut stream = cat(store, root, CatOptions::default());
        assert_eq!(stream.next().await.unwrap().unwrap().as_ref(), b"aaaa");
        let err = stream.next().await.unwrap().unwrap_err();
        assert!(err.is_unavailable());
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_missing_root_is_unavailable() {
        let (_, store) = setup(4);
        let err = read_to_end(store, Cid::raw(b"nowhere")).await.unwrap_err();
        assert!(err.is_unavailable());
    }

    #[tokio::test]
    async fn test_dag_pb_root_is_unsupported() {
        let (_, store) = setup(4);
        let root = Cid::parse("QmVQi48ntcJAEndqoDb24QyYEYhKmUZaHK9n8ECUhTtwzF").unwrap();
        let err = read_to_end(store.clone(), root).await.unwrap_err();
        assert!(matches!(err, FileError::UnsupportedCodec(cid) if cid == root));
        assert!(!err.is_unavailable());
        assert!(matches!(
            stat(store, root).await.unwrap_err(),
            FileError::UnsupportedCodec(_)
        ));
    }

    #[tokio::test]
    async fn test_stat() {
        let (writer, store) = setup(4);
        let root = writer.add_bytes(sample(4 * 200)).await.unwrap();
        let stat = stat(store.clone(), root).await.unwrap();
        assert_eq!(stat.size, 800);
        assert_eq!(stat.leaves, 200);
        // two nodes at the bottom layer plus the root
        assert_eq!(stat.nodes, 3);

        let leaf = writer.add_bytes(&b"tiny"[..]).await.unwrap();
        let stat = super::stat(store, leaf).await.unwrap();
        assert_eq!((stat.size, stat.leaves, stat.nodes), (4, 1, 0));
    }
}
