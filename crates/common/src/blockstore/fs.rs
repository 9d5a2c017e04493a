use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs;

use super::{verify_block, BlockStore, BlockStoreError};
use crate::linked_data::Cid;

const BLOCKS_DIR: &str = "blocks";

/// Block store on the local filesystem
///
/// Blocks are sharded by the last four hex characters of their multihash,
///  which fall inside the digest:
/// ```text
/// {root}/blocks/{xx}/{yy}/{multihash-hex}.data
/// ```
/// Writes go to a temp file in the shard directory which is then renamed
///  into place, so readers never observe a partial block.
#[derive(Debug, Clone)]
pub struct FsBlockStore {
    root: PathBuf,
}

impl FsBlockStore {
    pub async fn open(root: &Path) -> Result<Self, BlockStoreError> {
        let root = root.to_path_buf();
        fs::create_dir_all(root.join(BLOCKS_DIR)).await?;
        tracing::debug!("opened fs block store at {:?}", root);
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn block_path(&self, cid: &Cid) -> PathBuf {
        let key = cid.key();
        // a multihash is at least a code and a length byte, four hex chars
        let (_, shard) = key.split_at(key.len().saturating_sub(4));
        let (xx, yy) = shard.split_at(shard.len().min(2));
        self.root
            .join(BLOCKS_DIR)
            .join(xx)
            .join(yy)
            .join(format!("{}.data", cid.key()))
    }
}

#[async_trait]
impl BlockStore for FsBlockStore {
    async fn put_keyed(&self, cid: &Cid, data: Bytes) -> Result<(), BlockStoreError> {
        verify_block(cid, &data)?;

        let path = self.block_path(cid);
        if fs::try_exists(&path).await? {
            tracing::trace!("block {} already stored", cid);
            return Ok(());
        }

        let parent = path
            .parent()
            .ok_or_else(|| anyhow::anyhow!("block path has no parent: {:?}", path))?
            .to_path_buf();
        fs::create_dir_all(&parent).await?;

        let len = data.len();
        tokio::task::spawn_blocking(move || -> Result<(), BlockStoreError> {
            let mut file = tempfile::NamedTempFile::new_in(&parent)?;
            file.write_all(&data)?;
            file.as_file().sync_all()?;
            file.persist(&path).map_err(|e| BlockStoreError::Io(e.error))?;
            Ok(())
        })
        .await
        .map_err(|e| anyhow::anyhow!("block write task failed: {}", e))??;

        tracing::debug!("stored block {} ({} bytes)", cid, len);
        Ok(())
    }

    async fn get(&self, cid: &Cid) -> Result<Bytes, BlockStoreError> {
        let path = self.block_path(cid);
        let data = match fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(BlockStoreError::NotFound(*cid));
            }
            Err(e) => return Err(e.into()),
        };
        if let Err(e) = verify_block(cid, &data) {
            tracing::warn!("block {} failed verification on read", cid);
            return Err(e);
        }
        Ok(Bytes::from(data))
    }

    async fn has(&self, cid: &Cid) -> Result<bool, BlockStoreError> {
        Ok(fs::try_exists(self.block_path(cid)).await?)
    }

    async fn delete(&self, cid: &Cid) -> Result<(), BlockStoreError> {
        match fs::remove_file(self.block_path(cid)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
