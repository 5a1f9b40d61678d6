//! The record of the last committed block.
use std::sync::{
    Arc,
    PoisonError,
    RwLock,
};

use async_trait::async_trait;
use borsh::{
    BorshDeserialize,
    BorshSerialize,
};
use cnidarium::{
    StateRead,
    StateWrite,
    Storage,
};
use eyre::{
    ensure,
    OptionExt as _,
    Result,
    WrapErr as _,
};
use tendermint::{
    AppHash,
    Hash,
    Time,
};
use tracing::instrument;

use crate::storage::{
    self,
    anyhow_to_eyre,
};

const LAST_BLOCK_KEY: &[u8] = b"burrow/last_block";

/// Metadata of a committed block.
///
/// The app hash is not part of the stored record: it is the root hash of the state the record is
/// committed with.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockMeta {
    pub height: u64,
    pub time: Time,
    /// `None` for the genesis block and blocks committed without consensus.
    pub hash: Option<Hash>,
}

#[derive(BorshSerialize, BorshDeserialize, Debug)]
struct StoredBlockMeta {
    height: u64,
    time: String,
    hash: Vec<u8>,
}

impl StoredBlockMeta {
    fn from_meta(meta: &BlockMeta) -> Self {
        Self {
            height: meta.height,
            time: meta.time.to_rfc3339(),
            hash: meta
                .hash
                .map(|hash| hash.as_bytes().to_vec())
                .unwrap_or_default(),
        }
    }

    fn into_meta(self) -> Result<BlockMeta> {
        let time = Time::parse_from_rfc3339(&self.time).wrap_err("invalid block time")?;
        let hash = if self.hash.is_empty() {
            None
        } else {
            Some(Hash::try_from(self.hash).wrap_err("invalid block hash")?)
        };
        Ok(BlockMeta {
            height: self.height,
            time,
            hash,
        })
    }
}

#[async_trait]
pub(crate) trait StateReadExt: StateRead {
    #[instrument(skip_all)]
    async fn get_last_block(&self) -> Result<Option<BlockMeta>> {
        let Some(bytes) = self
            .nonverifiable_get_raw(LAST_BLOCK_KEY)
            .await
            .map_err(anyhow_to_eyre)
            .wrap_err("failed reading raw last block from state")?
        else {
            return Ok(None);
        };
        StoredBlockMeta::try_from_slice(&bytes)
            .wrap_err("invalid last block bytes")?
            .into_meta()
            .map(Some)
    }
}

impl<T: StateRead + ?Sized> StateReadExt for T {}

#[async_trait]
pub(crate) trait StateWriteExt: StateWrite {
    #[instrument(skip_all, fields(height = meta.height))]
    fn put_last_block(&mut self, meta: &BlockMeta) -> Result<()> {
        let bytes = borsh::to_vec(&StoredBlockMeta::from_meta(meta))
            .wrap_err("failed to serialize last block")?;
        self.nonverifiable_put_raw(LAST_BLOCK_KEY.to_vec(), bytes);
        Ok(())
    }
}

impl<T: StateWrite> StateWriteExt for T {}

/// The last committed block together with the app hash it produced.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LastBlock {
    pub meta: BlockMeta,
    pub app_hash: AppHash,
}

/// Shared, in-memory view of the last committed block.
///
/// Loaded from storage on start-up and advanced by every commit.
#[derive(Clone, Debug)]
pub struct Blockchain {
    last_block: Arc<RwLock<LastBlock>>,
}

impl Blockchain {
    #[must_use]
    pub fn new(last_block: LastBlock) -> Self {
        Self {
            last_block: Arc::new(RwLock::new(last_block)),
        }
    }

    /// Reads the last committed block from `storage`.
    ///
    /// # Errors
    /// Returns an error if storage was never initialized with a genesis block or if the stored
    /// record cannot be read.
    pub async fn load(storage: &Storage) -> Result<Self> {
        let meta = storage
            .latest_snapshot()
            .get_last_block()
            .await?
            .ok_or_eyre("no block was committed to storage; was genesis applied?")?;
        let app_hash = storage::latest_app_hash(storage).await?;
        Ok(Self::new(LastBlock {
            meta,
            app_hash,
        }))
    }

    #[must_use]
    pub fn last_block(&self) -> LastBlock {
        self.last_block
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn last_block_height(&self) -> u64 {
        self.last_block
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .meta
            .height
    }

    /// Records `next` as the last committed block.
    ///
    /// # Errors
    /// Returns an error unless `next` is exactly one block above the current record.
    pub fn commit_block(&self, next: LastBlock) -> Result<()> {
        let mut last_block = self
            .last_block
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let expected = last_block.meta.height.checked_add(1);
        ensure!(
            expected == Some(next.meta.height),
            "attempted to commit block at height {} on top of height {}",
            next.meta.height,
            last_block.meta.height,
        );
        *last_block = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use cnidarium::StateDelta;

    use super::*;

    fn block(height: u64) -> LastBlock {
        LastBlock {
            meta: BlockMeta {
                height,
                time: Time::unix_epoch(),
                hash: None,
            },
            app_hash: AppHash::default(),
        }
    }

    #[test]
    fn heights_must_advance_by_one() {
        let chain = Blockchain::new(block(0));
        chain.commit_block(block(1)).unwrap();
        assert_eq!(chain.last_block_height(), 1);
        assert!(chain.commit_block(block(1)).is_err());
        assert!(chain.commit_block(block(3)).is_err());
        chain.commit_block(block(2)).unwrap();
        assert_eq!(chain.last_block(), block(2));
    }

    #[tokio::test]
    async fn last_block_is_persisted_in_nonverifiable_storage() {
        let storage = cnidarium::TempStorage::new().await.unwrap();
        let mut state = StateDelta::new(storage.latest_snapshot());
        assert_eq!(state.get_last_block().await.unwrap(), None);

        let meta = BlockMeta {
            height: 7,
            time: Time::unix_epoch(),
            hash: Some(Hash::Sha256([3; 32])),
        };
        state.put_last_block(&meta).unwrap();
        state.put_raw("some/key".to_string(), vec![1]);
        storage.commit(state).await.unwrap();

        let loaded = Blockchain::load(&storage).await.unwrap().last_block();
        assert_eq!(loaded.meta, meta);
    }
}
