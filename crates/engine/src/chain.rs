use std::sync::Arc;

use async_trait::async_trait;
use lbft_core::block::{Block, BlockHash, BlockHeader};
use lbft_core::proposal::Proposal as _;
use lbft_core::view::Sequence;
use lbft_db::error::DbResult;
use lbft_db::{Database, def_table};
use lbft_snapshot::HeaderReader;
use lbft_util_error::fmt::FmtCompact as _;
use snafu::ensure;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::LOG_TARGET;
use crate::error::{ChainResult, GenesisMismatchSnafu, NotExtendingHeadSnafu};

def_table! {
    /// Canonical chain, by block number
    blocks: Sequence => Block
}

def_table! {
    /// Number of every canonical block, by hash
    block_numbers: BlockHash => Sequence
}

def_table! {
    /// Number of the last block
    chain_head: () => Sequence
}

/// The local copy of the agreed on chain
///
/// Blocks only ever get appended, once consensus committed them, so the
/// chain never forks.
pub struct BlockStore {
    db: Arc<Database>,
    head: watch::Sender<Block>,
}

impl BlockStore {
    /// Open the store, initializing it with `genesis` if empty
    pub async fn open(db: Arc<Database>, genesis: Block) -> ChainResult<Self> {
        let genesis_hash = genesis.hash();
        let head = db
            .write_with(|tx| {
                let mut blocks = tx.open_table(&blocks::TABLE)?;
                let mut numbers = tx.open_table(&block_numbers::TABLE)?;
                let mut head = tx.open_table(&chain_head::TABLE)?;

                let number = head.get(&())?.map(|g| g.value());
                let Some(number) = number else {
                    blocks.insert(&Sequence::ZERO, &genesis)?;
                    numbers.insert(&genesis_hash, &Sequence::ZERO)?;
                    head.insert(&(), &Sequence::ZERO)?;
                    return Ok(Some(genesis));
                };
                if numbers.get(&genesis_hash)?.map(|g| g.value()) != Some(Sequence::ZERO) {
                    return Ok(None);
                }
                Ok(blocks.get(&number)?.map(|g| g.value()))
            })
            .await?;

        let Some(head) = head else {
            return GenesisMismatchSnafu.fail();
        };
        debug!(target: LOG_TARGET, number = %head.number(), "Opened block store");
        Ok(Self {
            db,
            head: watch::Sender::new(head),
        })
    }

    pub fn db(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn head(&self) -> Block {
        self.head.borrow().clone()
    }

    pub fn subscribe_head(&self) -> watch::Receiver<Block> {
        self.head.subscribe()
    }

    /// Append `block` on top of the current head
    pub async fn insert(&self, block: Block) -> ChainResult<()> {
        let head = self.head();
        let number = block.number();
        let hash = block.hash();
        ensure!(
            head.hash() == block.parent_hash() && head.number().next() == Some(number),
            NotExtendingHeadSnafu { hash, number }
        );

        self.db
            .write_with(|tx| {
                let mut blocks = tx.open_table(&blocks::TABLE)?;
                let mut numbers = tx.open_table(&block_numbers::TABLE)?;
                let mut head = tx.open_table(&chain_head::TABLE)?;
                blocks.insert(&number, &block)?;
                numbers.insert(&hash, &number)?;
                head.insert(&(), &number)?;
                Ok(())
            })
            .await?;

        self.head.send_replace(block);
        Ok(())
    }

    pub async fn block_by_number(&self, number: Sequence) -> DbResult<Option<Block>> {
        self.db
            .read_with(|tx| {
                let blocks = tx.open_table(&blocks::TABLE)?;
                Ok(blocks.get(&number)?.map(|g| g.value()))
            })
            .await
    }

    pub async fn header_by_number(&self, number: Sequence) -> Option<BlockHeader> {
        self.block_by_number(number)
            .await
            .inspect_err(|err| {
                warn!(target: LOG_TARGET, %number, err = %err.fmt_compact(), "Failed to read block");
            })
            .ok()
            .flatten()
            .map(|b| b.header)
    }

    pub async fn has_block(&self, hash: BlockHash, number: Sequence) -> bool {
        self.header(hash, number).await.is_some()
    }
}

#[async_trait]
impl HeaderReader for BlockStore {
    async fn header(&self, hash: BlockHash, number: Sequence) -> Option<BlockHeader> {
        self.header_by_number(number)
            .await
            .filter(|header| header.hash() == hash)
    }
}
