use std::num::NonZeroUsize;
use std::sync::Arc;

use async_trait::async_trait;
use lbft_core::block::{BlockHash, BlockHeader};
use lbft_core::signed::Verifier;
use lbft_core::validator_set::{ProposerPolicy, ValidatorSet};
use lbft_core::view::Sequence;
use lbft_db::Database;
use lru::LruCache;
use snafu::OptionExt as _;
use tokio::sync::RwLock;
use tracing::{debug, instrument, trace};

use crate::error::{MissingHeaderSnafu, SnapshotResult};
use crate::{LOG_TARGET, Snapshot, tables};

/// Number of recent snapshots kept in memory
const RECENT_SNAPSHOTS: usize = 128;

/// Read access to the canonical chain
#[async_trait]
pub trait HeaderReader: Send + Sync {
    async fn header(&self, hash: BlockHash, number: Sequence) -> Option<BlockHeader>;
}

/// Computes snapshots at any block, backed by a cache and checkpoints
///
/// Snapshots at multiples of the epoch are persisted, so computing one only
/// ever needs to fold the headers since the last checkpoint.
pub struct Snapshots {
    db: Arc<Database>,
    epoch: u64,
    policy: ProposerPolicy,
    verifier: Arc<dyn Verifier>,
    recent: RwLock<LruCache<BlockHash, Snapshot>>,
}

impl Snapshots {
    pub fn new(
        db: Arc<Database>,
        epoch: u64,
        policy: ProposerPolicy,
        verifier: Arc<dyn Verifier>,
    ) -> Self {
        Self {
            db,
            epoch,
            policy,
            verifier,
            recent: RwLock::new(LruCache::new(
                NonZeroUsize::new(RECENT_SNAPSHOTS).expect("Can't fail"),
            )),
        }
    }

    fn is_checkpoint(&self, number: Sequence) -> bool {
        number == Sequence::ZERO || (self.epoch != 0 && number.to_number() % self.epoch == 0)
    }

    /// Snapshot as of block `number` with `hash`
    ///
    /// `parents` are headers not yet available through `chain`, ordered by
    /// number, with the last one being the parent of whatever is verified
    /// next. They are used before asking `chain`.
    #[instrument(
        target = LOG_TARGET,
        name = "snapshot",
        skip_all,
        fields(%number, hash = %hash.short())
    )]
    pub async fn snapshot(
        &self,
        number: Sequence,
        hash: BlockHash,
        mut parents: &[BlockHeader],
        chain: &dyn HeaderReader,
    ) -> SnapshotResult<Snapshot> {
        let mut headers = vec![];
        let mut number = number;
        let mut hash = hash;

        let base = loop {
            if let Some(snap) = self.recent.read().await.peek(&hash) {
                break snap.clone();
            }

            if self.is_checkpoint(number) {
                if let Some(snap) = self.load(hash).await? {
                    trace!(target: LOG_TARGET, %number, "Loaded checkpoint snapshot");
                    break snap;
                }
            }

            if number == Sequence::ZERO {
                let genesis = chain
                    .header(hash, number)
                    .await
                    .context(MissingHeaderSnafu { hash, number })?;
                let snap = Snapshot::new(
                    self.epoch,
                    number,
                    hash,
                    ValidatorSet::new(genesis.validators.iter().copied(), self.policy),
                );
                self.store(&snap).await?;
                debug!(target: LOG_TARGET, validators = snap.validators.len(), "Stored genesis snapshot");
                break snap;
            }

            let header = match parents.split_last() {
                Some((last, rest)) => {
                    if last.hash() != hash || last.number != number {
                        return MissingHeaderSnafu { hash, number }.fail();
                    }
                    parents = rest;
                    last.clone()
                }
                None => chain
                    .header(hash, number)
                    .await
                    .context(MissingHeaderSnafu { hash, number })?,
            };
            hash = header.parent_hash;
            number = number.prev().context(MissingHeaderSnafu { hash, number })?;
            headers.push(header);
        };

        headers.reverse();
        let snap = base.apply(&headers, self.verifier.as_ref())?;
        self.recent.write().await.put(snap.hash, snap.clone());

        if !headers.is_empty() && self.is_checkpoint(snap.number) {
            self.store(&snap).await?;
            debug!(target: LOG_TARGET, number = %snap.number, "Stored checkpoint snapshot");
        }
        Ok(snap)
    }

    async fn load(&self, hash: BlockHash) -> SnapshotResult<Option<Snapshot>> {
        Ok(self
            .db
            .read_with(|tx| {
                let tbl = tx.open_table(&tables::snapshots::TABLE)?;
                Ok(tbl.get(&hash)?.map(|g| g.value()))
            })
            .await?)
    }

    async fn store(&self, snap: &Snapshot) -> SnapshotResult<()> {
        self.db
            .write_with(|tx| {
                let mut tbl = tx.open_table(&tables::snapshots::TABLE)?;
                tbl.insert(&snap.hash, snap)?;
                Ok(())
            })
            .await?;
        Ok(())
    }
}
