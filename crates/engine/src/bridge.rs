use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use backon::{FibonacciBuilder, Retryable as _};
use lbft_core::Signature;
use lbft_core::address::Address;
use lbft_core::block::{Block, BridgeTransfer, TxHash};
use lbft_core::proposal::Proposal as _;
use lbft_core::view::Sequence;
use lbft_util_error::fmt::FmtCompact as _;
use lbft_util_error::{BoxedError, BoxedErrorResult};
use lru::LruCache;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument};

use crate::LOG_TARGET;

/// Bridge transactions remembered as already dispatched
const RECENT_SUBMISSIONS: usize = 1024;

const SUBMIT_BACKOFF: FibonacciBuilder = FibonacciBuilder::new()
    .with_jitter()
    .without_max_times()
    .with_max_delay(Duration::from_secs(60));

/// A bridge transaction agreed on by the validators
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeTx {
    pub number: Sequence,
    pub tx_hash: TxHash,
    pub transfers: Vec<BridgeTransfer>,
    /// Signatures of the committing validators over `tx_hash`
    pub signatures: Vec<(Address, Signature)>,
}

/// Destination chain side of the relay
#[async_trait]
pub trait BridgeSubmitter: Send + Sync + 'static {
    /// Assemble and send the transaction to the destination chain
    ///
    /// Retried until it succeeds, so must tolerate being called again for
    /// a transaction that actually went through.
    async fn submit(&self, tx: &BridgeTx) -> BoxedErrorResult<()>;

    /// Mark a pending transaction as agreed on, without submitting it
    async fn confirm(&self, number: Sequence, tx_hash: TxHash);
}

/// Dispatches bridge submissions off the consensus path
///
/// Each transaction hash is submitted at most once per dispatcher, retrying
/// in the background until the submitter accepts it.
pub struct BridgeDispatcher {
    submitter: Arc<dyn BridgeSubmitter>,
    submitted: Mutex<LruCache<TxHash, ()>>,
    tasks: Mutex<JoinSet<()>>,
}

impl BridgeDispatcher {
    pub fn new(submitter: Arc<dyn BridgeSubmitter>) -> Self {
        Self {
            submitter,
            submitted: Mutex::new(LruCache::new(
                NonZeroUsize::new(RECENT_SUBMISSIONS).expect("Can't fail"),
            )),
            tasks: Mutex::new(JoinSet::new()),
        }
    }

    /// Submit the bridge transaction of `block`, unless already done
    pub fn submit(&self, block: &Block, signatures: Vec<(Address, Signature)>) {
        if block.transfers.is_empty() {
            return;
        }
        let tx_hash = block.tx_hash();
        if self
            .submitted
            .lock()
            .expect("Locking failed")
            .put(tx_hash, ())
            .is_some()
        {
            debug!(target: LOG_TARGET, tx_hash = %tx_hash.short(), "Bridge transaction already dispatched");
            return;
        }

        let tx = BridgeTx {
            number: block.number(),
            tx_hash,
            transfers: block.transfers.clone(),
            signatures,
        };
        let submitter = self.submitter.clone();

        let mut tasks = self.tasks.lock().expect("Locking failed");
        // Reap finished ones
        while tasks.try_join_next().is_some() {}
        tasks.spawn(submit_with_retry(submitter, tx));
    }

    /// Mark the bridge transaction of `block` as agreed on
    pub async fn confirm(&self, block: &Block) {
        if block.transfers.is_empty() {
            return;
        }
        self.submitter.confirm(block.number(), block.tx_hash()).await;
    }

    /// Number of submissions still being retried
    pub fn in_flight(&self) -> usize {
        let mut tasks = self.tasks.lock().expect("Locking failed");
        while tasks.try_join_next().is_some() {}
        tasks.len()
    }
}

#[instrument(
    target = LOG_TARGET,
    name = "bridge-submit",
    skip_all,
    fields(number = %tx.number, tx_hash = %tx.tx_hash.short())
)]
async fn submit_with_retry(submitter: Arc<dyn BridgeSubmitter>, tx: BridgeTx) {
    { || async { submitter.submit(&tx).await } }
        .retry(SUBMIT_BACKOFF)
        .notify(|err: &BoxedError, dur: Duration| {
            debug!(
                target: LOG_TARGET,
                dur_millis = %dur.as_millis(),
                err = %err.fmt_compact(),
                "Retrying bridge submission"
            );
        })
        .await
        .expect("Always retry");
    info!(
        target: LOG_TARGET,
        signatures = tx.signatures.len(),
        "Submitted bridge transaction"
    );
}
