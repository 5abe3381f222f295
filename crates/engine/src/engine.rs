use std::sync::{Arc, Mutex};

use lbft_consensus::{Backend as _, Core, CoreStatus};
use lbft_core::address::Address;
use lbft_core::block::{Block, BlockHash, BlockHeader, HeaderVote};
use lbft_core::config::ConsensusConfig;
use lbft_core::signed::{Signer, Verifier};
use lbft_core::timestamp::Timestamp;
use lbft_core::view::Sequence;
use lbft_snapshot::Snapshot;
use n0_future::task::AbortOnDropHandle;
use snafu::{OptionExt as _, ResultExt as _, ensure};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, trace};

use crate::LOG_TARGET;
use crate::backend::RelayBackend;
use crate::bridge::BridgeSubmitter;
use crate::chain::BlockStore;
use crate::error::{
    AlreadyStartedSnafu, EngineResult, MessageSnafu, NotStartedSnafu, UnauthorizedSnafu,
    UnknownBlockSnafu, VerifyError, VerifyResult,
};
use crate::network::Network;

/// Wire protocol the engine speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Protocol {
    pub name: &'static str,
    pub versions: &'static [u32],
    /// Number of message codes used by each version
    pub lengths: &'static [(u32, u64)],
}

pub const PROTOCOL: Protocol = Protocol {
    name: "istanbul",
    versions: &[64],
    lengths: &[(64, 22)],
};

/// Consensus engine of a relay validator
///
/// Owns the [`RelayBackend`] and, while started, the consensus core running
/// on top of it.
pub struct Engine {
    backend: Arc<RelayBackend>,
    core_task: Mutex<Option<AbortOnDropHandle<()>>>,
}

#[bon::bon]
impl Engine {
    #[builder]
    pub fn new(
        config: Arc<ConsensusConfig>,
        signer: Arc<dyn Signer>,
        verifier: Arc<dyn Verifier>,
        chain: Arc<BlockStore>,
        network: Arc<dyn Network>,
        bridge: Arc<dyn BridgeSubmitter>,
    ) -> Self {
        Self {
            backend: Arc::new(RelayBackend::new(
                config, signer, verifier, chain, network, bridge,
            )),
            core_task: Mutex::new(None),
        }
    }
}

impl Engine {
    pub fn backend(&self) -> &Arc<RelayBackend> {
        &self.backend
    }

    pub fn address(&self) -> Address {
        self.backend.address()
    }

    pub fn protocol(&self) -> Protocol {
        PROTOCOL
    }

    /// Start the consensus core
    pub fn start(&self) -> EngineResult<()> {
        let mut task = self.core_task.lock().expect("Locking failed");
        ensure!(
            task.as_ref().is_none_or(|t| t.is_finished()),
            AlreadyStartedSnafu
        );

        let (core, handle) = Core::new(self.backend.clone(), self.backend.config.clone());
        *self.backend.core.lock().expect("Locking failed") = Some(handle);
        *task = Some(AbortOnDropHandle::new(tokio::spawn(core.run())));
        info!(target: LOG_TARGET, address = %self.address().short(), "Engine started");
        Ok(())
    }

    /// Stop the consensus core, waiting for it to finish
    pub async fn stop(&self) -> EngineResult<()> {
        let handle = self
            .backend
            .core
            .lock()
            .expect("Locking failed")
            .take()
            .context(NotStartedSnafu)?;
        handle.stop().await;

        let task = self.core_task.lock().expect("Locking failed").take();
        if let Some(task) = task {
            let _ = task.await;
        }
        info!(target: LOG_TARGET, "Engine stopped");
        Ok(())
    }

    /// Stop if running, and release everything
    pub async fn close(&self) {
        let _ = self.stop().await;
    }

    /// Status of the running core
    pub fn status(&self) -> Option<watch::Receiver<CoreStatus>> {
        self.backend.core_handle().map(|h| h.subscribe_status())
    }

    /// Feed a consensus message received from `from`
    pub async fn handle_message(&self, from: Address, payload: &[u8]) -> EngineResult<()> {
        if !self.backend.mark_received(from, payload) {
            trace!(target: LOG_TARGET, from = %from.short(), "Already handled message");
            return Ok(());
        }
        let core = self.backend.core_handle().context(NotStartedSnafu)?;
        core.handle_message(payload).await.context(MessageSnafu)
    }

    /// Address that sealed `header`
    pub fn author(&self, header: &BlockHeader) -> VerifyResult<Address> {
        self.backend.author(header)
    }

    pub async fn verify_header(&self, header: &BlockHeader) -> VerifyResult<()> {
        self.backend.verify_header(header, &[]).await
    }

    /// Verify consecutive `headers`, each one may build on the previous ones
    ///
    /// Results are streamed in order. Dropping the returned handle, or the
    /// receiver, stops the verification.
    pub fn verify_headers(
        &self,
        headers: Vec<BlockHeader>,
    ) -> (AbortOnDropHandle<()>, mpsc::Receiver<VerifyResult<()>>) {
        let (tx, rx) = mpsc::channel(headers.len().max(1));
        let backend = self.backend.clone();
        let task = tokio::spawn(async move {
            for i in 0..headers.len() {
                let res = backend.verify_header(&headers[i], &headers[..i]).await;
                if tx.send(res).await.is_err() {
                    return;
                }
            }
        });
        (AbortOnDropHandle::new(task), rx)
    }

    /// Check only that `header` was sealed by a validator
    pub async fn verify_seal(&self, header: &BlockHeader) -> VerifyResult<()> {
        let number = header.number;
        let parent_number = number.prev().context(UnknownBlockSnafu {
            hash: header.hash(),
            number,
        })?;
        let snap = self
            .backend
            .snapshot_at(parent_number, header.parent_hash, &[])
            .await?;
        self.backend.verify_signer(header, &snap)
    }

    /// Voting state after block `number` with `hash`
    pub async fn snapshot(&self, number: Sequence, hash: BlockHash) -> VerifyResult<Snapshot> {
        Ok(self.backend.snapshot_at(number, hash, &[]).await?)
    }

    pub fn seal_hash(&self, header: &BlockHeader) -> blake3::Hash {
        header.seal_hash()
    }

    /// Fill in the consensus fields of a new `header`
    ///
    /// Proposer, timestamp, the validator list on epoch blocks, and
    /// otherwise one of the queued votes, if any still makes sense.
    pub async fn prepare(&self, header: &mut BlockHeader) -> EngineResult<()> {
        let number = header.number;
        let parent_number = number.prev().context(UnknownBlockSnafu {
            hash: header.parent_hash,
            number,
        })?;
        let parent = lbft_snapshot::HeaderReader::header(
            self.backend.chain.as_ref(),
            header.parent_hash,
            parent_number,
        )
        .await
        .context(UnknownBlockSnafu {
            hash: header.parent_hash,
            number: parent_number,
        })?;
        let snap = self
            .backend
            .snapshot_at(parent_number, header.parent_hash, &[])
            .await
            .map_err(VerifyError::from)?;

        header.proposer = self.address();
        header.vote = None;
        header.validators = vec![];
        if self.backend.is_epoch(number) {
            header.validators = snap.validators.list().to_vec();
        } else {
            let mut candidates = self.backend.candidates.lock().expect("Locking failed");
            // Drop the ones already in effect
            candidates.retain(|candidate, authorize| snap.is_meaningful(*candidate, *authorize));
            header.vote = candidates
                .iter()
                .next()
                .map(|(candidate, authorize)| HeaderVote {
                    candidate: *candidate,
                    authorize: *authorize,
                });
        }

        header.timestamp = parent
            .timestamp
            .saturating_add_secs(self.backend.config.block_period_secs)
            .max(Timestamp::now());
        Ok(())
    }

    /// Seal `block` and get it agreed on
    ///
    /// The result is delivered once the block is committed, with its
    /// committed seals, or `None` if `stop` fires first.
    pub async fn seal(
        &self,
        block: Block,
        stop: oneshot::Receiver<()>,
    ) -> EngineResult<oneshot::Receiver<Option<Block>>> {
        let mut block = block;
        let header = &block.header;
        let number = header.number;
        let parent_number = number.prev().context(UnknownBlockSnafu {
            hash: header.hash(),
            number,
        })?;
        let snap = self
            .backend
            .snapshot_at(parent_number, header.parent_hash, &[])
            .await
            .map_err(VerifyError::from)?;
        let address = self.address();
        ensure!(
            snap.validators.contains(address),
            UnauthorizedSnafu { address }
        );
        let core = self.backend.core_handle().context(NotStartedSnafu)?;

        block.header.sign_seal(self.backend.signer.as_ref());
        let hash = block.header.hash();
        let delay = block.header.timestamp.duration_since(Timestamp::now());

        let (res_tx, res_rx) = oneshot::channel();
        let backend = self.backend.clone();
        tokio::spawn(async move {
            let mut stop = stop;
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = &mut stop => {
                    let _ = res_tx.send(None);
                    return;
                }
            }

            let (commit_tx, commit_rx) = oneshot::channel();
            backend.set_pending_seal(hash, commit_tx);
            debug!(target: LOG_TARGET, %number, hash = %hash.short(), "Requesting proposal");
            core.request(block).await;

            let res = tokio::select! {
                res = commit_rx => res.ok(),
                _ = stop => None,
            };
            let _ = res_tx.send(res);
        });
        Ok(res_rx)
    }

    /// Queue a vote to add (`authorize`) or remove `candidate`
    pub fn propose(&self, candidate: Address, authorize: bool) {
        self.backend
            .candidates
            .lock()
            .expect("Locking failed")
            .insert(candidate, authorize);
    }

    pub fn discard(&self, candidate: Address) {
        self.backend
            .candidates
            .lock()
            .expect("Locking failed")
            .remove(&candidate);
    }

    pub fn candidates(&self) -> Vec<(Address, bool)> {
        self.backend
            .candidates
            .lock()
            .expect("Locking failed")
            .iter()
            .map(|(c, a)| (*c, *a))
            .collect()
    }
}
