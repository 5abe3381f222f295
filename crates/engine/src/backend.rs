use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use lbft_consensus::{Backend, CoreHandle, ProposalVerifyError, ProposalVerifyResult};
use lbft_core::Signature;
use lbft_core::address::Address;
use lbft_core::block::{Block, BlockHash, BlockHeader, CommittedSeal};
use lbft_core::config::ConsensusConfig;
use lbft_core::proposal::Proposal as _;
use lbft_core::signed::{Signer, Verifier};
use lbft_core::validator_set::ValidatorSet;
use lbft_core::view::Sequence;
use lbft_snapshot::{Snapshot, SnapshotResult, Snapshots};
use lbft_util_error::{BoxedError, BoxedErrorResult};
use lbft_util_error::fmt::FmtCompact as _;
use lru::LruCache;
use tokio::sync::oneshot;
use tracing::{debug, info, trace};

use crate::bridge::{BridgeDispatcher, BridgeSubmitter};
use crate::chain::BlockStore;
use crate::error::VerifyError;
use crate::LOG_TARGET;
use crate::network::Network;

/// Peers we track recently sent messages for
const RECENT_PEERS: usize = 40;
/// Recent messages remembered per peer, and as seen by us
const RECENT_MESSAGES: usize = 1024;
/// Header signers remembered
const RECENT_SIGNERS: usize = 4096;

fn lru<K: std::hash::Hash + Eq, V>(cap: usize) -> Mutex<LruCache<K, V>> {
    Mutex::new(LruCache::new(NonZeroUsize::new(cap).expect("Can't fail")))
}

/// Block this node is waiting to get committed, to hand it back sealed
struct PendingSeal {
    hash: BlockHash,
    tx: oneshot::Sender<Block>,
}

/// [`Backend`] of a relay validator
pub struct RelayBackend {
    pub(crate) config: Arc<ConsensusConfig>,
    pub(crate) signer: Arc<dyn Signer>,
    pub(crate) verifier: Arc<dyn Verifier>,
    pub(crate) chain: Arc<BlockStore>,
    pub(crate) snapshots: Snapshots,
    network: Arc<dyn Network>,
    bridge: BridgeDispatcher,

    /// Message hashes each peer is known to have
    recent_messages: Mutex<LruCache<Address, LruCache<blake3::Hash, ()>>>,
    /// Message hashes we already handled
    known_messages: Mutex<LruCache<blake3::Hash, ()>>,
    /// Verified header signers, by header hash
    pub(crate) signers: Mutex<LruCache<BlockHash, Address>>,
    /// Votes the operator wants to cast: candidate to authorize
    pub(crate) candidates: Mutex<BTreeMap<Address, bool>>,

    pending_seal: Mutex<Option<PendingSeal>>,
    pub(crate) core: Mutex<Option<CoreHandle<Block>>>,
}

impl RelayBackend {
    pub fn new(
        config: Arc<ConsensusConfig>,
        signer: Arc<dyn Signer>,
        verifier: Arc<dyn Verifier>,
        chain: Arc<BlockStore>,
        network: Arc<dyn Network>,
        bridge: Arc<dyn BridgeSubmitter>,
    ) -> Self {
        let snapshots = Snapshots::new(
            chain.db().clone(),
            config.epoch,
            config.proposer_policy,
            verifier.clone(),
        );
        Self {
            config,
            signer,
            verifier,
            chain,
            snapshots,
            network,
            bridge: BridgeDispatcher::new(bridge),
            recent_messages: lru(RECENT_PEERS),
            known_messages: lru(RECENT_MESSAGES),
            signers: lru(RECENT_SIGNERS),
            candidates: Mutex::new(BTreeMap::new()),
            pending_seal: Mutex::new(None),
            core: Mutex::new(None),
        }
    }

    pub(crate) fn core_handle(&self) -> Option<CoreHandle<Block>> {
        self.core.lock().expect("Locking failed").clone()
    }

    pub(crate) async fn snapshot_at(
        &self,
        number: Sequence,
        hash: BlockHash,
        parents: &[BlockHeader],
    ) -> SnapshotResult<Snapshot> {
        self.snapshots
            .snapshot(number, hash, parents, self.chain.as_ref())
            .await
    }

    async fn validators_at(
        &self,
        number: Sequence,
        hash: BlockHash,
    ) -> BoxedErrorResult<ValidatorSet> {
        Ok(self.snapshot_at(number, hash, &[]).await?.validators)
    }

    /// Remember `payload` from `from`, returning `false` if already handled
    pub(crate) fn mark_received(&self, from: Address, payload: &[u8]) -> bool {
        let hash = blake3::hash(payload);
        self.recent_messages
            .lock()
            .expect("Locking failed")
            .get_or_insert_mut(from, || {
                LruCache::new(NonZeroUsize::new(RECENT_MESSAGES).expect("Can't fail"))
            })
            .put(hash, ());
        self.known_messages
            .lock()
            .expect("Locking failed")
            .put(hash, ())
            .is_none()
    }

    pub(crate) fn set_pending_seal(&self, hash: BlockHash, tx: oneshot::Sender<Block>) {
        *self.pending_seal.lock().expect("Locking failed") = Some(PendingSeal { hash, tx });
    }

    /// Hand a committed block to whoever is sealing it
    fn deliver_seal(&self, block: &Block) {
        let mut pending = self.pending_seal.lock().expect("Locking failed");
        if pending.as_ref().is_some_and(|p| p.hash == block.hash()) {
            if let Some(p) = pending.take() {
                let _ = p.tx.send(block.clone());
            }
        }
    }

    pub fn bridge(&self) -> &BridgeDispatcher {
        &self.bridge
    }
}

#[async_trait]
impl Backend for RelayBackend {
    type Proposal = Block;

    fn address(&self) -> Address {
        self.signer.address()
    }

    fn signer(&self) -> Arc<dyn Signer> {
        self.signer.clone()
    }

    fn verifier(&self) -> Arc<dyn Verifier> {
        self.verifier.clone()
    }

    async fn validators(&self, proposal: &Block) -> BoxedErrorResult<ValidatorSet> {
        self.validators_at(proposal.number(), proposal.hash()).await
    }

    async fn parent_validators(&self, proposal: &Block) -> BoxedErrorResult<ValidatorSet> {
        let Some(number) = proposal.number().prev() else {
            return self.validators(proposal).await;
        };
        self.validators_at(number, proposal.parent_hash()).await
    }

    async fn gossip(&self, valset: &ValidatorSet, payload: Vec<u8>) {
        let hash = blake3::hash(&payload);
        self.known_messages
            .lock()
            .expect("Locking failed")
            .put(hash, ());

        let me = self.address();
        let peers: Vec<_> = {
            let mut recent = self.recent_messages.lock().expect("Locking failed");
            valset
                .list()
                .iter()
                .copied()
                .filter(|peer| *peer != me)
                .filter(|peer| {
                    let seen = recent.get_or_insert_mut(*peer, || {
                        LruCache::new(NonZeroUsize::new(RECENT_MESSAGES).expect("Can't fail"))
                    });
                    seen.put(hash, ()).is_none()
                })
                .collect()
        };

        for peer in peers {
            let network = self.network.clone();
            let payload = payload.clone();
            tokio::spawn(async move {
                if let Err(err) = network.send(peer, payload).await {
                    debug!(
                        target: LOG_TARGET,
                        peer = %peer.short(),
                        err = %err.fmt_compact(),
                        "Failed to send to peer"
                    );
                }
            });
        }
    }

    async fn commit(&self, proposal: Block, seals: Vec<CommittedSeal>) -> Result<(), BoxedError> {
        let block = proposal.with_committed_seals(seals);
        let number = block.number();
        info!(
            target: LOG_TARGET,
            %number,
            hash = %block.hash().short(),
            seals = block.header.committed_seals.len(),
            "Committing block"
        );

        self.chain.insert(block.clone()).await?;
        self.deliver_seal(&block);

        if let Some(core) = self.core_handle() {
            // Called from the core itself, must not wait on its queue
            tokio::spawn(async move { core.final_committed().await });
        }
        Ok(())
    }

    async fn verify(&self, proposal: &Block) -> ProposalVerifyResult<()> {
        let res = if proposal.is_tx_hash_consistent() {
            self.verify_header(&proposal.header, &[]).await
        } else {
            Err(VerifyError::InvalidTxHash {
                number: proposal.number(),
            })
        };
        match res {
            // Not committed yet, so no seals
            Ok(()) | Err(VerifyError::EmptyCommittedSeals { .. }) => Ok(()),
            Err(VerifyError::FutureBlock { delay }) => Err(ProposalVerifyError::Future { delay }),
            Err(err) => Err(ProposalVerifyError::Invalid {
                source: Box::new(err),
            }),
        }
    }

    async fn last_proposal(&self) -> (Block, Option<Address>) {
        let head = self.chain.head();
        let proposer = (!head.header.is_genesis()).then_some(head.header.proposer);
        (head, proposer)
    }

    async fn has_proposal(&self, hash: BlockHash, number: Sequence) -> bool {
        self.chain.has_block(hash, number).await
    }

    async fn get_proposer(&self, number: Sequence) -> Option<Address> {
        self.chain
            .header_by_number(number)
            .await
            .filter(|h| !h.is_genesis())
            .map(|h| h.proposer)
    }

    async fn submit_bridge_tx(&self, proposal: &Block, hash_signs: Vec<(Address, Signature)>) {
        trace!(target: LOG_TARGET, number = %proposal.number(), signatures = hash_signs.len(), "Dispatching bridge transaction");
        self.bridge.submit(proposal, hash_signs);
    }

    async fn confirm_bridge_tx(&self, proposal: &Block) {
        self.bridge.confirm(proposal).await;
    }
}
