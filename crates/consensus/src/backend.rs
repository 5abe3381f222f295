use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lbft_core::Signature;
use lbft_core::address::Address;
use lbft_core::block::{BlockHash, CommittedSeal};
use lbft_core::proposal::Proposal;
use lbft_core::signed::{Signer, Verifier};
use lbft_core::validator_set::ValidatorSet;
use lbft_core::view::Sequence;
use lbft_util_error::BoxedError;
use snafu::Snafu;

#[derive(Debug, Snafu)]
pub enum ProposalVerifyError {
    /// Valid, but too early to accept it
    #[snafu(display("Proposal is from the future by {delay:?}"))]
    Future { delay: Duration },
    #[snafu(display("Invalid proposal"))]
    Invalid { source: BoxedError },
}

pub type ProposalVerifyResult<T> = Result<T, ProposalVerifyError>;

/// Everything [`crate::Core`] needs from the node it runs in
///
/// Calls are made from the consensus actor, one at a time, so all of them
/// are expected to return quickly. Slow work (sending to a peer, submitting
/// to a destination chain) must be spawned off by the implementation.
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    type Proposal: Proposal;

    /// Address of the local validator
    fn address(&self) -> Address;

    fn signer(&self) -> Arc<dyn Signer>;

    fn verifier(&self) -> Arc<dyn Verifier>;

    /// Validators that agree on the block after `proposal`
    async fn validators(&self, proposal: &Self::Proposal) -> Result<ValidatorSet, BoxedError>;

    /// Validators that agreed on `proposal` itself
    async fn parent_validators(
        &self,
        proposal: &Self::Proposal,
    ) -> Result<ValidatorSet, BoxedError>;

    /// Send `payload` to every validator in `valset` but ourselves
    async fn gossip(&self, valset: &ValidatorSet, payload: Vec<u8>);

    /// Persist a block agreed on, together with its committed seals
    ///
    /// Once the block becomes the chain head, the backend notifies the core
    /// with [`crate::CoreHandle::final_committed`].
    async fn commit(
        &self,
        proposal: Self::Proposal,
        seals: Vec<CommittedSeal>,
    ) -> Result<(), BoxedError>;

    async fn verify(&self, proposal: &Self::Proposal) -> ProposalVerifyResult<()>;

    /// Head of the local chain and the address that proposed it
    async fn last_proposal(&self) -> (Self::Proposal, Option<Address>);

    async fn has_proposal(&self, hash: BlockHash, number: Sequence) -> bool;

    async fn get_proposer(&self, number: Sequence) -> Option<Address>;

    /// Assemble and submit the bridge transaction of `proposal`
    ///
    /// Only called on the proposer, with the bridge transaction signatures
    /// of every validator that committed.
    async fn submit_bridge_tx(
        &self,
        proposal: &Self::Proposal,
        hash_signs: Vec<(Address, Signature)>,
    );

    /// Mark the bridge transaction of `proposal` as agreed on
    ///
    /// Called on every validator other than the proposer.
    async fn confirm_bridge_tx(&self, proposal: &Self::Proposal);
}
