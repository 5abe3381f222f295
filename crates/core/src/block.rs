use bincode::{Decode, Encode};
use lbft_util_array_type::{
    array_type_define, array_type_impl_debug_as_display, array_type_impl_hex_str,
    array_type_impl_serde, array_type_impl_short, array_type_impl_zero_default,
};

use crate::Signature;
use crate::address::Address;
use crate::proposal::Proposal;
use crate::signed::{Hashable, InvalidSignatureResult, Signable, Signer, Verifier};
use crate::timestamp::Timestamp;
use crate::view::Sequence;

array_type_define! {
    #[derive(Encode, Decode, Copy, Clone, Hash)]
    pub struct BlockHash[32];
}
array_type_impl_zero_default!(BlockHash);
array_type_impl_hex_str!(BlockHash);
array_type_impl_serde!(BlockHash);
array_type_impl_debug_as_display!(BlockHash);
array_type_impl_short!(BlockHash);

impl From<blake3::Hash> for BlockHash {
    fn from(value: blake3::Hash) -> Self {
        Self(*value.as_bytes())
    }
}

array_type_define! {
    /// Hash identifying a bridge transaction
    ///
    /// Used both for the batch of transfers a block carries, and for the
    /// source-chain transaction a single transfer relays.
    #[derive(Encode, Decode, Copy, Clone, Hash)]
    pub struct TxHash[32];
}
array_type_impl_zero_default!(TxHash);
array_type_impl_hex_str!(TxHash);
array_type_impl_serde!(TxHash);
array_type_impl_debug_as_display!(TxHash);
array_type_impl_short!(TxHash);

impl From<blake3::Hash> for TxHash {
    fn from(value: blake3::Hash) -> Self {
        Self(*value.as_bytes())
    }
}

impl TxHash {
    pub fn of_transfers(transfers: &[BridgeTransfer]) -> Self {
        TransfersRef(transfers).hash().into()
    }
}

#[derive(Encode)]
struct TransfersRef<'a>(&'a [BridgeTransfer]);
impl Hashable for TransfersRef<'_> {}

/// Asset transfer observed on a source chain, to be relayed to a destination
/// chain
#[derive(Encode, Decode, Clone, Debug, PartialEq, Eq)]
pub struct BridgeTransfer {
    pub source_chain: u32,
    pub dest_chain: u32,
    /// Lock event transaction on the source chain
    pub source_tx: TxHash,
    pub recipient: Vec<u8>,
    pub amount: u128,
}

/// Ballot for adding or removing a validator, cast by the block proposer
#[derive(Encode, Decode, Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeaderVote {
    pub candidate: Address,
    pub authorize: bool,
}

#[derive(Encode, Decode, Clone, Copy, Debug, PartialEq, Eq)]
pub struct CommittedSeal {
    pub validator: Address,
    pub sig: Signature,
}

#[derive(Debug, Encode, Decode, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    pub number: Sequence,
    pub parent_hash: BlockHash,
    /// Commits to the [`BridgeTransfer`]s of the block
    pub tx_hash: TxHash,
    pub timestamp: Timestamp,
    pub proposer: Address,
    pub vote: Option<HeaderVote>,
    /// Full validator list, only set on checkpoint blocks
    pub validators: Vec<Address>,
    /// Proposer's signature over [`BlockHeader::seal_hash`]
    pub seal: Signature,
    /// Signatures of the validators that committed this block
    ///
    /// Not covered by [`BlockHeader::hash`], as they are only known after
    /// agreement.
    pub committed_seals: Vec<CommittedSeal>,
}

/// Everything the proposer signs
#[derive(Encode)]
struct SealFields<'a> {
    number: Sequence,
    parent_hash: BlockHash,
    tx_hash: TxHash,
    timestamp: Timestamp,
    proposer: Address,
    vote: Option<HeaderVote>,
    validators: &'a [Address],
}

impl Hashable for SealFields<'_> {}
impl Signable for SealFields<'_> {
    const TAG: [u8; 4] = *b"seal";
}

#[derive(Encode)]
struct HashFields<'a> {
    fields: SealFields<'a>,
    seal: Signature,
}

impl Hashable for HashFields<'_> {}

/// What a validator signs when committing to a block
#[derive(Encode, Decode, Clone, Copy, Debug)]
pub struct CommitSealPayload(pub BlockHash);

impl Hashable for CommitSealPayload {}
impl Signable for CommitSealPayload {
    const TAG: [u8; 4] = *b"cmsl";
}

/// What a validator signs to authorize the bridge transaction of a block
///
/// Collected from Commit messages by the proposer, and attached to the
/// transaction submitted to the destination chain.
#[derive(Encode, Decode, Clone, Copy, Debug)]
pub struct BridgeTxSignPayload(pub TxHash);

impl Hashable for BridgeTxSignPayload {}
impl Signable for BridgeTxSignPayload {
    const TAG: [u8; 4] = *b"hsgn";
}

impl BlockHeader {
    pub fn genesis(validators: Vec<Address>, timestamp: Timestamp) -> Self {
        let mut validators = validators;
        validators.sort_unstable();
        validators.dedup();
        Self {
            number: Sequence::ZERO,
            parent_hash: BlockHash::ZERO,
            tx_hash: TxHash::of_transfers(&[]),
            timestamp,
            proposer: Address::ZERO,
            vote: None,
            validators,
            seal: Signature::ZERO,
            committed_seals: vec![],
        }
    }

    fn seal_fields(&self) -> SealFields<'_> {
        SealFields {
            number: self.number,
            parent_hash: self.parent_hash,
            tx_hash: self.tx_hash,
            timestamp: self.timestamp,
            proposer: self.proposer,
            vote: self.vote,
            validators: &self.validators,
        }
    }

    pub fn hash(&self) -> BlockHash {
        HashFields {
            fields: self.seal_fields(),
            seal: self.seal,
        }
        .hash()
        .into()
    }

    /// Hash the proposer signs, excluding all signatures
    pub fn seal_hash(&self) -> blake3::Hash {
        self.seal_fields().sign_hash()
    }

    /// Set `proposer` to the signer and sign the header
    pub fn sign_seal(&mut self, signer: &(impl Signer + ?Sized)) {
        self.proposer = signer.address();
        self.seal = self.seal_fields().sign_with(signer);
    }

    /// Verify the seal and return the address that produced it
    pub fn recover_signer(&self, verifier: &(impl Verifier + ?Sized)) -> InvalidSignatureResult<Address> {
        self.seal_fields()
            .verify_signature(verifier, self.proposer, self.seal)?;
        Ok(self.proposer)
    }

    pub fn is_genesis(&self) -> bool {
        self.number == Sequence::ZERO
    }
}

#[derive(Debug, Encode, Decode, Clone, PartialEq, Eq)]
pub struct Block {
    pub header: BlockHeader,
    pub transfers: Vec<BridgeTransfer>,
}

#[bon::bon]
impl Block {
    /// New unsealed block extending `parent`
    #[builder]
    pub fn new(
        parent: &BlockHeader,
        #[builder(default)] transfers: Vec<BridgeTransfer>,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            header: BlockHeader {
                number: parent.number.next_expect(),
                parent_hash: parent.hash(),
                tx_hash: TxHash::of_transfers(&transfers),
                timestamp,
                proposer: Address::ZERO,
                vote: None,
                validators: vec![],
                seal: Signature::ZERO,
                committed_seals: vec![],
            },
            transfers,
        }
    }
}

impl Block {
    pub fn genesis(header: BlockHeader) -> Self {
        Self {
            header,
            transfers: vec![],
        }
    }

    /// Does the header commit to the transfers in the body
    pub fn is_tx_hash_consistent(&self) -> bool {
        TxHash::of_transfers(&self.transfers) == self.header.tx_hash
    }

    pub fn with_committed_seals(mut self, seals: Vec<CommittedSeal>) -> Self {
        self.header.committed_seals = seals;
        self
    }
}

impl Proposal for Block {
    fn number(&self) -> Sequence {
        self.header.number
    }

    fn hash(&self) -> BlockHash {
        self.header.hash()
    }

    fn parent_hash(&self) -> BlockHash {
        self.header.parent_hash
    }

    fn tx_hash(&self) -> TxHash {
        self.header.tx_hash
    }
}
