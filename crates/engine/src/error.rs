use std::time::Duration;

use lbft_consensus::error::CoreError;
use lbft_core::address::Address;
use lbft_core::block::BlockHash;
use lbft_core::view::Sequence;
use lbft_db::error::DbError;
use lbft_snapshot::SnapshotError;
use snafu::Snafu;

/// Why a header or block was rejected
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum VerifyError {
    #[snafu(display("Unknown block {number} {hash}"))]
    UnknownBlock { hash: BlockHash, number: Sequence },
    #[snafu(display("Block is {delay:?} in the future"))]
    FutureBlock { delay: Duration },
    #[snafu(display("Block {number} too early after its parent"))]
    InvalidTimestamp { number: Sequence },
    #[snafu(display("Invalid validator list in block {number}"))]
    InvalidExtra { number: Sequence },
    #[snafu(display("Block {number} not sealed by a validator"))]
    InvalidSigner { number: Sequence },
    #[snafu(display("Invalid committed seals in block {number}"))]
    InvalidCommittedSeals { number: Sequence },
    #[snafu(display("No committed seals in block {number}"))]
    EmptyCommittedSeals { number: Sequence },
    #[snafu(display("Transaction hash does not match transfers in block {number}"))]
    InvalidTxHash { number: Sequence },
    #[snafu(display("Vote not allowed in block {number}"))]
    InvalidVote { number: Sequence },
    #[snafu(transparent)]
    Snapshot { source: SnapshotError },
}

pub type VerifyResult<T> = std::result::Result<T, VerifyError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ChainError {
    #[snafu(display("Block {number} {hash} does not extend the head"))]
    NotExtendingHead { hash: BlockHash, number: Sequence },
    #[snafu(display("Stored genesis does not match"))]
    GenesisMismatch,
    #[snafu(transparent)]
    Db { source: DbError },
}

pub type ChainResult<T> = std::result::Result<T, ChainError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum EngineError {
    #[snafu(transparent)]
    Verify { source: VerifyError },
    #[snafu(display("{address} is not a validator"))]
    Unauthorized { address: Address },
    #[snafu(display("Engine not started"))]
    NotStarted,
    #[snafu(display("Engine already started"))]
    AlreadyStarted,
    #[snafu(display("Invalid consensus message"))]
    Message { source: CoreError },
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum NetworkError {
    #[snafu(display("Unknown peer {peer}"))]
    UnknownPeer { peer: Address },
}
