use lbft_core::address::Address;
use lbft_core::block::BlockHash;
use lbft_core::view::Sequence;
use lbft_db::error::DbError;
use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SnapshotError {
    #[snafu(display("Non-contiguous headers: expected {expected}, got {received}"))]
    InvalidVotingChain {
        expected: Sequence,
        received: Sequence,
    },
    #[snafu(display("Block {number} signed by non-validator {signer}"))]
    UnauthorizedSigner { signer: Address, number: Sequence },
    #[snafu(display("Invalid seal on block {number}"))]
    InvalidSeal { number: Sequence },
    #[snafu(display("Missing header {number} {hash}"))]
    MissingHeader { hash: BlockHash, number: Sequence },
    #[snafu(transparent)]
    Db { source: DbError },
}

pub type SnapshotResult<T> = std::result::Result<T, SnapshotError>;
