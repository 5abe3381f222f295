use std::time::Duration;

use lbft_core::address::Address;
use lbft_core::block::BlockHash;
use lbft_core::msg::MessageDecodeError;
use lbft_core::view::{Subject, View};
use lbft_util_error::BoxedError;
use snafu::Snafu;

/// Broad class of a [`CoreError`], deciding how the caller reacts to it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Not a failure, the message is buffered or dropped
    Sequencing,
    /// Message could not be understood
    Malformed,
    /// Message was not sent by whom it should have been
    Authorization,
    /// Peer sent data contradicting what we agreed on
    Safety,
    /// Our own backend failed
    Local,
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CoreError {
    #[snafu(display("Message for a future view"))]
    FutureMessage,
    #[snafu(display("Message for an old view"))]
    OldMessage,
    #[snafu(display("Message accepted but not relayed"))]
    Ignored,
    #[snafu(display("Invalid message: {reason}"))]
    InvalidMessage { reason: &'static str },
    #[snafu(display("Failed to decode message"))]
    FailedDecode { source: MessageDecodeError },
    #[snafu(display("Sender {address} is not a validator"))]
    UnauthorizedAddress { address: Address },
    #[snafu(display("Invalid message signature from {address}"))]
    InvalidSignature { address: Address },
    #[snafu(display("Preprepare from {address} who is not the proposer of {view}"))]
    NotFromProposer { address: Address, view: View },
    #[snafu(display("Subject {received} does not match ours {expected:?}"))]
    InconsistentSubject {
        expected: Option<Subject>,
        received: Subject,
    },
    #[snafu(display("Locked on {locked}, but {proposed} was proposed"))]
    LockedProposal {
        locked: BlockHash,
        proposed: BlockHash,
    },
    #[snafu(display("Invalid proposal"))]
    InvalidProposal { source: BoxedError },
    #[snafu(display("Proposal is from the future, retrying in {delay:?}"))]
    FutureProposal { delay: Duration },
    #[snafu(display("Backend failed to commit"))]
    Commit { source: BoxedError },
}

pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::FutureMessage | CoreError::OldMessage | CoreError::Ignored => {
                ErrorKind::Sequencing
            }
            CoreError::InvalidMessage { .. } | CoreError::FailedDecode { .. } => {
                ErrorKind::Malformed
            }
            CoreError::UnauthorizedAddress { .. }
            | CoreError::InvalidSignature { .. }
            | CoreError::NotFromProposer { .. } => ErrorKind::Authorization,
            CoreError::InconsistentSubject { .. }
            | CoreError::LockedProposal { .. }
            | CoreError::InvalidProposal { .. } => ErrorKind::Safety,
            CoreError::FutureProposal { .. } => ErrorKind::Sequencing,
            CoreError::Commit { .. } => ErrorKind::Local,
        }
    }
}
