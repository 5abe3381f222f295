use std::fmt;

use bincode::{Decode, Encode};

use crate::block::{BlockHash, TxHash};
use crate::view::Sequence;

/// A value the validators agree on, one per [`Sequence`]
///
/// Consensus only cares about a handful of properties of it, the rest is
/// opaque and only inspected by the `Backend` when verifying.
pub trait Proposal: Clone + fmt::Debug + Encode + Decode<()> + Send + Sync + 'static {
    fn number(&self) -> Sequence;
    fn hash(&self) -> BlockHash;
    fn parent_hash(&self) -> BlockHash;
    /// Hash of the bridge transaction this proposal carries
    fn tx_hash(&self) -> TxHash;
}
