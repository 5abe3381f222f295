use std::fmt;

use bincode::{Decode, Encode};
use lbft_util_array_type::{array_type_fixed_size_define, array_type_fixed_size_impl_serde};

use crate::block::BlockHash;

array_type_fixed_size_define! {
    /// Height of the block being agreed on
    #[derive(Encode, Decode, Clone, Copy, Hash)]
    pub struct Sequence(u64);
}
array_type_fixed_size_impl_serde!(Sequence);

array_type_fixed_size_define! {
    /// Agreement attempt within a single [`Sequence`]
    #[derive(Encode, Decode, Clone, Copy, Hash)]
    pub struct Round(u64);
}
array_type_fixed_size_impl_serde!(Round);

/// One agreement attempt
///
/// Ordered by `(sequence, round)`.
#[derive(Encode, Decode, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default)]
pub struct View {
    pub sequence: Sequence,
    pub round: Round,
}

impl View {
    pub fn new(sequence: Sequence, round: Round) -> Self {
        Self { sequence, round }
    }
}

impl From<(u64, u64)> for View {
    fn from((sequence, round): (u64, u64)) -> Self {
        Self::new(sequence.into(), round.into())
    }
}

impl fmt::Display for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.sequence, self.round)
    }
}

/// "I am at this view, agreeing on this block hash"
///
/// Payload of Prepare, Commit and RoundChange messages.
#[derive(Encode, Decode, Clone, Copy, PartialEq, Eq, Debug)]
pub struct Subject {
    pub view: View,
    pub digest: BlockHash,
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.digest.short(), self.view)
    }
}

#[test]
fn view_ordering() {
    assert!(View::from((1, 5)) < View::from((2, 0)));
    assert!(View::from((2, 0)) < View::from((2, 1)));
    assert_eq!(View::from((3, 3)), View::new(3.into(), 3.into()));
}
