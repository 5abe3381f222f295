use std::collections::BTreeMap;

use lbft_core::msg::Message;
use lbft_core::validator_set::ValidatorSet;
use lbft_core::view::Round;

use crate::error::CoreResult;
use crate::message_set::MessageSet;

/// RoundChange messages of the current sequence, grouped by the round they
/// ask for
#[derive(Debug, Default)]
pub struct RoundChangeSet {
    rounds: BTreeMap<Round, MessageSet>,
}

impl RoundChangeSet {
    /// Add `msg` and return the number of distinct senders asking for `round`
    pub fn add(&mut self, round: Round, msg: Message, valset: &ValidatorSet) -> CoreResult<usize> {
        let set = self.rounds.entry(round).or_default();
        set.add(msg, valset)?;
        Ok(set.size())
    }

    pub fn size(&self, round: Round) -> usize {
        self.rounds.get(&round).map(MessageSet::size).unwrap_or_default()
    }

    /// Highest round requested by at least `n` distinct validators
    pub fn max_round(&self, n: usize) -> Option<Round> {
        self.rounds
            .iter()
            .rev()
            .find(|(_, set)| n <= set.size())
            .map(|(round, _)| *round)
    }

    /// Drop everything for rounds lower than `round`
    pub fn clear(&mut self, round: Round) {
        self.rounds = self.rounds.split_off(&round);
    }
}
