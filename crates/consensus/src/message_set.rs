use std::collections::BTreeMap;

use lbft_core::address::Address;
use lbft_core::msg::Message;
use lbft_core::validator_set::ValidatorSet;

use crate::error::{CoreResult, UnauthorizedAddressSnafu};

/// Messages of one kind for a single view, at most one per validator
///
/// A later message from the same validator replaces the earlier one, so
/// [`MessageSet::size`] is always the number of distinct senders.
#[derive(Debug, Clone, Default)]
pub struct MessageSet {
    messages: BTreeMap<Address, Message>,
}

impl MessageSet {
    pub fn add(&mut self, msg: Message, valset: &ValidatorSet) -> CoreResult<()> {
        if !valset.contains(msg.address) {
            return UnauthorizedAddressSnafu {
                address: msg.address,
            }
            .fail();
        }
        self.messages.insert(msg.address, msg);
        Ok(())
    }

    pub fn size(&self) -> usize {
        self.messages.len()
    }

    pub fn get(&self, address: Address) -> Option<&Message> {
        self.messages.get(&address)
    }

    pub fn contains(&self, address: Address) -> bool {
        self.messages.contains_key(&address)
    }

    pub fn senders(&self) -> impl Iterator<Item = Address> + '_ {
        self.messages.keys().copied()
    }

    pub fn values(&self) -> impl Iterator<Item = &Message> + '_ {
        self.messages.values()
    }
}

#[cfg(test)]
mod tests;
