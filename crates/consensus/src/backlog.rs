use std::collections::BTreeMap;

use lbft_core::address::Address;
use lbft_core::msg::{Message, MessageCode};
use lbft_core::proposal::Proposal;
use lbft_core::validator_set::ValidatorSet;
use lbft_core::view::{Sequence, View};

use crate::error::{CoreError, CoreResult};

/// Messages kept per sender before the furthest-future ones get evicted
const MAX_BACKLOG_PER_SENDER: usize = 1024;

/// Lower goes first
///
/// Commits go before Prepares, so once enough peers locked we can
/// commit without waiting for the Prepare quorum.
fn phase_priority(code: MessageCode) -> u8 {
    match code {
        MessageCode::RoundChange => 0,
        MessageCode::Preprepare => 1,
        MessageCode::Commit => 2,
        MessageCode::Prepare => 3,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct BacklogKey {
    view: View,
    priority: u8,
    /// Arrival order, to keep distinct messages with the same key
    n: u64,
}

/// Future messages, per sender, waiting for us to reach their view
#[derive(Debug, Default)]
pub struct Backlog {
    by_sender: BTreeMap<Address, BTreeMap<BacklogKey, Message>>,
    next_n: u64,
}

impl Backlog {
    pub fn push(&mut self, view: View, msg: Message) {
        let key = BacklogKey {
            view,
            priority: phase_priority(msg.code),
            n: self.next_n,
        };
        self.next_n += 1;

        let queue = self.by_sender.entry(msg.address).or_default();
        queue.insert(key, msg);
        if MAX_BACKLOG_PER_SENDER < queue.len() {
            queue.pop_last();
        }
    }

    pub fn len(&self) -> usize {
        self.by_sender.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_sender.is_empty()
    }

    /// Remove and return every message `check` no longer considers future
    ///
    /// Messages from senders no longer in `valset`, and ones `check` rejects
    /// for any other reason, are dropped. The whole queue is checked, as a
    /// RoundChange for a later round can be ready while a Prepare for an
    /// earlier one is still waiting for its Preprepare.
    pub fn drain_ready(
        &mut self,
        valset: &ValidatorSet,
        mut check: impl FnMut(MessageCode, View) -> CoreResult<()>,
    ) -> Vec<Message> {
        self.by_sender.retain(|address, _| valset.contains(*address));

        let mut ready = vec![];
        for queue in self.by_sender.values_mut() {
            let done: Vec<_> = queue
                .iter()
                .filter_map(|(key, msg)| match check(msg.code, key.view) {
                    Err(CoreError::FutureMessage) => None,
                    res => Some((*key, res.is_ok())),
                })
                .collect();

            for (key, is_ready) in done {
                if let Some(msg) = queue.remove(&key) {
                    if is_ready {
                        ready.push(msg);
                    }
                }
            }
        }
        self.by_sender.retain(|_, queue| !queue.is_empty());

        ready
    }
}

/// Local requests to propose, for sequences we have not reached yet
#[derive(Debug)]
pub struct PendingRequests<P> {
    requests: BTreeMap<Sequence, P>,
}

impl<P> Default for PendingRequests<P> {
    fn default() -> Self {
        Self {
            requests: BTreeMap::new(),
        }
    }
}

impl<P> PendingRequests<P>
where
    P: Proposal,
{
    pub fn push(&mut self, proposal: P) {
        self.requests.insert(proposal.number(), proposal);
    }

    /// Take the request for `sequence`, dropping any older ones
    pub fn take(&mut self, sequence: Sequence) -> Option<P> {
        self.requests = self.requests.split_off(&sequence);
        self.requests.remove(&sequence)
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}

#[cfg(test)]
mod tests;
