use lbft_core::block::BlockHash;
use lbft_core::msg::Preprepare;
use lbft_core::proposal::Proposal;
use lbft_core::view::{Round, Sequence, Subject, View};

use crate::message_set::MessageSet;

/// Phase of the current round, only ever advancing within a round
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum State {
    AcceptRequest,
    Preprepared,
    Prepared,
    Committed,
}

/// Working state of a single `(sequence, round)`
#[derive(Debug)]
pub struct RoundState<P> {
    view: View,
    /// Accepted proposal, or the locked one carried over from an earlier
    /// round (with its original view)
    preprepare: Option<Preprepare<P>>,
    pub(crate) prepares: MessageSet,
    pub(crate) commits: MessageSet,
    pub(crate) pending_request: Option<P>,
    locked_hash: Option<BlockHash>,
}

impl<P> RoundState<P>
where
    P: Proposal,
{
    pub fn new(view: View) -> Self {
        Self {
            view,
            preprepare: None,
            prepares: MessageSet::default(),
            commits: MessageSet::default(),
            pending_request: None,
            locked_hash: None,
        }
    }

    /// State for a later round of the same sequence
    ///
    /// A hash lock, and the proposal it locks, survive the round change,
    /// so we never vote against a block we already locked on.
    pub fn next_round(self, round: Round) -> Self {
        let view = View::new(self.view.sequence, round);
        let (preprepare, locked_hash) = match self.locked_hash {
            Some(hash) => (self.preprepare, Some(hash)),
            None => (None, None),
        };
        Self {
            view,
            preprepare,
            prepares: MessageSet::default(),
            commits: MessageSet::default(),
            pending_request: self.pending_request,
            locked_hash,
        }
    }

    pub fn view(&self) -> View {
        self.view
    }

    pub fn sequence(&self) -> Sequence {
        self.view.sequence
    }

    pub fn round(&self) -> Round {
        self.view.round
    }

    pub fn set_preprepare(&mut self, preprepare: Preprepare<P>) {
        self.preprepare = Some(preprepare);
    }

    pub fn proposal(&self) -> Option<&P> {
        self.preprepare.as_ref().map(|p| &p.proposal)
    }

    /// What we are agreeing on in this round, once we have a proposal
    pub fn subject(&self) -> Option<Subject> {
        self.proposal().map(|proposal| Subject {
            view: self.view,
            digest: proposal.hash(),
        })
    }

    /// Lock on the current proposal, if any
    pub fn lock_hash(&mut self) {
        if let Some(proposal) = self.proposal() {
            self.locked_hash = Some(proposal.hash());
        }
    }

    pub fn unlock_hash(&mut self) {
        self.locked_hash = None;
    }

    pub fn is_hash_locked(&self) -> bool {
        self.locked_hash.is_some()
    }

    pub fn locked_hash(&self) -> Option<BlockHash> {
        self.locked_hash
    }

    /// Distinct validators that sent either a Prepare or a Commit
    pub fn prepare_or_commit_size(&self) -> usize {
        self.prepares.size()
            + self
                .commits
                .senders()
                .filter(|address| !self.prepares.contains(*address))
                .count()
    }
}
