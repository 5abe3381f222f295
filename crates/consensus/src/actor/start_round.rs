use lbft_core::proposal::Proposal as _;
use lbft_core::validator_set::ValidatorSet;
use lbft_core::view::{Round, View};
use lbft_util_error::fmt::FmtCompact as _;
use tracing::{debug, info, trace, warn};

use super::{Core, Event, check_message};
use crate::LOG_TARGET;
use crate::backend::Backend;
use crate::round_change_set::RoundChangeSet;
use crate::round_state::{RoundState, State};

impl<B> Core<B>
where
    B: Backend,
{
    /// Move to `round` of the current sequence, or to the next sequence if
    /// the backend committed the current one
    pub(super) async fn start_new_round(&mut self, round: Round) {
        let (last_proposal, last_proposer) = self.backend.last_proposal().await;
        let last_number = last_proposal.number();
        let current = self.current.view();

        let round_change = if current.sequence <= last_number {
            trace!(
                target: LOG_TARGET,
                %last_number,
                %current,
                "Catching up to the latest proposal"
            );
            false
        } else if last_number.next() == Some(current.sequence) {
            if round == Round::ZERO {
                // Already at this sequence and round
                return;
            }
            if round < current.round {
                warn!(
                    target: LOG_TARGET,
                    %round,
                    %current,
                    "New round should not be smaller than the current one"
                );
                return;
            }
            true
        } else {
            warn!(
                target: LOG_TARGET,
                %last_number,
                %current,
                "New sequence should be larger than the current one"
            );
            return;
        };

        let view = if round_change {
            View::new(current.sequence, round)
        } else {
            View::new(last_number.next_expect(), Round::ZERO)
        };
        if !round_change || self.valset.is_empty() {
            self.load_validators(&last_proposal).await;
        }

        if round_change {
            self.round_change_set.clear(round);
        } else {
            self.round_change_set = RoundChangeSet::default();
        }
        self.update_round_state(view, round_change);
        self.valset.calc_proposer(last_proposer, view.round);
        self.waiting_for_round_change = false;

        info!(
            target: LOG_TARGET,
            %view,
            proposer = ?self.valset.proposer(),
            is_proposer = %self.is_proposer(),
            validators = %self.valset.len(),
            "Starting new round"
        );

        // On a fresh sequence there is nothing to time out on until there
        // is some work, see `ensure_round_change_timer`. Without validators
        // the timeout is what retries loading them.
        if round_change || self.valset.is_empty() {
            self.new_round_change_timer();
        } else {
            self.round_change_timer.stop();
        }

        self.set_state(State::AcceptRequest);

        if round_change && self.is_proposer() {
            let proposal = if self.current.is_hash_locked() {
                self.current.proposal().cloned()
            } else {
                self.current.pending_request.clone()
            };
            if let Some(proposal) = proposal {
                self.send_preprepare(&proposal).await;
            }
        }
    }

    /// Load the validators of the current sequence
    ///
    /// On failure the set is left empty, so no message gets accepted until
    /// [`Self::handle_timeout`] manages to load it.
    pub(super) async fn load_validators(&mut self, last_proposal: &B::Proposal) -> bool {
        match self.backend.validators(last_proposal).await {
            Ok(valset) => {
                self.valset = valset;
                true
            }
            Err(err) => {
                warn!(
                    target: LOG_TARGET,
                    number = %last_proposal.number(),
                    err = %err.fmt_compact(),
                    "Failed to load validators"
                );
                self.valset = ValidatorSet::new([], self.config.proposer_policy);
                false
            }
        }
    }

    /// Replace the round state, carrying the lock over on a round change
    fn update_round_state(&mut self, view: View, round_change: bool) {
        let prev = std::mem::replace(&mut self.current, RoundState::new(view));
        if round_change {
            self.current = prev.next_round(view.round);
        }
    }

    /// Jump to `view` and wait there for the round change to complete
    pub(super) fn catch_up_round(&mut self, view: View) {
        debug!(target: LOG_TARGET, %view, "Catching up round");
        self.waiting_for_round_change = true;
        self.update_round_state(view, true);
        self.round_change_set.clear(view.round);
        self.new_round_change_timer();
    }

    pub(super) fn set_state(&mut self, state: State) {
        if self.state != state {
            debug!(
                target: LOG_TARGET,
                view = %self.current.view(),
                from = ?self.state,
                to = ?state,
                "State transition"
            );
            if self.state < state && matches!(state, State::Preprepared | State::Prepared) {
                self.new_round_change_timer();
            }
            self.state = state;
        }
        if state == State::AcceptRequest {
            self.process_pending_requests();
        }
        self.process_backlog();
    }

    fn process_pending_requests(&mut self) {
        if let Some(proposal) = self.pending_requests.take(self.current.sequence()) {
            self.internal.push_back(Event::Request(proposal));
        }
    }

    /// Queue every buffered message we can now handle
    fn process_backlog(&mut self) {
        if self.valset.is_empty() {
            // Would drop every sender
            return;
        }
        let current = self.current.view();
        let state = self.state;
        let waiting = self.waiting_for_round_change;

        let ready = self.backlog.drain_ready(&self.valset, |code, view| {
            check_message::check_message(code, view, current, state, waiting)
        });

        for msg in ready {
            trace!(target: LOG_TARGET, code = %msg.code, from = %msg.address.short(), "Replaying backlog");
            self.internal.push_back(Event::Backlog(msg));
        }
    }

    /// Arm the round change timer for the current view
    pub(super) fn new_round_change_timer(&mut self) {
        let view = self.current.view();
        let timeout = self.config.round_change_timeout(view.round);
        let tx = self.events_tx.clone();

        self.round_change_timer.arm(timeout, async move {
            let _ = tx.send(Event::Timeout { view }).await;
        });
    }

    /// Arm the round change timer, unless it already runs
    ///
    /// On a new sequence the timer only starts once there is something to
    /// agree on, so an idle bridge does not keep changing rounds.
    pub(super) fn ensure_round_change_timer(&mut self) {
        if !self.round_change_timer.is_armed() {
            self.new_round_change_timer();
        }
    }

    pub(super) async fn handle_final_committed(&mut self) {
        trace!(target: LOG_TARGET, "Received final committed");
        self.start_new_round(Round::ZERO).await;
    }
}
