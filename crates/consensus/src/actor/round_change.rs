use lbft_core::block::BlockHash;
use lbft_core::msg::{ConsensusMsg, Message, MessageCode};
use lbft_core::proposal::Proposal as _;
use lbft_core::view::{Round, Subject, View};
use tracing::{debug, info, warn};

use super::Core;
use crate::LOG_TARGET;
use crate::backend::Backend;
use crate::error::{CoreError, CoreResult};

impl<B> Core<B>
where
    B: Backend,
{
    pub(super) async fn handle_round_change(
        &mut self,
        msg: &Message,
        subject: Subject,
    ) -> CoreResult<()> {
        self.check_message(MessageCode::RoundChange, subject.view)?;

        let current = self.current.view();
        let round = subject.view.round;
        let num = self
            .round_change_set
            .add(round, msg.clone(), &self.valset)?;

        debug!(
            target: LOG_TARGET,
            %round,
            from = %msg.address.short(),
            %num,
            "Accepted round change"
        );

        // Peers are changing rounds, so make sure we eventually join them
        self.ensure_round_change_timer();

        if self.quorum_size() <= num && (self.waiting_for_round_change || current.round < round) {
            info!(target: LOG_TARGET, %round, %num, "Round change quorum");
            self.start_new_round(round).await;
            return Ok(());
        }

        if self.waiting_for_round_change {
            // Weak certificate: at least one honest validator is already there
            if let Some(max_round) = self.round_change_set.max_round(self.valset.f() + 1) {
                if current.round < max_round {
                    self.send_round_change(max_round).await;
                }
            }
            return Ok(());
        }

        if current.round < round {
            // Only relay round changes for the round we are at
            return Err(CoreError::Ignored);
        }
        Ok(())
    }

    pub(super) async fn handle_timeout(&mut self) {
        debug!(target: LOG_TARGET, view = %self.current.view(), "Round change timeout");

        if self.valset.is_empty() {
            self.retry_load_validators().await;
            return;
        }

        if !self.waiting_for_round_change {
            if let Some(max_round) = self.round_change_set.max_round(self.valset.f() + 1) {
                if self.current.round() < max_round {
                    self.send_round_change(max_round).await;
                    return;
                }
            }
        }

        let (last_proposal, _) = self.backend.last_proposal().await;
        if self.current.sequence() <= last_proposal.number() {
            debug!(
                target: LOG_TARGET,
                number = %last_proposal.number(),
                "Round change timeout, catching up latest sequence"
            );
            self.start_new_round(Round::ZERO).await;
        } else {
            self.send_next_round_change().await;
        }
    }

    /// Second attempt at the validators of a round we could not start
    /// properly, joining the next round once they are known
    async fn retry_load_validators(&mut self) {
        let (last_proposal, last_proposer) = self.backend.last_proposal().await;
        if self.current.sequence() <= last_proposal.number() {
            self.start_new_round(Round::ZERO).await;
            return;
        }
        if !self.load_validators(&last_proposal).await {
            self.new_round_change_timer();
            return;
        }
        info!(
            target: LOG_TARGET,
            view = %self.current.view(),
            validators = %self.valset.len(),
            "Loaded validators"
        );
        self.valset
            .calc_proposer(last_proposer, self.current.round());
        // Whatever happened in this round without us is lost
        self.send_next_round_change().await;
    }

    pub(super) async fn send_next_round_change(&mut self) {
        let next = self.current.round().next_expect();
        self.send_round_change(next).await;
    }

    /// Move to `round` and ask everyone to do the same
    pub(super) async fn send_round_change(&mut self, round: Round) {
        let current = self.current.view();
        if round <= current.round {
            warn!(
                target: LOG_TARGET,
                %current,
                %round,
                "Can't send round change for a round we already passed"
            );
            return;
        }

        let view = View::new(current.sequence, round);
        self.catch_up_round(view);

        info!(target: LOG_TARGET, %view, "Sending round change");
        let payload = ConsensusMsg::<B::Proposal>::RoundChange(Subject {
            view,
            digest: BlockHash::ZERO,
        })
        .encode_payload();
        self.broadcast(Message::new(MessageCode::RoundChange, payload, self.address))
            .await;
    }
}
