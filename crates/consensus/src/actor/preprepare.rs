use lbft_core::msg::{Message, MessageCode, Preprepare};
use lbft_core::proposal::Proposal as _;
use lbft_core::view::Subject;
use lbft_util_error::fmt::FmtCompact as _;
use snafu::ensure;
use tracing::{debug, instrument};

use super::{Core, Event};
use crate::LOG_TARGET;
use crate::backend::{Backend, ProposalVerifyError};
use crate::error::{
    CoreError, CoreResult, FutureProposalSnafu, InvalidMessageSnafu, LockedProposalSnafu,
    NotFromProposerSnafu,
};
use crate::round_state::State;

impl<B> Core<B>
where
    B: Backend,
{
    #[instrument(
        target = LOG_TARGET,
        name = "preprepare",
        skip_all,
        fields(view = %preprepare.view, from = %msg.address.short())
    )]
    pub(super) async fn handle_preprepare(
        &mut self,
        msg: &Message,
        preprepare: Preprepare<B::Proposal>,
    ) -> CoreResult<()> {
        let view = preprepare.view;
        ensure!(
            preprepare.proposal.number() == view.sequence,
            InvalidMessageSnafu {
                reason: "proposal number does not match view"
            }
        );

        if let Err(err) = self.check_message(MessageCode::Preprepare, view) {
            if let CoreError::OldMessage = err {
                if self.is_committed_old_proposal(msg, &preprepare).await {
                    let subject = Subject {
                        view,
                        digest: preprepare.proposal.hash(),
                    };
                    debug!(target: LOG_TARGET, %subject, "Sending commit for an old block");
                    self.broadcast_commit(subject, preprepare.proposal.tx_hash())
                        .await;
                    return Ok(());
                }
            }
            return Err(err);
        }

        ensure!(
            self.valset.is_proposer(msg.address),
            NotFromProposerSnafu {
                address: msg.address,
                view,
            }
        );

        match self.backend.verify(&preprepare.proposal).await {
            Ok(()) => {}
            Err(ProposalVerifyError::Future { delay }) => {
                let tx = self.events_tx.clone();
                let msg = msg.clone();
                self.future_preprepare_timer.arm(delay, async move {
                    let _ = tx.send(Event::FuturePreprepare(msg)).await;
                });
                return FutureProposalSnafu { delay }.fail();
            }
            Err(ProposalVerifyError::Invalid { source }) => {
                self.send_next_round_change().await;
                return Err(CoreError::InvalidProposal { source });
            }
        }

        if self.state != State::AcceptRequest {
            return Ok(());
        }

        let proposed = preprepare.proposal.hash();
        match self.current.locked_hash() {
            Some(locked) if locked == proposed => {
                // Already locked on it in an earlier round, straight to commit
                self.accept_preprepare(preprepare);
                self.set_state(State::Prepared);
                self.send_commit().await;
            }
            Some(locked) => {
                self.send_next_round_change().await;
                return LockedProposalSnafu { locked, proposed }.fail();
            }
            None => {
                self.accept_preprepare(preprepare);
                self.set_state(State::Preprepared);
                self.send_prepare().await;
            }
        }
        Ok(())
    }

    /// Is this a preprepare for a block we already have, from whoever was
    /// its proposer
    ///
    /// Lets a peer that fell behind collect our commit for it.
    async fn is_committed_old_proposal(
        &self,
        msg: &Message,
        preprepare: &Preprepare<B::Proposal>,
    ) -> bool {
        let proposal = &preprepare.proposal;
        let mut valset = match self.backend.parent_validators(proposal).await {
            Ok(valset) => valset,
            Err(err) => {
                debug!(
                    target: LOG_TARGET,
                    number = %proposal.number(),
                    err = %err.fmt_compact(),
                    "No validators for old proposal"
                );
                return false;
            }
        };
        let prev_proposer = match proposal.number().prev() {
            Some(prev) => self.backend.get_proposer(prev).await,
            None => None,
        };
        valset.calc_proposer(prev_proposer, preprepare.view.round);

        valset.is_proposer(msg.address)
            && self
                .backend
                .has_proposal(proposal.hash(), proposal.number())
                .await
    }

    fn accept_preprepare(&mut self, preprepare: Preprepare<B::Proposal>) {
        self.current.set_preprepare(preprepare);
    }
}
