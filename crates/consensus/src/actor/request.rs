use lbft_core::msg::{ConsensusMsg, Message, MessageCode, Preprepare};
use lbft_core::proposal::Proposal as _;
use tracing::{debug, trace};

use super::Core;
use crate::LOG_TARGET;
use crate::backend::Backend;
use crate::round_state::State;

impl<B> Core<B>
where
    B: Backend,
{
    pub(super) async fn handle_request(&mut self, proposal: B::Proposal) {
        let number = proposal.number();
        let sequence = self.current.sequence();

        if sequence < number {
            trace!(target: LOG_TARGET, %number, %sequence, "Storing future request");
            self.pending_requests.push(proposal);
            return;
        }
        if number < sequence {
            debug!(target: LOG_TARGET, %number, %sequence, "Dropping stale request");
            return;
        }

        trace!(
            target: LOG_TARGET,
            %number,
            hash = %proposal.hash().short(),
            "Handling request"
        );
        self.current.pending_request = Some(proposal.clone());
        self.ensure_round_change_timer();

        if self.state == State::AcceptRequest {
            self.send_preprepare(&proposal).await;
        }
    }

    /// Propose `proposal` for the current view, if we are its proposer
    pub(super) async fn send_preprepare(&mut self, proposal: &B::Proposal) {
        if self.current.sequence() != proposal.number() || !self.is_proposer() {
            return;
        }
        let view = self.current.view();
        debug!(
            target: LOG_TARGET,
            %view,
            hash = %proposal.hash().short(),
            "Sending preprepare"
        );
        let payload = ConsensusMsg::Preprepare(Preprepare {
            view,
            proposal: proposal.clone(),
        })
        .encode_payload();

        self.broadcast(Message::new(MessageCode::Preprepare, payload, self.address))
            .await;
    }
}
