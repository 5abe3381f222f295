use lbft_core::msg::{ConsensusMsg, Message, MessageCode};
use lbft_core::view::Subject;
use snafu::ensure;
use tracing::{debug, trace};

use super::Core;
use crate::LOG_TARGET;
use crate::backend::Backend;
use crate::error::{CoreResult, InconsistentSubjectSnafu};
use crate::round_state::State;

impl<B> Core<B>
where
    B: Backend,
{
    pub(super) async fn handle_prepare(&mut self, msg: &Message, subject: Subject) -> CoreResult<()> {
        self.check_message(MessageCode::Prepare, subject.view)?;
        self.verify_subject(subject)?;

        self.current.prepares.add(msg.clone(), &self.valset)?;

        let quorum = self.quorum_size();
        let prepared = self.current.prepare_or_commit_size();
        trace!(
            target: LOG_TARGET,
            %subject,
            from = %msg.address.short(),
            %prepared,
            %quorum,
            "Accepted prepare"
        );

        let locked_on_it = self.current.locked_hash() == Some(subject.digest);
        if (locked_on_it || quorum <= prepared) && self.state < State::Prepared {
            debug!(target: LOG_TARGET, %subject, "Prepared");
            self.current.lock_hash();
            self.set_state(State::Prepared);
            self.send_commit().await;
        }
        Ok(())
    }

    /// Prepare and Commit must be for exactly what we agree on in this round
    pub(super) fn verify_subject(&self, subject: Subject) -> CoreResult<()> {
        let expected = self.current.subject();
        ensure!(
            expected == Some(subject),
            InconsistentSubjectSnafu {
                expected,
                received: subject,
            }
        );
        Ok(())
    }

    pub(super) async fn send_prepare(&mut self) {
        let Some(subject) = self.current.subject() else {
            return;
        };
        let payload = ConsensusMsg::<B::Proposal>::Prepare(subject).encode_payload();
        self.broadcast(Message::new(MessageCode::Prepare, payload, self.address))
            .await;
    }
}
