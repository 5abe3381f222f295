use lbft_core::block::{BridgeTxSignPayload, CommitSealPayload, CommittedSeal, TxHash};
use lbft_core::msg::{ConsensusMsg, Message, MessageCode};
use lbft_core::proposal::Proposal as _;
use lbft_core::signed::Signable as _;
use lbft_core::view::Subject;
use lbft_util_error::fmt::FmtCompact as _;
use snafu::{OptionExt as _, ResultExt as _};
use tracing::{debug, info, trace, warn};

use super::Core;
use crate::LOG_TARGET;
use crate::backend::Backend;
use crate::error::{CommitSnafu, CoreResult, InvalidMessageSnafu, InvalidSignatureSnafu};
use crate::round_state::State;

impl<B> Core<B>
where
    B: Backend,
{
    pub(super) async fn handle_commit(&mut self, msg: &Message, subject: Subject) -> CoreResult<()> {
        self.check_message(MessageCode::Commit, subject.view)?;
        self.verify_subject(subject)?;
        let proposal = self
            .current
            .proposal()
            .cloned()
            .expect("Verified subject implies a proposal");
        self.verify_commit_signatures(msg, subject, proposal.tx_hash())?;

        self.current.commits.add(msg.clone(), &self.valset)?;

        let quorum = self.quorum_size();
        let committed = self.current.commits.size();
        trace!(
            target: LOG_TARGET,
            %subject,
            from = %msg.address.short(),
            %committed,
            %quorum,
            "Accepted commit"
        );

        if quorum <= committed && self.state < State::Committed {
            if self.is_proposer() {
                let hash_signs = self
                    .current
                    .commits
                    .values()
                    .filter_map(|m| m.hash_sign.map(|sig| (m.address, sig)))
                    .collect();
                self.backend.submit_bridge_tx(&proposal, hash_signs).await;
            } else {
                self.backend.confirm_bridge_tx(&proposal).await;
            }

            // Might have skipped the Prepared state
            self.current.lock_hash();
            self.commit().await?;
        }
        Ok(())
    }

    /// Committed seal and bridge signature must be from the sender, and over
    /// what we are agreeing on
    fn verify_commit_signatures(
        &self,
        msg: &Message,
        subject: Subject,
        tx_hash: TxHash,
    ) -> CoreResult<()> {
        let address = msg.address;
        let seal = msg.committed_seal.context(InvalidMessageSnafu {
            reason: "commit without committed seal",
        })?;
        let hash_sign = msg.hash_sign.context(InvalidMessageSnafu {
            reason: "commit without bridge transaction signature",
        })?;

        CommitSealPayload(subject.digest)
            .verify_signature(self.verifier.as_ref(), address, seal)
            .ok()
            .context(InvalidSignatureSnafu { address })?;
        BridgeTxSignPayload(tx_hash)
            .verify_signature(self.verifier.as_ref(), address, hash_sign)
            .ok()
            .context(InvalidSignatureSnafu { address })?;
        Ok(())
    }

    async fn commit(&mut self) -> CoreResult<()> {
        self.set_state(State::Committed);

        let Some(proposal) = self.current.proposal().cloned() else {
            return Ok(());
        };
        let seals: Vec<_> = self
            .current
            .commits
            .values()
            .filter_map(|m| {
                m.committed_seal.map(|sig| CommittedSeal {
                    validator: m.address,
                    sig,
                })
            })
            .collect();
        let number = proposal.number();
        let hash = proposal.hash();
        let num_seals = seals.len();

        if let Err(err) = self.backend.commit(proposal, seals).await {
            warn!(
                target: LOG_TARGET,
                %number,
                hash = %hash.short(),
                err = %err.fmt_compact(),
                "Failed to commit, changing round"
            );
            self.current.unlock_hash();
            self.send_next_round_change().await;
            return Err(err).context(CommitSnafu);
        }

        info!(
            target: LOG_TARGET,
            %number,
            hash = %hash.short(),
            round = %self.current.round(),
            %num_seals,
            "Committed"
        );
        Ok(())
    }

    pub(super) async fn send_commit(&mut self) {
        let Some(subject) = self.current.subject() else {
            return;
        };
        let Some(tx_hash) = self.current.proposal().map(|p| p.tx_hash()) else {
            return;
        };
        debug!(target: LOG_TARGET, %subject, "Sending commit");
        self.broadcast_commit(subject, tx_hash).await;
    }

    /// Commit carrying our committed seal and bridge transaction signature
    pub(super) async fn broadcast_commit(&mut self, subject: Subject, tx_hash: TxHash) {
        let payload = ConsensusMsg::<B::Proposal>::Commit(subject).encode_payload();
        let mut msg = Message::new(MessageCode::Commit, payload, self.address);
        msg.committed_seal = Some(CommitSealPayload(subject.digest).sign_with(self.signer.as_ref()));
        msg.hash_sign = Some(BridgeTxSignPayload(tx_hash).sign_with(self.signer.as_ref()));

        self.broadcast(msg).await;
    }
}
