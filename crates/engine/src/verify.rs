use std::collections::BTreeSet;

use lbft_core::address::Address;
use lbft_core::block::{BlockHeader, CommitSealPayload};
use lbft_core::signed::Signable as _;
use lbft_core::timestamp::Timestamp;
use lbft_core::view::Sequence;
use lbft_snapshot::Snapshot;
use snafu::{OptionExt as _, ensure};
use tracing::trace;

use crate::LOG_TARGET;
use crate::backend::RelayBackend;
use crate::error::{
    EmptyCommittedSealsSnafu, FutureBlockSnafu, InvalidCommittedSealsSnafu, InvalidExtraSnafu,
    InvalidSignerSnafu, InvalidTimestampSnafu, InvalidVoteSnafu, UnknownBlockSnafu, VerifyResult,
};

impl RelayBackend {
    pub(crate) fn is_epoch(&self, number: Sequence) -> bool {
        let epoch = self.config.epoch;
        epoch != 0 && number.to_number() % epoch == 0
    }

    /// Address that sealed `header`
    pub(crate) fn author(&self, header: &BlockHeader) -> VerifyResult<Address> {
        let hash = header.hash();
        if let Some(signer) = self.signers.lock().expect("Locking failed").get(&hash) {
            return Ok(*signer);
        }
        let signer = header
            .recover_signer(self.verifier.as_ref())
            .ok()
            .context(InvalidSignerSnafu {
                number: header.number,
            })?;
        self.signers
            .lock()
            .expect("Locking failed")
            .put(hash, signer);
        Ok(signer)
    }

    /// Check `header` against the rules of the chain
    ///
    /// `parents` are not yet stored ancestors, ordered by number, ending
    /// with the parent of `header`.
    pub(crate) async fn verify_header(
        &self,
        header: &BlockHeader,
        parents: &[BlockHeader],
    ) -> VerifyResult<()> {
        let number = header.number;
        ensure!(
            !header.is_genesis(),
            UnknownBlockSnafu {
                hash: header.hash(),
                number,
            }
        );

        let now = Timestamp::now();
        ensure!(
            header.timestamp <= now.saturating_add_secs(self.config.allowed_future_block_time_secs),
            FutureBlockSnafu {
                delay: header.timestamp.duration_since(now),
            }
        );

        if self.is_epoch(number) {
            ensure!(header.vote.is_none(), InvalidVoteSnafu { number });
        } else {
            ensure!(header.validators.is_empty(), InvalidExtraSnafu { number });
        }

        self.verify_cascading_fields(header, parents).await
    }

    /// Rules depending on the ancestors of `header`
    async fn verify_cascading_fields(
        &self,
        header: &BlockHeader,
        parents: &[BlockHeader],
    ) -> VerifyResult<()> {
        let number = header.number;
        let parent_number = number.prev().context(UnknownBlockSnafu {
            hash: header.parent_hash,
            number,
        })?;

        let parent = match parents.last() {
            Some(parent) => Some(parent.clone()),
            None => {
                lbft_snapshot::HeaderReader::header(
                    self.chain.as_ref(),
                    header.parent_hash,
                    parent_number,
                )
                .await
            }
        }
        .filter(|p| p.number == parent_number && p.hash() == header.parent_hash)
        .context(UnknownBlockSnafu {
            hash: header.parent_hash,
            number: parent_number,
        })?;

        ensure!(
            parent
                .timestamp
                .saturating_add_secs(self.config.block_period_secs)
                <= header.timestamp,
            InvalidTimestampSnafu { number }
        );

        let snap = self
            .snapshot_at(parent_number, header.parent_hash, parents)
            .await?;

        if self.is_epoch(number) {
            ensure!(
                header.validators.as_slice() == snap.validators.list(),
                InvalidExtraSnafu { number }
            );
        }

        self.verify_signer(header, &snap)?;
        self.verify_committed_seals(header, &snap)
    }

    /// `header` must be sealed by one of the validators of `snap`
    pub(crate) fn verify_signer(&self, header: &BlockHeader, snap: &Snapshot) -> VerifyResult<()> {
        let signer = self.author(header)?;
        ensure!(
            snap.validators.contains(signer),
            InvalidSignerSnafu {
                number: header.number
            }
        );
        Ok(())
    }

    /// Enough distinct validators of the parent snapshot must have
    /// committed to `header`
    fn verify_committed_seals(&self, header: &BlockHeader, snap: &Snapshot) -> VerifyResult<()> {
        let number = header.number;
        ensure!(
            !header.committed_seals.is_empty(),
            EmptyCommittedSealsSnafu { number }
        );

        let payload = CommitSealPayload(header.hash());
        let mut signers = BTreeSet::new();
        for seal in &header.committed_seals {
            ensure!(
                snap.validators.contains(seal.validator) && signers.insert(seal.validator),
                InvalidCommittedSealsSnafu { number }
            );
            payload
                .verify_signature(self.verifier.as_ref(), seal.validator, seal.sig)
                .ok()
                .context(InvalidCommittedSealsSnafu { number })?;
        }

        let quorum = self.config.quorum_size(&snap.validators, number);
        trace!(target: LOG_TARGET, %number, seals = signers.len(), %quorum, "Verified committed seals");
        ensure!(quorum <= signers.len(), InvalidCommittedSealsSnafu { number });
        Ok(())
    }
}
