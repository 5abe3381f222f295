use std::collections::BTreeMap;

use bincode::{Decode, Encode};
use lbft_core::address::Address;
use lbft_core::block::{BlockHash, BlockHeader};
use lbft_core::signed::Verifier;
use lbft_core::validator_set::ValidatorSet;
use lbft_core::view::Sequence;
use snafu::{OptionExt as _, ensure};
use tracing::{debug, info};

use crate::LOG_TARGET;
use crate::error::{
    InvalidSealSnafu, InvalidVotingChainSnafu, SnapshotResult, UnauthorizedSignerSnafu,
};

/// A ballot cast by `validator` in block `block`
#[derive(Encode, Decode, Clone, Copy, PartialEq, Eq, Debug)]
pub struct Vote {
    pub validator: Address,
    pub block: Sequence,
    pub candidate: Address,
    pub authorize: bool,
}

/// Running count of the pending votes for one candidate
#[derive(Encode, Decode, Clone, Copy, PartialEq, Eq, Debug)]
pub struct Tally {
    pub authorize: bool,
    pub votes: u64,
}

/// Authorization state as of block `number`
///
/// `tally` is always derivable from `votes`: each entry counts the votes in
/// `votes` for that candidate.
#[derive(Encode, Decode, Clone, PartialEq, Eq, Debug)]
pub struct Snapshot {
    pub epoch: u64,
    pub number: Sequence,
    pub hash: BlockHash,
    pub votes: Vec<Vote>,
    pub tally: BTreeMap<Address, Tally>,
    pub validators: ValidatorSet,
}

impl Snapshot {
    /// Snapshot without any votes, as taken at genesis
    pub fn new(epoch: u64, number: Sequence, hash: BlockHash, validators: ValidatorSet) -> Self {
        Self {
            epoch,
            number,
            hash,
            votes: vec![],
            tally: BTreeMap::new(),
            validators,
        }
    }

    /// Would the vote change anything
    ///
    /// Only authorizing non-validators and deauthorizing validators makes
    /// sense.
    pub fn is_meaningful(&self, candidate: Address, authorize: bool) -> bool {
        self.validators.contains(candidate) != authorize
    }

    fn cast(&mut self, candidate: Address, authorize: bool) -> bool {
        if !self.is_meaningful(candidate, authorize) {
            return false;
        }
        match self.tally.get_mut(&candidate) {
            Some(tally) => tally.votes += 1,
            None => {
                self.tally.insert(
                    candidate,
                    Tally {
                        authorize,
                        votes: 1,
                    },
                );
            }
        }
        true
    }

    fn uncast(&mut self, candidate: Address, authorize: bool) -> bool {
        let Some(tally) = self.tally.get_mut(&candidate) else {
            return false;
        };
        if tally.authorize != authorize {
            return false;
        }
        if 1 < tally.votes {
            tally.votes -= 1;
        } else {
            self.tally.remove(&candidate);
        }
        true
    }

    /// Drop the pending vote of `validator` for `candidate`, if any
    fn revoke(&mut self, validator: Address, candidate: Address) {
        if let Some(i) = self
            .votes
            .iter()
            .position(|v| v.validator == validator && v.candidate == candidate)
        {
            let vote = self.votes.remove(i);
            self.uncast(vote.candidate, vote.authorize);
        }
    }

    /// Fold consecutive `headers`, following directly after this snapshot,
    /// into a new snapshot
    pub fn apply(
        &self,
        headers: &[BlockHeader],
        verifier: &(impl Verifier + ?Sized),
    ) -> SnapshotResult<Snapshot> {
        let Some(last) = headers.last() else {
            return Ok(self.clone());
        };

        let mut expected = self.number.next_expect();
        for header in headers {
            ensure!(
                header.number == expected,
                InvalidVotingChainSnafu {
                    expected,
                    received: header.number,
                }
            );
            expected = expected.next_expect();
        }

        let mut snap = self.clone();
        for header in headers {
            let number = header.number;
            if snap.epoch != 0 && number.to_number() % snap.epoch == 0 {
                debug!(target: LOG_TARGET, %number, "Checkpoint, clearing votes");
                snap.votes.clear();
                snap.tally.clear();
            }

            let signer = header
                .recover_signer(verifier)
                .ok()
                .context(InvalidSealSnafu { number })?;
            ensure!(
                snap.validators.contains(signer),
                UnauthorizedSignerSnafu { signer, number }
            );

            let Some(vote) = header.vote else {
                continue;
            };
            let candidate = vote.candidate;

            // One outstanding vote per validator and candidate
            snap.revoke(signer, candidate);
            if snap.cast(candidate, vote.authorize) {
                snap.votes.push(Vote {
                    validator: signer,
                    block: number,
                    candidate,
                    authorize: vote.authorize,
                });
            }

            let Some(tally) = snap.tally.get(&candidate).copied() else {
                continue;
            };
            if tally.votes <= u64::try_from(snap.validators.len() / 2).expect("Can't fail") {
                continue;
            }

            if tally.authorize {
                snap.validators.add_validator(candidate);
            } else {
                snap.validators.remove_validator(candidate);
                // Votes of the removed validator no longer count
                while let Some(i) = snap.votes.iter().position(|v| v.validator == candidate) {
                    let vote = snap.votes.remove(i);
                    snap.uncast(vote.candidate, vote.authorize);
                }
            }
            snap.votes.retain(|v| v.candidate != candidate);
            snap.tally.remove(&candidate);

            info!(
                target: LOG_TARGET,
                %number,
                candidate = %candidate.short(),
                authorize = tally.authorize,
                validators = snap.validators.len(),
                "Validator set changed"
            );
        }

        snap.number = last.number;
        snap.hash = last.hash();
        Ok(snap)
    }
}

#[cfg(test)]
mod tests;
