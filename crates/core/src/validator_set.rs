use std::fmt;
use std::str::FromStr;

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};
use snafu::Snafu;

use crate::address::Address;
use crate::view::Round;

/// How the next proposer is picked
#[derive(Encode, Decode, Clone, Copy, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProposerPolicy {
    /// Move to the next validator every sequence
    #[default]
    RoundRobin,
    /// Keep the last proposer until a round change happens
    Sticky,
}

impl fmt::Display for ProposerPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ProposerPolicy::RoundRobin => "round-robin",
            ProposerPolicy::Sticky => "sticky",
        })
    }
}

#[derive(Debug, Snafu)]
#[snafu(display("Unknown proposer policy: {value}"))]
pub struct UnknownProposerPolicyError {
    value: String,
}

impl FromStr for ProposerPolicy {
    type Err = UnknownProposerPolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "round-robin" => Ok(ProposerPolicy::RoundRobin),
            "sticky" => Ok(ProposerPolicy::Sticky),
            _ => UnknownProposerPolicySnafu { value: s }.fail(),
        }
    }
}

/// Ordered set of validators with the currently selected proposer
///
/// Validators are kept sorted by address, so any two nodes holding the same
/// members agree on every index, and therefore on every proposer.
#[derive(Encode, Decode, Clone, PartialEq, Eq, Debug)]
pub struct ValidatorSet {
    validators: Vec<Address>,
    policy: ProposerPolicy,
    proposer: Option<Address>,
}

impl ValidatorSet {
    pub fn new(validators: impl IntoIterator<Item = Address>, policy: ProposerPolicy) -> Self {
        let mut validators: Vec<_> = validators.into_iter().collect();
        validators.sort_unstable();
        validators.dedup();
        let proposer = validators.first().copied();
        Self {
            validators,
            policy,
            proposer,
        }
    }

    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    pub fn list(&self) -> &[Address] {
        &self.validators
    }

    pub fn get_by_index(&self, i: usize) -> Option<Address> {
        self.validators.get(i).copied()
    }

    pub fn index_of(&self, address: Address) -> Option<usize> {
        self.validators.binary_search(&address).ok()
    }

    pub fn contains(&self, address: Address) -> bool {
        self.index_of(address).is_some()
    }

    pub fn proposer(&self) -> Option<Address> {
        self.proposer
    }

    pub fn is_proposer(&self, address: Address) -> bool {
        self.proposer == Some(address)
    }

    /// Maximum number of faulty validators tolerated
    pub fn f(&self) -> usize {
        self.len().saturating_sub(1) / 3
    }

    /// Select the proposer for `round`, given the proposer of the last
    /// sequence
    pub fn calc_proposer(&mut self, last_proposer: Option<Address>, round: Round) {
        self.proposer = self.proposer_for(last_proposer, round);
    }

    /// Pure version of [`Self::calc_proposer`]
    pub fn proposer_for(&self, last_proposer: Option<Address>, round: Round) -> Option<Address> {
        if self.is_empty() {
            return None;
        }
        let round = round.to_number();
        let n = u64::try_from(self.len()).expect("Can't fail");

        let seed = match last_proposer {
            None => round,
            Some(last) => {
                // A proposer that is no longer a validator counts as index 0
                let offset = self
                    .index_of(last)
                    .map(|i| u64::try_from(i).expect("Can't fail"))
                    .unwrap_or_default();
                match self.policy {
                    ProposerPolicy::RoundRobin => offset.wrapping_add(round).wrapping_add(1),
                    ProposerPolicy::Sticky => offset.wrapping_add(round),
                }
            }
        };

        let pick = usize::try_from(seed % n).expect("Can't fail");
        self.get_by_index(pick)
    }

    /// Returns `false` if already a validator
    pub fn add_validator(&mut self, address: Address) -> bool {
        match self.validators.binary_search(&address) {
            Ok(_) => false,
            Err(i) => {
                self.validators.insert(i, address);
                true
            }
        }
    }

    /// Returns `false` if not a validator
    ///
    /// If the current proposer is removed, the selection is cleared until
    /// the next [`Self::calc_proposer`].
    pub fn remove_validator(&mut self, address: Address) -> bool {
        match self.validators.binary_search(&address) {
            Ok(i) => {
                self.validators.remove(i);
                if self.proposer == Some(address) {
                    self.proposer = None;
                }
                true
            }
            Err(_) => false,
        }
    }
}

impl<'a> IntoIterator for &'a ValidatorSet {
    type Item = &'a Address;

    type IntoIter = <&'a [Address] as IntoIterator>::IntoIter;

    fn into_iter(self) -> Self::IntoIter {
        self.validators.iter()
    }
}

#[cfg(test)]
mod tests;
