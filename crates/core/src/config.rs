use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::validator_set::{ProposerPolicy, ValidatorSet};
use crate::view::{Round, Sequence};

pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_BLOCK_PERIOD_SECS: u64 = 1;
pub const DEFAULT_EPOCH: u64 = 30_000;
pub const DEFAULT_MAX_ROUND_CHANGE_EXPONENT: u32 = 6;

/// Consensus tunables
///
/// Must be identical on all validators, otherwise they will disagree on
/// quorum sizes and proposers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bon::Builder)]
#[serde(default, rename_all = "kebab-case")]
pub struct ConsensusConfig {
    /// Base round timeout
    #[builder(default = DEFAULT_REQUEST_TIMEOUT_MS)]
    pub request_timeout_ms: u64,
    /// Minimum time between consecutive blocks
    #[builder(default = DEFAULT_BLOCK_PERIOD_SECS)]
    pub block_period_secs: u64,
    #[builder(default)]
    pub proposer_policy: ProposerPolicy,
    /// Blocks between vote checkpoints
    #[builder(default = DEFAULT_EPOCH)]
    pub epoch: u64,
    /// Height from which quorum is `ceil(2N/3)` instead of `2F+1`
    pub ceil2n_by_3_block: Option<Sequence>,
    /// How far ahead of the local clock a block timestamp may be
    #[builder(default)]
    pub allowed_future_block_time_secs: u64,
    /// Cap on the exponent of the round change backoff
    #[builder(default = DEFAULT_MAX_ROUND_CHANGE_EXPONENT)]
    pub max_round_change_exponent: u32,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl ConsensusConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// `request_timeout * 2^round`, with the exponent capped
    pub fn round_change_timeout(&self, round: Round) -> Duration {
        let exp = u32::try_from(round.to_number())
            .unwrap_or(u32::MAX)
            .min(self.max_round_change_exponent);
        self.request_timeout()
            .saturating_mul(2u32.saturating_pow(exp))
    }

    /// Number of matching messages needed to make progress at `height`
    ///
    /// `valset` must be the set as of that height.
    pub fn quorum_size(&self, valset: &ValidatorSet, height: Sequence) -> usize {
        if self.ceil2n_by_3_block.is_some_and(|cutover| cutover <= height) {
            (2 * valset.len()).div_ceil(3)
        } else {
            2 * valset.f() + 1
        }
    }
}
