use std::time::Duration;

use bincode::{Decode, Encode};
use lbft_util_array_type::{array_type_fixed_size_define, array_type_fixed_size_impl_serde};
use time::UtcDateTime;

array_type_fixed_size_define! {
    /// Second-precision absolute timestamp, UTC
    ///
    /// Block timestamps are compared against the block period and allowed
    /// clock drift, both configured in seconds.
    #[derive(Encode, Decode, Clone, Copy, Hash)]
    pub struct Timestamp(u64);
}
array_type_fixed_size_impl_serde!(Timestamp);

impl Timestamp {
    pub fn now() -> Self {
        Self::from(u64::try_from(UtcDateTime::now().unix_timestamp()).expect("Can't fail"))
    }

    pub fn saturating_add_secs(self, secs: u64) -> Self {
        Self::from(self.to_number().saturating_add(secs))
    }

    /// Time elapsed from `earlier` to `self`, zero if `earlier` is later
    pub fn duration_since(self, earlier: Timestamp) -> Duration {
        Duration::from_secs(self.to_number().saturating_sub(earlier.to_number()))
    }
}
