use core::fmt;

use bincode::{Decode, Encode};
use lbft_util_array_type::{
    array_type_define, array_type_impl_debug_as_display, array_type_impl_hex_str,
    array_type_impl_rand, array_type_impl_serde, array_type_impl_short,
    array_type_impl_zero_default,
};
use snafu::Snafu;

array_type_define! {
    /// Validator identity
    ///
    /// The ed25519 public key of the validator, so a signature can always
    /// be checked against the claimed sender without a registry lookup.
    #[derive(Encode, Decode, Clone, Copy, Hash)]
    pub struct Address[32];
}

array_type_impl_zero_default!(Address);
array_type_impl_hex_str!(Address);
array_type_impl_serde!(Address);
array_type_impl_debug_as_display!(Address);
array_type_impl_short!(Address);
array_type_impl_rand!(Address);

#[derive(Debug, Snafu)]
pub struct InvalidAddressKeyError;

impl TryFrom<Address> for ed25519_dalek::VerifyingKey {
    type Error = InvalidAddressKeyError;

    fn try_from(value: Address) -> Result<Self, Self::Error> {
        ed25519_dalek::VerifyingKey::from_bytes(&value.0).map_err(|_| InvalidAddressKeyError)
    }
}

array_type_define! {
    #[derive(Encode, Decode, Clone, Copy)]
    pub struct ValidatorSeckey[32];
}
array_type_impl_zero_default!(ValidatorSeckey);

impl fmt::Debug for ValidatorSeckey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ValidatorSeckey(…)")
    }
}

impl ValidatorSeckey {
    pub fn generate() -> Self {
        Self(ed25519_dalek::SigningKey::generate(&mut rand::thread_rng()).to_bytes())
    }

    pub fn address(self) -> Address {
        Address(
            ed25519_dalek::SigningKey::from(self)
                .verifying_key()
                .to_bytes(),
        )
    }
}

impl From<ValidatorSeckey> for ed25519_dalek::SigningKey {
    fn from(value: ValidatorSeckey) -> Self {
        ed25519_dalek::SigningKey::from_bytes(&value.0)
    }
}
