// SPDX-License-Identifier: MIT

//! Core types of the LBFT bridge relay consensus
//!
//! Focused on the data model, its encoding, hashing and signing. Nothing
//! here performs any I/O.
use ::bincode::{Decode, Encode};
use lbft_util_array_type::{
    array_type_define, array_type_impl_debug_as_display, array_type_impl_hex_str,
    array_type_impl_serde, array_type_impl_zero_default,
};

pub mod address;
pub mod bincode;
pub mod block;
pub mod config;
pub mod msg;
pub mod proposal;
pub mod signed;
pub mod timestamp;
pub mod validator_set;
pub mod view;

array_type_define! {
    #[derive(Encode, Decode, Copy, Clone, Hash)]
    pub struct Signature[64];
}
array_type_impl_zero_default!(Signature);
array_type_impl_hex_str!(Signature);
array_type_impl_serde!(Signature);
array_type_impl_debug_as_display!(Signature);

impl From<Signature> for ed25519_dalek::Signature {
    fn from(value: Signature) -> Self {
        ed25519_dalek::Signature::from_bytes(&value.0)
    }
}
impl From<ed25519_dalek::Signature> for Signature {
    fn from(value: ed25519_dalek::Signature) -> Self {
        Self(value.to_bytes())
    }
}
