use std::io::Write as _;

use ed25519_dalek::Signer as _;
use snafu::{OptionExt as _, Snafu};

use crate::Signature;
use crate::address::{Address, ValidatorSeckey};
use crate::bincode::CONSENSUS_BINCODE_CONFIG;

#[derive(Debug, Snafu, PartialEq, Eq)]
pub struct InvalidSignatureError;

pub type InvalidSignatureResult<T> = Result<T, InvalidSignatureError>;

pub trait Hashable: bincode::Encode {
    fn hash(&self) -> blake3::Hash {
        let mut hasher = blake3::Hasher::new();

        bincode::encode_into_std_write(self, &mut hasher, CONSENSUS_BINCODE_CONFIG)
            .expect("Can't fail");

        hasher.finalize()
    }
}

/// A value that validators sign
pub trait Signable: Hashable {
    /// Unique tag preventing two different type of messages with the same
    /// encoding from conflicting with each other
    const TAG: [u8; 4];

    fn sign_hash(&self) -> blake3::Hash {
        tagged_hash(Self::TAG, self.hash().as_bytes())
    }

    fn sign_with(&self, signer: &(impl Signer + ?Sized)) -> Signature {
        signer.sign(self.sign_hash().as_bytes())
    }

    fn verify_signature(
        &self,
        verifier: &(impl Verifier + ?Sized),
        address: Address,
        sig: Signature,
    ) -> InvalidSignatureResult<()> {
        verifier.verify(self.sign_hash().as_bytes(), address, sig)
    }
}

pub fn tagged_hash(tag: [u8; 4], data: &[u8]) -> blake3::Hash {
    let mut hasher = blake3::Hasher::new();

    hasher.write_all(b"lbft").expect("Can't fail");
    hasher.write_all(&tag).expect("Can't fail");
    hasher.write_all(data).expect("Can't fail");

    hasher.finalize()
}

/// Signing capability of the local validator
///
/// Kept separate from any specific curve so protocol code only ever deals
/// with [`Address`]es and [`Signature`]s.
pub trait Signer: Send + Sync {
    fn address(&self) -> Address;
    fn sign(&self, data: &[u8]) -> Signature;
}

/// Checks that `sig` over `data` was produced by `address`
pub trait Verifier: Send + Sync {
    fn verify(&self, data: &[u8], address: Address, sig: Signature) -> InvalidSignatureResult<()>;
}

/// [`Signer`] backed by an ed25519 key
#[derive(Clone)]
pub struct Ed25519Signer {
    key: ed25519_dalek::SigningKey,
    address: Address,
}

impl Ed25519Signer {
    pub fn new(seckey: ValidatorSeckey) -> Self {
        Self {
            key: seckey.into(),
            address: seckey.address(),
        }
    }
}

impl Signer for Ed25519Signer {
    fn address(&self) -> Address {
        self.address
    }

    fn sign(&self, data: &[u8]) -> Signature {
        self.key.sign(data).into()
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct Ed25519Verifier;

impl Verifier for Ed25519Verifier {
    fn verify(&self, data: &[u8], address: Address, sig: Signature) -> InvalidSignatureResult<()> {
        ed25519_dalek::VerifyingKey::try_from(address)
            .ok()
            .context(InvalidSignatureSnafu)?
            .verify_strict(data, &sig.into())
            .ok()
            .context(InvalidSignatureSnafu)
    }
}
