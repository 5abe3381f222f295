use bincode::{Decode, Encode};
use derive_more::Display;
use snafu::{ResultExt as _, Snafu};

use crate::Signature;
use crate::address::Address;
use crate::bincode::{decode, encode_to_vec};
use crate::proposal::Proposal;
use crate::signed::{InvalidSignatureResult, Signer, Verifier, tagged_hash};
use crate::view::{Subject, View};

/// Protocol message discriminant
#[derive(Encode, Decode, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Display)]
pub enum MessageCode {
    #[display("preprepare")]
    Preprepare,
    #[display("prepare")]
    Prepare,
    #[display("commit")]
    Commit,
    #[display("round-change")]
    RoundChange,
}

/// Signed wire envelope of every protocol message
///
/// `msg` holds the encoded [`Preprepare`] or [`Subject`], selected by
/// `code`. The signature covers every other field
/// ([`Message::payload_no_sig`]).
#[derive(Encode, Decode, Clone, PartialEq, Eq, Debug)]
pub struct Message {
    pub code: MessageCode,
    pub msg: Vec<u8>,
    pub address: Address,
    pub signature: Signature,
    /// Only on Commit: sender's signature over the committed block hash
    pub committed_seal: Option<Signature>,
    /// Only on Commit: sender's signature over the bridge transaction hash
    pub hash_sign: Option<Signature>,
}

#[derive(Debug, Snafu)]
pub enum MessageDecodeError {
    #[snafu(display("Failed to decode message envelope"))]
    Envelope { source: bincode::error::DecodeError },
    #[snafu(display("Failed to decode {code} payload"))]
    Payload {
        code: MessageCode,
        source: bincode::error::DecodeError,
    },
}

pub type MessageDecodeResult<T> = Result<T, MessageDecodeError>;

const MESSAGE_TAG: [u8; 4] = *b"cmsg";

impl Message {
    /// New unsigned message from the local validator
    pub fn new(code: MessageCode, msg: Vec<u8>, address: Address) -> Self {
        Self {
            code,
            msg,
            address,
            signature: Signature::ZERO,
            committed_seal: None,
            hash_sign: None,
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> MessageDecodeResult<Self> {
        decode(bytes).context(EnvelopeSnafu)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        encode_to_vec(self)
    }

    /// Encoding of the message with the signature zeroed
    pub fn payload_no_sig(&self) -> Vec<u8> {
        encode_to_vec(&Message {
            signature: Signature::ZERO,
            ..self.clone()
        })
    }

    fn sign_hash(&self) -> blake3::Hash {
        tagged_hash(MESSAGE_TAG, &self.payload_no_sig())
    }

    pub fn sign(mut self, signer: &(impl Signer + ?Sized)) -> Self {
        debug_assert_eq!(self.address, signer.address());
        self.signature = signer.sign(self.sign_hash().as_bytes());
        self
    }

    /// Check the signature was produced by the claimed `address`
    pub fn verify(&self, verifier: &(impl Verifier + ?Sized)) -> InvalidSignatureResult<()> {
        verifier.verify(self.sign_hash().as_bytes(), self.address, self.signature)
    }

    pub fn decode_payload<P: Proposal>(&self) -> MessageDecodeResult<ConsensusMsg<P>> {
        let code = self.code;
        Ok(match code {
            MessageCode::Preprepare => {
                ConsensusMsg::Preprepare(decode(&self.msg).context(PayloadSnafu { code })?)
            }
            MessageCode::Prepare => {
                ConsensusMsg::Prepare(decode(&self.msg).context(PayloadSnafu { code })?)
            }
            MessageCode::Commit => {
                ConsensusMsg::Commit(decode(&self.msg).context(PayloadSnafu { code })?)
            }
            MessageCode::RoundChange => {
                ConsensusMsg::RoundChange(decode(&self.msg).context(PayloadSnafu { code })?)
            }
        })
    }
}

/// Proposal of the elected proposer for a view
#[derive(Encode, Decode, Clone, Debug, PartialEq, Eq)]
pub struct Preprepare<P> {
    pub view: View,
    pub proposal: P,
}

/// Decoded payload of a [`Message`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConsensusMsg<P> {
    Preprepare(Preprepare<P>),
    Prepare(Subject),
    Commit(Subject),
    RoundChange(Subject),
}

impl<P> ConsensusMsg<P> {
    pub fn code(&self) -> MessageCode {
        match self {
            ConsensusMsg::Preprepare(_) => MessageCode::Preprepare,
            ConsensusMsg::Prepare(_) => MessageCode::Prepare,
            ConsensusMsg::Commit(_) => MessageCode::Commit,
            ConsensusMsg::RoundChange(_) => MessageCode::RoundChange,
        }
    }

    pub fn view(&self) -> View {
        match self {
            ConsensusMsg::Preprepare(p) => p.view,
            ConsensusMsg::Prepare(s) | ConsensusMsg::Commit(s) | ConsensusMsg::RoundChange(s) => {
                s.view
            }
        }
    }
}

impl<P> ConsensusMsg<P>
where
    P: Proposal,
{
    pub fn encode_payload(&self) -> Vec<u8> {
        match self {
            ConsensusMsg::Preprepare(p) => encode_to_vec(p),
            ConsensusMsg::Prepare(s) | ConsensusMsg::Commit(s) | ConsensusMsg::RoundChange(s) => {
                encode_to_vec(s)
            }
        }
    }
}
