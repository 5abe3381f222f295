use bincode::config::{self, Config};
use bincode::{de, error};

pub const CONSENSUS_LIMIT_16M: usize = 0x100_0000;

/// Encoding used for everything that gets hashed, signed or sent
///
/// Fixed-int big-endian, so encodings are canonical and byte-wise
/// ordered like the values they represent.
pub const CONSENSUS_BINCODE_CONFIG: config::Configuration<
    config::BigEndian,
    config::Fixint,
    config::Limit<CONSENSUS_LIMIT_16M>,
> = config::standard()
    .with_limit::<CONSENSUS_LIMIT_16M>()
    .with_big_endian()
    .with_fixed_int_encoding();

/// Decode `src`, rejecting any trailing bytes
pub fn decode_whole<D: de::Decode<()>, C: Config>(
    src: &[u8],
    config: C,
) -> Result<D, error::DecodeError> {
    let (t, consumed) = bincode::decode_from_slice(src, config)?;

    if consumed != src.len() {
        return Err(bincode::error::DecodeError::Other("leftover bytes"));
    }

    Ok(t)
}

pub fn encode_to_vec<E: bincode::Encode>(v: &E) -> Vec<u8> {
    bincode::encode_to_vec(v, CONSENSUS_BINCODE_CONFIG).expect("Can't fail")
}

pub fn decode<D: de::Decode<()>>(src: &[u8]) -> Result<D, error::DecodeError> {
    decode_whole(src, CONSENSUS_BINCODE_CONFIG)
}
