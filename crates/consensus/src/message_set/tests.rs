use lbft_core::address::Address;
use lbft_core::msg::{Message, MessageCode};
use lbft_core::validator_set::{ProposerPolicy, ValidatorSet};

use super::MessageSet;
use crate::error::CoreError;

fn addr(i: u8) -> Address {
    Address::from_bytes([i; 32])
}

fn msg(from: u8, payload: u8) -> Message {
    Message::new(MessageCode::Prepare, vec![payload], addr(from))
}

#[test]
fn revoting_does_not_inflate_size() {
    let valset = ValidatorSet::new((1..=4).map(addr), ProposerPolicy::RoundRobin);
    let mut set = MessageSet::default();

    set.add(msg(1, 0), &valset).expect("validator");
    set.add(msg(2, 0), &valset).expect("validator");
    assert_eq!(set.size(), 2);

    set.add(msg(1, 7), &valset).expect("validator");
    assert_eq!(set.size(), 2);
    assert_eq!(set.get(addr(1)).map(|m| m.msg.clone()), Some(vec![7]));

    set.add(msg(3, 0), &valset).expect("validator");
    assert_eq!(set.size(), 3);
    assert_eq!(set.senders().collect::<Vec<_>>(), vec![addr(1), addr(2), addr(3)]);
}

#[test]
fn rejects_non_validators() {
    let valset = ValidatorSet::new((1..=4).map(addr), ProposerPolicy::RoundRobin);
    let mut set = MessageSet::default();

    let err = set.add(msg(9, 0), &valset).unwrap_err();
    assert!(matches!(err, CoreError::UnauthorizedAddress { address } if address == addr(9)));
    assert_eq!(set.size(), 0);
}
