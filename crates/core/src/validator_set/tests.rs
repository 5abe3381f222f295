use super::*;

fn addr(b: u8) -> Address {
    Address::from_bytes([b; 32])
}

fn set_of(n: u8, policy: ProposerPolicy) -> ValidatorSet {
    // deliberately unsorted
    ValidatorSet::new((1..=n).rev().map(addr), policy)
}

#[test]
fn sorted_and_deduplicated() {
    let set = ValidatorSet::new([addr(3), addr(1), addr(2), addr(1)], ProposerPolicy::RoundRobin);

    assert_eq!(set.list(), &[addr(1), addr(2), addr(3)]);
    assert_eq!(set.index_of(addr(2)), Some(1));
    assert_eq!(set.proposer(), Some(addr(1)));
}

#[test]
fn faulty_bound() {
    for (n, f) in [(1, 0), (2, 0), (3, 0), (4, 1), (6, 1), (7, 2), (10, 3)] {
        assert_eq!(set_of(n, ProposerPolicy::RoundRobin).f(), f, "n={n}");
    }
    assert_eq!(ValidatorSet::new([], ProposerPolicy::RoundRobin).f(), 0);
}

#[test]
fn round_robin_rotates() {
    let mut set = set_of(4, ProposerPolicy::RoundRobin);

    set.calc_proposer(None, 0.into());
    assert_eq!(set.proposer(), Some(addr(1)));

    set.calc_proposer(Some(addr(1)), 0.into());
    assert_eq!(set.proposer(), Some(addr(2)));

    set.calc_proposer(Some(addr(1)), 1.into());
    assert_eq!(set.proposer(), Some(addr(3)));

    set.calc_proposer(Some(addr(4)), 0.into());
    assert_eq!(set.proposer(), Some(addr(1)));

    set.calc_proposer(Some(addr(2)), 5.into());
    assert_eq!(set.proposer(), Some(addr(4)));
}

#[test]
fn sticky_keeps_proposer_until_round_change() {
    let mut set = set_of(4, ProposerPolicy::Sticky);

    set.calc_proposer(Some(addr(3)), 0.into());
    assert_eq!(set.proposer(), Some(addr(3)));

    set.calc_proposer(Some(addr(3)), 1.into());
    assert_eq!(set.proposer(), Some(addr(4)));

    set.calc_proposer(Some(addr(3)), 2.into());
    assert_eq!(set.proposer(), Some(addr(1)));
}

#[test]
fn unknown_last_proposer_counts_as_first() {
    let set = set_of(4, ProposerPolicy::RoundRobin);

    assert_eq!(set.proposer_for(Some(addr(99)), 0.into()), Some(addr(2)));
}

#[test]
fn proposer_is_deterministic_across_copies() {
    let a = set_of(7, ProposerPolicy::RoundRobin);
    let b = ValidatorSet::new(a.list().iter().copied(), ProposerPolicy::RoundRobin);

    for last in a.list() {
        for round in 0..20u64 {
            let expected = a.proposer_for(Some(*last), round.into());
            assert_eq!(expected, a.proposer_for(Some(*last), round.into()));
            assert_eq!(expected, b.proposer_for(Some(*last), round.into()));
        }
    }
}

#[test]
fn add_and_remove_are_idempotent() {
    let mut set = set_of(3, ProposerPolicy::RoundRobin);

    assert!(!set.add_validator(addr(2)));
    assert!(set.add_validator(addr(0)));
    assert_eq!(set.list(), &[addr(0), addr(1), addr(2), addr(3)]);

    assert!(set.remove_validator(addr(2)));
    assert!(!set.remove_validator(addr(2)));
    assert_eq!(set.list(), &[addr(0), addr(1), addr(3)]);
}

#[test]
fn removing_proposer_clears_selection() {
    let mut set = set_of(3, ProposerPolicy::RoundRobin);
    set.calc_proposer(Some(addr(1)), 0.into());
    assert_eq!(set.proposer(), Some(addr(2)));

    set.remove_validator(addr(2));
    assert_eq!(set.proposer(), None);

    set.calc_proposer(Some(addr(1)), 0.into());
    assert_eq!(set.proposer(), Some(addr(3)));
}

#[test]
fn policy_parses() {
    assert_eq!(
        "sticky".parse::<ProposerPolicy>().ok(),
        Some(ProposerPolicy::Sticky)
    );
    assert!("random".parse::<ProposerPolicy>().is_err());
}
