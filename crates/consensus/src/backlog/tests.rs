use lbft_core::address::Address;
use lbft_core::msg::{Message, MessageCode};
use lbft_core::validator_set::{ProposerPolicy, ValidatorSet};
use lbft_core::view::View;

use super::Backlog;
use crate::error::{CoreError, CoreResult};

fn addr(i: u8) -> Address {
    Address::from_bytes([i; 32])
}

fn msg(from: u8, code: MessageCode) -> Message {
    Message::new(code, vec![], addr(from))
}

fn valset() -> ValidatorSet {
    ValidatorSet::new((1..=4).map(addr), ProposerPolicy::RoundRobin)
}

/// Everything at or below `current` is ready, rest is future
fn up_to(current: View) -> impl FnMut(MessageCode, View) -> CoreResult<()> {
    move |_, view| {
        if current < view {
            Err(CoreError::FutureMessage)
        } else if view < current {
            Err(CoreError::OldMessage)
        } else {
            Ok(())
        }
    }
}

#[test]
fn replays_in_view_then_phase_order() {
    let valset = valset();
    let mut backlog = Backlog::default();

    backlog.push(View::from((5, 0)), msg(1, MessageCode::Prepare));
    backlog.push(View::from((5, 0)), msg(1, MessageCode::Commit));
    backlog.push(View::from((5, 0)), msg(1, MessageCode::Preprepare));
    backlog.push(View::from((6, 0)), msg(1, MessageCode::Preprepare));

    let ready = backlog.drain_ready(&valset, up_to(View::from((5, 0))));
    assert_eq!(
        ready.iter().map(|m| m.code).collect::<Vec<_>>(),
        vec![
            MessageCode::Preprepare,
            MessageCode::Commit,
            MessageCode::Prepare
        ]
    );
    assert_eq!(backlog.len(), 1);

    let ready = backlog.drain_ready(&valset, up_to(View::from((6, 0))));
    assert_eq!(ready.len(), 1);
    assert!(backlog.is_empty());
}

#[test]
fn drops_old_and_non_validator_messages() {
    let valset = valset();
    let mut backlog = Backlog::default();

    backlog.push(View::from((3, 0)), msg(2, MessageCode::Prepare));
    backlog.push(View::from((9, 0)), msg(2, MessageCode::Prepare));
    backlog.push(View::from((4, 0)), msg(7, MessageCode::Prepare));

    let ready = backlog.drain_ready(&valset, up_to(View::from((4, 0))));
    assert!(ready.is_empty());
    assert_eq!(backlog.len(), 1);
}

#[test]
fn round_change_is_not_stuck_behind_a_future_prepare() {
    let valset = valset();
    let mut backlog = Backlog::default();

    backlog.push(View::from((5, 1)), msg(3, MessageCode::Prepare));
    backlog.push(View::from((5, 3)), msg(3, MessageCode::RoundChange));

    // At 5/1 without a Preprepare yet, only round changes can be handled
    let ready = backlog.drain_ready(&valset, |code, _| {
        if code == MessageCode::RoundChange {
            Ok(())
        } else {
            Err(CoreError::FutureMessage)
        }
    });
    assert_eq!(
        ready.iter().map(|m| m.code).collect::<Vec<_>>(),
        vec![MessageCode::RoundChange]
    );
    assert_eq!(backlog.len(), 1);
}

#[test]
fn full_backlog_evicts_furthest_views_first() {
    let valset = valset();
    let mut backlog = Backlog::default();

    for round in 0..=u64::try_from(super::MAX_BACKLOG_PER_SENDER).expect("Fits") {
        backlog.push(View::from((5, round)), msg(1, MessageCode::RoundChange));
    }
    assert_eq!(backlog.len(), super::MAX_BACKLOG_PER_SENDER);

    let last = View::from((
        5,
        u64::try_from(super::MAX_BACKLOG_PER_SENDER).expect("Fits"),
    ));
    let ready = backlog.drain_ready(&valset, |_, view| {
        if view == last {
            Ok(())
        } else {
            Err(CoreError::FutureMessage)
        }
    });
    assert!(ready.is_empty());

    let ready = backlog.drain_ready(&valset, up_to(View::from((5, 0))));
    assert_eq!(ready.len(), 1);
}

#[test]
fn pending_requests_drop_stale_ones() {
    use lbft_core::block::{Block, BlockHeader};
    use lbft_core::proposal::Proposal as _;
    use lbft_core::timestamp::Timestamp;

    use super::PendingRequests;

    let genesis = BlockHeader::genesis(vec![addr(1)], Timestamp::ZERO);
    let b1 = Block::builder()
        .parent(&genesis)
        .timestamp(Timestamp::from(1))
        .build();
    let b2 = Block::builder()
        .parent(&b1.header)
        .timestamp(Timestamp::from(2))
        .build();

    let mut pending = PendingRequests::default();
    pending.push(b1.clone());
    pending.push(b2.clone());

    assert_eq!(pending.take(b1.number()).map(|b| b.hash()), Some(b1.hash()));
    assert_eq!(pending.len(), 1);

    pending.push(b1);
    assert_eq!(
        pending.take(b2.number()).map(|b| b.hash()),
        Some(b2.hash())
    );
    assert!(pending.is_empty());
}
