use lbft_core::address::{Address, ValidatorSeckey};
use lbft_core::block::{Block, BlockHeader, HeaderVote};
use lbft_core::signed::{Ed25519Signer, Ed25519Verifier, Signer as _};
use lbft_core::timestamp::Timestamp;
use lbft_core::validator_set::{ProposerPolicy, ValidatorSet};
use lbft_core::view::Sequence;

use super::Snapshot;
use crate::SnapshotError;

struct Chain {
    signers: Vec<Ed25519Signer>,
    genesis: BlockHeader,
}

impl Chain {
    fn new(n: usize) -> Self {
        let mut signers: Vec<_> = (0..n)
            .map(|_| Ed25519Signer::new(ValidatorSeckey::generate()))
            .collect();
        signers.sort_by_key(|s| s.address());
        let genesis = BlockHeader::genesis(
            signers.iter().map(|s| s.address()).collect(),
            Timestamp::from(1_700_000_000),
        );
        Self { signers, genesis }
    }

    fn address(&self, i: usize) -> Address {
        self.signers[i].address()
    }

    fn snapshot(&self, epoch: u64) -> Snapshot {
        Snapshot::new(
            epoch,
            Sequence::ZERO,
            self.genesis.hash(),
            ValidatorSet::new(self.genesis.validators.clone(), ProposerPolicy::RoundRobin),
        )
    }

    /// Headers following genesis, each sealed by `signer` with an optional
    /// vote
    fn headers(&self, blocks: &[(usize, Option<(Address, bool)>)]) -> Vec<BlockHeader> {
        let mut parent = self.genesis.clone();
        let mut headers = vec![];
        for (signer, vote) in blocks {
            let mut header = Block::builder()
                .parent(&parent)
                .timestamp(Timestamp::from(
                    parent.timestamp.to_number() + 1,
                ))
                .build()
                .header;
            header.vote = vote.map(|(candidate, authorize)| HeaderVote {
                candidate,
                authorize,
            });
            header.sign_seal(&self.signers[*signer]);
            headers.push(header.clone());
            parent = header;
        }
        headers
    }
}

#[test]
fn removal_purges_votes_of_removed_validator() {
    let chain = Chain::new(4);
    let outsider = Ed25519Signer::new(ValidatorSeckey::generate()).address();
    let removed = chain.address(3);

    let headers = chain.headers(&[
        (3, Some((outsider, true))),
        (0, Some((removed, false))),
        (1, Some((removed, false))),
    ]);
    let snap = chain.snapshot(30_000).apply(&headers, &Ed25519Verifier).unwrap();
    assert_eq!(snap.tally.len(), 2);
    assert_eq!(snap.votes.len(), 3);
    assert!(snap.validators.contains(removed));

    let headers = chain.headers(&[
        (3, Some((outsider, true))),
        (0, Some((removed, false))),
        (1, Some((removed, false))),
        (2, Some((removed, false))),
    ]);
    let snap = chain.snapshot(30_000).apply(&headers, &Ed25519Verifier).unwrap();

    assert!(!snap.validators.contains(removed));
    assert_eq!(snap.validators.len(), 3);
    assert!(snap.votes.is_empty());
    assert!(snap.tally.is_empty());
    assert_eq!(snap.number, Sequence::from(4));
    assert_eq!(snap.hash, headers[3].hash());
}

#[test]
fn majority_authorizes_new_validator() {
    let chain = Chain::new(4);
    let outsider = Ed25519Signer::new(ValidatorSeckey::generate()).address();

    let headers = chain.headers(&[
        (0, Some((outsider, true))),
        (1, Some((outsider, true))),
        (2, Some((outsider, true))),
    ]);
    let snap = chain.snapshot(30_000).apply(&headers, &Ed25519Verifier).unwrap();

    assert!(snap.validators.contains(outsider));
    assert_eq!(snap.validators.len(), 5);
    assert!(snap.tally.is_empty());
}

#[test]
fn repeated_vote_counts_once() {
    let chain = Chain::new(4);
    let outsider = Ed25519Signer::new(ValidatorSeckey::generate()).address();

    let headers = chain.headers(&[(0, Some((outsider, true))), (0, Some((outsider, true)))]);
    let snap = chain.snapshot(30_000).apply(&headers, &Ed25519Verifier).unwrap();

    assert_eq!(snap.votes.len(), 1);
    assert_eq!(snap.votes[0].block, Sequence::from(2));
    assert_eq!(snap.tally[&outsider].votes, 1);
}

#[test]
fn meaningless_votes_are_not_counted() {
    let chain = Chain::new(4);

    let headers = chain.headers(&[(0, Some((chain.address(1), true)))]);
    let snap = chain.snapshot(30_000).apply(&headers, &Ed25519Verifier).unwrap();

    assert!(snap.votes.is_empty());
    assert!(snap.tally.is_empty());
}

#[test]
fn checkpoint_clears_votes() {
    let chain = Chain::new(4);
    let outsider = Ed25519Signer::new(ValidatorSeckey::generate()).address();

    let headers = chain.headers(&[(0, Some((outsider, true))), (1, None)]);
    let snap = chain.snapshot(2).apply(&headers, &Ed25519Verifier).unwrap();

    assert!(snap.votes.is_empty());
    assert!(snap.tally.is_empty());
}

#[test]
fn rejects_gaps_and_strangers() {
    let chain = Chain::new(4);
    let headers = chain.headers(&[(0, None), (1, None), (2, None)]);

    assert!(matches!(
        chain
            .snapshot(30_000)
            .apply(&[headers[0].clone(), headers[2].clone()], &Ed25519Verifier),
        Err(SnapshotError::InvalidVotingChain { .. })
    ));
    assert!(matches!(
        chain.snapshot(30_000).apply(&headers[1..], &Ed25519Verifier),
        Err(SnapshotError::InvalidVotingChain { .. })
    ));

    let mut forged = headers[0].clone();
    forged.sign_seal(&Ed25519Signer::new(ValidatorSeckey::generate()));
    assert!(matches!(
        chain.snapshot(30_000).apply(&[forged], &Ed25519Verifier),
        Err(SnapshotError::UnauthorizedSigner { .. })
    ));

    let mut tampered = headers[0].clone();
    tampered.timestamp = Timestamp::from(0);
    assert!(matches!(
        chain.snapshot(30_000).apply(&[tampered], &Ed25519Verifier),
        Err(SnapshotError::InvalidSeal { .. })
    ));
}

#[test]
fn replay_is_deterministic() {
    let chain = Chain::new(4);
    let outsider = Ed25519Signer::new(ValidatorSeckey::generate()).address();
    let headers = chain.headers(&[
        (0, Some((outsider, true))),
        (1, Some((chain.address(3), false))),
        (2, Some((outsider, true))),
        (3, None),
        (1, Some((outsider, true))),
    ]);

    let at_once = chain.snapshot(30_000).apply(&headers, &Ed25519Verifier).unwrap();
    let in_steps = chain
        .snapshot(30_000)
        .apply(&headers[..2], &Ed25519Verifier)
        .unwrap()
        .apply(&headers[2..], &Ed25519Verifier)
        .unwrap();

    assert_eq!(at_once, in_steps);
    assert!(at_once.validators.contains(outsider));
}
