use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use lbft_core::address::{Address, ValidatorSeckey};
use lbft_core::block::{
    Block, BlockHash, BlockHeader, BridgeTxSignPayload, CommitSealPayload, CommittedSeal,
};
use lbft_core::config::ConsensusConfig;
use lbft_core::msg::{ConsensusMsg, Message, MessageCode, Preprepare};
use lbft_core::proposal::Proposal as _;
use lbft_core::signed::{Ed25519Signer, Ed25519Verifier, Signable as _, Signer, Verifier};
use lbft_core::timestamp::Timestamp;
use lbft_core::validator_set::{ProposerPolicy, ValidatorSet};
use lbft_core::view::{Round, Sequence, Subject, View};
use lbft_core::Signature;
use lbft_util_error::BoxedError;
use snafu::Snafu;
use tokio::sync::watch;
use tokio::time::Instant;

use super::{Core, CoreHandle, CoreStatus};
use crate::backend::{Backend, ProposalVerifyError, ProposalVerifyResult};
use crate::round_state::State;

const WAIT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
enum BridgeAction {
    Submitted { hash: BlockHash, signatures: usize },
    Confirmed { hash: BlockHash },
}

#[derive(Debug, Snafu)]
enum MockError {
    #[snafu(display("Injected failure"))]
    Injected,
}

/// What [`MockBackend`] should get wrong
#[derive(Default)]
struct Faults {
    /// Number of `validators` calls still to fail
    validators: AtomicUsize,
    commit: AtomicBool,
    /// Reported by the next `verify` call
    future_delay: Mutex<Option<Duration>>,
}

/// Backend whose chain never moves past genesis, recording everything the
/// core asks of it
struct MockBackend {
    signer: Arc<Ed25519Signer>,
    genesis: Block,
    validators: ValidatorSet,
    faults: Faults,
    gossiped: watch::Sender<Vec<Message>>,
    committed: watch::Sender<Vec<(Block, Vec<CommittedSeal>)>>,
    bridge: Mutex<Vec<BridgeAction>>,
}

#[async_trait]
impl Backend for MockBackend {
    type Proposal = Block;

    fn address(&self) -> Address {
        self.signer.address()
    }

    fn signer(&self) -> Arc<dyn Signer> {
        self.signer.clone()
    }

    fn verifier(&self) -> Arc<dyn Verifier> {
        Arc::new(Ed25519Verifier)
    }

    async fn validators(&self, _proposal: &Block) -> Result<ValidatorSet, BoxedError> {
        if self
            .faults
            .validators
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(Box::new(InjectedSnafu.build()));
        }
        Ok(self.validators.clone())
    }

    async fn parent_validators(&self, _proposal: &Block) -> Result<ValidatorSet, BoxedError> {
        Ok(self.validators.clone())
    }

    async fn gossip(&self, _valset: &ValidatorSet, payload: Vec<u8>) {
        let msg = Message::from_bytes(&payload).expect("Core sends valid messages");
        self.gossiped.send_modify(|msgs| msgs.push(msg));
    }

    async fn commit(&self, proposal: Block, seals: Vec<CommittedSeal>) -> Result<(), BoxedError> {
        if self.faults.commit.load(Ordering::SeqCst) {
            return Err(Box::new(InjectedSnafu.build()));
        }
        self.committed
            .send_modify(|committed| committed.push((proposal, seals)));
        Ok(())
    }

    async fn verify(&self, _proposal: &Block) -> ProposalVerifyResult<()> {
        match self.faults.future_delay.lock().expect("Locking failed").take() {
            Some(delay) => Err(ProposalVerifyError::Future { delay }),
            None => Ok(()),
        }
    }

    async fn last_proposal(&self) -> (Block, Option<Address>) {
        (self.genesis.clone(), None)
    }

    async fn has_proposal(&self, hash: BlockHash, _number: Sequence) -> bool {
        hash == self.genesis.hash()
    }

    async fn get_proposer(&self, _number: Sequence) -> Option<Address> {
        None
    }

    async fn submit_bridge_tx(&self, proposal: &Block, hash_signs: Vec<(Address, Signature)>) {
        self.bridge
            .lock()
            .expect("Locking failed")
            .push(BridgeAction::Submitted {
                hash: proposal.hash(),
                signatures: hash_signs.len(),
            });
    }

    async fn confirm_bridge_tx(&self, proposal: &Block) {
        self.bridge
            .lock()
            .expect("Locking failed")
            .push(BridgeAction::Confirmed {
                hash: proposal.hash(),
            });
    }
}

/// Four validators, sorted by address, with a running core for one of them
struct Setup {
    signers: Vec<Ed25519Signer>,
    me: usize,
    genesis: Block,
    backend: Arc<MockBackend>,
    handle: CoreHandle<Block>,
}

impl Setup {
    async fn start(me: usize, request_timeout_ms: u64) -> Self {
        Self::start_with_faults(me, request_timeout_ms, Faults::default()).await
    }

    async fn start_with_faults(me: usize, request_timeout_ms: u64, faults: Faults) -> Self {
        let mut signers: Vec<_> = (0..4)
            .map(|_| Ed25519Signer::new(ValidatorSeckey::generate()))
            .collect();
        signers.sort_by_key(|s| s.address());

        let addresses: Vec<_> = signers.iter().map(|s| s.address()).collect();
        let genesis = Block::genesis(BlockHeader::genesis(addresses.clone(), Timestamp::ZERO));
        let backend = Arc::new(MockBackend {
            signer: Arc::new(signers[me].clone()),
            genesis: genesis.clone(),
            validators: ValidatorSet::new(addresses, ProposerPolicy::RoundRobin),
            faults,
            gossiped: watch::channel(vec![]).0,
            committed: watch::channel(vec![]).0,
            bridge: Mutex::new(vec![]),
        });
        let config = ConsensusConfig::builder()
            .request_timeout_ms(request_timeout_ms)
            .build();

        let (core, handle) = Core::new(backend.clone(), Arc::new(config));
        tokio::spawn(core.run());

        let setup = Self {
            signers,
            me,
            genesis,
            backend,
            handle,
        };
        setup.wait_status(|s| s.view == View::from((1, 0))).await;
        setup
    }

    fn block(&self, timestamp: u64) -> Block {
        Block::builder()
            .parent(&self.genesis.header)
            .timestamp(Timestamp::from(timestamp))
            .build()
    }

    /// Index of the proposer of `round` of the first sequence
    fn proposer(&self, round: u64) -> usize {
        let address = self
            .backend
            .validators
            .proposer_for(None, Round::new(round))
            .expect("Not empty");
        self.signers
            .iter()
            .position(|s| s.address() == address)
            .expect("Is a validator")
    }

    /// Validators other than us and `except`
    fn others(&self, except: &[usize]) -> Vec<usize> {
        (0..self.signers.len())
            .filter(|i| *i != self.me && !except.contains(i))
            .collect()
    }

    async fn send(&self, from: usize, payload: ConsensusMsg<Block>, tx_block: Option<&Block>) {
        let signer = &self.signers[from];
        let mut msg = Message::new(payload.code(), payload.encode_payload(), signer.address());
        if let (ConsensusMsg::Commit(subject), Some(block)) = (&payload, tx_block) {
            msg.committed_seal = Some(CommitSealPayload(subject.digest).sign_with(signer));
            msg.hash_sign = Some(BridgeTxSignPayload(block.tx_hash()).sign_with(signer));
        }
        self.handle
            .handle_message(&msg.sign(signer).to_bytes())
            .await
            .expect("Valid message");
    }

    async fn wait_status(&self, f: impl FnMut(&CoreStatus) -> bool) -> CoreStatus {
        let mut rx = self.handle.subscribe_status();
        tokio::time::timeout(WAIT, rx.wait_for(f))
            .await
            .expect("Timeout")
            .expect("Core running")
            .clone()
    }

    async fn wait_gossiped(&self, f: impl FnMut(&Message) -> bool + Copy) {
        let mut rx = self.backend.gossiped.subscribe();
        tokio::time::timeout(WAIT, rx.wait_for(|msgs| msgs.iter().any(f)))
            .await
            .expect("Timeout")
            .expect("Backend alive");
    }

    fn round_change(round: u64) -> ConsensusMsg<Block> {
        ConsensusMsg::RoundChange(Subject {
            view: View::from((1, round)),
            digest: BlockHash::ZERO,
        })
    }

    fn gossiped_round_changes(&self) -> Vec<View> {
        self.backend
            .gossiped
            .borrow()
            .iter()
            .filter(|m| m.code == MessageCode::RoundChange)
            .map(|m| {
                m.decode_payload::<Block>()
                    .expect("Valid payload")
                    .view()
            })
            .collect()
    }

    /// Drive the core from a fresh round 0 to `Prepared` on `block`
    async fn prepare_round_0(&self, block: &Block) -> Subject {
        let proposer = self.proposer(0);
        let view = View::from((1, 0));
        let subject = Subject {
            view,
            digest: block.hash(),
        };

        self.send(
            proposer,
            ConsensusMsg::Preprepare(Preprepare {
                view,
                proposal: block.clone(),
            }),
            None,
        )
        .await;
        self.wait_status(|s| s.state == State::Preprepared).await;

        self.send(proposer, ConsensusMsg::Prepare(subject), None).await;
        let other = self.others(&[proposer])[0];
        self.send(other, ConsensusMsg::Prepare(subject), None).await;

        let status = self.wait_status(|s| s.state == State::Prepared).await;
        assert_eq!(status.locked_hash, Some(block.hash()));
        subject
    }
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn prepare_and_commit_with_quorum_of_three() {
    let setup = Setup::start(3, 60_000).await;
    assert_ne!(setup.proposer(0), setup.me);

    let block = setup.block(10);
    let subject = setup.prepare_round_0(&block).await;

    let proposer = setup.proposer(0);
    let other = setup.others(&[proposer])[0];
    setup
        .send(proposer, ConsensusMsg::Commit(subject), Some(&block))
        .await;
    setup
        .send(other, ConsensusMsg::Commit(subject), Some(&block))
        .await;
    setup.wait_status(|s| s.state == State::Committed).await;

    // A late commit must not commit again
    let last = setup.others(&[proposer, other])[0];
    setup
        .send(last, ConsensusMsg::Commit(subject), Some(&block))
        .await;
    let last_address = setup.signers[last].address();
    setup
        .wait_gossiped(move |m| m.code == MessageCode::Commit && m.address == last_address)
        .await;
    assert_eq!(setup.handle.status().state, State::Committed);

    let committed = setup.backend.committed.borrow().clone();
    assert_eq!(committed.len(), 1);
    let (committed_block, seals) = &committed[0];
    assert_eq!(committed_block.hash(), block.hash());
    assert_eq!(seals.len(), 3);
    for seal in seals {
        tokio_test::assert_ok!(
            CommitSealPayload(block.hash()).verify_signature(&Ed25519Verifier, seal.validator, seal.sig)
        );
    }

    assert_eq!(
        *setup.backend.bridge.lock().expect("Locking failed"),
        vec![BridgeAction::Confirmed { hash: block.hash() }]
    );
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn timeout_changes_round_once_quorum_agrees() {
    let setup = Setup::start(3, 300).await;

    // Timer only starts once there is something to agree on
    setup.handle.request(setup.block(10)).await;

    let status = setup.wait_status(|s| s.waiting_for_round_change).await;
    assert_eq!(status.view, View::from((1, 1)));
    setup
        .wait_gossiped(|m| m.code == MessageCode::RoundChange)
        .await;
    assert_eq!(setup.gossiped_round_changes(), vec![View::from((1, 1))]);

    let rc = ConsensusMsg::RoundChange(Subject {
        view: View::from((1, 1)),
        digest: BlockHash::ZERO,
    });
    for from in setup.others(&[])[..2].to_vec() {
        setup.send(from, rc.clone(), None).await;
    }

    let status = setup.wait_status(|s| !s.waiting_for_round_change).await;
    assert_eq!(status.view, View::from((1, 1)));
    assert_eq!(status.state, State::AcceptRequest);
    assert_eq!(
        status.proposer,
        Some(setup.signers[setup.proposer(1)].address())
    );
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn locked_validator_rejects_a_different_proposal() {
    let setup = Setup::start(3, 60_000).await;
    assert_ne!(setup.proposer(1), setup.me);

    let block = setup.block(10);
    setup.prepare_round_0(&block).await;

    let rc = ConsensusMsg::RoundChange(Subject {
        view: View::from((1, 1)),
        digest: BlockHash::ZERO,
    });
    for from in setup.others(&[]) {
        setup.send(from, rc.clone(), None).await;
    }
    let status = setup
        .wait_status(|s| s.view == View::from((1, 1)) && s.state == State::AcceptRequest)
        .await;
    assert_eq!(status.locked_hash, Some(block.hash()));

    let other_block = setup.block(11);
    assert_ne!(other_block.hash(), block.hash());
    setup
        .send(
            setup.proposer(1),
            ConsensusMsg::Preprepare(Preprepare {
                view: View::from((1, 1)),
                proposal: other_block,
            }),
            None,
        )
        .await;

    let status = setup.wait_status(|s| s.waiting_for_round_change).await;
    assert_eq!(status.view, View::from((1, 2)));
    assert_eq!(status.locked_hash, Some(block.hash()));
    assert!(setup.gossiped_round_changes().contains(&View::from((1, 2))));
    assert!(setup.backend.committed.borrow().is_empty());
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn proposer_sends_preprepare_and_submits_bridge_tx() {
    // Round robin from genesis starts at the lowest address
    let setup = Setup::start(0, 60_000).await;
    assert_eq!(setup.proposer(0), setup.me);

    let block = setup.block(10);
    setup.handle.request(block.clone()).await;
    setup
        .wait_gossiped(|m| m.code == MessageCode::Preprepare)
        .await;
    setup.wait_status(|s| s.state == State::Preprepared).await;

    let subject = Subject {
        view: View::from((1, 0)),
        digest: block.hash(),
    };
    let others = setup.others(&[]);
    for from in &others[..2] {
        setup.send(*from, ConsensusMsg::Prepare(subject), None).await;
    }
    setup.wait_status(|s| s.state == State::Prepared).await;
    for from in &others[..2] {
        setup
            .send(*from, ConsensusMsg::Commit(subject), Some(&block))
            .await;
    }
    setup.wait_status(|s| s.state == State::Committed).await;

    assert_eq!(
        *setup.backend.bridge.lock().expect("Locking failed"),
        vec![BridgeAction::Submitted {
            hash: block.hash(),
            signatures: 3
        }]
    );
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn messages_from_strangers_are_ignored() {
    let setup = Setup::start(3, 60_000).await;
    let stranger = Ed25519Signer::new(ValidatorSeckey::generate());

    let view = View::from((1, 0));
    let payload = ConsensusMsg::Preprepare(Preprepare {
        view,
        proposal: setup.block(10),
    });
    let msg = Message::new(
        MessageCode::Preprepare,
        payload.encode_payload(),
        stranger.address(),
    )
    .sign(&stranger);
    setup
        .handle
        .handle_message(&msg.to_bytes())
        .await
        .expect("Authentic");

    // A forged sender does not even get queued
    let mut forged = msg.clone();
    forged.address = setup.signers[setup.proposer(0)].address();
    tokio_test::assert_err!(setup.handle.handle_message(&forged.to_bytes()).await);

    // Round trip something through the core to make sure it processed both
    setup.handle.request(setup.block(10)).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(setup.handle.status().state, State::AcceptRequest);
    assert!(setup.backend.gossiped.borrow().is_empty());
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn validators_are_reloaded_after_a_failed_lookup() {
    let setup = Setup::start_with_faults(
        3,
        300,
        Faults {
            validators: AtomicUsize::new(1),
            ..Faults::default()
        },
    )
    .await;
    assert_eq!(setup.handle.status().proposer, None);

    // The timeout loads the validators again and joins the next round
    let status = setup.wait_status(|s| s.proposer.is_some()).await;
    assert_eq!(status.view, View::from((1, 1)));
    assert!(status.waiting_for_round_change);
    setup
        .wait_gossiped(|m| m.code == MessageCode::RoundChange)
        .await;
    assert_eq!(setup.gossiped_round_changes(), vec![View::from((1, 1))]);

    // Our own round change counts towards the quorum again
    for from in setup.others(&[])[..2].to_vec() {
        setup.send(from, Setup::round_change(1), None).await;
    }
    let status = setup.wait_status(|s| !s.waiting_for_round_change).await;
    assert_eq!(status.view, View::from((1, 1)));
    assert_eq!(
        status.proposer,
        Some(setup.signers[setup.proposer(1)].address())
    );
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn failed_commit_unlocks_and_changes_round() {
    let setup = Setup::start(3, 60_000).await;
    let block = setup.block(10);
    let subject = setup.prepare_round_0(&block).await;

    setup.backend.faults.commit.store(true, Ordering::SeqCst);
    let proposer = setup.proposer(0);
    let other = setup.others(&[proposer])[0];
    setup
        .send(proposer, ConsensusMsg::Commit(subject), Some(&block))
        .await;
    setup
        .send(other, ConsensusMsg::Commit(subject), Some(&block))
        .await;

    let status = setup.wait_status(|s| s.waiting_for_round_change).await;
    assert_eq!(status.view, View::from((1, 1)));
    assert_eq!(status.locked_hash, None);
    assert_eq!(setup.gossiped_round_changes(), vec![View::from((1, 1))]);
    assert!(setup.backend.committed.borrow().is_empty());
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn early_proposal_is_handled_once_its_time_comes() {
    let setup = Setup::start(3, 60_000).await;
    let delay = Duration::from_secs(1);
    *setup
        .backend
        .faults
        .future_delay
        .lock()
        .expect("Locking failed") = Some(delay);

    let start = Instant::now();
    setup
        .send(
            setup.proposer(0),
            ConsensusMsg::Preprepare(Preprepare {
                view: View::from((1, 0)),
                proposal: setup.block(10),
            }),
            None,
        )
        .await;

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(setup.handle.status().state, State::AcceptRequest);

    setup.wait_status(|s| s.state == State::Preprepared).await;
    assert!(delay <= start.elapsed());
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn old_proposal_from_its_proposer_gets_our_commit() {
    let setup = Setup::start(3, 60_000).await;
    let me = setup.signers[setup.me].address();
    let genesis = setup.genesis.clone();
    let preprepare = ConsensusMsg::Preprepare(Preprepare {
        view: View::from((0, 0)),
        proposal: genesis.clone(),
    });

    let proposer = setup.proposer(0);
    let not_proposer = setup.others(&[proposer])[0];
    setup.send(not_proposer, preprepare.clone(), None).await;
    setup.send(proposer, preprepare, None).await;

    setup
        .wait_gossiped(move |m| m.code == MessageCode::Commit && m.address == me)
        .await;
    let commits: Vec<_> = setup
        .backend
        .gossiped
        .borrow()
        .iter()
        .filter(|m| m.code == MessageCode::Commit)
        .cloned()
        .collect();
    assert_eq!(commits.len(), 1);
    assert!(commits[0].committed_seal.is_some());
    assert!(matches!(
        commits[0].decode_payload::<Block>().expect("Valid payload"),
        ConsensusMsg::Commit(Subject { view, digest })
            if view == View::from((0, 0)) && digest == genesis.hash()
    ));

    let status = setup.handle.status();
    assert_eq!(status.view, View::from((1, 0)));
    assert_eq!(status.state, State::AcceptRequest);
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn weak_certificate_pulls_a_waiting_validator_forward() {
    let setup = Setup::start(3, 300).await;
    setup.handle.request(setup.block(10)).await;
    setup
        .wait_status(|s| s.waiting_for_round_change && s.view == View::from((1, 1)))
        .await;

    // One more than can be faulty asks for round 3
    for from in setup.others(&[])[..2].to_vec() {
        setup.send(from, Setup::round_change(3), None).await;
    }
    setup.wait_status(|s| s.view == View::from((1, 3))).await;
    assert_eq!(
        setup.gossiped_round_changes(),
        vec![View::from((1, 1)), View::from((1, 3))]
    );
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn timeout_skips_to_the_round_peers_ask_for() {
    let setup = Setup::start(3, 300).await;
    setup.handle.request(setup.block(10)).await;

    for from in setup.others(&[])[..2].to_vec() {
        setup.send(from, Setup::round_change(2), None).await;
    }
    // Not enough to change round right away
    assert_eq!(setup.handle.status().view, View::from((1, 0)));

    setup.wait_status(|s| s.view == View::from((1, 2))).await;
    assert_eq!(setup.gossiped_round_changes(), vec![View::from((1, 2))]);
}
