mod check_message;
mod commit;
mod preprepare;
mod prepare;
mod request;
mod round_change;
mod start_round;

use std::collections::VecDeque;
use std::ops::ControlFlow;
use std::sync::Arc;

use lbft_core::address::Address;
use lbft_core::block::BlockHash;
use lbft_core::config::ConsensusConfig;
use lbft_core::msg::{ConsensusMsg, Message, MessageCode};
use lbft_core::signed::{Signer, Verifier};
use lbft_core::validator_set::ValidatorSet;
use lbft_core::view::{Round, View};
use lbft_util_error::fmt::FmtCompact as _;
use snafu::{OptionExt as _, ResultExt as _};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, instrument, trace, warn};

use crate::backend::Backend;
use crate::backlog::{Backlog, PendingRequests};
use crate::error::{
    CoreError, CoreResult, ErrorKind, FailedDecodeSnafu, InvalidSignatureSnafu,
    UnauthorizedAddressSnafu,
};
use crate::round_change_set::RoundChangeSet;
use crate::round_state::{RoundState, State};
use crate::timer::Timer;
use crate::LOG_TARGET;

/// Capacity of the queue external producers post to
const EVENT_QUEUE_CAPACITY: usize = 1024;

pub(crate) enum Event<P> {
    /// Local request to propose
    Request(P),
    /// Authenticated message from the network
    Message(Message),
    /// Buffered message whose view we have now reached
    Backlog(Message),
    /// Round change timer for `view` fired
    Timeout { view: View },
    /// Deferred preprepare whose proposal should now be timely
    FuturePreprepare(Message),
    /// The block we committed became the chain head
    FinalCommitted,
    Stop,
}

/// Snapshot of what the core is doing, for observers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreStatus {
    pub view: View,
    pub state: State,
    pub waiting_for_round_change: bool,
    pub locked_hash: Option<BlockHash>,
    pub proposer: Option<Address>,
}

/// Cheap, cloneable way to feed events to a running [`Core`]
///
/// Sends only fail when the core has stopped, which is silently ignored.
pub struct CoreHandle<P> {
    tx: mpsc::Sender<Event<P>>,
    verifier: Arc<dyn Verifier>,
    status_rx: watch::Receiver<CoreStatus>,
}

impl<P> Clone for CoreHandle<P> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            verifier: self.verifier.clone(),
            status_rx: self.status_rx.clone(),
        }
    }
}

impl<P> CoreHandle<P>
where
    P: Send + 'static,
{
    async fn send(&self, event: Event<P>) {
        if self.tx.send(event).await.is_err() {
            trace!(target: LOG_TARGET, "Core stopped, dropping event");
        }
    }

    /// Ask the core to propose `proposal` once we are at its sequence
    pub async fn request(&self, proposal: P) {
        self.send(Event::Request(proposal)).await;
    }

    /// Decode and authenticate a message received from a peer, and queue it
    ///
    /// Runs on the caller's task, keeping signature checks off the core.
    pub async fn handle_message(&self, bytes: &[u8]) -> CoreResult<()> {
        let msg = Message::from_bytes(bytes).context(FailedDecodeSnafu)?;
        msg.verify(self.verifier.as_ref())
            .ok()
            .context(InvalidSignatureSnafu {
                address: msg.address,
            })?;
        self.send(Event::Message(msg)).await;
        Ok(())
    }

    pub async fn final_committed(&self) {
        self.send(Event::FinalCommitted).await;
    }

    pub async fn stop(&self) {
        self.send(Event::Stop).await;
    }

    pub fn status(&self) -> CoreStatus {
        self.status_rx.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<CoreStatus> {
        self.status_rx.clone()
    }
}

/// The consensus state machine
///
/// Runs as a single actor ([`Core::run`]) that owns all the protocol state,
/// and processes events one at a time. Everything else talks to it through
/// a [`CoreHandle`].
pub struct Core<B: Backend> {
    backend: Arc<B>,
    config: Arc<ConsensusConfig>,
    address: Address,
    signer: Arc<dyn Signer>,
    verifier: Arc<dyn Verifier>,

    state: State,
    valset: ValidatorSet,
    current: RoundState<B::Proposal>,
    waiting_for_round_change: bool,
    round_change_set: RoundChangeSet,
    backlog: Backlog,
    pending_requests: PendingRequests<B::Proposal>,

    round_change_timer: Timer,
    future_preprepare_timer: Timer,

    events_tx: mpsc::Sender<Event<B::Proposal>>,
    events_rx: mpsc::Receiver<Event<B::Proposal>>,
    /// Events the core posts to itself, handled before any external ones
    internal: VecDeque<Event<B::Proposal>>,
    status_tx: watch::Sender<CoreStatus>,
}

impl<B> Core<B>
where
    B: Backend,
{
    pub fn new(backend: Arc<B>, config: Arc<ConsensusConfig>) -> (Self, CoreHandle<B::Proposal>) {
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let valset = ValidatorSet::new([], config.proposer_policy);
        let current = RoundState::new(View::default());
        let (status_tx, status_rx) = watch::channel(CoreStatus {
            view: current.view(),
            state: State::AcceptRequest,
            waiting_for_round_change: false,
            locked_hash: None,
            proposer: None,
        });
        let verifier = backend.verifier();

        let handle = CoreHandle {
            tx: events_tx.clone(),
            verifier: verifier.clone(),
            status_rx,
        };

        let core = Self {
            address: backend.address(),
            signer: backend.signer(),
            verifier,
            backend,
            config,
            state: State::AcceptRequest,
            valset,
            current,
            waiting_for_round_change: false,
            round_change_set: RoundChangeSet::default(),
            backlog: Backlog::default(),
            pending_requests: PendingRequests::default(),
            round_change_timer: Timer::default(),
            future_preprepare_timer: Timer::default(),
            events_tx,
            events_rx,
            internal: VecDeque::new(),
            status_tx,
        };

        (core, handle)
    }

    /// Run until stopped through the [`CoreHandle`]
    #[instrument(
        target = LOG_TARGET,
        name = "core",
        skip_all,
        fields(me = %self.address.short())
    )]
    pub async fn run(mut self) {
        info!(target: LOG_TARGET, "Starting consensus core");
        self.start_new_round(Round::ZERO).await;

        loop {
            self.publish_status();

            let event = match self.internal.pop_front() {
                Some(event) => event,
                None => match self.events_rx.recv().await {
                    Some(event) => event,
                    None => break,
                },
            };

            if self.handle_event(event).await.is_break() {
                break;
            }
        }

        self.round_change_timer.stop();
        self.future_preprepare_timer.stop();
        info!(target: LOG_TARGET, "Consensus core stopped");
    }

    async fn handle_event(&mut self, event: Event<B::Proposal>) -> ControlFlow<()> {
        match event {
            Event::Request(proposal) => self.handle_request(proposal).await,
            Event::Message(msg) => {
                if let Err(err) = self.handle_msg(&msg).await {
                    self.log_msg_error(&msg, &err);
                } else {
                    self.gossip(&msg).await;
                }
            }
            Event::Backlog(msg) => {
                if let Err(err) = self.handle_checked_msg(&msg).await {
                    self.log_msg_error(&msg, &err);
                } else {
                    self.gossip(&msg).await;
                }
            }
            Event::FuturePreprepare(msg) => {
                if let Err(err) = self.handle_checked_msg(&msg).await {
                    self.log_msg_error(&msg, &err);
                }
            }
            Event::Timeout { view } => {
                if view == self.current.view() {
                    self.handle_timeout().await;
                } else {
                    trace!(target: LOG_TARGET, %view, "Ignoring stale timeout");
                }
            }
            Event::FinalCommitted => self.handle_final_committed().await,
            Event::Stop => return ControlFlow::Break(()),
        }
        ControlFlow::Continue(())
    }

    async fn handle_msg(&mut self, msg: &Message) -> CoreResult<()> {
        if !self.valset.contains(msg.address) {
            return UnauthorizedAddressSnafu {
                address: msg.address,
            }
            .fail();
        }
        self.handle_checked_msg(msg).await
    }

    /// Handle a message from a known validator
    async fn handle_checked_msg(&mut self, msg: &Message) -> CoreResult<()> {
        let payload = msg
            .decode_payload::<B::Proposal>()
            .context(FailedDecodeSnafu)?;
        let view = payload.view();

        let res = match payload {
            ConsensusMsg::Preprepare(preprepare) => self.handle_preprepare(msg, preprepare).await,
            ConsensusMsg::Prepare(subject) => self.handle_prepare(msg, subject).await,
            ConsensusMsg::Commit(subject) => self.handle_commit(msg, subject).await,
            ConsensusMsg::RoundChange(subject) => self.handle_round_change(msg, subject).await,
        };

        if let Err(CoreError::FutureMessage) = res {
            self.store_backlog(view, msg.clone());
        }
        res
    }

    fn store_backlog(&mut self, view: View, msg: Message) {
        if msg.address == self.address {
            warn!(target: LOG_TARGET, %view, code = %msg.code, "Backlog from self");
            return;
        }
        trace!(
            target: LOG_TARGET,
            %view,
            code = %msg.code,
            from = %msg.address.short(),
            "Storing future message"
        );
        self.backlog.push(view, msg);
    }

    /// Relay a message from a peer we successfully handled
    async fn gossip(&self, msg: &Message) {
        if msg.address != self.address {
            self.backend.gossip(&self.valset, msg.to_bytes()).await;
        }
    }

    /// Sign and send to every validator, including ourselves
    async fn broadcast(&mut self, msg: Message) {
        let msg = msg.sign(self.signer.as_ref());
        trace!(
            target: LOG_TARGET,
            code = %msg.code,
            view = %self.current.view(),
            "Broadcasting"
        );
        self.backend.gossip(&self.valset, msg.to_bytes()).await;
        self.internal.push_back(Event::Message(msg));
    }

    fn is_proposer(&self) -> bool {
        self.valset.is_proposer(self.address)
    }

    fn quorum_size(&self) -> usize {
        self.config
            .quorum_size(&self.valset, self.current.sequence())
    }

    fn publish_status(&self) {
        self.status_tx.send_if_modified(|status| {
            let new = CoreStatus {
                view: self.current.view(),
                state: self.state,
                waiting_for_round_change: self.waiting_for_round_change,
                locked_hash: self.current.locked_hash(),
                proposer: self.valset.proposer(),
            };
            if *status == new {
                return false;
            }
            *status = new;
            true
        });
    }

    fn log_msg_error(&self, msg: &Message, err: &CoreError) {
        let code: MessageCode = msg.code;
        let from = msg.address.short();
        let view = self.current.view();
        match err.kind() {
            ErrorKind::Sequencing => {
                trace!(target: LOG_TARGET, %code, %from, %view, err = %err.fmt_compact(), "Message not processed");
            }
            ErrorKind::Malformed | ErrorKind::Authorization => {
                debug!(target: LOG_TARGET, %code, %from, %view, err = %err.fmt_compact(), "Rejected message");
            }
            ErrorKind::Safety | ErrorKind::Local => {
                warn!(target: LOG_TARGET, %code, %from, %view, err = %err.fmt_compact(), "Failed to handle message");
            }
        }
    }
}

#[cfg(test)]
mod tests;
