// SPDX-License-Identifier: MIT

//! LBFT consensus state machine
//!
//! A PBFT-style three phase commit (preprepare, prepare, commit) with round
//! changes, agreeing on exactly one proposal per sequence among a set of
//! validators, tolerating `F = (N-1)/3` faulty ones.
//!
//! [`Core`] runs as a single actor, owning all protocol state. The node it
//! runs in implements [`Backend`], and feeds it through a [`CoreHandle`].

mod actor;
mod backend;
mod backlog;
pub mod error;
mod message_set;
mod round_change_set;
mod round_state;
mod timer;

pub use actor::{Core, CoreHandle, CoreStatus};
pub use backend::{Backend, ProposalVerifyError, ProposalVerifyResult};
pub use backlog::{Backlog, PendingRequests};
pub use message_set::MessageSet;
pub use round_change_set::RoundChangeSet;
pub use round_state::{RoundState, State};

const LOG_TARGET: &str = "lbft::consensus";
