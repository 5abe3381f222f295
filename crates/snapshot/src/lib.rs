// SPDX-License-Identifier: MIT

//! Voting based validator set reconfiguration
//!
//! Every block header can carry one vote of its proposer, to add or remove
//! a validator. A [`Snapshot`] is the result of folding these votes from
//! genesis (or the last checkpoint) up to a given block, and
//! [`Snapshots`] computes, caches and persists them.

mod error;
mod snapshot;
mod snapshots;
mod tables;

pub use error::{SnapshotError, SnapshotResult};
pub use snapshot::{Snapshot, Tally, Vote};
pub use snapshots::{HeaderReader, Snapshots};

const LOG_TARGET: &str = "lbft::snapshot";
