// SPDX-License-Identifier: MIT

//! Glue between the consensus core and the relay node
//!
//! [`RelayBackend`] implements the consensus [`Backend`] on top of the local
//! [`BlockStore`], validator [`Snapshots`], a peer [`Network`] and a
//! [`BridgeSubmitter`]. [`Engine`] is what the rest of the node talks to:
//! header verification, block preparation and sealing.
//!
//! [`Backend`]: lbft_consensus::Backend
//! [`Snapshots`]: lbft_snapshot::Snapshots

mod backend;
mod bridge;
mod chain;
mod engine;
pub mod error;
mod network;
mod verify;

pub use backend::RelayBackend;
pub use bridge::{BridgeDispatcher, BridgeSubmitter, BridgeTx};
pub use chain::BlockStore;
pub use engine::{Engine, PROTOCOL, Protocol};
pub use network::{LocalEndpoint, LocalNetwork, Network};

const LOG_TARGET: &str = "lbft::engine";
