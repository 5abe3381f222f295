// SPDX-License-Identifier: MIT

//! Command line entry point of a relay validator

mod devnet;
mod logging;
mod opts;

use std::sync::Arc;

use async_trait::async_trait;
use clap::Parser as _;
use lbft_core::block::TxHash;
use lbft_core::config::ConsensusConfig;
use lbft_core::view::Sequence;
use lbft_engine::{BridgeSubmitter, BridgeTx};
use lbft_util_error::{BoxedErrorResult, WhateverResult};
use opts::{Commands, Opts};
use snafu::ResultExt as _;
use tracing::info;

const LOG_TARGET: &str = "lbft";

pub struct Lbft;

#[bon::bon]
impl Lbft {
    #[builder(finish_fn = run, start_fn = builder)]
    pub async fn build(
        /// Where committed bridge transactions go, logged only if not set
        bridge: Option<Arc<dyn BridgeSubmitter>>,
    ) -> WhateverResult<()> {
        let opts = Opts::parse();
        logging::init_logging(opts.verbose)?;

        let config = match &opts.config {
            Some(path) => serde_json::from_str(
                &tokio::fs::read_to_string(path)
                    .await
                    .whatever_context("Failed to read config file")?,
            )
            .whatever_context("Failed to parse config file")?,
            None => ConsensusConfig::default(),
        };

        match opts.command {
            Commands::Config => {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&config).whatever_context("Can't fail")?
                );
            }
            Commands::Devnet { validators, blocks } => {
                devnet::Devnet::builder()
                    .config(Arc::new(config))
                    .validators(validators)
                    .maybe_data_dir(opts.data_dir)
                    .bridge(bridge.unwrap_or_else(|| Arc::new(LoggingBridge)))
                    .build()
                    .await?
                    .run(blocks)
                    .await?;
            }
        }

        Ok(())
    }
}

/// Stands in for a destination chain
struct LoggingBridge;

#[async_trait]
impl BridgeSubmitter for LoggingBridge {
    async fn submit(&self, tx: &BridgeTx) -> BoxedErrorResult<()> {
        info!(
            target: LOG_TARGET,
            number = %tx.number,
            tx_hash = %tx.tx_hash,
            transfers = tx.transfers.len(),
            signatures = tx.signatures.len(),
            "Bridge transaction submitted"
        );
        Ok(())
    }

    async fn confirm(&self, number: Sequence, tx_hash: TxHash) {
        info!(
            target: LOG_TARGET,
            %number,
            %tx_hash,
            "Bridge transaction confirmed"
        );
    }
}
