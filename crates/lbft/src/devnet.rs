use std::path::PathBuf;
use std::sync::Arc;

use lbft_core::address::ValidatorSeckey;
use lbft_core::block::{Block, BlockHeader, BridgeTransfer, TxHash};
use lbft_core::config::ConsensusConfig;
use lbft_core::proposal::Proposal as _;
use lbft_core::signed::{Ed25519Signer, Ed25519Verifier, Signer as _};
use lbft_core::timestamp::Timestamp;
use lbft_db::Database;
use lbft_engine::{BlockStore, BridgeSubmitter, Engine, LocalNetwork};
use lbft_util_error::WhateverResult;
use lbft_util_error::fmt::FmtCompact as _;
use snafu::{ResultExt as _, ensure_whatever};
use tokio::sync::oneshot;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::LOG_TARGET;

/// Validators running in one process, talking over a [`LocalNetwork`]
pub(crate) struct Devnet {
    engines: Vec<Arc<Engine>>,
    chains: Vec<Arc<BlockStore>>,
}

#[bon::bon]
impl Devnet {
    #[builder]
    pub(crate) async fn new(
        config: Arc<ConsensusConfig>,
        validators: usize,
        data_dir: Option<PathBuf>,
        bridge: Arc<dyn BridgeSubmitter>,
    ) -> WhateverResult<Self> {
        ensure_whatever!(0 < validators, "Devnet needs at least one validator");

        let seckeys: Vec<_> = (0..validators).map(devnet_seckey).collect();
        // Fixed, so the same data dir can be reopened
        let genesis = Block::genesis(BlockHeader::genesis(
            seckeys.iter().map(|s| s.address()).collect(),
            Timestamp::ZERO,
        ));
        if let Some(data_dir) = &data_dir {
            tokio::fs::create_dir_all(data_dir)
                .await
                .whatever_context("Failed to create/open data dir")?;
        }

        let network = LocalNetwork::default();
        let mut engines = vec![];
        let mut chains = vec![];
        for (i, seckey) in seckeys.into_iter().enumerate() {
            let db = match &data_dir {
                Some(data_dir) => Database::open(data_dir.join(format!("validator-{i}.redb"))).await,
                None => Database::new_in_memory().await,
            }
            .whatever_context("Failed to open database")?;
            let chain = Arc::new(
                BlockStore::open(Arc::new(db), genesis.clone())
                    .await
                    .whatever_context("Failed to open block store")?,
            );

            let signer = Ed25519Signer::new(seckey);
            let engine = Arc::new(
                Engine::builder()
                    .config(config.clone())
                    .signer(Arc::new(signer.clone()))
                    .verifier(Arc::new(Ed25519Verifier))
                    .chain(chain.clone())
                    .network(network.endpoint(signer.address()))
                    .bridge(bridge.clone())
                    .build(),
            );
            network.register(&engine);
            info!(
                target: LOG_TARGET,
                validator = i,
                address = %signer.address(),
                head = %chain.head().number(),
                "Validator ready"
            );
            engines.push(engine);
            chains.push(chain);
        }

        Ok(Self { engines, chains })
    }
}

impl Devnet {
    /// Run until every validator committed `blocks` more blocks, or Ctrl-C
    pub(crate) async fn run(self, blocks: u64) -> WhateverResult<()> {
        let mut sealers = JoinSet::new();
        for (engine, chain) in self.engines.iter().zip(&self.chains) {
            engine.start().whatever_context("Failed to start engine")?;
            sealers.spawn(seal_loop(engine.clone(), chain.clone()));
        }

        let target = self
            .chains
            .iter()
            .map(|chain| chain.head().number().to_number())
            .max()
            .unwrap_or_default()
            + blocks;

        let all_reached = async {
            for chain in &self.chains {
                let mut heads = chain.subscribe_head();
                if heads
                    .wait_for(|head| target <= head.number().to_number())
                    .await
                    .is_err()
                {
                    return;
                }
            }
        };
        tokio::select! {
            _ = all_reached => {
                info!(target: LOG_TARGET, height = target, "Devnet reached target height");
            }
            res = tokio::signal::ctrl_c() => {
                res.whatever_context("Failed to wait for Ctrl-C")?;
                info!(target: LOG_TARGET, "Interrupted");
            }
        }

        sealers.abort_all();
        for engine in &self.engines {
            engine.close().await;
        }
        Ok(())
    }
}

fn devnet_seckey(i: usize) -> ValidatorSeckey {
    ValidatorSeckey::from_bytes(*blake3::hash(format!("lbft-devnet-{i}").as_bytes()).as_bytes())
}

/// Seal a block with one synthetic transfer on top of every new head
async fn seal_loop(engine: Arc<Engine>, chain: Arc<BlockStore>) {
    let mut heads = chain.subscribe_head();
    loop {
        let head = heads.borrow_and_update().clone();
        let number = head.number().next_expect();
        let mut block = Block::builder()
            .parent(&head.header)
            .transfers(vec![BridgeTransfer {
                source_chain: 1,
                dest_chain: 2,
                source_tx: TxHash::from_bytes(*blake3::hash(&number.to_bytes()).as_bytes()),
                recipient: engine.address().to_bytes().to_vec(),
                amount: u128::from(number.to_number()),
            }])
            .timestamp(Timestamp::ZERO)
            .build();

        let (stop_tx, stop_rx) = oneshot::channel();
        match engine.prepare(&mut block.header).await {
            Ok(()) => {
                if let Err(err) = engine.seal(block, stop_rx).await {
                    debug!(target: LOG_TARGET, %number, err = %err.fmt_compact(), "Not sealing");
                }
            }
            Err(err) => {
                warn!(target: LOG_TARGET, %number, err = %err.fmt_compact(), "Failed to prepare block");
            }
        }

        if heads.changed().await.is_err() {
            return;
        }
        drop(stop_tx);
    }
}
