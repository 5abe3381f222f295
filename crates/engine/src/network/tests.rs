use std::sync::Arc;

use async_trait::async_trait;
use lbft_core::address::ValidatorSeckey;
use lbft_core::block::{Block, BlockHeader, TxHash};
use lbft_core::config::ConsensusConfig;
use lbft_core::signed::{Ed25519Signer, Ed25519Verifier, Signer as _};
use lbft_core::timestamp::Timestamp;
use lbft_core::view::Sequence;
use lbft_db::Database;
use lbft_util_error::BoxedErrorResult;

use super::{LocalNetwork, Network as _};
use crate::bridge::{BridgeSubmitter, BridgeTx};
use crate::chain::BlockStore;
use crate::engine::Engine;
use crate::error::NetworkError;

struct NoBridge;

#[async_trait]
impl BridgeSubmitter for NoBridge {
    async fn submit(&self, _tx: &BridgeTx) -> BoxedErrorResult<()> {
        Ok(())
    }

    async fn confirm(&self, _number: Sequence, _tx_hash: TxHash) {}
}

fn is_unknown_peer(err: &lbft_util_error::BoxedError) -> bool {
    matches!(
        err.downcast_ref::<NetworkError>(),
        Some(NetworkError::UnknownPeer { .. })
    )
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn delivers_only_to_live_registered_engines() {
    let network = LocalNetwork::default();
    let me = Ed25519Signer::new(ValidatorSeckey::generate());
    let peer = Ed25519Signer::new(ValidatorSeckey::generate());
    let endpoint = network.endpoint(me.address());

    let err = endpoint
        .send(peer.address(), vec![1, 2, 3])
        .await
        .expect_err("Nobody registered");
    assert!(is_unknown_peer(&err));

    let genesis = Block::genesis(BlockHeader::genesis(
        vec![me.address(), peer.address()],
        Timestamp::ZERO,
    ));
    let db = Arc::new(Database::new_in_memory().await.expect("In-memory db"));
    let chain = Arc::new(BlockStore::open(db, genesis).await.expect("Fresh store"));
    let engine = Arc::new(
        Engine::builder()
            .config(Arc::new(ConsensusConfig::default()))
            .signer(Arc::new(peer.clone()))
            .verifier(Arc::new(Ed25519Verifier))
            .chain(chain)
            .network(network.endpoint(peer.address()))
            .bridge(Arc::new(NoBridge))
            .build(),
    );
    network.register(&engine);

    // Delivered; the engine is not started, which is its own business
    tokio_test::assert_ok!(endpoint.send(peer.address(), vec![1, 2, 3]).await);

    drop(engine);
    let err = endpoint
        .send(peer.address(), vec![1, 2, 3])
        .await
        .expect_err("Engine gone");
    assert!(is_unknown_peer(&err));
}
