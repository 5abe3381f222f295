use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, Weak};

use async_trait::async_trait;
use lbft_core::address::Address;
use lbft_util_error::BoxedErrorResult;
use lbft_util_error::fmt::FmtCompact as _;
use snafu::OptionExt as _;
use tracing::trace;

use crate::error::UnknownPeerSnafu;
use crate::{Engine, LOG_TARGET};

/// Point to point delivery of consensus messages to other validators
///
/// Framing, connection management and handshakes are the implementation's
/// concern. Received messages are fed back through
/// [`crate::Engine::handle_message`].
#[async_trait]
pub trait Network: Send + Sync + 'static {
    async fn send(&self, peer: Address, payload: Vec<u8>) -> BoxedErrorResult<()>;
}

#[derive(Default)]
struct Router {
    engines: BTreeMap<Address, Weak<Engine>>,
}

/// Connects engines running in one process, for devnets and tests
#[derive(Default, Clone)]
pub struct LocalNetwork {
    router: Arc<RwLock<Router>>,
}

impl LocalNetwork {
    /// Network handle to give to the engine of `address`
    pub fn endpoint(&self, address: Address) -> Arc<LocalEndpoint> {
        Arc::new(LocalEndpoint {
            address,
            router: self.router.clone(),
        })
    }

    pub fn register(&self, engine: &Arc<Engine>) {
        self.router
            .write()
            .expect("Locking failed")
            .engines
            .insert(engine.address(), Arc::downgrade(engine));
    }
}

pub struct LocalEndpoint {
    address: Address,
    router: Arc<RwLock<Router>>,
}

#[async_trait]
impl Network for LocalEndpoint {
    async fn send(&self, peer: Address, payload: Vec<u8>) -> BoxedErrorResult<()> {
        let engine = self
            .router
            .read()
            .expect("Locking failed")
            .engines
            .get(&peer)
            .and_then(Weak::upgrade);
        let engine = engine.context(UnknownPeerSnafu { peer })?;

        if let Err(err) = engine.handle_message(self.address, &payload).await {
            trace!(
                target: LOG_TARGET,
                from = %self.address.short(),
                to = %peer.short(),
                err = %err.fmt_compact(),
                "Peer rejected message"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests;
