pub mod backward;
pub mod forward;
pub mod gap;

use std::sync::Arc;

use crate::chain::ChainClient;
use crate::config::RuntimeConfig;
use crate::lock::EpochLock;
use crate::store::StoreGateway;
use crate::sync::EpochSyncer;

/// Shared handles every reconciliation worker needs. Cloned cheaply (each
/// field is reference-counted or a plain connection handle) into each
/// `tokio::spawn`ed task.
#[derive(Clone)]
pub struct WorkerContext {
    pub cfg: Arc<RuntimeConfig>,
    pub chain: Arc<ChainClient>,
    pub store: Arc<StoreGateway>,
    pub lock: Arc<EpochLock>,
}

impl WorkerContext {
    pub fn syncer(&self) -> EpochSyncer<'_> {
        EpochSyncer::new(&self.chain, &self.store, &self.lock, self.cfg.seed_epoch, self.cfg.seed_block)
    }
}
