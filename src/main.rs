// =============================================================================
// Epoch sentinel — main entry point
// =============================================================================
//
// Wires the frozen `RuntimeConfig`, chain client, store, durable buffer,
// distributed lock, and pub/sub bus, then spawns every long-lived worker:
// three reconciliation workers, the round watcher, the two live-ingest
// tasks, the prediction aggregator, and the trader. A shutdown broadcast
// cancels each worker's `tokio::select!`, joined with a 5 s timeout.
// =============================================================================

mod aggregator;
mod buffer;
mod bus;
mod chain;
mod config;
mod decision;
mod error;
mod estimator;
mod ingest;
mod lock;
mod messages;
mod reconcile;
mod round_watcher;
mod store;
mod sync;
mod trader;
mod types;

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::bus::PubSubBus;
use crate::buffer::DurableBuffer;
use crate::chain::ChainClient;
use crate::config::RuntimeConfig;
use crate::lock::EpochLock;
use crate::reconcile::WorkerContext;
use crate::store::StoreGateway;

const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("epoch sentinel starting up");

    let cfg = Arc::new(RuntimeConfig::load()?);

    let store = Arc::new(StoreGateway::connect(&cfg.database_url, cfg.db_pool_size).await?);
    let chain = Arc::new(ChainClient::connect(&cfg).await?);
    let buffer = Arc::new(tokio::sync::Mutex::new(
        DurableBuffer::connect(&cfg.redis_url, &cfg.redis_stream, &cfg.redis_group, "sentinel-0").await?,
    ));
    let lock_client = redis::Client::open(cfg.redis_url.as_str())?;
    let lock_conn = redis::aio::ConnectionManager::new(lock_client).await?;
    let lock = Arc::new(EpochLock::new(lock_conn));
    let bus = Arc::new(PubSubBus::new());

    let ctx = WorkerContext { cfg: cfg.clone(), chain: chain.clone(), store: store.clone(), lock: lock.clone() };

    let mut handles = Vec::new();

    handles.push(tokio::spawn(reconcile::forward::run(ctx.clone())));
    handles.push(tokio::spawn(reconcile::backward::run(ctx.clone())));
    handles.push(tokio::spawn(reconcile::gap::run(ctx.clone())));
    handles.push(tokio::spawn(round_watcher::run(chain.clone(), bus.clone())));
    handles.push(tokio::spawn(ingest::listener::run(chain.clone(), buffer.clone(), bus.clone())));
    handles.push(tokio::spawn(ingest::consumer::run(buffer.clone(), store.clone(), bus.clone())));

    let cache = aggregator::spawn(store.clone(), bus.clone(), cfg.final_advance_ms);
    let _ = cache;

    handles.push(tokio::spawn(trader::run(chain.clone(), store.clone(), bus.clone(), cfg.clone())));

    info!("all workers spawned, press Ctrl+C to stop");

    tokio::signal::ctrl_c().await?;
    warn!("shutdown signal received, draining workers");

    // Workers loop forever (reconnect-on-error); none holds an in-flight
    // epoch-sync that an abort would corrupt, since the distributed lock's
    // TTL covers a crash the same way it covers a signal. Abort each task
    // directly rather than threading a cooperative shutdown receiver through
    // every `tokio::select!`.
    for handle in &handles {
        handle.abort();
    }
    let _ = tokio::time::timeout(SHUTDOWN_DRAIN_TIMEOUT, futures_util::future::join_all(handles)).await;

    info!("epoch sentinel shut down complete");
    Ok(())
}
