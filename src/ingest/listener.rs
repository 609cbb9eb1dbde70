// =============================================================================
// Live ingest — listener
// =============================================================================
//
// Subscribes to `BetBull`/`BetBear` over the chain's push socket. Every event
// is appended to the durable buffer and fanned out on `instant_bet_channel`
// best-effort; a 60 s heartbeat watches an atomic last-activity timestamp and
// forces a reconnect after 120 s of silence.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use lru::LruCache;
use parking_lot::Mutex;
use tracing::{error, info, warn};

use crate::bus::PubSubBus;
use crate::buffer::DurableBuffer;
use crate::chain::{ChainClient, TaggedBetEvent};
use crate::messages::InstantBetMessage;
use crate::types::Bet;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(60);
const STALL_THRESHOLD: Duration = Duration::from_secs(120);
const RECONNECT_BACKOFF: Duration = Duration::from_secs(5);
const BLOCK_TS_CACHE_CAPACITY: usize = 1000;

/// Runs forever, reconnecting on subscription drop or prolonged silence.
pub async fn run(chain: Arc<ChainClient>, buffer: Arc<tokio::sync::Mutex<DurableBuffer>>, bus: Arc<PubSubBus>) {
    loop {
        if let Err(err) = run_once(&chain, &buffer, &bus).await {
            warn!(error = %err, "listener subscription ended, reconnecting");
        }
        tokio::time::sleep(RECONNECT_BACKOFF).await;
    }
}

async fn run_once(
    chain: &ChainClient,
    buffer: &tokio::sync::Mutex<DurableBuffer>,
    bus: &PubSubBus,
) -> anyhow::Result<()> {
    let mut stream = chain.subscribe_bet_logs().await?;
    let last_activity = AtomicU64::new(now_secs());
    let block_ts_cache: Mutex<LruCache<u64, chrono::DateTime<chrono::Utc>>> =
        Mutex::new(LruCache::new(std::num::NonZeroUsize::new(BLOCK_TS_CACHE_CAPACITY).unwrap()));
    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);

    loop {
        tokio::select! {
            item = stream.next() => {
                let Some(item) = item else {
                    anyhow::bail!("chain event stream ended");
                };
                last_activity.store(now_secs(), Ordering::Relaxed);
                match item {
                    Ok(tagged) => handle_event(chain, buffer, bus, &block_ts_cache, tagged).await,
                    Err(err) => warn!(error = %err, "failed to decode bet log"),
                }
            }
            _ = heartbeat.tick() => {
                if let Err(err) = chain.current_epoch().await {
                    warn!(error = %err, "listener heartbeat read failed");
                }
                let idle = now_secs().saturating_sub(last_activity.load(Ordering::Relaxed));
                if idle >= STALL_THRESHOLD.as_secs() {
                    anyhow::bail!("listener stalled for {idle}s, reconnecting");
                }
            }
        }
    }
}

async fn handle_event(
    chain: &ChainClient,
    buffer: &tokio::sync::Mutex<DurableBuffer>,
    bus: &PubSubBus,
    block_ts_cache: &Mutex<LruCache<u64, chrono::DateTime<chrono::Utc>>>,
    tagged: TaggedBetEvent,
) {
    let block_number = tagged.event.block_number;
    let bet_time = {
        let cached = block_ts_cache.lock().get(&block_number).copied();
        match cached {
            Some(ts) => ts,
            None => match chain.block_timestamp(block_number).await {
                Ok(ts) => {
                    block_ts_cache.lock().put(block_number, ts);
                    ts
                }
                Err(err) => {
                    warn!(error = %err, block_number, "failed to resolve block timestamp");
                    return;
                }
            },
        }
    };

    let bet = Bet {
        epoch: tagged.event.epoch,
        bet_time,
        wallet_address: tagged.event.sender,
        direction: tagged.side,
        amount: tagged.event.amount,
        block_number: block_number as i64,
        tx_hash: tagged.event.tx_hash,
    };

    {
        let mut buffer = buffer.lock().await;
        if let Err(err) = buffer.append(&bet).await {
            error!(error = %err, epoch = bet.epoch, "failed to append bet to durable buffer");
        }
    }

    bus.publish_instant_bet(InstantBetMessage::new(bet));
    info!(epoch = tagged.event.epoch, block_number, "live bet observed");
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
