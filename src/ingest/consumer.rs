// =============================================================================
// Live ingest — consumer
// =============================================================================
//
// Drains the durable buffer under the shared consumer group, batching locally
// until 100 entries or 1 s has elapsed, flushing all of them into the live
// table in one transaction, acknowledging only after a successful commit,
// then fanning each bet out on `analysis_channel`.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, warn};

use crate::bus::PubSubBus;
use crate::buffer::{BufferedBet, DurableBuffer};
use crate::messages::AnalysisRequest;
use crate::store::StoreGateway;

const READ_COUNT: usize = 100;
const READ_BLOCK_MS: usize = 1000;
const FLUSH_SIZE: usize = 100;
const FLUSH_INTERVAL: Duration = Duration::from_secs(1);
const CLAIM_IDLE_MS: i64 = 30_000;

pub async fn run(buffer: Arc<tokio::sync::Mutex<DurableBuffer>>, store: Arc<StoreGateway>, bus: Arc<PubSubBus>) {
    let mut pending: Vec<BufferedBet> = Vec::with_capacity(FLUSH_SIZE);
    let mut last_flush = tokio::time::Instant::now();

    loop {
        let batch = {
            let mut buffer = buffer.lock().await;
            match buffer.read_batch(READ_COUNT, READ_BLOCK_MS).await {
                Ok(batch) => batch,
                Err(err) => {
                    error!(error = %err, "buffer read failed");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
            }
        };
        pending.extend(batch);

        match reclaim_stale(&buffer).await {
            Ok(stale) => pending.extend(stale),
            Err(err) => warn!(error = %err, "stale entry reclaim failed"),
        }

        let should_flush = pending.len() >= FLUSH_SIZE || last_flush.elapsed() >= FLUSH_INTERVAL;
        if should_flush && !pending.is_empty() {
            flush(&buffer, &store, &bus, std::mem::take(&mut pending)).await;
            last_flush = tokio::time::Instant::now();
        }
    }
}

async fn flush(
    buffer: &tokio::sync::Mutex<DurableBuffer>,
    store: &StoreGateway,
    bus: &PubSubBus,
    batch: Vec<BufferedBet>,
) {
    let bets: Vec<_> = batch.iter().map(|b| b.bet.clone()).collect();
    let ids: Vec<_> = batch.iter().map(|b| b.entry_id.clone()).collect();

    match store.insert_live_bets(&bets).await {
        Ok(inserted) => {
            debug!(batch_size = bets.len(), inserted, "live bet batch flushed");
            if let Err(err) = buffer.lock().await.ack(&ids).await {
                error!(error = %err, "failed to ack flushed batch, buffer will redeliver");
            }
            for bet in bets {
                bus.publish_analysis(AnalysisRequest::new(bet));
            }
        }
        Err(err) => {
            error!(error = %err, batch_size = bets.len(), "live bet batch insert failed, not acking");
        }
    }
}

async fn reclaim_stale(buffer: &tokio::sync::Mutex<DurableBuffer>) -> anyhow::Result<Vec<BufferedBet>> {
    let stale = buffer.lock().await.claim_stale(CLAIM_IDLE_MS).await?;
    if !stale.is_empty() {
        warn!(count = stale.len(), "reclaimed stale buffer entries for redelivery");
    }
    Ok(stale)
}
