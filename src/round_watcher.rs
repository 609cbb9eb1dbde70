// =============================================================================
// Round watcher
// =============================================================================
//
// Polls `currentEpoch()`/`rounds(epoch)` and publishes `round_update_channel`
// transitions (new epoch, or a LIVE → LOCKED → ENDED status change within the
// same epoch) for the aggregator and trader to consume. Grounded in the
// teacher's poll-and-diff loop idiom (`market_data/candle_buffer.rs`'s
// periodic refresh) generalized from a price feed to round lifecycle.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info};

use crate::bus::PubSubBus;
use crate::chain::{ChainClient, RoundData};
use crate::messages::RoundUpdate;
use crate::types::RoundStatus;

const POLL_INTERVAL: Duration = Duration::from_secs(3);
const ERROR_BACKOFF: Duration = Duration::from_secs(5);

pub async fn run(chain: Arc<ChainClient>, bus: Arc<PubSubBus>) {
    let mut last: Option<(i64, RoundStatus)> = None;

    loop {
        match tick(&chain, &bus, &mut last).await {
            Ok(()) => tokio::time::sleep(POLL_INTERVAL).await,
            Err(err) => {
                error!(error = %err, "round watcher poll failed");
                tokio::time::sleep(ERROR_BACKOFF).await;
            }
        }
    }
}

async fn tick(chain: &ChainClient, bus: &PubSubBus, last: &mut Option<(i64, RoundStatus)>) -> anyhow::Result<()> {
    let epoch = chain.current_epoch().await?;
    let round = chain.round(epoch).await?;
    let status = round_status(&round);

    if *last == Some((epoch, status)) {
        debug!(epoch, ?status, "round watcher: no transition");
        return Ok(());
    }
    *last = Some((epoch, status));

    let (result, close_price) = if status == RoundStatus::Ended && round.is_finalized() {
        (Some(crate::sync::round_result(round.lock_price, round.close_price)), Some(round.close_price))
    } else {
        (None, None)
    };

    bus.publish_round_update(RoundUpdate {
        epoch,
        lock_ts: round.lock_timestamp,
        close_ts: round.close_timestamp,
        up_amount: round.bull_amount,
        down_amount: round.bear_amount,
        total_amount: round.total_amount,
        status,
        result,
        close_price,
    });

    info!(epoch, ?status, "round watcher published transition");
    Ok(())
}

fn round_status(round: &RoundData) -> RoundStatus {
    let now = Utc::now().timestamp();
    if now < round.lock_timestamp {
        RoundStatus::Live
    } else if now < round.close_timestamp {
        RoundStatus::Locked
    } else {
        RoundStatus::Ended
    }
}
