// =============================================================================
// Gap reconciliation worker
// =============================================================================
//
// Periodically checks that the store's epoch range is dense (no epoch
// skipped by a missed lock-window or a forward/backward worker crash) and
// backfills the first 100 missing epochs found.
// =============================================================================

use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::sync::SyncOutcome;

use super::WorkerContext;

const STARTUP_DELAY: Duration = Duration::from_secs(30 * 60);
const SWEEP_INTERVAL: Duration = Duration::from_secs(30 * 60);
const MAX_GAPS_PER_SWEEP: i64 = 100;

pub async fn run(ctx: WorkerContext) {
    tokio::time::sleep(STARTUP_DELAY).await;

    loop {
        if let Err(err) = sweep(&ctx).await {
            error!(error = %err, "gap worker sweep failed");
        }
        tokio::time::sleep(SWEEP_INTERVAL).await;
    }
}

async fn sweep(ctx: &WorkerContext) -> anyhow::Result<()> {
    let boundaries = ctx.store.epoch_boundaries().await?;
    let (Some(min_epoch), Some(max_epoch)) = (boundaries.min_epoch, boundaries.max_epoch) else {
        return Ok(());
    };
    let expected = max_epoch - min_epoch + 1;
    if boundaries.distinct_count >= expected {
        debug!(min_epoch, max_epoch, "gap worker found no gaps");
        return Ok(());
    }

    info!(min_epoch, max_epoch, distinct = boundaries.distinct_count, expected, "gap worker found missing epochs");

    let syncer = ctx.syncer();
    let mut filled = 0;
    for epoch in min_epoch..=max_epoch {
        if filled >= MAX_GAPS_PER_SWEEP {
            break;
        }
        if ctx.store.is_finalized(epoch).await? {
            continue;
        }
        filled += 1;

        match syncer.sync(epoch).await {
            SyncOutcome::Success { epoch, bets_written, claims_written } => {
                debug!(epoch, bets_written, claims_written, "gap sync succeeded");
            }
            SyncOutcome::Skip { epoch, reason } => {
                debug!(epoch, reason, "gap sync skipped");
            }
            SyncOutcome::Fail { epoch, stage, message } => {
                warn!(epoch, stage, message, "gap sync failed");
            }
        }
    }

    Ok(())
}
