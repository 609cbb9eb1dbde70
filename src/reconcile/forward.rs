// =============================================================================
// Forward reconciliation worker
// =============================================================================
//
// Keeps the store's upper edge within two epochs of the chain's current
// epoch (the two-epoch cushion lets the chain finish LOCK/CLOSE before we
// attempt to sync it).
// =============================================================================

use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::sync::SyncOutcome;

use super::WorkerContext;

const CATCH_UP_SLEEP: Duration = Duration::from_secs(60);
const ERROR_SLEEP: Duration = Duration::from_secs(10);
const EPOCH_CUSHION: i64 = 2;

pub async fn run(ctx: WorkerContext) {
    loop {
        match tick(&ctx).await {
            Ok(true) => tokio::time::sleep(CATCH_UP_SLEEP).await,
            Ok(false) => {}
            Err(err) => {
                error!(error = %err, "forward worker iteration failed");
                tokio::time::sleep(ERROR_SLEEP).await;
            }
        }
    }
}

/// Returns `Ok(true)` when the store was already caught up (caller should
/// sleep the catch-up interval).
async fn tick(ctx: &WorkerContext) -> anyhow::Result<bool> {
    let boundaries = ctx.store.epoch_boundaries().await?;
    let max_epoch = boundaries.max_epoch.unwrap_or(0);
    let current_epoch = ctx.chain.current_epoch().await?;
    let target = current_epoch - EPOCH_CUSHION;

    if max_epoch >= target {
        return Ok(true);
    }

    info!(max_epoch, current_epoch, target, "forward worker catching up");

    let syncer = ctx.syncer();
    for epoch in (max_epoch + 1)..=target {
        if ctx.store.is_finalized(epoch).await? {
            continue;
        }
        if ctx.store.retry_count(epoch).await? >= ctx.cfg.retry_max as i32 {
            debug!(epoch, "forward worker skipping epoch over retry cap");
            continue;
        }

        match syncer.sync(epoch).await {
            SyncOutcome::Success { epoch, bets_written, claims_written } => {
                debug!(epoch, bets_written, claims_written, "forward sync succeeded");
            }
            SyncOutcome::Skip { epoch, reason } => {
                debug!(epoch, reason, "forward sync skipped");
            }
            SyncOutcome::Fail { epoch, stage, message } => {
                warn!(epoch, stage, message, "forward sync failed");
            }
        }
    }

    Ok(false)
}
