// =============================================================================
// Backward reconciliation worker
// =============================================================================
//
// Walks the store's lower edge down to epoch 1, backfilling history the
// forward worker never covered (e.g. after a late deployment).
// =============================================================================

use std::time::Duration;

use tracing::{debug, error, warn};

use crate::sync::SyncOutcome;

use super::WorkerContext;

const STARTUP_DELAY: Duration = Duration::from_secs(30);
const STEP_SLEEP: Duration = Duration::from_secs(2);
const EXHAUSTED_SLEEP: Duration = Duration::from_secs(5 * 60);
const ERROR_SLEEP: Duration = Duration::from_secs(10);

pub async fn run(ctx: WorkerContext) {
    tokio::time::sleep(STARTUP_DELAY).await;

    loop {
        match tick(&ctx).await {
            Ok(true) => tokio::time::sleep(EXHAUSTED_SLEEP).await,
            Ok(false) => tokio::time::sleep(STEP_SLEEP).await,
            Err(err) => {
                error!(error = %err, "backward worker iteration failed");
                tokio::time::sleep(ERROR_SLEEP).await;
            }
        }
    }
}

/// Returns `Ok(true)` when the backfill has reached epoch 1 (caller should
/// sleep the long exhausted-backlog interval).
async fn tick(ctx: &WorkerContext) -> anyhow::Result<bool> {
    let boundaries = ctx.store.epoch_boundaries().await?;
    let min_epoch = match boundaries.min_epoch {
        Some(e) => e,
        None => return Ok(true),
    };
    let target = min_epoch - 1;

    if target < 1 {
        return Ok(true);
    }
    if ctx.store.is_finalized(target).await? {
        return Ok(false);
    }
    if ctx.store.retry_count(target).await? >= ctx.cfg.retry_max as i32 {
        debug!(epoch = target, "backward worker skipping epoch over retry cap");
        return Ok(false);
    }

    match ctx.syncer().sync(target).await {
        SyncOutcome::Success { epoch, bets_written, claims_written } => {
            debug!(epoch, bets_written, claims_written, "backward sync succeeded");
        }
        SyncOutcome::Skip { epoch, reason } => {
            debug!(epoch, reason, "backward sync skipped");
        }
        SyncOutcome::Fail { epoch, stage, message } => {
            warn!(epoch, stage, message, "backward sync failed");
        }
    }

    Ok(false)
}
