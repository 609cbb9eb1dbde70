// =============================================================================
// Block-range estimator — purely data-driven, no RPC calls
// =============================================================================
//
// Re-uses already-persisted block numbers from neighboring epochs to bound
// the log search window for a target epoch, eliminating a binary-search-by-
// RPC. See the component design for the anchor rules this follows exactly.
// =============================================================================

use anyhow::{Context, Result};

use crate::store::StoreGateway;

/// Default `blocks_per_epoch` when no consecutive-pair sample exists yet.
const DEFAULT_BLOCKS_PER_EPOCH: i64 = 410;

const ANCHOR_SLACK: i64 = 50;
const FORWARD_WINDOW: i64 = 5;
const BACKWARD_WINDOW: i64 = 5;
const SAMPLE_WINDOW: i64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRange {
    pub from_block: u64,
    pub to_block: u64,
}

/// No forward or backward anchor exists in the store, and no seed applies —
/// the caller must fail the epoch explicitly rather than guess.
#[derive(Debug, thiserror::Error)]
#[error("no block-range anchor available for epoch {epoch}")]
pub struct NoAnchor {
    pub epoch: i64,
}

pub struct BlockRangeEstimator<'a> {
    store: &'a StoreGateway,
    seed_epoch: Option<i64>,
    seed_block: Option<i64>,
}

impl<'a> BlockRangeEstimator<'a> {
    pub fn new(store: &'a StoreGateway, seed_epoch: Option<i64>, seed_block: Option<i64>) -> Self {
        Self { store, seed_epoch, seed_block }
    }

    pub async fn estimate(&self, epoch: i64) -> Result<BlockRange> {
        if let Some(range) = self.forward_estimate(epoch).await? {
            return Ok(range);
        }
        if let Some(range) = self.backward_estimate(epoch).await? {
            return Ok(range);
        }
        if let (Some(seed_epoch), Some(seed_block)) = (self.seed_epoch, self.seed_block) {
            if epoch == seed_epoch {
                return Ok(BlockRange {
                    from_block: (seed_block - DEFAULT_BLOCKS_PER_EPOCH).max(0) as u64,
                    to_block: (seed_block + DEFAULT_BLOCKS_PER_EPOCH) as u64,
                });
            }
        }
        Err(NoAnchor { epoch }.into())
    }

    async fn forward_estimate(&self, epoch: i64) -> Result<Option<BlockRange>> {
        let Some((anchor_epoch, min_block)) = self
            .store
            .forward_anchor(epoch + 1, epoch + FORWARD_WINDOW)
            .await
            .context("resolving forward anchor")?
        else {
            return Ok(None);
        };

        let blocks_per_epoch = self.blocks_per_epoch(anchor_epoch).await?;
        let span = blocks_per_epoch * (anchor_epoch - epoch);

        Ok(Some(BlockRange {
            from_block: (min_block - span - ANCHOR_SLACK).max(0) as u64,
            to_block: (min_block + ANCHOR_SLACK) as u64,
        }))
    }

    async fn backward_estimate(&self, epoch: i64) -> Result<Option<BlockRange>> {
        let Some((anchor_epoch, max_block)) = self
            .store
            .backward_anchor((epoch - BACKWARD_WINDOW).max(1), epoch - 1)
            .await
            .context("resolving backward anchor")?
        else {
            return Ok(None);
        };

        let blocks_per_epoch = self.blocks_per_epoch(anchor_epoch).await?;
        let span = blocks_per_epoch * (epoch - anchor_epoch);

        Ok(Some(BlockRange {
            from_block: (max_block - ANCHOR_SLACK).max(0) as u64,
            to_block: (max_block + span + ANCHOR_SLACK) as u64,
        }))
    }

    /// Maximum `last_block(e) - last_block(e-1)` over consecutive qualifying
    /// pairs in `[anchor_epoch - 10, anchor_epoch]`.
    async fn blocks_per_epoch(&self, anchor_epoch: i64) -> Result<i64> {
        let samples = self
            .store
            .consecutive_last_blocks(anchor_epoch - SAMPLE_WINDOW, anchor_epoch)
            .await
            .context("sampling consecutive last-block pairs")?;

        let mut max_delta = None;
        for window in samples.windows(2) {
            let (e0, b0) = window[0];
            let (e1, b1) = window[1];
            if e1 == e0 + 1 {
                let delta = b1 - b0;
                max_delta = Some(max_delta.map_or(delta, |m: i64| m.max(delta)));
            }
        }

        Ok(max_delta.unwrap_or(DEFAULT_BLOCKS_PER_EPOCH))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_anchor_error_names_the_epoch() {
        let err = NoAnchor { epoch: 42 };
        assert!(err.to_string().contains("42"));
    }
}
