// =============================================================================
// Relational store gateway
// =============================================================================
//
// Pooled Postgres connections; every epoch-sync write goes through exactly
// one transaction (round upsert, bet/claim/multi-claim batch inserts, an
// optional realbet prune, and the finalized-epoch marker), committed or
// rolled back as a single unit so VERIFY_WRITE always sees an all-or-nothing
// result.
// =============================================================================

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Executor, PgPool, Row};
use tracing::instrument;

use crate::types::{Bet, Side, WalletAddress};

use super::rows::{EpochBoundaries, FinalizedFeatureRow};

const STATEMENT_TIMEOUT: Duration = Duration::from_secs(60);

/// One parsed bet or claim ready to be written as part of an epoch sync.
#[derive(Debug, Clone)]
pub struct ParsedBet {
    pub bet_time: DateTime<Utc>,
    pub tx_hash: String,
    pub wallet_address: WalletAddress,
    pub direction: Side,
    pub amount: Decimal,
    pub block_number: i64,
}

#[derive(Debug, Clone)]
pub struct ParsedClaim {
    pub block_number: i64,
    pub wallet_address: WalletAddress,
    pub bet_epoch: i64,
    pub amount: Decimal,
}

#[derive(Debug, Clone)]
pub struct MultiClaim {
    pub wallet_address: WalletAddress,
    pub distinct_bet_epochs: i64,
    pub total_amount: Decimal,
}

/// Everything the `WRITE_TX` stage of the per-epoch sync needs to commit.
#[derive(Debug, Clone)]
pub struct EpochSyncInput {
    pub epoch: i64,
    pub start_time: DateTime<Utc>,
    pub lock_time: DateTime<Utc>,
    pub close_time: DateTime<Utc>,
    pub lock_price: Decimal,
    pub close_price: Decimal,
    pub total_amount: Decimal,
    pub up_amount: Decimal,
    pub down_amount: Decimal,
    pub result: Side,
    pub bets: Vec<ParsedBet>,
    pub claims: Vec<ParsedClaim>,
    pub multi_claims: Vec<MultiClaim>,
    /// Prune `realbet` rows for this epoch if true (`now - close_time > 600s`).
    pub prune_live_bets: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EpochSyncCounts {
    pub bets_written: i64,
    pub claims_written: i64,
}

pub struct StoreGateway {
    pool: PgPool,
}

impl StoreGateway {
    pub async fn connect(database_url: &str, pool_size: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(pool_size)
            .acquire_timeout(Duration::from_secs(10))
            .after_connect(|conn, _meta| {
                Box::pin(async move {
                    conn.execute(
                        format!("SET statement_timeout = '{}ms'", STATEMENT_TIMEOUT.as_millis())
                            .as_str(),
                    )
                    .await?;
                    Ok(())
                })
            })
            .connect(database_url)
            .await
            .context("connecting relational store pool")?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// `(min_epoch, max_epoch, distinct_count)` over the finalized round table.
    #[instrument(skip(self))]
    pub async fn epoch_boundaries(&self) -> Result<EpochBoundaries> {
        let row = sqlx::query(
            "SELECT MIN(epoch) AS min_epoch, MAX(epoch) AS max_epoch, COUNT(DISTINCT epoch) AS distinct_count \
             FROM round",
        )
        .fetch_one(&self.pool)
        .await
        .context("fetching epoch boundaries")?;

        Ok(EpochBoundaries {
            min_epoch: row.try_get::<Option<i64>, _>("min_epoch")?,
            max_epoch: row.try_get::<Option<i64>, _>("max_epoch")?,
            distinct_count: row.try_get::<i64, _>("distinct_count")?,
        })
    }

    #[instrument(skip(self))]
    pub async fn round_exists(&self, epoch: i64) -> Result<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM round WHERE epoch = $1)")
                .bind(epoch)
                .fetch_one(&self.pool)
                .await
                .context("checking round row existence")?;
        Ok(exists)
    }

    #[instrument(skip(self))]
    pub async fn is_finalized(&self, epoch: i64) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM finalized_epoch WHERE epoch = $1)",
        )
        .bind(epoch)
        .fetch_one(&self.pool)
        .await
        .context("checking finalized-epoch marker")?;
        Ok(exists)
    }

    #[instrument(skip(self))]
    pub async fn retry_count(&self, epoch: i64) -> Result<i32> {
        let count: Option<i32> = sqlx::query_scalar(
            "SELECT retry_count FROM failed_epoch WHERE epoch = $1",
        )
        .bind(epoch)
        .fetch_optional(&self.pool)
        .await
        .context("reading retry count")?;
        Ok(count.unwrap_or(0))
    }

    /// Upsert a failed-epoch record, incrementing `retry_count`. Returns the
    /// new retry count.
    #[instrument(skip(self, message))]
    pub async fn upsert_failed_epoch(
        &self,
        epoch: i64,
        stage: &str,
        message: &str,
    ) -> Result<i32> {
        let truncated: String = message.chars().take(500).collect();
        let row = sqlx::query(
            "INSERT INTO failed_epoch (epoch, error_message, stage, failed_at, retry_count) \
             VALUES ($1, $2, $3, now(), 1) \
             ON CONFLICT (epoch) DO UPDATE SET \
                error_message = EXCLUDED.error_message, \
                stage = EXCLUDED.stage, \
                failed_at = now(), \
                retry_count = failed_epoch.retry_count + 1 \
             RETURNING retry_count",
        )
        .bind(epoch)
        .bind(truncated)
        .bind(stage)
        .fetch_one(&self.pool)
        .await
        .context("upserting failed-epoch record")?;
        Ok(row.try_get::<i32, _>("retry_count")?)
    }

    /// Anchor lookup for the block-range estimator: smallest/largest epoch
    /// in `[lo, hi]` with `> 5` bets and a known `min(block_number)` (forward)
    /// or `max(block_number)` (backward).
    #[instrument(skip(self))]
    pub async fn forward_anchor(&self, lo: i64, hi: i64) -> Result<Option<(i64, i64)>> {
        let row = sqlx::query(
            "SELECT epoch, MIN(block_number) AS min_block FROM hisbet \
             WHERE epoch BETWEEN $1 AND $2 \
             GROUP BY epoch HAVING COUNT(*) > 5 \
             ORDER BY epoch ASC LIMIT 1",
        )
        .bind(lo)
        .bind(hi)
        .fetch_optional(&self.pool)
        .await
        .context("resolving forward anchor")?;
        Ok(row.map(|r| (r.get::<i64, _>("epoch"), r.get::<i64, _>("min_block"))))
    }

    #[instrument(skip(self))]
    pub async fn backward_anchor(&self, lo: i64, hi: i64) -> Result<Option<(i64, i64)>> {
        let row = sqlx::query(
            "SELECT epoch, MAX(block_number) AS max_block FROM hisbet \
             WHERE epoch BETWEEN $1 AND $2 \
             GROUP BY epoch HAVING COUNT(*) > 5 \
             ORDER BY epoch DESC LIMIT 1",
        )
        .bind(lo)
        .bind(hi)
        .fetch_optional(&self.pool)
        .await
        .context("resolving backward anchor")?;
        Ok(row.map(|r| (r.get::<i64, _>("epoch"), r.get::<i64, _>("max_block"))))
    }

    /// `last_block(e) - last_block(e-1)` for consecutive qualifying epochs in
    /// `[lo, hi]`; used to derive `blocks_per_epoch`.
    #[instrument(skip(self))]
    pub async fn consecutive_last_blocks(&self, lo: i64, hi: i64) -> Result<Vec<(i64, i64)>> {
        let rows = sqlx::query(
            "SELECT epoch, MAX(block_number) AS last_block FROM hisbet \
             WHERE epoch BETWEEN $1 AND $2 \
             GROUP BY epoch HAVING COUNT(*) > 5 \
             ORDER BY epoch ASC",
        )
        .bind(lo)
        .bind(hi)
        .fetch_all(&self.pool)
        .await
        .context("fetching consecutive last-block samples")?;
        Ok(rows
            .into_iter()
            .map(|r| (r.get::<i64, _>("epoch"), r.get::<i64, _>("last_block")))
            .collect())
    }

    /// Look up `bet_time` from any already-stored row for `block_number`
    /// (finalized or live), for the PARSE stage's block-timestamp cache.
    #[instrument(skip(self))]
    pub async fn bet_time_for_block(&self, block_number: i64) -> Result<Option<DateTime<Utc>>> {
        let ts: Option<DateTime<Utc>> = sqlx::query_scalar(
            "SELECT bet_time FROM hisbet WHERE block_number = $1 \
             UNION ALL \
             SELECT bet_time FROM realbet WHERE block_number = $1 \
             LIMIT 1",
        )
        .bind(block_number)
        .fetch_optional(&self.pool)
        .await
        .context("looking up cached bet_time for block")?;
        Ok(ts)
    }

    pub async fn recent_finalized_features(&self, n: i64) -> Result<Vec<FinalizedFeatureRow>> {
        let rows = sqlx::query_as::<_, FinalizedFeatureRow>(
            "SELECT epoch, up_amount, down_amount, total_amount, lock_price, close_price \
             FROM round ORDER BY epoch DESC LIMIT $1",
        )
        .bind(n)
        .fetch_all(&self.pool)
        .await
        .context("fetching recent finalized features")?;
        Ok(rows)
    }

    /// The single atomic write for one epoch's sync (WRITE_TX / VERIFY_WRITE).
    #[instrument(skip(self, input), fields(epoch = input.epoch))]
    pub async fn sync_epoch(&self, input: EpochSyncInput) -> Result<EpochSyncCounts> {
        let mut tx = self.pool.begin().await.context("beginning epoch-sync transaction")?;

        sqlx::query(
            "INSERT INTO round (start_time, epoch, lock_time, close_time, lock_price, \
                close_price, total_amount, up_amount, down_amount, result) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             ON CONFLICT (start_time, epoch) DO UPDATE SET \
                lock_time = EXCLUDED.lock_time, close_time = EXCLUDED.close_time, \
                lock_price = EXCLUDED.lock_price, close_price = EXCLUDED.close_price, \
                total_amount = EXCLUDED.total_amount, up_amount = EXCLUDED.up_amount, \
                down_amount = EXCLUDED.down_amount, result = EXCLUDED.result",
        )
        .bind(input.start_time)
        .bind(input.epoch)
        .bind(input.lock_time)
        .bind(input.close_time)
        .bind(input.lock_price)
        .bind(input.close_price)
        .bind(input.total_amount)
        .bind(input.up_amount)
        .bind(input.down_amount)
        .bind(input.result.to_string())
        .execute(&mut *tx)
        .await
        .context("upserting round row")?;

        let mut bets_written = 0i64;
        for bet in &input.bets {
            let result = sqlx::query(
                "INSERT INTO hisbet (bet_time, tx_hash, epoch, wallet_address, direction, amount, block_number) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7) \
                 ON CONFLICT (bet_time, tx_hash) DO NOTHING",
            )
            .bind(bet.bet_time)
            .bind(&bet.tx_hash)
            .bind(input.epoch)
            .bind(bet.wallet_address.as_str())
            .bind(bet.direction.to_string())
            .bind(bet.amount)
            .bind(bet.block_number)
            .execute(&mut *tx)
            .await
            .context("inserting bet row")?;
            bets_written += result.rows_affected() as i64;
        }

        let mut claims_written = 0i64;
        for claim in &input.claims {
            let result = sqlx::query(
                "INSERT INTO claim (block_number, wallet_address, bet_epoch, epoch, amount) \
                 VALUES ($1, $2, $3, $4, $5) \
                 ON CONFLICT (block_number, wallet_address, bet_epoch) DO NOTHING",
            )
            .bind(claim.block_number)
            .bind(claim.wallet_address.as_str())
            .bind(claim.bet_epoch)
            .bind(input.epoch)
            .bind(claim.amount)
            .execute(&mut *tx)
            .await
            .context("inserting claim row")?;
            claims_written += result.rows_affected() as i64;
        }

        for mc in &input.multi_claims {
            sqlx::query(
                "INSERT INTO multi_claim (epoch, wallet_address, distinct_bet_epochs, total_amount) \
                 VALUES ($1, $2, $3, $4) \
                 ON CONFLICT (epoch, wallet_address) DO NOTHING",
            )
            .bind(input.epoch)
            .bind(mc.wallet_address.as_str())
            .bind(mc.distinct_bet_epochs)
            .bind(mc.total_amount)
            .execute(&mut *tx)
            .await
            .context("inserting multi-claim row")?;
        }

        if input.prune_live_bets {
            sqlx::query("DELETE FROM realbet WHERE epoch = $1")
                .bind(input.epoch)
                .execute(&mut *tx)
                .await
                .context("pruning live bets for finalized epoch")?;
        }

        sqlx::query(
            "INSERT INTO finalized_epoch (epoch, processed_at) VALUES ($1, now()) \
             ON CONFLICT (epoch) DO NOTHING",
        )
        .bind(input.epoch)
        .execute(&mut *tx)
        .await
        .context("inserting finalized-epoch marker")?;

        tx.commit().await.context("committing epoch-sync transaction")?;

        Ok(EpochSyncCounts { bets_written, claims_written })
    }

    /// Insert a batch of live bets (`realbet`), absorbing duplicates. Used
    /// by the buffer consumer's flush.
    #[instrument(skip(self, bets))]
    pub async fn insert_live_bets(&self, bets: &[Bet]) -> Result<u64> {
        if bets.is_empty() {
            return Ok(0);
        }
        let mut tx = self.pool.begin().await.context("beginning live-bet batch transaction")?;
        let mut inserted = 0u64;
        for bet in bets {
            let result = sqlx::query(
                "INSERT INTO realbet (bet_time, tx_hash, epoch, wallet_address, direction, amount, block_number) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7) \
                 ON CONFLICT (bet_time, tx_hash) DO NOTHING",
            )
            .bind(bet.bet_time)
            .bind(bet.tx_hash.as_str())
            .bind(bet.epoch)
            .bind(bet.wallet_address.as_str())
            .bind(bet.direction.to_string())
            .bind(bet.amount)
            .bind(bet.block_number)
            .execute(&mut *tx)
            .await
            .context("inserting live-bet row")?;
            inserted += result.rows_affected();
        }
        tx.commit().await.context("committing live-bet batch")?;
        Ok(inserted)
    }

    /// Re-seed the live aggregator's sums from already-buffered live bets
    /// for a not-yet-finalized epoch (catches late subscriptions).
    #[instrument(skip(self))]
    pub async fn live_bet_sums(&self, epoch: i64) -> Result<(Decimal, Decimal, Decimal)> {
        let row = sqlx::query(
            "SELECT \
                COALESCE(SUM(amount) FILTER (WHERE direction = 'UP'), 0) AS up_sum, \
                COALESCE(SUM(amount) FILTER (WHERE direction = 'DOWN'), 0) AS down_sum, \
                COALESCE(SUM(amount), 0) AS total_sum \
             FROM realbet WHERE epoch = $1",
        )
        .bind(epoch)
        .fetch_one(&self.pool)
        .await
        .context("seeding live aggregator sums")?;
        Ok((
            row.try_get::<Decimal, _>("up_sum")?,
            row.try_get::<Decimal, _>("down_sum")?,
            row.try_get::<Decimal, _>("total_sum")?,
        ))
    }

    /// Best-effort persistence of a trader observability record; a failure
    /// here is logged by the caller and never blocks the trade itself.
    #[instrument(skip(self, record))]
    pub async fn insert_trade_log(&self, record: &crate::decision::TradePhaseRecord) -> Result<()> {
        let created_at: DateTime<Utc> = record
            .created_at
            .parse()
            .unwrap_or_else(|_| Utc::now());

        sqlx::query(
            "INSERT INTO trade_log (epoch, phase, strategy, prediction, confidence, amount, success, error, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(record.epoch)
        .bind(format!("{:?}", record.phase))
        .bind(&record.strategy)
        .bind(record.prediction.to_string())
        .bind(record.confidence.to_string())
        .bind(record.amount)
        .bind(record.success)
        .bind(&record.error)
        .bind(created_at)
        .execute(&self.pool)
        .await
        .context("persisting trade_log row")?;
        Ok(())
    }
}
