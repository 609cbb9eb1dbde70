// =============================================================================
// Per-epoch sync — the heart of the pipeline
// =============================================================================
//
// One state machine finalizing a single epoch: LOCK_ACQUIRE, FETCH_ROUND,
// FETCH_EVENTS, VALIDATE, PARSE, VERIFY_TOTALS, WRITE_TX, VERIFY_WRITE,
// COMMIT_DONE. Any stage may short-circuit to FAIL or SKIP; the lock is
// always released on the way out.
// =============================================================================

use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, Utc};
use lru::LruCache;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::chain::{BetEvent, ChainClient, ClaimEvent, RoundData};
use crate::error::SyncError;
use crate::estimator::BlockRangeEstimator;
use crate::lock::EpochLock;
use crate::store::gateway::{EpochSyncInput, MultiClaim, ParsedBet, ParsedClaim};
use crate::store::StoreGateway;
use crate::types::{Side, WalletAddress};

const TOTALS_TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 3);
const MAX_PRICE_CHANGE_RATIO: Decimal = Decimal::from_parts(20, 0, 0, false, 2);
const MULTI_CLAIM_EPOCH_THRESHOLD: i64 = 5;
const MULTI_CLAIM_AMOUNT_THRESHOLD: Decimal = Decimal::from_parts(1, 0, 0, false, 0);
const TAIPEI_OFFSET_SECS: i32 = 8 * 3600;
const POST_FETCH_PAUSE: Duration = Duration::from_millis(100);
const LIVE_BET_PRUNE_AFTER: Duration = Duration::from_secs(600);

#[derive(Debug, Clone)]
pub enum SyncOutcome {
    Success { epoch: i64, bets_written: i64, claims_written: i64 },
    Skip { epoch: i64, reason: &'static str },
    Fail { epoch: i64, stage: &'static str, message: String },
}

struct ParsedEpoch {
    bets: Vec<ParsedBet>,
    claims: Vec<ParsedClaim>,
}

/// Drives one epoch through the state machine. Holds the small in-process
/// caches (block-timestamp LRU, round cache) shared across invocations.
pub struct EpochSyncer<'a> {
    chain: &'a ChainClient,
    store: &'a StoreGateway,
    lock: &'a EpochLock,
    seed_epoch: Option<i64>,
    seed_block: Option<i64>,
    block_ts_cache: Mutex<LruCache<u64, DateTime<Utc>>>,
    round_cache: Mutex<LruCache<i64, RoundData>>,
}

impl<'a> EpochSyncer<'a> {
    pub fn new(
        chain: &'a ChainClient,
        store: &'a StoreGateway,
        lock: &'a EpochLock,
        seed_epoch: Option<i64>,
        seed_block: Option<i64>,
    ) -> Self {
        Self {
            chain,
            store,
            lock,
            seed_epoch,
            seed_block,
            block_ts_cache: Mutex::new(LruCache::new(std::num::NonZeroUsize::new(5000).unwrap())),
            round_cache: Mutex::new(LruCache::new(std::num::NonZeroUsize::new(256).unwrap())),
        }
    }

    pub async fn sync(&self, epoch: i64) -> SyncOutcome {
        match self.run(epoch).await {
            Ok(counts) => {
                info!(epoch, bets = counts.bets_written, claims = counts.claims_written, "epoch synced");
                SyncOutcome::Success {
                    epoch,
                    bets_written: counts.bets_written,
                    claims_written: counts.claims_written,
                }
            }
            Err(SyncError::Concurrency { reason }) => {
                debug!(epoch, reason, "epoch sync skipped");
                SyncOutcome::Skip { epoch, reason }
            }
            Err(err) => {
                let stage = err.stage().unwrap_or("UNKNOWN");
                let message = format!("{err:#}");
                warn!(epoch, stage, %message, "epoch sync failed");
                if let Err(log_err) = self.store.upsert_failed_epoch(epoch, stage, &message).await {
                    warn!(epoch, error = %log_err, "failed to record failed-epoch row");
                }
                SyncOutcome::Fail { epoch, stage, message }
            }
        }
    }

    async fn run(&self, epoch: i64) -> Result<crate::store::EpochSyncCounts, SyncError> {
        if self.store.is_finalized(epoch).await.map_err(SyncError::Transient)? {
            return Err(SyncError::Concurrency { reason: "already finalized" });
        }

        let guard = self
            .lock
            .acquire(epoch)
            .await
            .map_err(SyncError::Transient)?
            .ok_or(SyncError::Concurrency { reason: "locked" })?;

        let result = self.run_locked(epoch).await;

        if let Err(release_err) = guard.release().await {
            warn!(epoch, error = %release_err, "epoch lock release failed");
        }

        result
    }

    async fn run_locked(&self, epoch: i64) -> Result<crate::store::EpochSyncCounts, SyncError> {
        let round = self.fetch_round(epoch).await?;

        let estimator = BlockRangeEstimator::new(self.store, self.seed_epoch, self.seed_block);
        let range = estimator
            .estimate(epoch)
            .await
            .map_err(|e| SyncError::Validation { stage: "FETCH_EVENTS", message: e.to_string() })?;

        let (bull, bear, claims) = self
            .chain
            .fetch_round_events(epoch, range.from_block, range.to_block)
            .await
            .map_err(SyncError::Transient)?;
        tokio::time::sleep(POST_FETCH_PAUSE).await;

        self.validate(epoch, &round, &bull, &bear, &claims)?;

        let parsed = self.parse(epoch, &bull, &bear, &claims).await?;

        self.verify_totals(epoch, &round, &parsed)?;

        let prune = Utc::now().signed_duration_since(round.close_timestamp_utc()) > LIVE_BET_PRUNE_AFTER;
        let multi_claims = derive_multi_claims(&parsed.claims);
        let parsed_bet_count = parsed.bets.len() as i64;

        let input = EpochSyncInput {
            epoch,
            start_time: round.start_timestamp_utc(),
            lock_time: round.lock_timestamp_utc(),
            close_time: round.close_timestamp_utc(),
            lock_price: round.lock_price,
            close_price: round.close_price,
            total_amount: round.total_amount,
            up_amount: round.bull_amount,
            down_amount: round.bear_amount,
            result: round_result(round.lock_price, round.close_price),
            bets: parsed.bets,
            claims: parsed.claims,
            multi_claims,
            prune_live_bets: prune,
        };

        let counts = self
            .store
            .sync_epoch(input)
            .await
            .map_err(|e| SyncError::Validation { stage: "WRITE_TX", message: e.to_string() })?;

        let exists = self.store.round_exists(epoch).await.map_err(SyncError::Transient)?;
        if !exists {
            return Err(SyncError::Validation {
                stage: "VERIFY_WRITE",
                message: "round row missing after commit".into(),
            });
        }
        if counts.bets_written != parsed_bet_count {
            return Err(SyncError::Validation {
                stage: "VERIFY_WRITE",
                message: format!(
                    "bet count mismatch: parsed {parsed_bet_count}, written {}",
                    counts.bets_written
                ),
            });
        }

        let finalized = self.store.is_finalized(epoch).await.map_err(SyncError::Transient)?;
        if !finalized {
            return Err(SyncError::Validation {
                stage: "VERIFY_WRITE",
                message: "finalized marker missing after commit".into(),
            });
        }

        Ok(counts)
    }

    async fn fetch_round(&self, epoch: i64) -> Result<RoundData, SyncError> {
        if let Some(cached) = self.round_cache.lock().get(&epoch).cloned() {
            return Ok(cached);
        }
        let round = self.chain.round(epoch).await.map_err(SyncError::Transient)?;
        if round.is_finalized() {
            self.round_cache.lock().put(epoch, round.clone());
        }
        Ok(round)
    }

    fn validate(
        &self,
        epoch: i64,
        round: &RoundData,
        bull: &[BetEvent],
        bear: &[BetEvent],
        claims: &[ClaimEvent],
    ) -> Result<(), SyncError> {
        let fail = |message: String| SyncError::Validation { stage: "VALIDATE", message };

        if !(round.start_timestamp < round.lock_timestamp && round.lock_timestamp < round.close_timestamp) {
            return Err(fail("round timestamps not strictly increasing".into()));
        }

        let (price_lo, price_hi) = (Decimal::new(50, 0), Decimal::new(5000, 0));
        let in_bounds = |p: Decimal| p > price_lo && p < price_hi;
        if !in_bounds(round.lock_price) || !in_bounds(round.close_price) {
            return Err(fail("price out of (50, 5000) bounds".into()));
        }
        let change_ratio = (round.close_price - round.lock_price).abs() / round.lock_price;
        if change_ratio > MAX_PRICE_CHANGE_RATIO {
            return Err(fail("price change > 20%".into()));
        }

        if round.total_amount < Decimal::ZERO || round.bull_amount < Decimal::ZERO || round.bear_amount < Decimal::ZERO {
            return Err(fail("negative amount reported by chain".into()));
        }
        if (round.total_amount - (round.bull_amount + round.bear_amount)).abs() > TOTALS_TOLERANCE {
            return Err(fail("chain-reported total diverges from up+down".into()));
        }
        if round.total_amount.is_zero() && round.bull_amount.is_zero() && round.bear_amount.is_zero() {
            return Err(fail("all reported amounts are zero".into()));
        }

        if bull.is_empty() || bear.is_empty() {
            return Err(fail("BetBull/BetBear event set empty".into()));
        }
        for event in bull.iter().chain(bear.iter()) {
            if event.amount <= Decimal::ZERO {
                return Err(fail(format!("non-positive bet amount from {}", event.sender)));
            }
        }

        if claims.is_empty() {
            return Err(fail("no Claim events in range".into()));
        }
        for claim in claims {
            if claim.bet_epoch <= 0 || claim.bet_epoch >= epoch {
                return Err(fail(format!("claim bet_epoch {} not < epoch {epoch}", claim.bet_epoch)));
            }
            if claim.amount <= Decimal::ZERO {
                return Err(fail(format!("non-positive claim amount from {}", claim.sender)));
            }
        }

        Ok(())
    }

    async fn parse(
        &self,
        epoch: i64,
        bull: &[BetEvent],
        bear: &[BetEvent],
        claims: &[ClaimEvent],
    ) -> Result<ParsedEpoch, SyncError> {
        let mut bets = Vec::with_capacity(bull.len() + bear.len());
        for (event, side) in bull.iter().map(|e| (e, Side::Up)).chain(bear.iter().map(|e| (e, Side::Down))) {
            let bet_time = self.block_timestamp(event.block_number).await?;
            bets.push(ParsedBet {
                bet_time,
                tx_hash: event.tx_hash.as_str().to_string(),
                wallet_address: event.sender.clone(),
                direction: side,
                amount: event.amount,
                block_number: event.block_number as i64,
            });
        }

        let mut seen = HashSet::new();
        let mut parsed_claims = Vec::with_capacity(claims.len());
        for claim in claims {
            let key = (claim.block_number as i64, claim.sender.clone(), claim.bet_epoch);
            if !seen.insert(key) {
                continue;
            }
            parsed_claims.push(ParsedClaim {
                block_number: claim.block_number as i64,
                wallet_address: claim.sender.clone(),
                bet_epoch: claim.bet_epoch,
                amount: claim.amount,
            });
        }

        let _ = epoch;
        Ok(ParsedEpoch { bets, claims: parsed_claims })
    }

    async fn block_timestamp(&self, block_number: u64) -> Result<DateTime<Utc>, SyncError> {
        if let Some(ts) = self.block_ts_cache.lock().get(&block_number).copied() {
            return Ok(ts);
        }
        if let Some(ts) = self
            .store
            .bet_time_for_block(block_number as i64)
            .await
            .map_err(SyncError::Transient)?
        {
            self.block_ts_cache.lock().put(block_number, ts);
            return Ok(ts);
        }
        let ts = self.chain.block_timestamp(block_number).await.map_err(SyncError::Transient)?;
        self.block_ts_cache.lock().put(block_number, ts);
        Ok(ts)
    }

    fn verify_totals(&self, epoch: i64, round: &RoundData, parsed: &ParsedEpoch) -> Result<(), SyncError> {
        let fail = |message: String| SyncError::Validation { stage: "VERIFY_TOTALS", message };

        let mut up_sum = Decimal::ZERO;
        let mut down_sum = Decimal::ZERO;
        let mut tx_hashes = HashSet::with_capacity(parsed.bets.len());
        for bet in &parsed.bets {
            match bet.direction {
                Side::Up => up_sum += bet.amount,
                Side::Down => down_sum += bet.amount,
            }
            if !tx_hashes.insert(bet.tx_hash.clone()) {
                return Err(fail(format!("duplicate tx_hash {}", bet.tx_hash)));
            }
        }

        if up_sum.is_zero() || down_sum.is_zero() {
            return Err(fail("one side has zero parsed volume".into()));
        }
        if (up_sum - round.bull_amount).abs() > TOTALS_TOLERANCE {
            return Err(fail("parsed up_sum diverges from chain bullAmount".into()));
        }
        if (down_sum - round.bear_amount).abs() > TOTALS_TOLERANCE {
            return Err(fail("parsed down_sum diverges from chain bearAmount".into()));
        }

        let _ = epoch;
        Ok(())
    }
}

impl RoundData {
    fn start_timestamp_utc(&self) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(self.start_timestamp, 0).unwrap_or_else(Utc::now)
    }

    fn lock_timestamp_utc(&self) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(self.lock_timestamp, 0).unwrap_or_else(Utc::now)
    }

    fn close_timestamp_utc(&self) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(self.close_timestamp, 0).unwrap_or_else(Utc::now)
    }
}

/// `YYYY-MM-DD HH:MM:SS` in Asia/Taipei (fixed UTC+8, no DST).
pub fn taipei_local_string(ts: DateTime<Utc>) -> String {
    let offset = FixedOffset::east_opt(TAIPEI_OFFSET_SECS).expect("valid fixed offset");
    ts.with_timezone(&offset).format("%Y-%m-%d %H:%M:%S").to_string()
}

pub fn round_result(lock_price: Decimal, close_price: Decimal) -> Side {
    if close_price > lock_price {
        Side::Up
    } else {
        Side::Down
    }
}

fn derive_multi_claims(claims: &[ParsedClaim]) -> Vec<MultiClaim> {
    use std::collections::HashMap;

    let mut per_wallet: HashMap<WalletAddress, (HashSet<i64>, Decimal)> = HashMap::new();
    for claim in claims {
        let entry = per_wallet
            .entry(claim.wallet_address.clone())
            .or_insert_with(|| (HashSet::new(), Decimal::ZERO));
        entry.0.insert(claim.bet_epoch);
        entry.1 += claim.amount;
    }

    per_wallet
        .into_iter()
        .filter(|(_, (epochs, total))| {
            epochs.len() as i64 >= MULTI_CLAIM_EPOCH_THRESHOLD || *total >= MULTI_CLAIM_AMOUNT_THRESHOLD
        })
        .map(|(wallet_address, (epochs, total_amount))| MultiClaim {
            wallet_address,
            distinct_bet_epochs: epochs.len() as i64,
            total_amount,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_result_is_up_when_close_above_lock() {
        assert_eq!(round_result(Decimal::new(250_00000000, 8), Decimal::new(252_50000000, 8)), Side::Up);
    }

    #[test]
    fn round_result_is_down_when_close_at_or_below_lock() {
        assert_eq!(round_result(Decimal::new(250_00000000, 8), Decimal::new(250_00000000, 8)), Side::Down);
    }

    #[test]
    fn taipei_string_has_expected_shape() {
        let ts = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap();
        let s = taipei_local_string(ts);
        assert_eq!(s.len(), "YYYY-MM-DD HH:MM:SS".len());
    }
}
