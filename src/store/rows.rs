// =============================================================================
// Explicit per-table row shapes
// =============================================================================
//
// One tagged struct per table kind, replacing the dynamic column-list-from-
// object-keys approach the system this is modeled on uses for inserts. Each
// derives `sqlx::FromRow` so reads map straight onto the struct.
// =============================================================================

use rust_decimal::Decimal;
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow)]
pub struct RoundRow {
    pub start_time: chrono::DateTime<chrono::Utc>,
    pub epoch: i64,
    pub lock_time: chrono::DateTime<chrono::Utc>,
    pub close_time: chrono::DateTime<chrono::Utc>,
    pub lock_price: Decimal,
    pub close_price: Decimal,
    pub total_amount: Decimal,
    pub up_amount: Decimal,
    pub down_amount: Decimal,
    pub result: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct BetRow {
    pub bet_time: chrono::DateTime<chrono::Utc>,
    pub tx_hash: String,
    pub epoch: i64,
    pub wallet_address: String,
    pub direction: String,
    pub amount: Decimal,
    pub block_number: i64,
}

#[derive(Debug, Clone, FromRow)]
pub struct ClaimRow {
    pub block_number: i64,
    pub wallet_address: String,
    pub bet_epoch: i64,
    pub epoch: i64,
    pub amount: Decimal,
}

#[derive(Debug, Clone, FromRow)]
pub struct MultiClaimRow {
    pub epoch: i64,
    pub wallet_address: String,
    pub distinct_bet_epochs: i64,
    pub total_amount: Decimal,
}

#[derive(Debug, Clone, FromRow)]
pub struct FinalizedMarkerRow {
    pub epoch: i64,
    pub processed_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct FailedEpochRow {
    pub epoch: i64,
    pub error_message: String,
    pub stage: String,
    pub failed_at: chrono::DateTime<chrono::Utc>,
    pub retry_count: i32,
}

/// `realbet` — a live (not-yet-finalized) bet; same shape as `BetRow` minus
/// any derived-result field.
#[derive(Debug, Clone, FromRow)]
pub struct LiveBetRow {
    pub bet_time: chrono::DateTime<chrono::Utc>,
    pub tx_hash: String,
    pub epoch: i64,
    pub wallet_address: String,
    pub direction: String,
    pub amount: Decimal,
    pub block_number: i64,
}

#[derive(Debug, Clone, FromRow)]
pub struct TradeLogRow {
    pub epoch: i64,
    pub phase: String,
    pub strategy: String,
    pub prediction: String,
    pub confidence: String,
    pub amount: Decimal,
    pub success: bool,
    pub error: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Historical feature row used by the live aggregator to seed its averages.
#[derive(Debug, Clone, FromRow)]
pub struct FinalizedFeatureRow {
    pub epoch: i64,
    pub up_amount: Decimal,
    pub down_amount: Decimal,
    pub total_amount: Decimal,
    pub lock_price: Decimal,
    pub close_price: Decimal,
}

/// Store-wide data boundaries, returned by the read helper of the same name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EpochBoundaries {
    pub min_epoch: Option<i64>,
    pub max_epoch: Option<i64>,
    pub distinct_count: i64,
}
