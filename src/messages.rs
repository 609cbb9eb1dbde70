// =============================================================================
// Pub/sub payload contracts — the six channel shapes enumerated in the
// component design for the bus.
// =============================================================================

use serde::Serialize;

use crate::types::{Bet, Confidence, RoundStatus, Side};

/// `round_update_channel` payload.
#[derive(Debug, Clone, Serialize)]
pub struct RoundUpdate {
    pub epoch: i64,
    pub lock_ts: i64,
    pub close_ts: i64,
    pub up_amount: rust_decimal::Decimal,
    pub down_amount: rust_decimal::Decimal,
    pub total_amount: rust_decimal::Decimal,
    pub status: RoundStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Side>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub close_price: Option<rust_decimal::Decimal>,
}

/// `instant_bet_channel` payload.
#[derive(Debug, Clone, Serialize)]
pub struct InstantBetMessage {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub data: Bet,
}

impl InstantBetMessage {
    pub fn new(bet: Bet) -> Self {
        Self { kind: "instant_bet", data: bet }
    }
}

/// `analysis_channel` payload, consumed by the (out-of-scope) dashboard
/// wallet-analysis collaborator.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisRequest {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub bet: Bet,
}

impl AnalysisRequest {
    pub fn new(bet: Bet) -> Self {
        Self { kind: "analysis_request", bet }
    }
}

/// Momentum-strategy features attached to a prediction.
#[derive(Debug, Clone, Serialize)]
pub struct MomentumFeatures {
    pub up_ratio: f64,
    pub up_ratio_diff: f64,
    pub volume_ratio: f64,
    pub slope: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MomentumStrategy {
    pub prediction: Side,
    pub confidence: Confidence,
    pub score: i32,
    pub reasons: Vec<String>,
    pub features: MomentumFeatures,
}

#[derive(Debug, Clone, Serialize)]
pub struct Strategies {
    pub momentum: MomentumStrategy,
}

/// `live_predictions` payload.
#[derive(Debug, Clone, Serialize)]
pub struct PredictionRecord {
    pub epoch: i64,
    pub timestamp: i64,
    pub version: u64,
    pub final_: bool,
    pub strategies: Strategies,
}

/// `backtest_results` payload — collaborator-owned; only the shape the bus
/// needs to be able to route is modeled here.
#[derive(Debug, Clone, Serialize)]
pub struct BacktestSummary {
    pub strategy: String,
    pub payload: serde_json::Value,
}
