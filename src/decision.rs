// =============================================================================
// Trade phase record — auditable observability for every trader action
// =============================================================================
//
// Every phase of the trader's lifecycle (arm / dry-run / sent / receipt)
// produces one of these records, published on `trade_log` and persisted
// best-effort to the `trade_log` table. Modeled on a named, inspectable
// verdict value rather than scattered booleans.
// =============================================================================

use serde::Serialize;

use crate::types::{Confidence, Side};

/// Which phase of the trader lifecycle a record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TradePhase {
    Arm,
    FinalDryRun,
    FinalSent,
    FinalReceipt,
}

/// Final disposition of an epoch in the trader's placement set. `Uncertain`
/// resolves the "retry on transient send error" open question: a send whose
/// outcome could not be confirmed is never retried, but is distinguished
/// from a confirmed placement so an operator can reconcile it by hand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlacementState {
    Placed,
    Uncertain,
}

/// One auditable record of a trader action.
#[derive(Debug, Clone, Serialize)]
pub struct TradePhaseRecord {
    pub epoch: i64,
    pub phase: TradePhase,
    pub strategy: String,
    pub prediction: Side,
    pub confidence: Confidence,
    pub amount: rust_decimal::Decimal,
    pub delta_ms: i64,
    pub t_stop: i64,
    pub version: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub send_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mined_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_ms: Option<i64>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: String,
}

struct Common {
    epoch: i64,
    strategy: String,
    prediction: Side,
    confidence: Confidence,
    amount: rust_decimal::Decimal,
    delta_ms: i64,
    t_stop: i64,
    version: u64,
}

impl TradePhaseRecord {
    #[allow(clippy::too_many_arguments)]
    fn base(
        phase: TradePhase,
        c: Common,
        nonce: Option<u64>,
        success: bool,
        error: Option<String>,
    ) -> Self {
        Self {
            epoch: c.epoch,
            phase,
            strategy: c.strategy,
            prediction: c.prediction,
            confidence: c.confidence,
            amount: c.amount,
            delta_ms: c.delta_ms,
            t_stop: c.t_stop,
            version: c.version,
            nonce,
            tx_hash: None,
            send_ms: None,
            mined_ms: None,
            total_ms: None,
            success,
            error,
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn arm(
        epoch: i64,
        strategy: impl Into<String>,
        prediction: Side,
        confidence: Confidence,
        amount: rust_decimal::Decimal,
        delta_ms: i64,
        t_stop: i64,
        version: u64,
        nonce: u64,
    ) -> Self {
        Self::base(
            TradePhase::Arm,
            Common {
                epoch,
                strategy: strategy.into(),
                prediction,
                confidence,
                amount,
                delta_ms,
                t_stop,
                version,
            },
            Some(nonce),
            true,
            None,
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn dry_run(
        epoch: i64,
        strategy: impl Into<String>,
        prediction: Side,
        confidence: Confidence,
        amount: rust_decimal::Decimal,
        delta_ms: i64,
        t_stop: i64,
        version: u64,
    ) -> Self {
        Self::base(
            TradePhase::FinalDryRun,
            Common {
                epoch,
                strategy: strategy.into(),
                prediction,
                confidence,
                amount,
                delta_ms,
                t_stop,
                version,
            },
            None,
            true,
            None,
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn sent(
        epoch: i64,
        strategy: impl Into<String>,
        prediction: Side,
        confidence: Confidence,
        amount: rust_decimal::Decimal,
        delta_ms: i64,
        t_stop: i64,
        version: u64,
        nonce: u64,
        tx_hash: String,
        send_ms: i64,
    ) -> Self {
        let mut r = Self::base(
            TradePhase::FinalSent,
            Common {
                epoch,
                strategy: strategy.into(),
                prediction,
                confidence,
                amount,
                delta_ms,
                t_stop,
                version,
            },
            Some(nonce),
            true,
            None,
        );
        r.tx_hash = Some(tx_hash);
        r.send_ms = Some(send_ms);
        r
    }

    #[allow(clippy::too_many_arguments)]
    pub fn receipt(
        epoch: i64,
        strategy: impl Into<String>,
        prediction: Side,
        confidence: Confidence,
        amount: rust_decimal::Decimal,
        delta_ms: i64,
        t_stop: i64,
        version: u64,
        nonce: u64,
        tx_hash: String,
        mined_ms: i64,
        total_ms: i64,
        success: bool,
        error: Option<String>,
    ) -> Self {
        let mut r = Self::base(
            TradePhase::FinalReceipt,
            Common {
                epoch,
                strategy: strategy.into(),
                prediction,
                confidence,
                amount,
                delta_ms,
                t_stop,
                version,
            },
            Some(nonce),
            success,
            error,
        );
        r.tx_hash = Some(tx_hash);
        r.mined_ms = Some(mined_ms);
        r.total_ms = Some(total_ms);
        r
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arm_record_has_no_tx_hash_yet() {
        let r = TradePhaseRecord::arm(
            1,
            "momentum",
            Side::Up,
            Confidence::High,
            "0.001".parse().unwrap(),
            5000,
            1_700_000_300_000,
            1,
            42,
        );
        assert_eq!(r.phase, TradePhase::Arm);
        assert!(r.tx_hash.is_none());
        assert_eq!(r.nonce, Some(42));
    }

    #[test]
    fn receipt_failure_carries_error() {
        let r = TradePhaseRecord::receipt(
            1,
            "momentum",
            Side::Down,
            Confidence::Medium,
            "0.001".parse().unwrap(),
            5000,
            1_700_000_300_000,
            2,
            42,
            "0xabc".into(),
            100,
            150,
            false,
            Some("reverted".into()),
        );
        assert!(!r.success);
        assert_eq!(r.error.as_deref(), Some("reverted"));
    }
}
