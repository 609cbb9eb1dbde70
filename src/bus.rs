// =============================================================================
// Pub/sub bus — ephemeral fan-out, no replay, best-effort publish
// =============================================================================
//
// Six named channels, each its own `tokio::sync::broadcast` pair so every
// subscriber gets a correctly typed stream without matching on a tag. A
// lagging or absent subscriber (e.g. the out-of-scope dashboard) must never
// block or slow the core pipeline, so publish ignores the "no receivers"
// error and a lagged receiver simply skips ahead on its next recv().
// =============================================================================

use tokio::sync::broadcast;

use crate::decision::TradePhaseRecord;
use crate::messages::{AnalysisRequest, BacktestSummary, InstantBetMessage, PredictionRecord, RoundUpdate};

const CHANNEL_CAPACITY: usize = 1024;

/// Owns one broadcast sender per pub/sub channel named in the component
/// design. Cheaply `Clone`d (each field is an `Arc`-backed sender clone).
#[derive(Clone)]
pub struct PubSubBus {
    round_update: broadcast::Sender<RoundUpdate>,
    instant_bet: broadcast::Sender<InstantBetMessage>,
    analysis: broadcast::Sender<AnalysisRequest>,
    live_predictions: broadcast::Sender<PredictionRecord>,
    backtest_results: broadcast::Sender<BacktestSummary>,
    trade_log: broadcast::Sender<TradePhaseRecord>,
}

impl PubSubBus {
    pub fn new() -> Self {
        Self {
            round_update: broadcast::channel(CHANNEL_CAPACITY).0,
            instant_bet: broadcast::channel(CHANNEL_CAPACITY).0,
            analysis: broadcast::channel(CHANNEL_CAPACITY).0,
            live_predictions: broadcast::channel(CHANNEL_CAPACITY).0,
            backtest_results: broadcast::channel(CHANNEL_CAPACITY).0,
            trade_log: broadcast::channel(CHANNEL_CAPACITY).0,
        }
    }

    pub fn publish_round_update(&self, msg: RoundUpdate) {
        let _ = self.round_update.send(msg);
    }

    pub fn subscribe_round_update(&self) -> broadcast::Receiver<RoundUpdate> {
        self.round_update.subscribe()
    }

    pub fn publish_instant_bet(&self, msg: InstantBetMessage) {
        let _ = self.instant_bet.send(msg);
    }

    pub fn subscribe_instant_bet(&self) -> broadcast::Receiver<InstantBetMessage> {
        self.instant_bet.subscribe()
    }

    pub fn publish_analysis(&self, msg: AnalysisRequest) {
        let _ = self.analysis.send(msg);
    }

    pub fn subscribe_analysis(&self) -> broadcast::Receiver<AnalysisRequest> {
        self.analysis.subscribe()
    }

    pub fn publish_prediction(&self, msg: PredictionRecord) {
        let _ = self.live_predictions.send(msg);
    }

    pub fn subscribe_predictions(&self) -> broadcast::Receiver<PredictionRecord> {
        self.live_predictions.subscribe()
    }

    pub fn publish_backtest(&self, msg: BacktestSummary) {
        let _ = self.backtest_results.send(msg);
    }

    pub fn publish_trade_log(&self, msg: TradePhaseRecord) {
        let _ = self.trade_log.send(msg);
    }

    pub fn subscribe_trade_log(&self) -> broadcast::Receiver<TradePhaseRecord> {
        self.trade_log.subscribe()
    }
}

impl Default for PubSubBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RoundStatus;

    #[tokio::test]
    async fn round_update_fans_out_to_all_subscribers() {
        let bus = PubSubBus::new();
        let mut a = bus.subscribe_round_update();
        let mut b = bus.subscribe_round_update();

        bus.publish_round_update(RoundUpdate {
            epoch: 1,
            lock_ts: 0,
            close_ts: 0,
            up_amount: Default::default(),
            down_amount: Default::default(),
            total_amount: Default::default(),
            status: RoundStatus::Live,
            result: None,
            close_price: None,
        });

        assert_eq!(a.recv().await.unwrap().epoch, 1);
        assert_eq!(b.recv().await.unwrap().epoch, 1);
    }

    #[test]
    fn publish_with_no_subscribers_does_not_panic() {
        let bus = PubSubBus::new();
        bus.publish_round_update(RoundUpdate {
            epoch: 1,
            lock_ts: 0,
            close_ts: 0,
            up_amount: Default::default(),
            down_amount: Default::default(),
            total_amount: Default::default(),
            status: RoundStatus::Live,
            result: None,
            close_price: None,
        });
    }
}
