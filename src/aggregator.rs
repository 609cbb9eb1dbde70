// =============================================================================
// Live prediction aggregator
// =============================================================================
//
// One task owns a mailbox fed by three sources (round updates, live bets, a
// one-shot final-tick timer) and a plain, non-shared `LiveAggregatorState` —
// nothing outside this task ever touches aggregator state directly.
// =============================================================================

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::bus::PubSubBus;
use crate::messages::{InstantBetMessage, MomentumFeatures, MomentumStrategy, PredictionRecord, RoundUpdate, Strategies};
use crate::store::StoreGateway;
use crate::types::{Confidence, Side};

const SERIES_CAPACITY: usize = 50;
const MIN_EMIT_INTERVAL: std::time::Duration = std::time::Duration::from_secs(3);
const UP_RATIO_EMIT_DELTA: f64 = 0.03;
const VOLUME_BUCKET_MID: f64 = 1.2;
const VOLUME_BUCKET_HIGH: f64 = 1.5;
const FLOW_DEVIATION_THRESHOLD: f64 = 0.10;
const PRICE_BREAKOUT_SIGMA: f64 = 0.01;
const PRICE_BREAKOUT_MOVE: f64 = 0.02;
const SLOPE_WINDOW_SECS: f64 = 8.0;
const SLOPE_CONFIDENCE_THRESHOLD: f64 = 0.04;
const CACHE_TTL: std::time::Duration = std::time::Duration::from_secs(30 * 60);

pub enum AggregatorEvent {
    RoundUpdate(RoundUpdate),
    Bet(InstantBetMessage),
    FinalTick(i64),
}

#[derive(Clone, Copy)]
struct SeriesPoint {
    at: Instant,
    up_ratio: f64,
    total: f64,
}

#[derive(Clone, Copy)]
struct FinalizedFeature {
    up_ratio: f64,
    price_change: f64,
    total_amount: f64,
}

struct LiveAggregatorState {
    epoch: Option<i64>,
    up_sum: Decimal,
    down_sum: Decimal,
    total_sum: Decimal,
    series: VecDeque<SeriesPoint>,
    last_emitted_up_ratio: Option<f64>,
    last_emitted_volume_bucket: Option<&'static str>,
    last_emit_at: Option<Instant>,
    version: u64,
    hist: Vec<FinalizedFeature>,
    avg_hist_up_ratio: f64,
    avg_hist_volume: f64,
    lock_time_ms: i64,
    final_tick: Option<JoinHandle<()>>,
}

impl LiveAggregatorState {
    fn new() -> Self {
        Self {
            epoch: None,
            up_sum: Decimal::ZERO,
            down_sum: Decimal::ZERO,
            total_sum: Decimal::ZERO,
            series: VecDeque::with_capacity(SERIES_CAPACITY),
            last_emitted_up_ratio: None,
            last_emitted_volume_bucket: None,
            last_emit_at: None,
            version: 0,
            hist: Vec::new(),
            avg_hist_up_ratio: 0.5,
            avg_hist_volume: 1.0,
            lock_time_ms: 0,
            final_tick: None,
        }
    }
}

/// A single-slot-per-epoch 30-minute-TTL cache so a late dashboard
/// subscriber can fetch the latest revision without replay.
pub struct PredictionCache {
    inner: RwLock<std::collections::HashMap<i64, (PredictionRecord, Instant)>>,
}

impl PredictionCache {
    fn new() -> Self {
        Self { inner: RwLock::new(std::collections::HashMap::new()) }
    }

    fn put(&self, epoch: i64, record: PredictionRecord) {
        self.inner.write().insert(epoch, (record, Instant::now()));
    }

    pub fn get(&self, epoch: i64) -> Option<PredictionRecord> {
        let mut guard = self.inner.write();
        guard.retain(|_, (_, at)| at.elapsed() < CACHE_TTL);
        guard.get(&epoch).map(|(r, _)| r.clone())
    }
}

pub fn spawn(store: Arc<StoreGateway>, bus: Arc<PubSubBus>, final_advance_ms: i64) -> Arc<PredictionCache> {
    let cache = Arc::new(PredictionCache::new());
    let (tx, rx) = mpsc::channel(1024);

    {
        let mut round_rx = bus.subscribe_round_update();
        let tx = tx.clone();
        tokio::spawn(async move {
            while let Ok(msg) = round_rx.recv().await {
                if tx.send(AggregatorEvent::RoundUpdate(msg)).await.is_err() {
                    return;
                }
            }
        });
    }
    {
        let mut bet_rx = bus.subscribe_instant_bet();
        let tx = tx.clone();
        tokio::spawn(async move {
            while let Ok(msg) = bet_rx.recv().await {
                if tx.send(AggregatorEvent::Bet(msg)).await.is_err() {
                    return;
                }
            }
        });
    }

    {
        let cache = cache.clone();
        tokio::spawn(run(store, bus, final_advance_ms, tx, rx, cache));
    }

    cache
}

async fn run(
    store: Arc<StoreGateway>,
    bus: Arc<PubSubBus>,
    final_advance_ms: i64,
    self_tx: mpsc::Sender<AggregatorEvent>,
    mut rx: mpsc::Receiver<AggregatorEvent>,
    cache: Arc<PredictionCache>,
) {
    let mut state = LiveAggregatorState::new();

    while let Some(event) = rx.recv().await {
        match event {
            AggregatorEvent::RoundUpdate(update) => {
                handle_round_update(&mut state, &store, &self_tx, final_advance_ms, update).await;
            }
            AggregatorEvent::Bet(msg) => {
                handle_bet(&mut state, &bus, &cache, msg.data.epoch, msg.data.direction, msg.data.amount);
            }
            AggregatorEvent::FinalTick(epoch) => {
                if state.epoch == Some(epoch) {
                    emit(&mut state, &bus, &cache, true, true);
                }
            }
        }
    }
}

async fn handle_round_update(
    state: &mut LiveAggregatorState,
    store: &StoreGateway,
    self_tx: &mpsc::Sender<AggregatorEvent>,
    final_advance_ms: i64,
    update: RoundUpdate,
) {
    if state.epoch != Some(update.epoch) {
        if let Some(handle) = state.final_tick.take() {
            handle.abort();
        }

        *state = LiveAggregatorState::new();
        state.epoch = Some(update.epoch);
        state.lock_time_ms = update.lock_ts;

        match store.live_bet_sums(update.epoch).await {
            Ok((up, down, total)) => {
                state.up_sum = up;
                state.down_sum = down;
                state.total_sum = total;
            }
            Err(err) => warn!(epoch = update.epoch, error = %err, "failed to re-seed live bet sums"),
        }

        match store.recent_finalized_features(5).await {
            Ok(rows) => {
                state.hist = rows
                    .iter()
                    .filter(|r| !r.lock_price.is_zero())
                    .map(|r| FinalizedFeature {
                        up_ratio: ratio_f64(r.up_amount, r.total_amount),
                        price_change: ratio_f64(r.close_price - r.lock_price, r.lock_price),
                        total_amount: r.total_amount.to_string().parse().unwrap_or(0.0),
                    })
                    .collect();
                if !state.hist.is_empty() {
                    state.avg_hist_up_ratio =
                        state.hist.iter().map(|f| f.up_ratio).sum::<f64>() / state.hist.len() as f64;
                    state.avg_hist_volume =
                        state.hist.iter().map(|f| f.total_amount).sum::<f64>() / state.hist.len() as f64;
                    if state.avg_hist_volume <= 0.0 {
                        state.avg_hist_volume = 1.0;
                    }
                }
            }
            Err(err) => warn!(epoch = update.epoch, error = %err, "failed to fetch recent finalized features"),
        }

        let t_stop_ms = update.lock_ts;
        let now_ms = Utc::now().timestamp_millis();
        let fire_at_ms = t_stop_ms - final_advance_ms;
        let delay_ms = if fire_at_ms - now_ms < 500 { 500 } else { fire_at_ms - now_ms };

        let epoch = update.epoch;
        let tx = self_tx.clone();
        state.final_tick = Some(tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(delay_ms.max(0) as u64)).await;
            let _ = tx.send(AggregatorEvent::FinalTick(epoch)).await;
        }));

        debug!(epoch, delay_ms, "aggregator scheduled final tick");
    }
}

fn handle_bet(
    state: &mut LiveAggregatorState,
    bus: &PubSubBus,
    cache: &PredictionCache,
    epoch: i64,
    direction: Side,
    amount: Decimal,
) {
    if state.epoch != Some(epoch) {
        return;
    }

    match direction {
        Side::Up => state.up_sum += amount,
        Side::Down => state.down_sum += amount,
    }
    state.total_sum += amount;

    let up_ratio = ratio_f64(state.up_sum, state.total_sum);
    let total = state.total_sum.to_string().parse().unwrap_or(0.0);

    if state.series.len() >= SERIES_CAPACITY {
        state.series.pop_front();
    }
    state.series.push_back(SeriesPoint { at: Instant::now(), up_ratio, total });

    if should_emit(state, up_ratio, total) {
        emit(state, bus, cache, false, false);
    }
}

fn should_emit(state: &LiveAggregatorState, up_ratio: f64, total: f64) -> bool {
    let Some(last_at) = state.last_emit_at else { return true };
    if last_at.elapsed() < MIN_EMIT_INTERVAL {
        return false;
    }

    let Some(last_ratio) = state.last_emitted_up_ratio else { return true };

    if (up_ratio - last_ratio).abs() >= UP_RATIO_EMIT_DELTA {
        return true;
    }
    if (last_ratio - 0.5).signum() != (up_ratio - 0.5).signum() {
        return true;
    }
    if let Some(last_bucket) = state.last_emitted_volume_bucket {
        if volume_bucket(total / state.avg_hist_volume) != last_bucket {
            return true;
        }
    }

    false
}

fn volume_bucket(vol_ratio: f64) -> &'static str {
    if vol_ratio >= VOLUME_BUCKET_HIGH {
        "high"
    } else if vol_ratio >= VOLUME_BUCKET_MID {
        "mid"
    } else {
        "base"
    }
}

fn emit(state: &mut LiveAggregatorState, bus: &PubSubBus, cache: &PredictionCache, force: bool, is_final: bool) {
    let _ = force;
    let Some(epoch) = state.epoch else { return };

    let up_ratio = ratio_f64(state.up_sum, state.total_sum);
    let total: f64 = state.total_sum.to_string().parse().unwrap_or(0.0);
    let vol_ratio = if state.avg_hist_volume > 0.0 { total / state.avg_hist_volume } else { 1.0 };
    let diff = up_ratio - state.avg_hist_up_ratio;
    let slope = regression_slope(&state.series);

    let (prediction, mut reasons) = decide_prediction(state, up_ratio, diff, vol_ratio, slope);
    let (mut confidence, score) = decide_confidence(diff, vol_ratio, slope);

    if total < 0.2 * state.avg_hist_volume && confidence == Confidence::High {
        confidence = Confidence::Medium;
        reasons.push("downgraded: volume below 20% of historical average".into());
    }
    if is_final && confidence == Confidence::Low {
        confidence = Confidence::Medium;
        reasons.push("lifted to medium on final revision".into());
    }

    state.version += 1;
    state.last_emitted_up_ratio = Some(up_ratio);
    state.last_emitted_volume_bucket = Some(volume_bucket(vol_ratio));
    state.last_emit_at = Some(Instant::now());

    let record = PredictionRecord {
        epoch,
        timestamp: Utc::now().timestamp_millis(),
        version: state.version,
        final_: is_final,
        strategies: Strategies {
            momentum: MomentumStrategy {
                prediction,
                confidence,
                score,
                reasons,
                features: MomentumFeatures { up_ratio, up_ratio_diff: diff, volume_ratio: vol_ratio, slope },
            },
        },
    };

    cache.put(epoch, record.clone());
    bus.publish_prediction(record);
    info!(epoch, version = state.version, ?prediction, ?confidence, is_final, "prediction emitted");
}

fn decide_prediction(
    state: &LiveAggregatorState,
    up_ratio: f64,
    diff: f64,
    vol_ratio: f64,
    slope: f64,
) -> (Side, Vec<String>) {
    let mut reasons = Vec::new();

    if state.hist.len() < 3 {
        reasons.push("insufficient history, falling back to raw up_ratio".into());
        return (if up_ratio >= 0.5 { Side::Up } else { Side::Down }, reasons);
    }

    let mut up = 0i32;
    let mut down = 0i32;

    let recent: Vec<Side> = state
        .hist
        .iter()
        .rev()
        .take(3)
        .map(|f| if f.up_ratio >= 0.5 { Side::Up } else { Side::Down })
        .collect();
    let up_count = recent.iter().filter(|s| **s == Side::Up).count();
    let down_count = recent.len() - up_count;
    if up_count >= 3 {
        down += 2;
        reasons.push("streak reversal: 3 consecutive UP results".into());
    } else if up_count == 2 {
        up += 1;
    }
    if down_count >= 3 {
        up += 2;
        reasons.push("streak reversal: 3 consecutive DOWN results".into());
    } else if down_count == 2 {
        down += 1;
    }

    if diff.abs() > FLOW_DEVIATION_THRESHOLD {
        if diff > 0.0 {
            up += 2;
        } else {
            down += 2;
        }
        reasons.push(format!("flow deviation {diff:.3} exceeds threshold"));
    }

    if vol_ratio > VOLUME_BUCKET_HIGH {
        if up_ratio > 0.6 {
            up += 1;
        } else if up_ratio < 0.4 {
            down += 1;
        }
    }

    let price_changes: Vec<f64> = state.hist.iter().map(|f| f.price_change).collect();
    let sigma = std_dev(&price_changes);
    if let Some(last_change) = price_changes.last() {
        if sigma < PRICE_BREAKOUT_SIGMA && last_change.abs() > PRICE_BREAKOUT_MOVE {
            if *last_change > 0.0 {
                up += 2;
            } else {
                down += 2;
            }
            reasons.push("low-volatility price breakout".into());
        }
    }

    let _ = slope;
    let prediction = match up.cmp(&down) {
        std::cmp::Ordering::Greater => Side::Up,
        std::cmp::Ordering::Less => Side::Down,
        std::cmp::Ordering::Equal => {
            if up_ratio >= 0.5 {
                Side::Up
            } else {
                Side::Down
            }
        }
    };

    (prediction, reasons)
}

fn decide_confidence(diff: f64, vol_ratio: f64, slope: f64) -> (Confidence, i32) {
    let mut score = 0;
    if diff.abs() > FLOW_DEVIATION_THRESHOLD {
        score += 2;
    }
    if vol_ratio >= VOLUME_BUCKET_HIGH {
        score += 2;
    } else if vol_ratio >= VOLUME_BUCKET_MID {
        score += 1;
    }
    if slope.abs() > SLOPE_CONFIDENCE_THRESHOLD {
        score += 1;
    }

    let confidence = if score >= 3 {
        Confidence::High
    } else if score > 0 {
        Confidence::Medium
    } else {
        Confidence::Low
    };
    (confidence, score)
}

/// Ordinary-least-squares slope of `up_ratio` over the trailing `<=8s` window.
fn regression_slope(series: &VecDeque<SeriesPoint>) -> f64 {
    let now = Instant::now();
    let window: Vec<&SeriesPoint> = series
        .iter()
        .filter(|p| now.duration_since(p.at).as_secs_f64() <= SLOPE_WINDOW_SECS)
        .collect();
    if window.len() < 2 {
        return 0.0;
    }

    let xs: Vec<f64> = window.iter().map(|p| -now.duration_since(p.at).as_secs_f64()).collect();
    let ys: Vec<f64> = window.iter().map(|p| p.up_ratio).collect();
    let n = xs.len() as f64;
    let mean_x = xs.iter().sum::<f64>() / n;
    let mean_y = ys.iter().sum::<f64>() / n;

    let mut cov = 0.0;
    let mut var = 0.0;
    for (x, y) in xs.iter().zip(ys.iter()) {
        cov += (x - mean_x) * (y - mean_y);
        var += (x - mean_x).powi(2);
    }
    if var == 0.0 {
        0.0
    } else {
        cov / var
    }
}

fn std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

fn ratio_f64(numerator: Decimal, denominator: Decimal) -> f64 {
    if denominator.is_zero() {
        return 0.5;
    }
    (numerator / denominator).to_string().parse().unwrap_or(0.5)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volume_bucket_thresholds() {
        assert_eq!(volume_bucket(0.5), "base");
        assert_eq!(volume_bucket(1.3), "mid");
        assert_eq!(volume_bucket(1.6), "high");
    }

    #[test]
    fn std_dev_of_constant_series_is_zero() {
        assert_eq!(std_dev(&[0.01, 0.01, 0.01]), 0.0);
    }

    #[test]
    fn ratio_handles_zero_denominator() {
        assert_eq!(ratio_f64(Decimal::ZERO, Decimal::ZERO), 0.5);
    }
}
