// =============================================================================
// Timed trader
// =============================================================================
//
// Subscribes to `live_predictions` and `round_update_channel`. Pre-arms a
// transaction on a strong pre-final signal and dispatches exactly one bet per
// round inside the allowed window. State is confined to this task exactly
// like the aggregator's mailbox design — no `Arc<Mutex<_>>` shared state.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument, warn};

use crate::bus::PubSubBus;
use crate::chain::ChainClient;
use crate::config::{RuntimeConfig, TraderConfig};
use crate::decision::{PlacementState, TradePhaseRecord};
use crate::messages::{PredictionRecord, RoundUpdate};
use crate::store::StoreGateway;
use crate::types::{Confidence, Side, WalletAddress};

const LATE_RESCHEDULE_GUARD_MS: i64 = 1000;
const TOO_LATE_GUARD_MS: i64 = 100;
const ARM_SKIP_GUARD_MS: i64 = 500;

enum TraderEvent {
    RoundUpdate(RoundUpdate),
    Prediction(PredictionRecord),
}

#[derive(Clone, Copy)]
struct EpochMeta {
    lock_ms: i64,
    buffer_s: i64,
    t_stop: i64,
}

struct ArmedBet {
    prediction: Side,
    armed_at_ms: i64,
    nonce: u64,
    amount: rust_decimal::Decimal,
}

pub async fn run(
    chain: Arc<ChainClient>,
    store: Arc<StoreGateway>,
    bus: Arc<PubSubBus>,
    cfg: Arc<RuntimeConfig>,
) {
    if !cfg.trader.enabled {
        info!("trader disabled, not starting");
        return;
    }

    let (tx, mut rx) = tokio::sync::mpsc::channel(256);
    {
        let mut round_rx = bus.subscribe_round_update();
        let tx = tx.clone();
        tokio::spawn(async move {
            while let Ok(msg) = round_rx.recv().await {
                if tx.send(TraderEvent::RoundUpdate(msg)).await.is_err() {
                    return;
                }
            }
        });
    }
    {
        let mut pred_rx = bus.subscribe_predictions();
        let tx = tx.clone();
        tokio::spawn(async move {
            while let Ok(msg) = pred_rx.recv().await {
                if tx.send(TraderEvent::Prediction(msg)).await.is_err() {
                    return;
                }
            }
        });
    }

    let mut epoch_meta: HashMap<i64, EpochMeta> = HashMap::new();
    let mut placed: HashMap<i64, PlacementState> = HashMap::new();
    let mut armed: HashMap<i64, ArmedBet> = HashMap::new();
    let our_address = chain.our_address();

    while let Some(event) = rx.recv().await {
        match event {
            TraderEvent::RoundUpdate(update) => {
                epoch_meta.entry(update.epoch).or_insert_with(|| EpochMeta {
                    lock_ms: update.lock_ts * 1000,
                    buffer_s: 0,
                    t_stop: update.lock_ts * 1000,
                });
                // buffer_seconds is fixed contract-wide; refresh once per
                // epoch entry in case it changed since last read.
                if let Ok(buffer_s) = chain.buffer_seconds().await {
                    epoch_meta.insert(
                        update.epoch,
                        EpochMeta {
                            lock_ms: update.lock_ts * 1000,
                            buffer_s,
                            t_stop: update.lock_ts * 1000 - buffer_s * 1000,
                        },
                    );
                }
            }
            TraderEvent::Prediction(record) => {
                let Some(&meta) = epoch_meta.get(&record.epoch) else {
                    warn!(epoch = record.epoch, "prediction for epoch with no round meta yet, dropping");
                    continue;
                };

                if record.final_ {
                    handle_final(
                        &chain,
                        &store,
                        &bus,
                        &cfg.trader,
                        &our_address,
                        &tx,
                        &mut placed,
                        &armed,
                        meta,
                        record,
                    )
                    .await;
                } else {
                    handle_arm(&chain, &store, &bus, &cfg.trader, &mut armed, meta, record).await;
                }
            }
        }
    }
}

fn passes_filters(trader: &TraderConfig, prediction: Side, confidence: Confidence) -> bool {
    confidence >= trader.min_confidence && trader.side_filter.accepts(prediction)
}

#[allow(clippy::too_many_arguments)]
#[instrument(skip(chain, store, bus, trader, armed))]
async fn handle_arm(
    chain: &ChainClient,
    store: &StoreGateway,
    bus: &PubSubBus,
    trader: &TraderConfig,
    armed: &mut HashMap<i64, ArmedBet>,
    meta: EpochMeta,
    record: PredictionRecord,
) {
    if !trader.arm_enabled || armed.contains_key(&record.epoch) {
        return;
    }

    let m = &record.strategies.momentum;
    if !passes_filters(trader, m.prediction, m.confidence) {
        return;
    }

    let f = &m.features;
    let signal_strong = f.slope.abs() >= trader.arm_slope_min
        && (f.volume_ratio >= trader.arm_volume_min || f.up_ratio_diff.abs() >= trader.arm_updiff_min);
    if !signal_strong {
        return;
    }

    let now_ms = Utc::now().timestamp_millis();
    if now_ms >= meta.t_stop - trader.delta_ms - ARM_SKIP_GUARD_MS {
        return;
    }

    let nonce = match chain.pending_nonce().await {
        Ok(n) => n,
        Err(err) => {
            warn!(epoch = record.epoch, error = %err, "failed to reserve nonce while arming");
            return;
        }
    };

    armed.insert(
        record.epoch,
        ArmedBet { prediction: m.prediction, armed_at_ms: now_ms, nonce, amount: trader.amount },
    );

    let phase = TradePhaseRecord::arm(
        record.epoch,
        "momentum",
        m.prediction,
        m.confidence,
        trader.amount,
        trader.delta_ms,
        meta.t_stop,
        record.version,
        nonce,
    );
    info!(epoch = record.epoch, nonce, "trader armed");
    bus.publish_trade_log(phase.clone());
    let _ = store.insert_trade_log(&phase).await;
}

#[allow(clippy::too_many_arguments)]
#[instrument(skip(chain, store, bus, trader, our_address, tx, placed, armed))]
async fn handle_final(
    chain: &ChainClient,
    store: &StoreGateway,
    bus: &PubSubBus,
    trader: &TraderConfig,
    our_address: &WalletAddress,
    tx: &tokio::sync::mpsc::Sender<TraderEvent>,
    placed: &mut HashMap<i64, PlacementState>,
    armed: &HashMap<i64, ArmedBet>,
    meta: EpochMeta,
    record: PredictionRecord,
) {
    let m = &record.strategies.momentum;
    if !passes_filters(trader, m.prediction, m.confidence) {
        return;
    }

    let t_send = meta.t_stop - trader.delta_ms;
    let now_ms = Utc::now().timestamp_millis();

    if now_ms < t_send - LATE_RESCHEDULE_GUARD_MS {
        let delay_ms = (t_send - now_ms - 500).max(0);
        let tx = tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(delay_ms as u64)).await;
            let _ = tx.send(TraderEvent::Prediction(record)).await;
        });
        return;
    }

    if now_ms >= meta.t_stop - TOO_LATE_GUARD_MS {
        warn!(epoch = record.epoch, "final prediction arrived too late to send, dropping");
        return;
    }

    if placed.contains_key(&record.epoch) {
        return;
    }

    match chain.ledger(record.epoch, our_address).await {
        Ok(entry) if !entry.amount.is_zero() => {
            placed.insert(record.epoch, PlacementState::Placed);
            return;
        }
        Err(err) => {
            warn!(epoch = record.epoch, error = %err, "ledger check failed, proceeding with send");
        }
        _ => {}
    }

    let reused = armed.get(&record.epoch).filter(|a| {
        a.prediction == m.prediction && now_ms - a.armed_at_ms <= trader.arm_max_age_ms
    });
    let (nonce, amount) = match reused {
        Some(a) => (Some(a.nonce), a.amount),
        None => (None, trader.amount),
    };

    let gas_price = match chain.gas_price().await {
        Ok(gp) => Some(((gp as f64) * trader.gas_bump) as u128),
        Err(err) => {
            warn!(epoch = record.epoch, error = %err, "gas price read failed, using node default");
            None
        }
    };

    if trader.dry_run {
        let phase = TradePhaseRecord::dry_run(
            record.epoch,
            "momentum",
            m.prediction,
            m.confidence,
            amount,
            trader.delta_ms,
            meta.t_stop,
            record.version,
        );
        info!(epoch = record.epoch, "trader dry-run send");
        bus.publish_trade_log(phase.clone());
        let _ = store.insert_trade_log(&phase).await;
        placed.insert(record.epoch, PlacementState::Placed);
        return;
    }

    let send_start = Utc::now().timestamp_millis();
    match chain.submit_bet(m.prediction, record.epoch, amount, nonce, gas_price).await {
        Ok(tx_hash) => {
            let mined_ms = Utc::now().timestamp_millis();
            let sent_phase = TradePhaseRecord::sent(
                record.epoch,
                "momentum",
                m.prediction,
                m.confidence,
                amount,
                trader.delta_ms,
                meta.t_stop,
                record.version,
                nonce.unwrap_or(0),
                tx_hash.to_string(),
                mined_ms - send_start,
            );
            bus.publish_trade_log(sent_phase.clone());
            let _ = store.insert_trade_log(&sent_phase).await;

            let phase = TradePhaseRecord::receipt(
                record.epoch,
                "momentum",
                m.prediction,
                m.confidence,
                amount,
                trader.delta_ms,
                meta.t_stop,
                record.version,
                nonce.unwrap_or(0),
                tx_hash.to_string(),
                mined_ms - send_start,
                mined_ms - send_start,
                true,
                None,
            );
            info!(epoch = record.epoch, tx_hash = %tx_hash, "trader bet confirmed");
            bus.publish_trade_log(phase.clone());
            let _ = store.insert_trade_log(&phase).await;
            placed.insert(record.epoch, PlacementState::Placed);
        }
        Err(err) => {
            let message = err.to_string();
            let state = if looks_like_rejection(&message) {
                PlacementState::Placed
            } else {
                PlacementState::Uncertain
            };
            warn!(epoch = record.epoch, error = %message, ?state, "trader send failed");

            let phase = TradePhaseRecord::receipt(
                record.epoch,
                "momentum",
                m.prediction,
                m.confidence,
                amount,
                trader.delta_ms,
                meta.t_stop,
                record.version,
                nonce.unwrap_or(0),
                String::new(),
                0,
                Utc::now().timestamp_millis() - send_start,
                false,
                Some(message),
            );
            bus.publish_trade_log(phase.clone());
            let _ = store.insert_trade_log(&phase).await;
            placed.insert(record.epoch, state);
        }
    }
}

/// Heuristic: errors whose message clearly establishes on-chain rejection
/// (vs. a transport-level failure of unknown outcome).
fn looks_like_rejection(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("insufficient funds")
        || lower.contains("already bet")
        || lower.contains("stale round")
        || lower.contains("revert")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejection_heuristic_matches_known_revert_reasons() {
        assert!(looks_like_rejection("execution reverted: insufficient funds"));
        assert!(looks_like_rejection("already bet this round"));
        assert!(!looks_like_rejection("connection reset by peer"));
        assert!(!looks_like_rejection("request timed out"));
    }
}
