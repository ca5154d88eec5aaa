//! BB-Width pattern/squeeze monitor (C10, §4.10).
//!
//! Listens for 5-min closes of instruments belonging to `BB_RANGE` groups,
//! maintains a per-instrument rolling BBW series, evaluates the alert rules
//! in priority order, and enforces the per-symbol cooldown and hourly cap
//! before invoking the alert sink and broadcasting a snapshot frame.

use crate::domain::bbw::{
    classify_trend, contracting_sequence_count, pattern_strength, AlertEvent, AlertType, BbwSnapshot, RingBuffer,
};
use crate::domain::calendar::is_market_hours;
use crate::domain::candle::{AggregatedCandle, StockContext};
use crate::domain::events::CandleCloseListener;
use crate::domain::group::EntryType;
use crate::domain::ports::AlertSink;
use crate::domain::repositories::GroupRepository;
use crate::infrastructure::broadcast_hub::BroadcastHub;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio::sync::RwLock;
use tracing::{info, warn};

struct InstrumentState {
    series: RingBuffer<f64>,
    previously_alerted: bool,
    latest_snapshot: Option<BbwSnapshot>,
}

impl InstrumentState {
    fn new(capacity: usize) -> Self {
        Self { series: RingBuffer::new(capacity), previously_alerted: false, latest_snapshot: None }
    }
}

pub struct BbwMonitorConfig {
    pub enabled: bool,
    pub contracting_lookback: usize,
    pub threshold_percent: f64,
    pub squeeze_ratio: f64,
    pub pattern_min_count: usize,
    pub pattern_min_rate_of_change_percent: f64,
    pub alert_cooldown: StdDuration,
    pub max_alerts_per_hour: u32,
}

pub struct BbwMonitor {
    group_repository: Arc<dyn GroupRepository>,
    alert_sink: Arc<dyn AlertSink>,
    broadcast_hub: Arc<BroadcastHub>,
    config: BbwMonitorConfig,
    state: RwLock<HashMap<String, InstrumentState>>,
    alert_history: RwLock<RingBuffer<AlertEvent>>,
    last_alert_per_symbol: RwLock<HashMap<String, DateTime<Utc>>>,
    recent_alert_times: RwLock<Vec<DateTime<Utc>>>,
}

const ALERT_HISTORY_CAPACITY: usize = 100;

impl BbwMonitor {
    pub fn new(
        group_repository: Arc<dyn GroupRepository>,
        alert_sink: Arc<dyn AlertSink>,
        broadcast_hub: Arc<BroadcastHub>,
        config: BbwMonitorConfig,
    ) -> Self {
        Self {
            group_repository,
            alert_sink,
            broadcast_hub,
            config,
            state: RwLock::new(HashMap::new()),
            alert_history: RwLock::new(RingBuffer::new(ALERT_HISTORY_CAPACITY)),
            last_alert_per_symbol: RwLock::new(HashMap::new()),
            recent_alert_times: RwLock::new(Vec::new()),
        }
    }

    /// Read path available even when the monitor is idle outside market
    /// hours (§4.10).
    pub async fn get_latest_available_day_data(&self, instrument_key: &str) -> Option<BbwSnapshot> {
        self.state.read().await.get(instrument_key).and_then(|s| s.latest_snapshot.clone())
    }

    async fn is_bb_range_member(&self, instrument_key: &str) -> bool {
        match self.group_repository.get_active_or_executing_group().await {
            Ok(Some(group)) => {
                group.entry_type == EntryType::BbRange && group.stocks.iter().any(|s| s.stock_id == instrument_key)
            }
            _ => false,
        }
    }

    async fn process_one(&self, candle: &AggregatedCandle, context: &StockContext) {
        if !self.config.enabled || !is_market_hours(candle.candle.timestamp) {
            return;
        }
        if !self.is_bb_range_member(&context.instrument_key).await {
            return;
        }

        let snapshot = {
            let mut states = self.state.write().await;
            let entry = states
                .entry(context.instrument_key.clone())
                .or_insert_with(|| InstrumentState::new(self.config.contracting_lookback + 1));
            entry.series.push(candle.indicators.bb_width);
            let series = entry.series.as_vec();
            let snapshot = self.build_snapshot(&context.instrument_key, candle.candle.timestamp, &series, entry.previously_alerted);
            entry.previously_alerted = snapshot.alert_triggered;
            entry.latest_snapshot = Some(snapshot.clone());
            snapshot
        };

        if let Some(alert_type) = snapshot.alert_type {
            self.fire_alert(&context.symbol, &snapshot, alert_type).await;
        }

        let payload = match serde_json::to_string(&snapshot) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "failed to serialize bbw snapshot");
                return;
            }
        };
        self.broadcast_hub.broadcast(payload).await;
    }

    fn build_snapshot(&self, instrument_key: &str, timestamp: DateTime<Utc>, series: &[f64], previously_alerted: bool) -> BbwSnapshot {
        let current = *series.last().unwrap_or(&0.0);
        let historical_min = series.iter().cloned().fold(f64::INFINITY, f64::min);
        let historical_min = if historical_min.is_finite() { historical_min } else { current };
        let distance_from_min_percent = if historical_min.abs() > f64::EPSILON {
            (current - historical_min) / historical_min * 100.0
        } else {
            0.0
        };
        let count = contracting_sequence_count(series);
        let trend = classify_trend(series);

        let rate_of_change = if series.len() >= 2 && series[series.len() - 2].abs() > f64::EPSILON {
            (current - series[series.len() - 2]) / series[series.len() - 2] * 100.0
        } else {
            0.0
        };
        let strength = pattern_strength(count, rate_of_change.abs());

        let threshold_hit = current >= historical_min * (1.0 - self.config.threshold_percent / 100.0)
            && current <= historical_min * (1.0 + self.config.threshold_percent / 100.0);
        let pattern_hit = count >= self.config.pattern_min_count
            && matches!(strength, crate::domain::bbw::PatternStrength::Strong)
            && rate_of_change.abs() > self.config.pattern_min_rate_of_change_percent;
        let squeeze_hit = current <= historical_min * self.config.squeeze_ratio;

        let alert_type = if threshold_hit && !previously_alerted {
            Some(AlertType::Threshold)
        } else if pattern_hit {
            Some(AlertType::Pattern)
        } else if squeeze_hit {
            Some(AlertType::Squeeze)
        } else {
            None
        };

        BbwSnapshot {
            instrument_key: instrument_key.to_string(),
            current_bbw: current,
            historical_min_bbw: historical_min,
            distance_from_min_percent,
            contracting_sequence_count: count,
            trend,
            alert_triggered: alert_type.is_some(),
            alert_type,
            pattern_strength: strength,
            timestamp,
        }
    }

    async fn fire_alert(&self, symbol: &str, snapshot: &BbwSnapshot, alert_type: AlertType) {
        let now = snapshot.timestamp;

        {
            let last_alerts = self.last_alert_per_symbol.read().await;
            if let Some(last) = last_alerts.get(symbol)
                && now.signed_duration_since(*last).to_std().unwrap_or_default() < self.config.alert_cooldown
            {
                return;
            }
        }
        {
            let mut recent = self.recent_alert_times.write().await;
            recent.retain(|t| now.signed_duration_since(*t) < chrono::Duration::hours(1));
            if recent.len() as u32 >= self.config.max_alerts_per_hour {
                return;
            }
            recent.push(now);
        }
        self.last_alert_per_symbol.write().await.insert(symbol.to_string(), now);

        let event = AlertEvent {
            symbol: symbol.to_string(),
            bb_width: snapshot.current_bbw,
            lowest_min_bb_width: snapshot.historical_min_bbw,
            pattern_length: snapshot.contracting_sequence_count,
            alert_type,
            timestamp: now,
            group_id: None,
            message: format!("{symbol}: {alert_type:?} alert, bbw={:.4}", snapshot.current_bbw),
        };

        self.alert_history.write().await.push(event.clone());
        if let Err(e) = self.alert_sink.play(&event).await {
            warn!(symbol, error = %e, "alert sink failed");
        }
        info!(symbol, alert_type = ?alert_type, "bbw alert fired");
    }
}

#[async_trait]
impl CandleCloseListener for BbwMonitor {
    async fn on_candles(&self, candles: Vec<AggregatedCandle>, context: StockContext) {
        for candle in &candles {
            self.process_one(candle, &context).await;
        }
    }
}
