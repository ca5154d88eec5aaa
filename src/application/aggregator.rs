//! Rolls 1-minute candles up to 5-minute and daily bars and enriches them
//! with the indicator vector (C5, §4.5).
//!
//! Grounded on the teacher's `TimeframeAggregator` bucket-accumulation shape
//! in `application/market_data/timeframe_aggregator.rs`, adapted from an
//! incremental streaming accumulator to a range-fetch-then-rebucket model
//! since this component re-derives affected buckets from the repository on
//! every ingested window rather than holding in-memory per-symbol state.

use crate::domain::calendar::{ist_date, TradingCalendar};
use crate::domain::candle::{AggregatedCandle, Candle, IndicatorVector, Interval, StockContext};
use crate::domain::indicators::{
    atr, bb_width, bb_width_normalized, bb_width_normalized_percentage, bollinger_bands,
    canonicalize, ema, rsi, sma, vwap,
};
use crate::domain::ports::BacktestMetadataLoader;
use crate::domain::repositories::CandleRepository;
use crate::infrastructure::event_bus::EventBus;
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::info;

const BB_PERIOD: usize = 20;
const BB_MULTIPLIER: f64 = 2.0;
/// ~75 five-minute bars per trading session; one full prior trading day
/// comfortably covers the 20-period warm-up the aggregator requires (§4.5).
const WARMUP_TRADING_DAYS: u32 = 1;

pub struct Aggregator {
    repository: Arc<dyn CandleRepository>,
    event_bus: EventBus,
    bbw_lookup: Option<Arc<dyn BacktestMetadataLoader>>,
    calendar: TradingCalendar,
}

impl Aggregator {
    pub fn new(repository: Arc<dyn CandleRepository>, event_bus: EventBus) -> Self {
        Self { repository, event_bus, bbw_lookup: None, calendar: TradingCalendar::default() }
    }

    pub fn with_bbw_lookup(mut self, lookup: Arc<dyn BacktestMetadataLoader>) -> Self {
        self.bbw_lookup = Some(lookup);
        self
    }

    /// Produces enriched 5-minute bars for `[from, to]`, fetching an extended
    /// warm-up window so the 20-period Bollinger Band is defined from the
    /// first returned bar, then fires C6 for the returned slice (§4.5, §4.6).
    pub async fn aggregate_5min(
        &self,
        context: &StockContext,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<AggregatedCandle>> {
        let warmup_date = self.calendar.subtract_trading_days(ist_date(from), WARMUP_TRADING_DAYS);
        let warmup_from = warmup_date.and_hms_opt(0, 0, 0).unwrap().and_utc();
        let one_min = self
            .repository
            .find_by_instrument_and_time_range(&context.instrument_key, Interval::OneMin, warmup_from, to)
            .await?;

        let buckets = bucket_five_minute(&one_min);
        let enriched = self.enrich(&buckets, Interval::FiveMin, &context.instrument_key);
        self.repository.store_aggregated(&enriched).await?;

        let in_range: Vec<AggregatedCandle> = enriched
            .into_iter()
            .filter(|a| a.candle.timestamp >= from && a.candle.timestamp <= to)
            .collect();

        info!(
            instrument_key = %context.instrument_key,
            bars = in_range.len(),
            "produced 5-minute aggregate"
        );
        self.event_bus.fire(in_range.clone(), context.clone()).await;
        Ok(in_range)
    }

    /// Produces enriched daily bars by rolling 1-minute candles up to
    /// trading-day boundaries (IST, §6 Timezone).
    pub async fn aggregate_daily(
        &self,
        instrument_key: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<AggregatedCandle>> {
        let one_min = self
            .repository
            .find_by_instrument_and_time_range(instrument_key, Interval::OneMin, from, to)
            .await?;

        let buckets = bucket_daily(&one_min);
        let enriched = self.enrich(&buckets, Interval::Day, instrument_key);
        self.repository.store_aggregated(&enriched).await?;
        Ok(enriched)
    }

    fn enrich(&self, candles: &[Candle], interval: Interval, instrument_key: &str) -> Vec<AggregatedCandle> {
        let lowest_bb_width = self
            .bbw_lookup
            .as_ref()
            .and_then(|l| l.lowest_bb_width(instrument_key))
            .unwrap_or(0.0);

        let canonical = match canonicalize(candles) {
            Ok(c) => c,
            Err(_) => return Vec::new(),
        };
        if canonical.is_empty() {
            return Vec::new();
        }

        let ma9 = sma(&canonical, 9);
        let ema5 = ema(&canonical, 5);
        let ema9 = ema(&canonical, 9);
        let ema50 = ema(&canonical, 50);
        let rsi14 = rsi(&canonical, 14);
        let atr14 = atr(&canonical, 14);
        let vwap_series = vwap(&canonical);
        let bands = bollinger_bands(&canonical, BB_PERIOD, BB_MULTIPLIER);
        let width = bb_width(&bands);
        let width_norm = bb_width_normalized(&bands);
        let width_norm_pct = bb_width_normalized_percentage(&width_norm);

        canonical
            .into_iter()
            .enumerate()
            .map(|(i, mut candle)| {
                candle.interval = interval;
                AggregatedCandle {
                    candle,
                    indicators: IndicatorVector {
                        ma9: ma9[i].value,
                        bb_upper: bands.upper[i].value,
                        bb_middle: bands.middle[i].value,
                        bb_lower: bands.lower[i].value,
                        bb_width: width[i].value,
                        bb_width_normalized: width_norm[i].value,
                        bb_width_normalized_percentage: width_norm_pct[i].value,
                        vwap: vwap_series[i].value,
                        ema5: ema5[i].value,
                        ema9: ema9[i].value,
                        ema50: ema50[i].value,
                        atr14: atr14[i].value,
                        rsi14: rsi14[i].value,
                        lowest_bb_width,
                    },
                }
            })
            .collect()
    }
}

/// Groups 1-minute candles into 5-minute buckets keyed by `⌊minute/5⌋`
/// (§4.5): `open` = first, `close` = last, `high`/`low` extremes, `volume`
/// summed, `open_interest` = last.
fn bucket_five_minute(candles: &[Candle]) -> Vec<Candle> {
    bucket_by(candles, |ts| {
        let minute = ts.timestamp() / 60;
        let bucket_minute = (minute / 5) * 5;
        DateTime::from_timestamp(bucket_minute * 60, 0).unwrap_or(ts)
    })
}

fn bucket_daily(candles: &[Candle]) -> Vec<Candle> {
    bucket_by(candles, |ts| {
        let date = ist_date(ts);
        date.and_hms_opt(0, 0, 0).unwrap().and_utc()
    })
}

fn bucket_by(candles: &[Candle], bucket_start: impl Fn(DateTime<Utc>) -> DateTime<Utc>) -> Vec<Candle> {
    use std::collections::BTreeMap;

    let mut buckets: BTreeMap<DateTime<Utc>, Vec<&Candle>> = BTreeMap::new();
    for candle in candles {
        buckets.entry(bucket_start(candle.timestamp)).or_default().push(candle);
    }

    buckets
        .into_iter()
        .map(|(bucket_ts, members)| {
            let first = members.first().expect("bucket always has at least one member");
            let last = members.last().expect("bucket always has at least one member");
            Candle {
                instrument_key: first.instrument_key.clone(),
                interval: first.interval,
                timestamp: bucket_ts,
                open: first.open,
                close: last.close,
                high: members.iter().map(|c| c.high).fold(f64::MIN, f64::max),
                low: members.iter().map(|c| c.low).fold(f64::MAX, f64::min),
                volume: members.iter().map(|c| c.volume).sum(),
                open_interest: last.open_interest,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn minute_candle(minute: u32, close: f64) -> Candle {
        Candle {
            instrument_key: "NSE_EQ|TEST".into(),
            interval: Interval::OneMin,
            timestamp: Utc.with_ymd_and_hms(2026, 1, 5, 9, minute, 0).unwrap(),
            open: close - 0.1,
            high: close + 0.2,
            low: close - 0.2,
            close,
            volume: 100,
            open_interest: 5,
        }
    }

    #[test]
    fn five_minute_bucket_aggregates_ohlcv() {
        let candles = vec![
            minute_candle(15, 100.0),
            minute_candle(16, 101.0),
            minute_candle(17, 99.5),
            minute_candle(18, 100.5),
            minute_candle(19, 102.0),
        ];
        let buckets = bucket_five_minute(&candles);
        assert_eq!(buckets.len(), 1);
        let bar = &buckets[0];
        assert_eq!(bar.open, candles[0].open);
        assert_eq!(bar.close, candles[4].close);
        assert_eq!(bar.volume, 500);
        assert_eq!(bar.open_interest, 5);
    }

    #[test]
    fn five_minute_bucket_splits_on_boundary() {
        let candles = vec![minute_candle(19, 100.0), minute_candle(20, 101.0)];
        let buckets = bucket_five_minute(&candles);
        assert_eq!(buckets.len(), 2);
    }

    #[test]
    fn daily_bucket_groups_by_ist_trading_day() {
        let candles = vec![minute_candle(15, 100.0), minute_candle(16, 105.0)];
        let buckets = bucket_daily(&candles);
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].high, 105.2);
    }
}
