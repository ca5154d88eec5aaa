//! Bullish/bearish stock screening chain (C8, §4.8).
//!
//! Each stage consumes the previous stage's surviving candidates and either
//! confirms the running direction, assigns one, or rejects — the same
//! chain-of-validators shape as the teacher's
//! `domain/risk/filters/validator_trait.rs` + `domain/risk/filters/*`,
//! generalized here from portfolio-risk checks to daily-candle screening.

use crate::domain::calendar::ist_date;
use crate::domain::candle::{Candle, Interval};
use crate::domain::filter::{analyze_sequence, classify_mamba_day, FilterCandidate, FilterVerdict};
use crate::domain::group::TradeSide;
use crate::domain::indicators::{canonicalize, ema, rsi};
use crate::domain::repositories::{CandleRepository, FilteredStock, FilteredStockRepository};
use anyhow::Result;
use chrono::{Duration, NaiveDate, Utc};
use std::sync::Arc;
use tracing::info;

/// Recent window used to average daily volume for the basic liquidity gate;
/// not itself a spec constant, so pinned to the RSI lookback (§4.8 step 1).
const VOLUME_LOOKBACK_DAYS: usize = 14;

pub struct FilterPipelineConfig {
    pub basic_min_price: f64,
    pub basic_max_price: f64,
    pub basic_min_avg_volume: f64,
    pub ema_period: usize,
    pub ema_bullish_multiplier: f64,
    pub ema_bearish_multiplier: f64,
    pub ema_warmup_days: u32,
    pub rsi_period: usize,
    pub rsi_bullish_threshold: f64,
    pub rsi_bearish_threshold: f64,
    pub mamba_lookback_days: usize,
    pub mamba_bull_range_pct: f64,
    pub mamba_bear_range_pct: f64,
    pub min_mamba_days: usize,
}

pub struct FilterPipeline {
    repository: Arc<dyn CandleRepository>,
    filtered_stocks: Arc<dyn FilteredStockRepository>,
    config: FilterPipelineConfig,
}

impl FilterPipeline {
    pub fn new(
        repository: Arc<dyn CandleRepository>,
        filtered_stocks: Arc<dyn FilteredStockRepository>,
        config: FilterPipelineConfig,
    ) -> Self {
        Self { repository, filtered_stocks, config }
    }

    /// Screens `universe` as of `as_of` (IST trading day) and persists the
    /// survivors keyed by that date (§4.8).
    pub async fn run(&self, universe: &[(String, String)], as_of: NaiveDate) -> Result<Vec<FilteredStock>> {
        let mut accepted = Vec::new();

        for (instrument_key, symbol) in universe {
            let mut candidate = FilterCandidate::new(instrument_key.clone(), symbol.clone());

            let warmup_calendar_days = (self.config.ema_warmup_days as i64 * 2)
                .max(self.config.mamba_lookback_days as i64 * 2)
                + 10;
            let from = (as_of - Duration::days(warmup_calendar_days))
                .and_hms_opt(0, 0, 0)
                .unwrap()
                .and_utc();
            let to = as_of.and_hms_opt(23, 59, 59).unwrap().and_utc();

            let daily = self
                .repository
                .find_by_instrument_and_time_range(instrument_key, Interval::Day, from, to)
                .await?;
            let daily = canonicalize(&daily)?;

            if let Some(verdict) = self.basic(&daily) {
                candidate.record(verdict);
                continue;
            }

            let Some(verdict) = self.ema_stage(&daily) else {
                candidate.record(FilterVerdict::Rejected { reason: "insufficient daily history for EMA warm-up".into() });
                continue;
            };
            let direction = verdict.direction();
            candidate.record(verdict);
            if candidate.was_rejected() {
                continue;
            }
            let direction = direction.expect("non-rejected EMA verdict always carries a direction");

            let verdict = self.rsi_stage(&daily, direction);
            candidate.record(verdict);
            if candidate.was_rejected() {
                continue;
            }

            let verdict = self.mamba_stage(&daily, direction);
            candidate.record(verdict);
            if candidate.was_rejected() {
                continue;
            }

            let days: Vec<_> = daily
                .iter()
                .rev()
                .take(self.config.mamba_lookback_days)
                .map(|c| classify_mamba_day(c, self.config.mamba_bull_range_pct, self.config.mamba_bear_range_pct))
                .collect();
            let window: Vec<Candle> = daily.iter().rev().take(self.config.mamba_lookback_days).cloned().collect();
            let analysis = analyze_sequence(&window, &days, direction);

            let reasons: Vec<String> = candidate
                .verdicts
                .iter()
                .map(|v| v.reason().to_string())
                .chain(std::iter::once(format!(
                    "sequence: quality={:.2} continuity={:.2} predictive={:.2} momentum={:.2} volume_profile={:.2} pattern={}",
                    analysis.quality_score,
                    analysis.continuity_score,
                    analysis.predictive_score,
                    analysis.momentum_score,
                    analysis.volume_profile,
                    analysis.dominant_pattern,
                )))
                .collect();

            accepted.push(FilteredStock {
                filter_date: as_of,
                instrument_key: instrument_key.clone(),
                symbol: symbol.clone(),
                direction,
                reasons,
            });
        }

        info!(count = accepted.len(), date = %as_of, "filter pipeline accepted stocks");
        self.filtered_stocks.upsert_many(&accepted).await?;
        Ok(accepted)
    }

    /// Stage 1: price band + liquidity gate (§4.8 step 1). Returns
    /// `Some(Rejected)` to short-circuit, `None` to continue.
    fn basic(&self, daily: &[Candle]) -> Option<FilterVerdict> {
        let Some(latest) = daily.last() else {
            return Some(FilterVerdict::Rejected { reason: "no daily candles available".into() });
        };
        if latest.close < self.config.basic_min_price || latest.close > self.config.basic_max_price {
            return Some(FilterVerdict::Rejected {
                reason: format!("price {:.2} outside [{}, {}]", latest.close, self.config.basic_min_price, self.config.basic_max_price),
            });
        }
        let window = &daily[daily.len().saturating_sub(VOLUME_LOOKBACK_DAYS)..];
        let avg_volume = window.iter().map(|c| c.volume as f64).sum::<f64>() / window.len().max(1) as f64;
        if avg_volume < self.config.basic_min_avg_volume {
            return Some(FilterVerdict::Rejected {
                reason: format!("average volume {avg_volume:.0} below {}", self.config.basic_min_avg_volume),
            });
        }
        None
    }

    /// Stage 2: EMA(50) trend gate (§4.8 step 2).
    fn ema_stage(&self, daily: &[Candle]) -> Option<FilterVerdict> {
        if daily.len() < self.config.ema_period {
            return None;
        }
        let series = ema(daily, self.config.ema_period);
        let last = series.last()?;
        let close = daily.last()?.close;
        let bullish_level = last.value * self.config.ema_bullish_multiplier;
        let bearish_level = last.value * self.config.ema_bearish_multiplier;

        Some(if close > bullish_level {
            FilterVerdict::Bullish { reason: format!("close {close:.2} > EMA{}·{:.2}", self.config.ema_period, self.config.ema_bullish_multiplier) }
        } else if close < bearish_level {
            FilterVerdict::Bearish { reason: format!("close {close:.2} < EMA{}·{:.2}", self.config.ema_period, self.config.ema_bearish_multiplier) }
        } else {
            FilterVerdict::Rejected { reason: format!("close {close:.2} within EMA{} band", self.config.ema_period) }
        })
    }

    /// Stage 3: RSI(14) confirmation of the direction EMA already assigned
    /// (§4.8 step 3).
    fn rsi_stage(&self, daily: &[Candle], direction: TradeSide) -> FilterVerdict {
        let series = rsi(daily, self.config.rsi_period);
        let value = series.last().map(|v| v.value).unwrap_or(0.0);
        match direction {
            TradeSide::Long if value >= self.config.rsi_bullish_threshold => {
                FilterVerdict::Bullish { reason: format!("RSI {value:.1} >= {}", self.config.rsi_bullish_threshold) }
            }
            TradeSide::Short if value <= self.config.rsi_bearish_threshold => {
                FilterVerdict::Bearish { reason: format!("RSI {value:.1} <= {}", self.config.rsi_bearish_threshold) }
            }
            _ => FilterVerdict::Rejected { reason: format!("RSI {value:.1} does not confirm {direction:?}") },
        }
    }

    /// Stage 4: Mamba-day count over the trailing lookback, preserving
    /// direction (§4.8 step 4).
    fn mamba_stage(&self, daily: &[Candle], direction: TradeSide) -> FilterVerdict {
        let window: Vec<&Candle> = daily.iter().rev().take(self.config.mamba_lookback_days).collect();
        let target = match direction {
            TradeSide::Long => crate::domain::filter::MambaDay::BullMamba,
            TradeSide::Short => crate::domain::filter::MambaDay::BearMamba,
        };
        let count = window
            .iter()
            .filter(|c| classify_mamba_day(c, self.config.mamba_bull_range_pct, self.config.mamba_bear_range_pct) == target)
            .count();

        if count >= self.config.min_mamba_days {
            match direction {
                TradeSide::Long => FilterVerdict::Bullish { reason: format!("{count} bull-mamba days in last {}", self.config.mamba_lookback_days) },
                TradeSide::Short => FilterVerdict::Bearish { reason: format!("{count} bear-mamba days in last {}", self.config.mamba_lookback_days) },
            }
        } else {
            FilterVerdict::Rejected { reason: format!("only {count} mamba days, need {}", self.config.min_mamba_days) }
        }
    }
}

/// Default wall-clock `as_of` for a scheduled run: today's IST trading day.
pub fn default_as_of() -> NaiveDate {
    ist_date(Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn daily_candle(days_ago: i64, close: f64, high: f64, low: f64, open: f64, volume: i64) -> Candle {
        Candle {
            instrument_key: "NSE_EQ|TEST".into(),
            interval: Interval::Day,
            timestamp: Utc::now() - Duration::days(days_ago),
            open,
            high,
            low,
            close,
            volume,
            open_interest: 0,
        }
    }

    fn config() -> FilterPipelineConfig {
        FilterPipelineConfig {
            basic_min_price: 50.0,
            basic_max_price: 1000.0,
            basic_min_avg_volume: 400_000.0,
            ema_period: 5,
            ema_bullish_multiplier: 1.03,
            ema_bearish_multiplier: 0.97,
            ema_warmup_days: 10,
            rsi_period: 5,
            rsi_bullish_threshold: 60.0,
            rsi_bearish_threshold: 40.0,
            mamba_lookback_days: 10,
            mamba_bull_range_pct: 5.0,
            mamba_bear_range_pct: 3.0,
            min_mamba_days: 2,
        }
    }

    #[test]
    fn basic_rejects_low_price() {
        let daily = vec![daily_candle(0, 10.0, 10.0, 10.0, 10.0, 1_000_000)];
        let pipeline = build_pipeline(config());
        let verdict = pipeline.basic(&daily);
        assert!(matches!(verdict, Some(FilterVerdict::Rejected { .. })));
    }

    #[test]
    fn ema_stage_classifies_bullish_above_band() {
        let pipeline = build_pipeline(config());
        let mut daily: Vec<Candle> = (0..10).rev().map(|i| daily_candle(i, 100.0, 101.0, 99.0, 100.0, 500_000)).collect();
        daily.push(daily_candle(0, 120.0, 121.0, 119.0, 120.0, 500_000));
        let verdict = pipeline.ema_stage(&daily).unwrap();
        assert!(matches!(verdict, FilterVerdict::Bullish { .. }));
    }

    #[test]
    fn mamba_stage_rejects_when_below_minimum_days() {
        let pipeline = build_pipeline(config());
        let daily: Vec<Candle> = (0..10).map(|i| daily_candle(i, 100.0, 100.5, 99.5, 100.0, 500_000)).collect();
        let verdict = pipeline.mamba_stage(&daily, TradeSide::Long);
        assert!(matches!(verdict, FilterVerdict::Rejected { .. }));
    }

    fn build_pipeline(cfg: FilterPipelineConfig) -> FilterPipeline {
        use crate::infrastructure::persistence::filtered_stock_repository::SqliteFilteredStockRepository;
        let pool = tokio_test::block_on(sqlx::SqlitePool::connect("sqlite::memory:")).unwrap();
        FilterPipeline::new(
            Arc::new(NullCandleRepository),
            Arc::new(SqliteFilteredStockRepository::new(pool)),
            cfg,
        )
    }

    struct NullCandleRepository;

    #[async_trait::async_trait]
    impl CandleRepository for NullCandleRepository {
        async fn store_batch(&self, _candles: &[Candle]) -> Result<()> {
            Ok(())
        }
        async fn find_by_instrument_and_time_range(
            &self,
            _instrument_key: &str,
            _interval: Interval,
            _from: chrono::DateTime<Utc>,
            _to: chrono::DateTime<Utc>,
        ) -> Result<Vec<Candle>> {
            Ok(Vec::new())
        }
        async fn get_candle_date_range(
            &self,
            _instrument_key: &str,
            _interval: Interval,
        ) -> Result<Option<(chrono::DateTime<Utc>, chrono::DateTime<Utc>)>> {
            Ok(None)
        }
        async fn get_aggregated_5min(
            &self,
            _instrument_key: &str,
            _from: chrono::DateTime<Utc>,
            _to: chrono::DateTime<Utc>,
        ) -> Result<Vec<crate::domain::candle::AggregatedCandle>> {
            Ok(Vec::new())
        }
        async fn store_aggregated(&self, _series: &[crate::domain::candle::AggregatedCandle]) -> Result<()> {
            Ok(())
        }
    }
}
