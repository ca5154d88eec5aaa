//! Process configuration, loaded eagerly from the environment and validated
//! up front (§6 Configuration), matching the teacher's `Config::from_env`
//! fail-fast style.

use anyhow::{Context, Result};
use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub http_bind_addr: String,

    /// Batch ingestor (C4)
    pub max_concurrent: usize,
    pub worker_launch_delay_ms: u64,
    pub window_gap_delay_ms: u64,
    pub window_size_days: i64,

    /// Group executor (C9)
    pub first_entry_risk_per_trade: f64,
    pub second_entry_risk_per_trade: f64,
    pub morning_atr_range_ratio_threshold: f64,

    /// Filter pipeline (C8)
    pub basic_filter_min_price: f64,
    pub basic_filter_max_price: f64,
    pub basic_filter_min_avg_volume: f64,
    pub ema_filter_period: usize,
    pub ema_filter_bullish_multiplier: f64,
    pub ema_filter_bearish_multiplier: f64,
    pub ema_filter_warmup_days: u32,
    pub rsi_filter_period: usize,
    pub rsi_filter_bullish_threshold: f64,
    pub rsi_filter_bearish_threshold: f64,
    pub mamba_lookback_days: usize,
    pub mamba_bull_range_pct: f64,
    pub mamba_bear_range_pct: f64,
    pub min_mamba_days: usize,

    /// BB-Width monitor (C10)
    pub bb_width_monitoring_enabled: bool,
    pub contracting_lookback: usize,
    pub bbw_threshold_percent: f64,
    pub bbw_squeeze_ratio: f64,
    pub bbw_pattern_min_count: usize,
    pub bbw_pattern_min_rate_of_change_percent: f64,
    pub alert_cooldown_seconds: u64,
    pub max_alerts_per_hour: u32,

    /// CSV-coupled metadata (§6)
    pub backtest_metadata_csv_path: String,
    pub bb_width_analysis_csv_path: String,
    pub stock_universe_csv_path: String,

    /// Alert sink (C11)
    pub alert_audio_base_path: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Config {
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://./data/marketcore.db".to_string()),
            http_bind_addr: env::var("HTTP_BIND_ADDR")
                .unwrap_or_else(|_| "0.0.0.0:8080".to_string()),

            max_concurrent: parse_env("MAX_CONCURRENT", "5")?,
            worker_launch_delay_ms: parse_env("WORKER_LAUNCH_DELAY_MS", "1000")?,
            window_gap_delay_ms: parse_env("WINDOW_GAP_DELAY_MS", "100")?,
            window_size_days: parse_env("WINDOW_SIZE_DAYS", "4")?,

            first_entry_risk_per_trade: parse_env("FIRST_ENTRY_RISK_PER_TRADE", "50.0")?,
            second_entry_risk_per_trade: parse_env("SECOND_ENTRY_RISK_PER_TRADE", "50.0")?,
            morning_atr_range_ratio_threshold: parse_env(
                "MORNING_ATR_RANGE_RATIO_THRESHOLD",
                "3.0",
            )?,

            basic_filter_min_price: parse_env("BASIC_FILTER_MIN_PRICE", "50.0")?,
            basic_filter_max_price: parse_env("BASIC_FILTER_MAX_PRICE", "1000.0")?,
            basic_filter_min_avg_volume: parse_env("BASIC_FILTER_MIN_AVG_VOLUME", "400000.0")?,
            ema_filter_period: parse_env("EMA_FILTER_PERIOD", "50")?,
            ema_filter_bullish_multiplier: parse_env("EMA_FILTER_BULLISH_MULTIPLIER", "1.03")?,
            ema_filter_bearish_multiplier: parse_env("EMA_FILTER_BEARISH_MULTIPLIER", "0.97")?,
            ema_filter_warmup_days: parse_env("EMA_FILTER_WARMUP_DAYS", "60")?,
            rsi_filter_period: parse_env("RSI_FILTER_PERIOD", "14")?,
            rsi_filter_bullish_threshold: parse_env("RSI_FILTER_BULLISH_THRESHOLD", "60.0")?,
            rsi_filter_bearish_threshold: parse_env("RSI_FILTER_BEARISH_THRESHOLD", "40.0")?,
            mamba_lookback_days: parse_env("MAMBA_LOOKBACK_DAYS", "21")?,
            mamba_bull_range_pct: parse_env("MAMBA_BULL_RANGE_PCT", "5.0")?,
            mamba_bear_range_pct: parse_env("MAMBA_BEAR_RANGE_PCT", "3.0")?,
            min_mamba_days: parse_env("MIN_MAMBA_DAYS", "3")?,

            bb_width_monitoring_enabled: parse_env("BB_WIDTH_MONITORING_ENABLED", "true")?,
            contracting_lookback: parse_env("CONTRACTING_LOOKBACK", "5")?,
            bbw_threshold_percent: parse_env("BBW_THRESHOLD_PERCENT", "0.1")?,
            bbw_squeeze_ratio: parse_env("BBW_SQUEEZE_RATIO", "0.05")?,
            bbw_pattern_min_count: parse_env("BBW_PATTERN_MIN_COUNT", "5")?,
            bbw_pattern_min_rate_of_change_percent: parse_env(
                "BBW_PATTERN_MIN_RATE_OF_CHANGE_PERCENT",
                "10.0",
            )?,
            alert_cooldown_seconds: parse_env("ALERT_COOLDOWN_SECONDS", "180")?,
            max_alerts_per_hour: parse_env("MAX_ALERTS_PER_HOUR", "100")?,

            backtest_metadata_csv_path: env::var("BACKTEST_METADATA_CSV_PATH")
                .unwrap_or_else(|_| "./data/backtest_metadata.csv".to_string()),
            bb_width_analysis_csv_path: env::var("BB_WIDTH_ANALYSIS_CSV_PATH")
                .unwrap_or_else(|_| "./data/bb_width_analysis.csv".to_string()),
            stock_universe_csv_path: env::var("STOCK_UNIVERSE_CSV_PATH")
                .unwrap_or_else(|_| "./data/stock_universe.csv".to_string()),

            alert_audio_base_path: env::var("ALERT_AUDIO_BASE_PATH")
                .unwrap_or_else(|_| "./assets/alerts".to_string()),
        })
    }
}

fn parse_env<T>(key: &str, default: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let raw = env::var(key).unwrap_or_else(|_| default.to_string());
    raw.parse::<T>()
        .map_err(|e| anyhow::anyhow!("{e}"))
        .with_context(|| format!("failed to parse {key}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_parse_cleanly() {
        let config = Config::from_env().unwrap();
        assert_eq!(config.max_concurrent, 5);
        assert_eq!(config.min_mamba_days, 3);
        assert!(config.bb_width_monitoring_enabled);
    }
}
