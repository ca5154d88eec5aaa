//! Core candle data model (§3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interval {
    OneMin,
    FiveMin,
    Day,
}

impl Interval {
    pub fn as_str(&self) -> &'static str {
        match self {
            Interval::OneMin => "1m",
            Interval::FiveMin => "5m",
            Interval::Day => "day",
        }
    }
}

impl std::str::FromStr for Interval {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1m" => Ok(Interval::OneMin),
            "5m" => Ok(Interval::FiveMin),
            "day" => Ok(Interval::Day),
            other => anyhow::bail!("unknown interval '{other}'"),
        }
    }
}

/// Immutable OHLCV bar for one instrument/interval/timestamp (§3 Candle).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub instrument_key: String,
    pub interval: Interval,
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
    pub open_interest: i64,
}

impl Candle {
    /// `low <= min(open,close) <= max(open,close) <= high`
    pub fn is_valid(&self) -> bool {
        let lo = self.open.min(self.close);
        let hi = self.open.max(self.close);
        self.low <= lo && lo <= hi && hi <= self.high
    }
}

/// Fixed indicator vector attached to a candle once rolled up (§3 AggregatedCandle).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndicatorVector {
    pub ma9: f64,
    pub bb_upper: f64,
    pub bb_middle: f64,
    pub bb_lower: f64,
    pub bb_width: f64,
    pub bb_width_normalized: f64,
    pub bb_width_normalized_percentage: f64,
    pub vwap: f64,
    pub ema5: f64,
    pub ema9: f64,
    pub ema50: f64,
    pub atr14: f64,
    pub rsi14: f64,
    /// Per-instrument historical minimum BBW, loaded from external CSV (§3).
    pub lowest_bb_width: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedCandle {
    pub candle: Candle,
    pub indicators: IndicatorVector,
}

impl AggregatedCandle {
    /// `BBLower <= BBMiddle <= BBUpper`
    pub fn bands_ordered(&self) -> bool {
        self.indicators.bb_lower <= self.indicators.bb_middle
            && self.indicators.bb_middle <= self.indicators.bb_upper
    }
}

/// `(timestamp, value)` pair aligned 1:1 with a source candle series (§3 IndicatorValue).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IndicatorValue {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

/// NaN/±∞ normalize to 0, per §3.
pub fn normalize(v: f64) -> f64 {
    if v.is_finite() { v } else { 0.0 }
}

/// Context passed alongside freshly closed candles on the event bus (§4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockContext {
    pub instrument_key: String,
    pub symbol: String,
}
