//! Indicator engine (C2). Pure, synchronous, no I/O.
//!
//! All functions accept candles in chronological (past -> latest) order,
//! return a series the same length as the input, and carry 0 before
//! warm-up so indices stay aligned with the source candles (§4.2, §9).

use crate::domain::candle::{Candle, IndicatorValue, normalize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IndicatorError {
    #[error("candle timestamps are not monotonic (ascending or descending)")]
    NonMonotonicInput,
}

/// Canonicalizes a candle series to chronological order. External feeds
/// sometimes deliver newest-first; this accepts either and rejects anything
/// that is neither ascending nor descending (§4.2).
pub fn canonicalize(candles: &[Candle]) -> Result<Vec<Candle>, IndicatorError> {
    if candles.len() < 2 {
        return Ok(candles.to_vec());
    }
    let ascending = candles.windows(2).all(|w| w[0].timestamp <= w[1].timestamp);
    if ascending {
        return Ok(candles.to_vec());
    }
    let descending = candles.windows(2).all(|w| w[0].timestamp >= w[1].timestamp);
    if descending {
        let mut v = candles.to_vec();
        v.reverse();
        return Ok(v);
    }
    Err(IndicatorError::NonMonotonicInput)
}

fn closes(candles: &[Candle]) -> Vec<f64> {
    candles.iter().map(|c| c.close).collect()
}

fn series(candles: &[Candle], values: Vec<f64>) -> Vec<IndicatorValue> {
    candles
        .iter()
        .zip(values)
        .map(|(c, value)| IndicatorValue {
            timestamp: c.timestamp,
            value,
        })
        .collect()
}

/// SMA(n): arithmetic mean of last n closes; defined for i >= n-1.
pub fn sma(candles: &[Candle], n: usize) -> Vec<IndicatorValue> {
    let cl = closes(candles);
    let mut out = vec![0.0; cl.len()];
    if n == 0 {
        return series(candles, out);
    }
    for i in n.saturating_sub(1)..cl.len() {
        let window = &cl[i + 1 - n..=i];
        out[i] = window.iter().sum::<f64>() / n as f64;
    }
    series(candles, out)
}

/// EMA(n): seeded with SMA(n) at index n-1, then the standard recurrence.
pub fn ema(candles: &[Candle], n: usize) -> Vec<IndicatorValue> {
    let cl = closes(candles);
    let mut out = vec![0.0; cl.len()];
    if n == 0 || cl.len() < n {
        return series(candles, out);
    }
    let k = 2.0 / (n as f64 + 1.0);
    let seed = cl[0..n].iter().sum::<f64>() / n as f64;
    out[n - 1] = seed;
    for i in n..cl.len() {
        out[i] = (cl[i] - out[i - 1]) * k + out[i - 1];
    }
    series(candles, out)
}

/// RSI(14): classic Wilder smoothing. First value at index n.
pub fn rsi(candles: &[Candle], n: usize) -> Vec<IndicatorValue> {
    let cl = closes(candles);
    let mut out = vec![0.0; cl.len()];
    if n == 0 || cl.len() <= n {
        return series(candles, out);
    }

    let mut gains = 0.0;
    let mut losses = 0.0;
    for i in 1..=n {
        let change = cl[i] - cl[i - 1];
        if change >= 0.0 {
            gains += change;
        } else {
            losses -= change;
        }
    }
    let mut avg_gain = gains / n as f64;
    let mut avg_loss = losses / n as f64;
    out[n] = rsi_from_averages(avg_gain, avg_loss);

    for i in (n + 1)..cl.len() {
        let change = cl[i] - cl[i - 1];
        let (gain, loss) = if change >= 0.0 { (change, 0.0) } else { (0.0, -change) };
        avg_gain = (avg_gain * (n as f64 - 1.0) + gain) / n as f64;
        avg_loss = (avg_loss * (n as f64 - 1.0) + loss) / n as f64;
        out[i] = rsi_from_averages(avg_gain, avg_loss);
    }

    series(candles, out)
}

fn rsi_from_averages(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        return 100.0;
    }
    let rs = avg_gain / avg_loss;
    100.0 - (100.0 / (1.0 + rs))
}

/// ATR(14): Wilder true range smoothing.
pub fn atr(candles: &[Candle], n: usize) -> Vec<IndicatorValue> {
    let mut out = vec![0.0; candles.len()];
    if n == 0 || candles.len() <= n {
        return series(candles, out);
    }

    let true_range = |i: usize| -> f64 {
        let c = &candles[i];
        if i == 0 {
            return c.high - c.low;
        }
        let prev_close = candles[i - 1].close;
        (c.high - c.low)
            .max((c.high - prev_close).abs())
            .max((c.low - prev_close).abs())
    };

    let seed: f64 = (1..=n).map(true_range).sum::<f64>() / n as f64;
    out[n] = seed;
    let mut prev_atr = seed;
    for i in (n + 1)..candles.len() {
        let tr = true_range(i);
        let value = (prev_atr * (n as f64 - 1.0) + tr) / n as f64;
        out[i] = value;
        prev_atr = value;
    }

    series(candles, out)
}

/// VWAP: cumulative sum(close*volume)/sum(volume), reset at each new
/// calendar day within the input (UTC calendar date).
pub fn vwap(candles: &[Candle]) -> Vec<IndicatorValue> {
    let mut out = vec![0.0; candles.len()];
    let mut cum_pv = 0.0;
    let mut cum_vol = 0.0;
    let mut current_day = None;

    for (i, c) in candles.iter().enumerate() {
        let day = c.timestamp.date_naive();
        if current_day != Some(day) {
            current_day = Some(day);
            cum_pv = 0.0;
            cum_vol = 0.0;
        }
        cum_pv += c.close * c.volume as f64;
        cum_vol += c.volume as f64;
        out[i] = if cum_vol > 0.0 { cum_pv / cum_vol } else { 0.0 };
    }

    series(candles, out)
}

pub struct BollingerBands {
    pub upper: Vec<IndicatorValue>,
    pub middle: Vec<IndicatorValue>,
    pub lower: Vec<IndicatorValue>,
}

/// Bollinger Bands(period, multiplier). Standard deviation is computed via
/// the direct sum-of-squared-deviations formula (not the algebraically
/// equivalent sqrt(mean(x^2) - mean(x)^2), which loses precision on
/// near-flat series) -- see spec §4.2.
pub fn bollinger_bands(candles: &[Candle], period: usize, multiplier: f64) -> BollingerBands {
    let cl = closes(candles);
    let mut upper = vec![0.0; cl.len()];
    let mut middle = vec![0.0; cl.len()];
    let mut lower = vec![0.0; cl.len()];

    if period > 0 {
        for i in period.saturating_sub(1)..cl.len() {
            let window = &cl[i + 1 - period..=i];
            let mean = window.iter().sum::<f64>() / period as f64;
            let variance =
                window.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / period as f64;
            let sigma = variance.sqrt();
            middle[i] = mean;
            upper[i] = mean + multiplier * sigma;
            lower[i] = mean - multiplier * sigma;
        }
    }

    BollingerBands {
        upper: series(candles, upper),
        middle: series(candles, middle),
        lower: series(candles, lower),
    }
}

/// BBWidth = upper - lower, with guard rails: clamp negative/NaN/Inf to 0,
/// cap at 100, and zero out values beyond 1e6 (upstream corruption signal).
pub fn bb_width(bands: &BollingerBands) -> Vec<IndicatorValue> {
    bands
        .upper
        .iter()
        .zip(&bands.lower)
        .map(|(u, l)| {
            let raw = normalize(u.value - l.value);
            let value = if raw > 1_000_000.0 || raw < 0.0 {
                0.0
            } else {
                raw.min(100.0)
            };
            IndicatorValue {
                timestamp: u.timestamp,
                value,
            }
        })
        .collect()
}

/// BBWidthNormalized = (upper-lower)/middle, clamped to <= 10.
pub fn bb_width_normalized(bands: &BollingerBands) -> Vec<IndicatorValue> {
    bands
        .upper
        .iter()
        .zip(&bands.lower)
        .zip(&bands.middle)
        .map(|((u, l), m)| {
            let value = if m.value.abs() < f64::EPSILON {
                0.0
            } else {
                normalize((u.value - l.value) / m.value).clamp(0.0, 10.0)
            };
            IndicatorValue {
                timestamp: u.timestamp,
                value,
            }
        })
        .collect()
}

/// BBWidthNormalizedPercentage = bb_width_normalized * 100, clamped to <= 1000.
pub fn bb_width_normalized_percentage(normalized: &[IndicatorValue]) -> Vec<IndicatorValue> {
    normalized
        .iter()
        .map(|v| IndicatorValue {
            timestamp: v.timestamp,
            value: (v.value * 100.0).clamp(0.0, 1000.0),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::candle::Interval;
    use chrono::{TimeZone, Utc};

    fn candle_at(minute: i64, close: f64, volume: i64) -> Candle {
        Candle {
            instrument_key: "NSE_EQ|TEST".into(),
            interval: Interval::OneMin,
            timestamp: Utc.timestamp_opt(1_700_000_000 + minute * 60, 0).unwrap(),
            open: close,
            high: close,
            low: close,
            close,
            volume,
            open_interest: 0,
        }
    }

    fn constant_series(n: usize, k: f64) -> Vec<Candle> {
        (0..n as i64).map(|i| candle_at(i, k, 100)).collect()
    }

    #[test]
    fn sma_constant_series_equals_k() {
        let candles = constant_series(25, 50.0);
        let out = sma(&candles, 9);
        assert!((out[24].value - 50.0).abs() < 1e-9);
    }

    #[test]
    fn ema_constant_series_equals_k_after_warmup() {
        let candles = constant_series(25, 50.0);
        let out = ema(&candles, 9);
        assert!((out[8].value - 50.0).abs() < 1e-9);
        assert!((out[24].value - 50.0).abs() < 1e-9);
    }

    #[test]
    fn bollinger_constant_series_has_zero_width() {
        let candles = constant_series(25, 50.0);
        let bands = bollinger_bands(&candles, 20, 2.0);
        let width = bb_width(&bands);
        assert!((bands.upper[24].value - 50.0).abs() < 1e-9);
        assert!((bands.lower[24].value - 50.0).abs() < 1e-9);
        assert!((width[24].value).abs() < 1e-9);
    }

    #[test]
    fn rsi_strictly_increasing_tends_to_100() {
        let candles: Vec<Candle> = (0..30i64).map(|i| candle_at(i, 100.0 + i as f64, 100)).collect();
        let out = rsi(&candles, 14);
        assert!(out[29].value > 99.0);
    }

    #[test]
    fn rsi_strictly_decreasing_tends_to_0() {
        let candles: Vec<Candle> = (0..30i64).map(|i| candle_at(i, 200.0 - i as f64, 100)).collect();
        let out = rsi(&candles, 14);
        assert!(out[29].value < 1.0);
    }

    #[test]
    fn atr_is_non_negative() {
        let candles: Vec<Candle> = (0..30i64)
            .map(|i| {
                let mut c = candle_at(i, 100.0 + (i % 3) as f64, 100);
                c.high += 2.0;
                c.low -= 2.0;
                c
            })
            .collect();
        let out = atr(&candles, 14);
        assert!(out.iter().all(|v| v.value >= 0.0));
    }

    #[test]
    fn vwap_resets_each_day() {
        let day0: Vec<Candle> = (0..5i64).map(|i| candle_at(i, 100.0, 10)).collect();
        let mut day1: Vec<Candle> = (0..5i64).map(|i| candle_at(1440 + i, 50.0, 10)).collect();
        let mut all = day0;
        all.append(&mut day1);
        let out = vwap(&all);
        assert!((out[4].value - 100.0).abs() < 1e-9);
        assert!((out[5].value - 50.0).abs() < 1e-9);
    }

    #[test]
    fn bollinger_bands_parity_scenario() {
        let closes = [
            702.00, 702.25, 702.50, 702.00, 702.10, 702.55, 702.00, 702.30, 702.00, 701.70,
            702.75, 702.65, 702.00, 702.05, 702.55, 702.50, 702.30, 702.00, 702.00, 702.95,
        ];
        let candles: Vec<Candle> = closes
            .iter()
            .enumerate()
            .map(|(i, &c)| candle_at(i as i64, c, 100))
            .collect();
        let bands = bollinger_bands(&candles, 20, 2.0);
        let last = candles.len() - 1;
        let mean: f64 = closes.iter().sum::<f64>() / closes.len() as f64;
        assert!((bands.middle[last].value - mean).abs() < 1e-9);
        assert!(bands.upper[last].value > bands.middle[last].value);
        assert!(bands.middle[last].value > bands.lower[last].value);
    }

    #[test]
    fn canonicalize_reverses_newest_first_input() {
        let mut candles = constant_series(5, 10.0);
        candles.reverse();
        let canon = canonicalize(&candles).unwrap();
        assert!(canon.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[test]
    fn canonicalize_rejects_non_monotonic() {
        let mut candles = constant_series(5, 10.0);
        candles.swap(1, 3);
        assert!(canonicalize(&candles).is_err());
    }
}
