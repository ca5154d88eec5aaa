//! Shared shape for the C8 filter chain: each stage emits an accept/reject
//! verdict plus a reason, mirroring the teacher's chain-of-validators
//! pattern in `domain::risk::filters::validator_trait` (generalized here
//! from portfolio-risk checks to bullish/bearish stock screening).

use crate::domain::candle::Candle;
use crate::domain::group::TradeSide;

#[derive(Debug, Clone)]
pub enum FilterVerdict {
    Bullish { reason: String },
    Bearish { reason: String },
    Rejected { reason: String },
}

impl FilterVerdict {
    pub fn direction(&self) -> Option<TradeSide> {
        match self {
            FilterVerdict::Bullish { .. } => Some(TradeSide::Long),
            FilterVerdict::Bearish { .. } => Some(TradeSide::Short),
            FilterVerdict::Rejected { .. } => None,
        }
    }

    pub fn reason(&self) -> &str {
        match self {
            FilterVerdict::Bullish { reason }
            | FilterVerdict::Bearish { reason }
            | FilterVerdict::Rejected { reason } => reason,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FilterCandidate {
    pub instrument_key: String,
    pub symbol: String,
    pub verdicts: Vec<FilterVerdict>,
}

impl FilterCandidate {
    pub fn new(instrument_key: impl Into<String>, symbol: impl Into<String>) -> Self {
        Self {
            instrument_key: instrument_key.into(),
            symbol: symbol.into(),
            verdicts: Vec::new(),
        }
    }

    pub fn record(&mut self, verdict: FilterVerdict) {
        self.verdicts.push(verdict);
    }

    pub fn was_rejected(&self) -> bool {
        matches!(self.verdicts.last(), Some(FilterVerdict::Rejected { .. }))
    }
}

/// Per-day classification used by the Mamba stage (§4.8 step 4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MambaDay {
    BullMamba,
    BearMamba,
    NonMamba,
}

/// A day is BULL-MAMBA if its range is >= `bull_range_pct` of open and it
/// closed green; BEAR-MAMBA if range >= `bear_range_pct` and it closed red.
pub fn classify_mamba_day(candle: &Candle, bull_range_pct: f64, bear_range_pct: f64) -> MambaDay {
    let base = candle.open.abs().max(f64::EPSILON);
    let range_pct = (candle.high - candle.low) / base * 100.0;
    if range_pct >= bull_range_pct && candle.close > candle.open {
        MambaDay::BullMamba
    } else if range_pct >= bear_range_pct && candle.close < candle.open {
        MambaDay::BearMamba
    } else {
        MambaDay::NonMamba
    }
}

/// Post-Mamba scoring over the classified window (§4.8): how much of the
/// window matched the accepted direction, how contiguous that match was, how
/// recent it is, and the average move size/volume on the matching days.
#[derive(Debug, Clone)]
pub struct SequenceAnalysis {
    pub quality_score: f64,
    pub continuity_score: f64,
    pub predictive_score: f64,
    pub momentum_score: f64,
    pub volume_profile: f64,
    pub dominant_pattern: &'static str,
}

pub fn analyze_sequence(candles: &[Candle], days: &[MambaDay], direction: TradeSide) -> SequenceAnalysis {
    let target = match direction {
        TradeSide::Long => MambaDay::BullMamba,
        TradeSide::Short => MambaDay::BearMamba,
    };
    let n = days.len().max(1) as f64;
    let matches: Vec<usize> = days.iter().enumerate().filter(|(_, d)| **d == target).map(|(i, _)| i).collect();

    let quality_score = matches.len() as f64 / n;

    let mut longest_run = 0usize;
    let mut current_run = 0usize;
    for d in days {
        if *d == target {
            current_run += 1;
            longest_run = longest_run.max(current_run);
        } else {
            current_run = 0;
        }
    }
    let continuity_score = longest_run as f64 / n;

    let recency_weight: f64 = matches
        .iter()
        .map(|&i| (i + 1) as f64 / n)
        .sum::<f64>()
        / matches.len().max(1) as f64;
    let predictive_score = if matches.is_empty() { 0.0 } else { recency_weight };

    let avg_range_pct = if matches.is_empty() {
        0.0
    } else {
        matches
            .iter()
            .map(|&i| {
                let c = &candles[i];
                let base = c.open.abs().max(f64::EPSILON);
                (c.high - c.low) / base * 100.0
            })
            .sum::<f64>()
            / matches.len() as f64
    };

    let overall_avg_volume: f64 = candles.iter().map(|c| c.volume as f64).sum::<f64>() / n;
    let matched_avg_volume: f64 = if matches.is_empty() {
        0.0
    } else {
        matches.iter().map(|&i| candles[i].volume as f64).sum::<f64>() / matches.len() as f64
    };
    let volume_profile = if overall_avg_volume > 0.0 { matched_avg_volume / overall_avg_volume } else { 0.0 };

    let bull_count = days.iter().filter(|d| **d == MambaDay::BullMamba).count();
    let bear_count = days.iter().filter(|d| **d == MambaDay::BearMamba).count();
    let dominant_pattern = match bull_count.cmp(&bear_count) {
        std::cmp::Ordering::Greater => "bull_mamba",
        std::cmp::Ordering::Less => "bear_mamba",
        std::cmp::Ordering::Equal => "mixed",
    };

    SequenceAnalysis {
        quality_score,
        continuity_score,
        predictive_score,
        momentum_score: avg_range_pct,
        volume_profile,
        dominant_pattern,
    }
}
