//! BB-Width pattern monitor data model (§3 BBWSnapshot/AlertEvent, §4.10).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BbwTrend {
    Contracting,
    Expanding,
    Stable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PatternStrength {
    Weak,
    Moderate,
    Strong,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertType {
    Threshold,
    Pattern,
    Squeeze,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BbwSnapshot {
    pub instrument_key: String,
    pub current_bbw: f64,
    pub historical_min_bbw: f64,
    pub distance_from_min_percent: f64,
    pub contracting_sequence_count: usize,
    pub trend: BbwTrend,
    pub alert_triggered: bool,
    pub alert_type: Option<AlertType>,
    pub pattern_strength: PatternStrength,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertEvent {
    pub symbol: String,
    pub bb_width: f64,
    pub lowest_min_bb_width: f64,
    pub pattern_length: usize,
    pub alert_type: AlertType,
    pub timestamp: DateTime<Utc>,
    pub group_id: Option<i64>,
    pub message: String,
}

/// Fixed-capacity ring buffer, used for per-instrument BBW history (§3,
/// length `contracting_lookback + 1`) and the global alert-history (cap 100).
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    capacity: usize,
    items: VecDeque<T>,
}

impl<T> RingBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            items: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, item: T) {
        if self.items.len() == self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(item);
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn as_vec(&self) -> Vec<T>
    where
        T: Clone,
    {
        self.items.iter().cloned().collect()
    }
}

/// Length of the strictly-decreasing suffix of `series` (§4.10).
pub fn contracting_sequence_count(series: &[f64]) -> usize {
    let mut count = 0;
    for w in series.windows(2).rev() {
        if w[1] < w[0] {
            count += 1;
        } else {
            break;
        }
    }
    count
}

/// Trend classification from the last-3 vs previous-3 average (§4.10).
pub fn classify_trend(series: &[f64]) -> BbwTrend {
    if series.len() < 6 {
        return BbwTrend::Stable;
    }
    let n = series.len();
    let last3: f64 = series[n - 3..].iter().sum::<f64>() / 3.0;
    let prev3: f64 = series[n - 6..n - 3].iter().sum::<f64>() / 3.0;
    if prev3 == 0.0 {
        return BbwTrend::Stable;
    }
    let change_pct = (last3 - prev3) / prev3 * 100.0;
    if change_pct < -5.0 {
        BbwTrend::Contracting
    } else if change_pct > 5.0 {
        BbwTrend::Expanding
    } else {
        BbwTrend::Stable
    }
}

/// `strong` if count>=5 and rate_of_change>10%; `moderate` if count>=3 and
/// rate_of_change>5%; else `weak` (§4.10).
pub fn pattern_strength(count: usize, rate_of_change_percent: f64) -> PatternStrength {
    if count >= 5 && rate_of_change_percent > 10.0 {
        PatternStrength::Strong
    } else if count >= 3 && rate_of_change_percent > 5.0 {
        PatternStrength::Moderate
    } else {
        PatternStrength::Weak
    }
}
