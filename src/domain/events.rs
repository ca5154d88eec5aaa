//! Candle-close listener contract (C6, §4.6).

use crate::domain::candle::{AggregatedCandle, StockContext};
use async_trait::async_trait;

/// A subscriber notified whenever a fresh 5-minute (or daily) aggregate is
/// produced for an instrument. Implementations must tolerate being run
/// concurrently with other listeners and must not assume registration
/// order (§4.6).
#[async_trait]
pub trait CandleCloseListener: Send + Sync {
    async fn on_candles(&self, candles: Vec<AggregatedCandle>, context: StockContext);
}
