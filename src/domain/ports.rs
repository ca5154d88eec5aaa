//! External-collaborator ports (§6): the upstream broker client, order
//! execution, and the alert sink. Implementations beyond mocks/subprocess
//! fallbacks are out of scope (§1) -- these traits pin the interface.

use crate::domain::bbw::AlertEvent;
use crate::domain::candle::Candle;
use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;

/// Step 1 of the master-data pipeline (§4.7): ingest `n` days of daily
/// candles for the configured universe.
#[async_trait]
pub trait DailyDataService: Send + Sync {
    async fn insert_daily_candles(&self, number_of_past_days: u32) -> Result<()>;
}

/// Step 3 of the master-data pipeline (§4.7): ingest 1-minute candles for a
/// specific set of instruments over `[from, to]`.
#[async_trait]
pub trait MinuteDataService: Send + Sync {
    async fn batch_store(&self, instrument_keys: &[String], from: NaiveDate, to: NaiveDate) -> Result<()>;
}

#[async_trait]
pub trait BrokerClient: Send + Sync {
    async fn get_historical_candles(
        &self,
        instrument_key: &str,
        interval: &str,
        from_date: NaiveDate,
        to_date: NaiveDate,
    ) -> Result<Vec<Candle>>;

    async fn get_intraday_candles(&self, instrument_key: &str, interval: &str) -> Result<Vec<Candle>>;
}

#[async_trait]
pub trait OrderExecutionService: Send + Sync {
    async fn execute_orders_for_stock(&self, stock_id: &str, plan: &crate::domain::group::ExecutionPlan) -> Result<()>;
}

#[async_trait]
pub trait AlertSink: Send + Sync {
    /// Must never propagate a hard failure to the caller (§4.11): log and
    /// fall through to the console fallback instead.
    async fn play(&self, event: &AlertEvent) -> Result<()>;
}

/// Loader for the CSV-coupled back-test metadata and BBW-minima files (§6,
/// §9). Cacheable with file-mtime invalidation by the implementation.
pub trait BacktestMetadataLoader: Send + Sync {
    fn lookup(&self, symbol: &str) -> Option<BacktestMetadata>;
    fn lowest_bb_width(&self, instrument_key: &str) -> Option<f64>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct BacktestMetadata {
    pub symbol: String,
    pub direction: crate::domain::group::TradeSide,
    pub sl_percent: f64,
    pub ps_type: crate::domain::group::PsType,
}
