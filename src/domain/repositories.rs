//! Repository trait abstractions (C3, §4.3, §6).
//!
//! The relational store itself is out of scope (§1); these traits are the
//! contract the core depends on, with a sqlite-backed adapter shipped in
//! `infrastructure::persistence`.

use crate::domain::candle::{AggregatedCandle, Candle, Interval};
use crate::domain::group::StockGroup;
use crate::domain::master_data::MasterDataProcess;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

#[async_trait]
pub trait CandleRepository: Send + Sync {
    /// Idempotent upsert keyed on (instrument_key, interval, timestamp).
    async fn store_batch(&self, candles: &[Candle]) -> Result<()>;

    /// Ascending by timestamp, inclusive of `from`/`to`.
    async fn find_by_instrument_and_time_range(
        &self,
        instrument_key: &str,
        interval: Interval,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Candle>>;

    async fn get_candle_date_range(
        &self,
        instrument_key: &str,
        interval: Interval,
    ) -> Result<Option<(DateTime<Utc>, DateTime<Utc>)>>;

    async fn get_aggregated_5min(
        &self,
        instrument_key: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<AggregatedCandle>>;

    async fn store_aggregated(&self, series: &[AggregatedCandle]) -> Result<()>;
}

/// A filtered-stock record persisted by C8, keyed by `filter_date`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct FilteredStock {
    pub filter_date: NaiveDate,
    pub instrument_key: String,
    pub symbol: String,
    pub direction: crate::domain::group::TradeSide,
    pub reasons: Vec<String>,
}

#[async_trait]
pub trait FilteredStockRepository: Send + Sync {
    async fn upsert_many(&self, stocks: &[FilteredStock]) -> Result<()>;
    async fn find_by_date(&self, filter_date: NaiveDate) -> Result<Vec<FilteredStock>>;
}

#[async_trait]
pub trait MasterDataRepository: Send + Sync {
    async fn find_by_date(&self, process_date: NaiveDate) -> Result<Option<MasterDataProcess>>;
    async fn find_by_id(&self, id: i64) -> Result<Option<MasterDataProcess>>;
    async fn recent(&self, limit: usize) -> Result<Vec<MasterDataProcess>>;
    async fn create(&self, process: &MasterDataProcess) -> Result<i64>;
    async fn update_process_status(
        &self,
        id: i64,
        status: crate::domain::master_data::ProcessStatus,
    ) -> Result<()>;
    async fn update_step(&self, process_id: i64, step: &crate::domain::master_data::Step) -> Result<()>;
}

#[async_trait]
pub trait GroupRepository: Send + Sync {
    /// Returns the single group with status in {pending, executing}, if any.
    /// Implementations MUST perform the check-then-set under a
    /// mutual-exclusion primitive (§5, §9).
    async fn get_active_or_executing_group(&self) -> Result<Option<StockGroup>>;
    async fn find_by_id(&self, id: i64) -> Result<Option<StockGroup>>;
    async fn mark_executing(&self, id: i64) -> Result<()>;
    async fn mark_terminal(&self, id: i64, status: crate::domain::group::GroupStatus) -> Result<()>;
}
