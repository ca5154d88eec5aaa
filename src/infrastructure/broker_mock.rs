//! Test doubles for the upstream broker integration (§1 Non-goals: a real
//! broker client is out of scope). `MockBrokerClient` serves canned candles
//! from an in-memory map; `NullOrderExecutionService` records dispatched
//! plans without placing real orders.

use crate::domain::candle::Candle;
use crate::domain::group::ExecutionPlan;
use crate::domain::ports::{BrokerClient, OrderExecutionService};
use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::info;

#[derive(Default)]
pub struct MockBrokerClient {
    historical: HashMap<String, Vec<Candle>>,
    intraday: HashMap<String, Vec<Candle>>,
}

impl MockBrokerClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_historical(mut self, instrument_key: impl Into<String>, candles: Vec<Candle>) -> Self {
        self.historical.insert(instrument_key.into(), candles);
        self
    }

    pub fn with_intraday(mut self, instrument_key: impl Into<String>, candles: Vec<Candle>) -> Self {
        self.intraday.insert(instrument_key.into(), candles);
        self
    }
}

#[async_trait]
impl BrokerClient for MockBrokerClient {
    async fn get_historical_candles(
        &self,
        instrument_key: &str,
        _interval: &str,
        from_date: NaiveDate,
        to_date: NaiveDate,
    ) -> Result<Vec<Candle>> {
        Ok(self
            .historical
            .get(instrument_key)
            .map(|candles| {
                candles
                    .iter()
                    .filter(|c| {
                        let date = c.timestamp.date_naive();
                        date >= from_date && date <= to_date
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get_intraday_candles(&self, instrument_key: &str, _interval: &str) -> Result<Vec<Candle>> {
        Ok(self.intraday.get(instrument_key).cloned().unwrap_or_default())
    }
}

/// Records dispatched execution plans instead of placing real orders. Real
/// order placement is out of scope (§1).
#[derive(Default)]
pub struct NullOrderExecutionService {
    dispatched: Mutex<Vec<(String, ExecutionPlan)>>,
}

impl NullOrderExecutionService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dispatched_count(&self) -> usize {
        self.dispatched.lock().unwrap().len()
    }
}

#[async_trait]
impl OrderExecutionService for NullOrderExecutionService {
    async fn execute_orders_for_stock(&self, stock_id: &str, plan: &ExecutionPlan) -> Result<()> {
        info!(stock_id, levels = plan.levels.len(), "recording order execution plan (no-op broker)");
        self.dispatched.lock().unwrap().push((stock_id.to_string(), plan.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::candle::Interval;
    use chrono::Utc;

    fn candle(date: NaiveDate) -> Candle {
        Candle {
            instrument_key: "NSE_EQ|TEST".into(),
            interval: Interval::Day,
            timestamp: date.and_hms_opt(0, 0, 0).unwrap().and_utc(),
            open: 100.0,
            high: 101.0,
            low: 99.0,
            close: 100.5,
            volume: 1000,
            open_interest: 0,
        }
    }

    #[tokio::test]
    async fn historical_candles_are_filtered_by_date_range() {
        let d1 = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        let d2 = NaiveDate::from_ymd_opt(2026, 1, 5).unwrap();
        let d3 = NaiveDate::from_ymd_opt(2026, 1, 10).unwrap();
        let broker = MockBrokerClient::new()
            .with_historical("NSE_EQ|TEST", vec![candle(d1), candle(d2), candle(d3)]);

        let result = broker
            .get_historical_candles("NSE_EQ|TEST", "day", d1, d2)
            .await
            .unwrap();
        assert_eq!(result.len(), 2);
    }

    #[tokio::test]
    async fn unknown_instrument_returns_empty() {
        let broker = MockBrokerClient::new();
        let result = broker
            .get_intraday_candles("NSE_EQ|UNKNOWN", "1m")
            .await
            .unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn order_execution_service_records_dispatches() {
        use crate::domain::group::{EntryType, PsType, TradeParameters, TradeSide};

        let service = NullOrderExecutionService::new();
        let plan = ExecutionPlan {
            parameters: TradeParameters {
                stock_id: "1".into(),
                starting_price: 100.0,
                stop_loss_percentage: 2.0,
                risk_amount: 50.0,
                trade_side: TradeSide::Long,
                ps_type: PsType::Fixed,
                entry_type: EntryType::FirstEntry,
                active: true,
            },
            levels: crate::domain::group::build_level_entries(
                100.0, 2.0, TradeSide::Long, 500, PsType::Fixed,
            ),
        };

        service.execute_orders_for_stock("1", &plan).await.unwrap();
        assert_eq!(service.dispatched_count(), 1);
        let _ = Utc::now();
    }
}
