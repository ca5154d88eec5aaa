//! Bounded-concurrency batch ingestion from the upstream broker (C4, §4.4).
//!
//! Semaphore-bounded worker pool with submission-side pacing, grounded on
//! the pack's `DomeEnrichmentService` request-throttling shape
//! (`examples/cooprefr-bettersys/rust-backend/src/signals/enrichment.rs`),
//! since the teacher repo has no comparable bounded-fan-out ingestion path
//! of its own.

use crate::domain::calendar::ist_date;
use crate::domain::candle::{Interval, StockContext};
use crate::domain::errors::IngestionError;
use crate::domain::ports::{BrokerClient, DailyDataService, MinuteDataService};
use crate::domain::repositories::CandleRepository;
use crate::application::aggregator::Aggregator;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const WINDOW_SIZE_DAYS: i64 = 4;

#[derive(Debug, Clone, Serialize)]
pub struct IngestionDetail {
    pub instrument_key: String,
    pub outcome: String,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestionResult {
    pub processed: usize,
    pub successful: usize,
    pub failed: usize,
    pub details: Vec<IngestionDetail>,
}

pub struct BatchIngestor {
    broker: Arc<dyn BrokerClient>,
    repository: Arc<dyn CandleRepository>,
    aggregator: Arc<Aggregator>,
    max_concurrent: usize,
    worker_launch_delay_ms: u64,
    window_gap_delay_ms: u64,
}

impl BatchIngestor {
    pub fn new(
        broker: Arc<dyn BrokerClient>,
        repository: Arc<dyn CandleRepository>,
        aggregator: Arc<Aggregator>,
        max_concurrent: usize,
        worker_launch_delay_ms: u64,
        window_gap_delay_ms: u64,
    ) -> Self {
        Self {
            broker,
            repository,
            aggregator,
            max_concurrent,
            worker_launch_delay_ms,
            window_gap_delay_ms,
        }
    }

    /// Processes one instrument per semaphore-bounded worker, each splitting
    /// `[from, to]` into 4-day windows and pacing requests to the broker
    /// (§4.4 steps 3-6). A window failure aborts that instrument only.
    pub async fn process_batch(
        &self,
        instruments: &[StockContext],
        from: NaiveDate,
        to: NaiveDate,
        interval: Interval,
        cancel: CancellationToken,
    ) -> IngestionResult {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent.max(1)));
        let mut handles = Vec::with_capacity(instruments.len());

        for context in instruments {
            let semaphore = Arc::clone(&semaphore);
            let broker = Arc::clone(&self.broker);
            let repository = Arc::clone(&self.repository);
            let aggregator = Arc::clone(&self.aggregator);
            let context = context.clone();
            let cancel = cancel.clone();
            let window_gap_delay_ms = self.window_gap_delay_ms;

            tokio::time::sleep(std::time::Duration::from_millis(self.worker_launch_delay_ms)).await;

            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore never closed");
                ingest_instrument(
                    broker.as_ref(),
                    repository.as_ref(),
                    aggregator.as_ref(),
                    &context,
                    from,
                    to,
                    interval,
                    window_gap_delay_ms,
                    &cancel,
                )
                .await
            }));
        }

        let mut details = Vec::with_capacity(handles.len());
        let mut successful = 0usize;
        let mut failed = 0usize;
        for handle in handles {
            let detail = match handle.await {
                Ok(detail) => detail,
                Err(join_err) => IngestionDetail {
                    instrument_key: "unknown".into(),
                    outcome: "processing_failed".into(),
                    reason: Some(join_err.to_string()),
                },
            };
            if detail.outcome == "success" {
                successful += 1;
            } else {
                failed += 1;
            }
            details.push(detail);
        }

        IngestionResult { processed: details.len(), successful, failed, details }
    }
}

async fn ingest_instrument(
    broker: &dyn BrokerClient,
    repository: &dyn CandleRepository,
    aggregator: &Aggregator,
    context: &StockContext,
    from: NaiveDate,
    to: NaiveDate,
    interval: Interval,
    window_gap_delay_ms: u64,
    cancel: &CancellationToken,
) -> IngestionDetail {
    for (window_from, window_to) in windows(from, to, WINDOW_SIZE_DAYS) {
        if cancel.is_cancelled() {
            return IngestionDetail {
                instrument_key: context.instrument_key.clone(),
                outcome: "context_canceled".into(),
                reason: None,
            };
        }

        let candles = match broker
            .get_historical_candles(&context.instrument_key, interval.as_str(), window_from, window_to)
            .await
        {
            Ok(c) => c,
            Err(e) => {
                let err = IngestionError::ProcessingFailed {
                    instrument_key: context.instrument_key.clone(),
                    reason: e.to_string(),
                };
                warn!(instrument_key = %context.instrument_key, error = %err, "window ingestion failed");
                return IngestionDetail {
                    instrument_key: context.instrument_key.clone(),
                    outcome: "processing_failed".into(),
                    reason: Some(err.to_string()),
                };
            }
        };

        if let Err(e) = repository.store_batch(&candles).await {
            return IngestionDetail {
                instrument_key: context.instrument_key.clone(),
                outcome: "processing_failed".into(),
                reason: Some(e.to_string()),
            };
        }

        if matches!(interval, Interval::OneMin) && !candles.is_empty() {
            let from_ts = candles.iter().map(|c| c.timestamp).min().unwrap();
            let to_ts = candles.iter().map(|c| c.timestamp).max().unwrap();
            if let Err(e) = aggregator.aggregate_5min(context, from_ts, to_ts).await {
                warn!(instrument_key = %context.instrument_key, error = %e, "post-ingest aggregation failed");
            }
        }

        tokio::time::sleep(std::time::Duration::from_millis(window_gap_delay_ms)).await;
    }

    info!(instrument_key = %context.instrument_key, "instrument ingestion complete");
    IngestionDetail { instrument_key: context.instrument_key.clone(), outcome: "success".into(), reason: None }
}

/// Splits `[from, to]` into consecutive `window_days`-day windows, ascending.
fn windows(from: NaiveDate, to: NaiveDate, window_days: i64) -> Vec<(NaiveDate, NaiveDate)> {
    let mut out = Vec::new();
    let mut cursor = from;
    while cursor <= to {
        let window_end = (cursor + Duration::days(window_days)).min(to);
        out.push((cursor, window_end));
        cursor = window_end + Duration::days(1);
    }
    out
}

/// Used when §4.4 step 2's `from`/`to` are unset: the last 30 calendar days
/// ending at the IST trading day of `now`.
pub fn default_window(now: chrono::DateTime<chrono::Utc>) -> (NaiveDate, NaiveDate) {
    let to = ist_date(now);
    (to - Duration::days(30), to)
}

/// Adapts `BatchIngestor` to the two external-service ports the master-data
/// pipeline (C7) depends on, over the configured tradable universe.
pub struct BatchIngestorDataService {
    ingestor: Arc<BatchIngestor>,
    universe: Vec<StockContext>,
}

impl BatchIngestorDataService {
    pub fn new(ingestor: Arc<BatchIngestor>, universe: Vec<StockContext>) -> Self {
        Self { ingestor, universe }
    }
}

#[async_trait]
impl DailyDataService for BatchIngestorDataService {
    async fn insert_daily_candles(&self, number_of_past_days: u32) -> Result<()> {
        let to = ist_date(chrono::Utc::now());
        let from = to - Duration::days(number_of_past_days.max(1) as i64);
        let result = self
            .ingestor
            .process_batch(&self.universe, from, to, Interval::Day, CancellationToken::new())
            .await;
        if result.failed > 0 {
            anyhow::bail!(IngestionError::ProcessingFailed {
                instrument_key: "batch".into(),
                reason: format!("{} of {} instruments failed daily ingestion", result.failed, result.processed),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl MinuteDataService for BatchIngestorDataService {
    async fn batch_store(&self, instrument_keys: &[String], from: NaiveDate, to: NaiveDate) -> Result<()> {
        let contexts: Vec<StockContext> = self
            .universe
            .iter()
            .filter(|c| instrument_keys.contains(&c.instrument_key))
            .cloned()
            .collect();
        let result = self.ingestor.process_batch(&contexts, from, to, Interval::OneMin, CancellationToken::new()).await;
        if result.failed > 0 {
            anyhow::bail!(IngestionError::ProcessingFailed {
                instrument_key: "batch".into(),
                reason: format!("{} of {} instruments failed minute ingestion", result.failed, result.processed),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn windows_split_into_five_day_chunks() {
        let from = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        let to = NaiveDate::from_ymd_opt(2025, 1, 10).unwrap();
        let w = windows(from, to, 4);
        assert_eq!(
            w,
            vec![
                (NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(), NaiveDate::from_ymd_opt(2025, 1, 5).unwrap()),
                (NaiveDate::from_ymd_opt(2025, 1, 6).unwrap(), NaiveDate::from_ymd_opt(2025, 1, 10).unwrap()),
            ]
        );
    }

    #[test]
    fn windows_handles_single_day_range() {
        let from = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        let w = windows(from, from, 4);
        assert_eq!(w, vec![(from, from)]);
    }

    #[test]
    fn default_window_spans_thirty_days() {
        let now = chrono::Utc::now();
        let (from, to) = default_window(now);
        assert_eq!((to - from).num_days(), 30);
    }
}
