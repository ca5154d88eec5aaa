//! Master-data pipeline state machine (C7, §4.7): daily ingestion → filter
//! pipeline → minute ingestion, each step timeout-guarded and resumable.

use crate::domain::calendar::{ist_date, TradingCalendar};
use crate::domain::errors::PipelineError;
use crate::domain::master_data::{MasterDataProcess, ProcessStatus, Step, StepName, StepStatus};
use crate::domain::ports::{DailyDataService, MinuteDataService};
use crate::domain::repositories::{FilteredStockRepository, MasterDataRepository};
use crate::application::filter_pipeline::FilterPipeline;
use anyhow::Result;
use chrono::{NaiveDate, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

const STEP_TIMEOUT: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Clone, Serialize)]
pub struct StartProcessResult {
    pub process_id: i64,
    pub status: ProcessStatus,
    pub message: String,
    pub process_date: NaiveDate,
}

pub struct PipelineOrchestrator {
    repository: Arc<dyn MasterDataRepository>,
    daily_service: Arc<dyn DailyDataService>,
    filter_pipeline: Arc<FilterPipeline>,
    minute_service: Arc<dyn MinuteDataService>,
    filtered_stocks: Arc<dyn FilteredStockRepository>,
    calendar: TradingCalendar,
    /// The tradable universe passed to the filter pipeline each run
    /// (instrument_key, symbol); daily/minute ingestion universes are the
    /// concern of their respective external services.
    universe: Vec<(String, String)>,
}

impl PipelineOrchestrator {
    pub fn new(
        repository: Arc<dyn MasterDataRepository>,
        daily_service: Arc<dyn DailyDataService>,
        filter_pipeline: Arc<FilterPipeline>,
        minute_service: Arc<dyn MinuteDataService>,
        filtered_stocks: Arc<dyn FilteredStockRepository>,
        universe: Vec<(String, String)>,
    ) -> Self {
        Self {
            repository,
            daily_service,
            filter_pipeline,
            minute_service,
            filtered_stocks,
            calendar: TradingCalendar::default(),
            universe,
        }
    }

    pub async fn find_by_id(&self, id: i64) -> Result<Option<MasterDataProcess>> {
        self.repository.find_by_id(id).await
    }

    pub async fn recent(&self, limit: usize) -> Result<Vec<MasterDataProcess>> {
        self.repository.recent(limit).await
    }

    /// §4.7: resolves the target trading date, creates or resumes the
    /// process for it, and runs every non-completed step in order.
    pub async fn start_process(&self, number_of_past_days: u32) -> Result<StartProcessResult> {
        let today = ist_date(Utc::now());
        let target = if number_of_past_days == 0 {
            self.calendar.previous_trading_day(today)
        } else {
            self.calendar.subtract_trading_days(today, number_of_past_days)
        };

        let process = match self.repository.find_by_date(target).await? {
            None => {
                let steps = StepName::ordered().iter().map(|n| Step::pending(0, *n)).collect();
                let draft = MasterDataProcess {
                    id: 0,
                    process_date: target,
                    number_of_past_days,
                    status: ProcessStatus::Running,
                    created_at: Utc::now(),
                    completed_at: None,
                    steps,
                };
                let id = self.repository.create(&draft).await?;
                self.repository
                    .find_by_id(id)
                    .await?
                    .ok_or_else(|| PipelineError::NotFound(id))?
            }
            Some(p) if p.status == ProcessStatus::Completed => {
                return Ok(StartProcessResult {
                    process_id: p.id,
                    status: p.status,
                    message: "process already completed".into(),
                    process_date: target,
                });
            }
            Some(p) if p.status == ProcessStatus::Failed => {
                self.repository.update_process_status(p.id, ProcessStatus::Running).await?;
                p
            }
            Some(p) => p,
        };

        for step_name in StepName::ordered() {
            let step = process
                .steps
                .iter()
                .find(|s| s.step_name == step_name)
                .cloned()
                .unwrap_or_else(|| Step::pending(process.id, step_name));

            if step.status == StepStatus::Completed {
                continue;
            }

            self.repository
                .update_step(process.id, &Step { status: StepStatus::Running, started_at: Some(Utc::now()), ..step.clone() })
                .await?;

            let outcome = tokio::time::timeout(STEP_TIMEOUT, self.run_step(step_name, &process, target)).await;

            match outcome {
                Err(_elapsed) => {
                    let err = PipelineError::StepTimeout { step: step_name };
                    self.fail_step(process.id, &step, &err.to_string()).await?;
                    error!(process_id = process.id, step = ?step_name, "pipeline step timed out");
                    return Err(err.into());
                }
                Ok(Err(e)) => {
                    self.fail_step(process.id, &step, &e.to_string()).await?;
                    error!(process_id = process.id, step = ?step_name, error = %e, "pipeline step failed");
                    return Err(e);
                }
                Ok(Ok(())) => {
                    self.repository
                        .update_step(process.id, &Step { status: StepStatus::Completed, completed_at: Some(Utc::now()), ..step })
                        .await?;
                }
            }
        }

        self.repository.update_process_status(process.id, ProcessStatus::Completed).await?;
        info!(process_id = process.id, process_date = %target, "master-data process completed");
        Ok(StartProcessResult {
            process_id: process.id,
            status: ProcessStatus::Completed,
            message: "process completed".into(),
            process_date: target,
        })
    }

    async fn run_step(&self, step_name: StepName, process: &MasterDataProcess, target: NaiveDate) -> Result<()> {
        match step_name {
            StepName::DailyIngestion => self.daily_service.insert_daily_candles(process.number_of_past_days).await,
            StepName::FilterPipeline => {
                self.filter_pipeline.run(&self.universe, target).await?;
                Ok(())
            }
            StepName::MinuteIngestion => {
                let stocks = self.filtered_stocks.find_by_date(target).await?;
                let keys: Vec<String> = stocks.into_iter().map(|s| s.instrument_key).collect();
                self.minute_service.batch_store(&keys, target, target).await
            }
        }
    }

    async fn fail_step(&self, process_id: i64, step: &Step, reason: &str) -> Result<()> {
        self.repository
            .update_step(
                process_id,
                &Step {
                    status: StepStatus::Failed,
                    error_message: Some(reason.to_string()),
                    completed_at: Some(Utc::now()),
                    ..step.clone()
                },
            )
            .await?;
        self.repository.update_process_status(process_id, ProcessStatus::Failed).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::repositories::{CandleRepository, FilteredStock};
    use crate::application::filter_pipeline::FilterPipelineConfig;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::sync::Mutex;

    struct InMemoryMasterDataRepository {
        processes: Mutex<Vec<MasterDataProcess>>,
    }

    impl InMemoryMasterDataRepository {
        fn new(seed: Vec<MasterDataProcess>) -> Self {
            Self { processes: Mutex::new(seed) }
        }
    }

    #[async_trait]
    impl MasterDataRepository for InMemoryMasterDataRepository {
        async fn find_by_date(&self, process_date: NaiveDate) -> Result<Option<MasterDataProcess>> {
            Ok(self.processes.lock().unwrap().iter().find(|p| p.process_date == process_date).cloned())
        }
        async fn find_by_id(&self, id: i64) -> Result<Option<MasterDataProcess>> {
            Ok(self.processes.lock().unwrap().iter().find(|p| p.id == id).cloned())
        }
        async fn recent(&self, limit: usize) -> Result<Vec<MasterDataProcess>> {
            Ok(self.processes.lock().unwrap().iter().take(limit).cloned().collect())
        }
        async fn create(&self, process: &MasterDataProcess) -> Result<i64> {
            let mut processes = self.processes.lock().unwrap();
            let id = processes.len() as i64 + 1;
            let mut stored = process.clone();
            stored.id = id;
            processes.push(stored);
            Ok(id)
        }
        async fn update_process_status(&self, id: i64, status: ProcessStatus) -> Result<()> {
            let mut processes = self.processes.lock().unwrap();
            if let Some(p) = processes.iter_mut().find(|p| p.id == id) {
                p.status = status;
            }
            Ok(())
        }
        async fn update_step(&self, process_id: i64, step: &Step) -> Result<()> {
            let mut processes = self.processes.lock().unwrap();
            if let Some(p) = processes.iter_mut().find(|p| p.id == process_id) {
                if let Some(existing) = p.steps.iter_mut().find(|s| s.step_name == step.step_name) {
                    *existing = step.clone();
                } else {
                    p.steps.push(step.clone());
                }
            }
            Ok(())
        }
    }

    struct NullDailyDataService;

    #[async_trait]
    impl DailyDataService for NullDailyDataService {
        async fn insert_daily_candles(&self, _number_of_past_days: u32) -> Result<()> {
            Ok(())
        }
    }

    struct NullMinuteDataService;

    #[async_trait]
    impl MinuteDataService for NullMinuteDataService {
        async fn batch_store(&self, _instrument_keys: &[String], _from: NaiveDate, _to: NaiveDate) -> Result<()> {
            Ok(())
        }
    }

    struct NullCandleRepository;

    #[async_trait]
    impl CandleRepository for NullCandleRepository {
        async fn store_batch(&self, _candles: &[crate::domain::candle::Candle]) -> Result<()> {
            Ok(())
        }
        async fn find_by_instrument_and_time_range(
            &self,
            _instrument_key: &str,
            _interval: crate::domain::candle::Interval,
            _from: chrono::DateTime<Utc>,
            _to: chrono::DateTime<Utc>,
        ) -> Result<Vec<crate::domain::candle::Candle>> {
            Ok(vec![])
        }
        async fn get_candle_date_range(
            &self,
            _instrument_key: &str,
            _interval: crate::domain::candle::Interval,
        ) -> Result<Option<(chrono::DateTime<Utc>, chrono::DateTime<Utc>)>> {
            Ok(None)
        }
        async fn get_aggregated_5min(
            &self,
            _instrument_key: &str,
            _from: chrono::DateTime<Utc>,
            _to: chrono::DateTime<Utc>,
        ) -> Result<Vec<crate::domain::candle::AggregatedCandle>> {
            Ok(vec![])
        }
        async fn store_aggregated(&self, _series: &[crate::domain::candle::AggregatedCandle]) -> Result<()> {
            Ok(())
        }
    }

    struct InMemoryFilteredStockRepository {
        stocks: Mutex<Vec<FilteredStock>>,
    }

    #[async_trait]
    impl FilteredStockRepository for InMemoryFilteredStockRepository {
        async fn upsert_many(&self, stocks: &[FilteredStock]) -> Result<()> {
            self.stocks.lock().unwrap().extend_from_slice(stocks);
            Ok(())
        }
        async fn find_by_date(&self, filter_date: NaiveDate) -> Result<Vec<FilteredStock>> {
            Ok(self.stocks.lock().unwrap().iter().filter(|s| s.filter_date == filter_date).cloned().collect())
        }
    }

    fn default_config() -> FilterPipelineConfig {
        FilterPipelineConfig {
            basic_min_price: 10.0,
            basic_max_price: 100_000.0,
            basic_min_avg_volume: 1000.0,
            ema_period: 20,
            ema_bullish_multiplier: 1.0,
            ema_bearish_multiplier: 1.0,
            ema_warmup_days: 30,
            rsi_period: 14,
            rsi_bullish_threshold: 55.0,
            rsi_bearish_threshold: 45.0,
            mamba_lookback_days: 10,
            mamba_bull_range_pct: 3.0,
            mamba_bear_range_pct: 3.0,
            min_mamba_days: 2,
        }
    }

    fn orchestrator(repository: Arc<dyn MasterDataRepository>) -> PipelineOrchestrator {
        let filtered_stocks: Arc<dyn FilteredStockRepository> = Arc::new(InMemoryFilteredStockRepository { stocks: Mutex::new(vec![]) });
        let filter_pipeline = Arc::new(FilterPipeline::new(Arc::new(NullCandleRepository), filtered_stocks.clone(), default_config()));
        PipelineOrchestrator::new(
            repository,
            Arc::new(NullDailyDataService),
            filter_pipeline,
            Arc::new(NullMinuteDataService),
            filtered_stocks,
            vec![],
        )
    }

    #[tokio::test]
    async fn start_process_creates_and_completes_fresh_process() {
        let repository = Arc::new(InMemoryMasterDataRepository::new(vec![]));
        let orchestrator = orchestrator(repository.clone());

        let result = orchestrator.start_process(1).await.unwrap();
        assert_eq!(result.status, ProcessStatus::Completed);

        let stored = repository.find_by_id(result.process_id).await.unwrap().unwrap();
        assert!(stored.steps.iter().all(|s| s.status == StepStatus::Completed));
    }

    #[tokio::test]
    async fn start_process_returns_early_when_already_completed() {
        let today = ist_date(Utc::now());
        let target = TradingCalendar::default().subtract_trading_days(today, 1);
        let seed = MasterDataProcess {
            id: 7,
            process_date: target,
            number_of_past_days: 1,
            status: ProcessStatus::Completed,
            created_at: Utc::now(),
            completed_at: Some(Utc::now()),
            steps: StepName::ordered().iter().map(|n| Step::pending(7, *n)).collect(),
        };
        let repository = Arc::new(InMemoryMasterDataRepository::new(vec![seed]));
        let orchestrator = orchestrator(repository);

        let result = orchestrator.start_process(1).await.unwrap();
        assert_eq!(result.process_id, 7);
        assert_eq!(result.status, ProcessStatus::Completed);
        assert_eq!(result.message, "process already completed");
    }

    #[tokio::test]
    async fn start_process_resumes_from_failed_step() {
        let today = ist_date(Utc::now());
        let target = TradingCalendar::default().subtract_trading_days(today, 1);
        let mut steps: Vec<Step> = StepName::ordered().iter().map(|n| Step::pending(9, *n)).collect();
        steps[0].status = StepStatus::Completed;
        let seed = MasterDataProcess {
            id: 9,
            process_date: target,
            number_of_past_days: 1,
            status: ProcessStatus::Failed,
            created_at: Utc::now(),
            completed_at: None,
            steps,
        };
        let repository = Arc::new(InMemoryMasterDataRepository::new(vec![seed]));
        let orchestrator = orchestrator(repository.clone());

        let result = orchestrator.start_process(1).await.unwrap();
        assert_eq!(result.process_id, 9);
        assert_eq!(result.status, ProcessStatus::Completed);

        let stored = repository.find_by_id(9).await.unwrap().unwrap();
        assert!(stored.steps.iter().all(|s| s.status == StepStatus::Completed));
    }
}
