//! Composition root shared by the server and admin binaries (§6): wires the
//! sqlite-backed repositories and every C4-C12 service from `Config`.

use crate::application::aggregator::Aggregator;
use crate::application::batch_ingestor::{BatchIngestor, BatchIngestorDataService};
use crate::application::bbw_monitor::{BbwMonitor, BbwMonitorConfig};
use crate::application::filter_pipeline::{FilterPipeline, FilterPipelineConfig};
use crate::application::group_scheduler::GroupScheduler;
use crate::application::pipeline_orchestrator::PipelineOrchestrator;
use crate::config::Config;
use crate::domain::candle::StockContext;
use crate::domain::ports::{AlertSink, BacktestMetadataLoader, BrokerClient, OrderExecutionService};
use crate::domain::repositories::{CandleRepository, FilteredStockRepository, GroupRepository, MasterDataRepository};
use crate::infrastructure::alert_sink::SubprocessAlertSink;
use crate::infrastructure::broker_mock::{MockBrokerClient, NullOrderExecutionService};
use crate::infrastructure::csv_loader::{load_universe, CsvBacktestMetadataLoader};
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::observability::Metrics;
use crate::infrastructure::persistence::candle_repository::SqliteCandleRepository;
use crate::infrastructure::persistence::filtered_stock_repository::SqliteFilteredStockRepository;
use crate::infrastructure::persistence::group_repository::SqliteGroupRepository;
use crate::infrastructure::persistence::master_data_repository::SqliteMasterDataRepository;
use crate::infrastructure::{BroadcastHub, Database};
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;

pub struct AppContext {
    pub event_bus: EventBus,
    pub orchestrator: Arc<PipelineOrchestrator>,
    pub scheduler: Arc<GroupScheduler>,
    pub bbw_monitor: Arc<BbwMonitor>,
    pub broadcast_hub: Arc<BroadcastHub>,
    pub metrics: Arc<Metrics>,
}

pub async fn build(config: &Config) -> Result<AppContext> {
    let database = Database::new(&config.database_url).await?;

    let candle_repository: Arc<dyn CandleRepository> = Arc::new(SqliteCandleRepository::new(database.pool.clone()));
    let filtered_stock_repository: Arc<dyn FilteredStockRepository> = Arc::new(SqliteFilteredStockRepository::new(database.pool.clone()));
    let group_repository: Arc<dyn GroupRepository> = Arc::new(SqliteGroupRepository::new(database.pool.clone()));
    let master_data_repository: Arc<dyn MasterDataRepository> = Arc::new(SqliteMasterDataRepository::new(database.pool.clone()));

    let backtest_metadata: Arc<dyn BacktestMetadataLoader> = Arc::new(
        CsvBacktestMetadataLoader::load(&config.backtest_metadata_csv_path, &config.bb_width_analysis_csv_path)
            .context("failed to load back-test metadata")?,
    );

    let universe = load_universe(&config.stock_universe_csv_path).context("failed to load stock universe")?;
    let universe_contexts: Vec<StockContext> = universe
        .iter()
        .map(|(instrument_key, symbol)| StockContext { instrument_key: instrument_key.clone(), symbol: symbol.clone() })
        .collect();

    let event_bus = EventBus::new();
    let aggregator = Arc::new(Aggregator::new(candle_repository.clone(), event_bus.clone()).with_bbw_lookup(backtest_metadata.clone()));

    let broker: Arc<dyn BrokerClient> = Arc::new(MockBrokerClient::new());
    let batch_ingestor = Arc::new(BatchIngestor::new(
        broker,
        candle_repository.clone(),
        aggregator,
        config.max_concurrent,
        config.worker_launch_delay_ms,
        config.window_gap_delay_ms,
    ));
    let data_service = Arc::new(BatchIngestorDataService::new(batch_ingestor, universe_contexts));

    let filter_pipeline = Arc::new(FilterPipeline::new(
        candle_repository.clone(),
        filtered_stock_repository.clone(),
        FilterPipelineConfig {
            basic_min_price: config.basic_filter_min_price,
            basic_max_price: config.basic_filter_max_price,
            basic_min_avg_volume: config.basic_filter_min_avg_volume,
            ema_period: config.ema_filter_period,
            ema_bullish_multiplier: config.ema_filter_bullish_multiplier,
            ema_bearish_multiplier: config.ema_filter_bearish_multiplier,
            ema_warmup_days: config.ema_filter_warmup_days,
            rsi_period: config.rsi_filter_period,
            rsi_bullish_threshold: config.rsi_filter_bullish_threshold,
            rsi_bearish_threshold: config.rsi_filter_bearish_threshold,
            mamba_lookback_days: config.mamba_lookback_days,
            mamba_bull_range_pct: config.mamba_bull_range_pct,
            mamba_bear_range_pct: config.mamba_bear_range_pct,
            min_mamba_days: config.min_mamba_days,
        },
    ));

    let orchestrator = Arc::new(PipelineOrchestrator::new(
        master_data_repository,
        data_service.clone(),
        filter_pipeline,
        data_service,
        filtered_stock_repository,
        universe,
    ));

    let order_execution: Arc<dyn OrderExecutionService> = Arc::new(NullOrderExecutionService::new());
    let scheduler = Arc::new(GroupScheduler::new(
        group_repository.clone(),
        candle_repository,
        backtest_metadata,
        order_execution,
        config.first_entry_risk_per_trade,
        config.second_entry_risk_per_trade,
        config.morning_atr_range_ratio_threshold,
    ));

    let broadcast_hub = Arc::new(BroadcastHub::new());
    let alert_sink: Arc<dyn AlertSink> = Arc::new(SubprocessAlertSink::new(&config.alert_audio_base_path));
    let bbw_monitor = Arc::new(BbwMonitor::new(
        group_repository,
        alert_sink,
        broadcast_hub.clone(),
        BbwMonitorConfig {
            enabled: config.bb_width_monitoring_enabled,
            contracting_lookback: config.contracting_lookback,
            threshold_percent: config.bbw_threshold_percent,
            squeeze_ratio: config.bbw_squeeze_ratio,
            pattern_min_count: config.bbw_pattern_min_count,
            pattern_min_rate_of_change_percent: config.bbw_pattern_min_rate_of_change_percent,
            alert_cooldown: Duration::from_secs(config.alert_cooldown_seconds),
            max_alerts_per_hour: config.max_alerts_per_hour,
        },
    ));

    let metrics = Arc::new(Metrics::new().context("failed to initialize metrics registry")?);

    Ok(AppContext { event_bus, orchestrator, scheduler, bbw_monitor, broadcast_hub, metrics })
}
