pub mod aggregator;
pub mod batch_ingestor;
pub mod bbw_monitor;
pub mod filter_pipeline;
pub mod group_scheduler;
pub mod pipeline_orchestrator;
