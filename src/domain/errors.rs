//! Domain error kinds (§7). One enum per component family, following the
//! teacher's `thiserror`-per-concern layout.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("candle violates OHLC invariants for {instrument_key} at {timestamp}")]
    InvalidCandle {
        instrument_key: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

#[derive(Debug, Error)]
pub enum IngestionError {
    #[error("invalid request: {reason}")]
    Validation { reason: String },

    #[error("instrument {instrument_key} failed: {reason}")]
    ProcessingFailed {
        instrument_key: String,
        reason: String,
    },

    #[error("operation canceled")]
    ContextCanceled,

    #[error(transparent)]
    Upstream(#[from] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("process not found: {0}")]
    NotFound(i64),

    #[error("step {step:?} timed out after 30 minutes")]
    StepTimeout { step: crate::domain::master_data::StepName },

    #[error("step {step:?} failed: {reason}")]
    StepFailed {
        step: crate::domain::master_data::StepName,
        reason: String,
    },

    #[error(transparent)]
    Upstream(#[from] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum GroupError {
    #[error("group not found: {0}")]
    NotFound(i64),

    #[error("group {active_group_id} is already {status}")]
    Conflict { active_group_id: i64, status: String },

    #[error("missing back-test metadata for symbol {symbol}")]
    MissingMetadata { symbol: String },

    #[error("stock {stock_id} rejected: {reason}")]
    StockRejected { stock_id: String, reason: String },
}

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("instrument not monitored: {0}")]
    NotMonitored(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_conflict_formats_active_group_id() {
        let err = GroupError::Conflict {
            active_group_id: 7,
            status: "executing".into(),
        };
        assert!(err.to_string().contains('7'));
    }
}
