//! Master-data pipeline state machine model (§3 MasterDataProcess/Step, §4.7).

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessStatus {
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepName {
    DailyIngestion,
    FilterPipeline,
    MinuteIngestion,
}

impl StepName {
    pub fn step_number(&self) -> i32 {
        match self {
            StepName::DailyIngestion => 1,
            StepName::FilterPipeline => 2,
            StepName::MinuteIngestion => 3,
        }
    }

    pub fn ordered() -> [StepName; 3] {
        [StepName::DailyIngestion, StepName::FilterPipeline, StepName::MinuteIngestion]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub process_id: i64,
    pub step_number: i32,
    pub step_name: StepName,
    pub status: StepStatus,
    pub error_message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Step {
    pub fn pending(process_id: i64, name: StepName) -> Self {
        Self {
            process_id,
            step_number: name.step_number(),
            step_name: name,
            status: StepStatus::Pending,
            error_message: None,
            started_at: None,
            completed_at: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasterDataProcess {
    pub id: i64,
    pub process_date: NaiveDate,
    pub number_of_past_days: u32,
    pub status: ProcessStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub steps: Vec<Step>,
}

impl MasterDataProcess {
    /// The first step not yet `Completed`, in ascending step-number order.
    pub fn first_pending_step(&self) -> Option<&Step> {
        let mut sorted: Vec<&Step> = self.steps.iter().collect();
        sorted.sort_by_key(|s| s.step_number);
        sorted.into_iter().find(|s| s.status != StepStatus::Completed)
    }
}
