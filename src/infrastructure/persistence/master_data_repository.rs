//! Sqlite-backed `MasterDataRepository` (C7, §4.7).

use crate::domain::master_data::{MasterDataProcess, ProcessStatus, Step, StepName, StepStatus};
use crate::domain::repositories::MasterDataRepository;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use sqlx::{Row, SqlitePool};

pub struct SqliteMasterDataRepository {
    pool: SqlitePool,
}

impl SqliteMasterDataRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn load_steps(&self, process_id: i64) -> Result<Vec<Step>> {
        let rows = sqlx::query(
            "SELECT * FROM master_data_steps WHERE process_id = ? ORDER BY step_number ASC",
        )
        .bind(process_id)
        .fetch_all(&self.pool)
        .await
        .context("failed to load master data steps")?;

        rows.iter().map(row_to_step).collect()
    }

    async fn hydrate(&self, row: &sqlx::sqlite::SqliteRow) -> Result<MasterDataProcess> {
        let id: i64 = row.try_get("id")?;
        let steps = self.load_steps(id).await?;
        Ok(MasterDataProcess {
            id,
            process_date: NaiveDate::parse_from_str(&row.try_get::<String, _>("process_date")?, "%Y-%m-%d")
                .context("invalid process_date")?,
            number_of_past_days: row.try_get::<i64, _>("number_of_past_days")? as u32,
            status: parse_process_status(&row.try_get::<String, _>("status")?)?,
            created_at: ts(row.try_get("created_at")?),
            completed_at: row.try_get::<Option<i64>, _>("completed_at")?.map(ts),
            steps,
        })
    }
}

fn ts(v: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(v, 0).single().unwrap_or_else(Utc::now)
}

fn parse_process_status(s: &str) -> Result<ProcessStatus> {
    Ok(match s {
        "running" => ProcessStatus::Running,
        "completed" => ProcessStatus::Completed,
        "failed" => ProcessStatus::Failed,
        other => anyhow::bail!("unknown process status {other}"),
    })
}

fn process_status_str(s: ProcessStatus) -> &'static str {
    match s {
        ProcessStatus::Running => "running",
        ProcessStatus::Completed => "completed",
        ProcessStatus::Failed => "failed",
    }
}

fn step_status_str(s: StepStatus) -> &'static str {
    match s {
        StepStatus::Pending => "pending",
        StepStatus::Running => "running",
        StepStatus::Completed => "completed",
        StepStatus::Failed => "failed",
    }
}

fn parse_step_status(s: &str) -> Result<StepStatus> {
    Ok(match s {
        "pending" => StepStatus::Pending,
        "running" => StepStatus::Running,
        "completed" => StepStatus::Completed,
        "failed" => StepStatus::Failed,
        other => anyhow::bail!("unknown step status {other}"),
    })
}

fn step_name_str(s: StepName) -> &'static str {
    match s {
        StepName::DailyIngestion => "daily_ingestion",
        StepName::FilterPipeline => "filter_pipeline",
        StepName::MinuteIngestion => "minute_ingestion",
    }
}

fn parse_step_name(s: &str) -> Result<StepName> {
    Ok(match s {
        "daily_ingestion" => StepName::DailyIngestion,
        "filter_pipeline" => StepName::FilterPipeline,
        "minute_ingestion" => StepName::MinuteIngestion,
        other => anyhow::bail!("unknown step name {other}"),
    })
}

fn row_to_step(row: &sqlx::sqlite::SqliteRow) -> Result<Step> {
    Ok(Step {
        process_id: row.try_get("process_id")?,
        step_number: row.try_get("step_number")?,
        step_name: parse_step_name(&row.try_get::<String, _>("step_name")?)?,
        status: parse_step_status(&row.try_get::<String, _>("status")?)?,
        error_message: row.try_get("error_message")?,
        started_at: row.try_get::<Option<i64>, _>("started_at")?.map(ts),
        completed_at: row.try_get::<Option<i64>, _>("completed_at")?.map(ts),
    })
}

#[async_trait]
impl MasterDataRepository for SqliteMasterDataRepository {
    async fn find_by_date(&self, process_date: NaiveDate) -> Result<Option<MasterDataProcess>> {
        let row = sqlx::query("SELECT * FROM master_data_processes WHERE process_date = ?")
            .bind(process_date.format("%Y-%m-%d").to_string())
            .fetch_optional(&self.pool)
            .await
            .context("failed to query master data process by date")?;

        match row {
            Some(r) => Ok(Some(self.hydrate(&r).await?)),
            None => Ok(None),
        }
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<MasterDataProcess>> {
        let row = sqlx::query("SELECT * FROM master_data_processes WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("failed to query master data process by id")?;

        match row {
            Some(r) => Ok(Some(self.hydrate(&r).await?)),
            None => Ok(None),
        }
    }

    async fn recent(&self, limit: usize) -> Result<Vec<MasterDataProcess>> {
        let rows = sqlx::query(
            "SELECT * FROM master_data_processes ORDER BY created_at DESC LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .context("failed to query recent master data processes")?;

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            out.push(self.hydrate(row).await?);
        }
        Ok(out)
    }

    async fn create(&self, process: &MasterDataProcess) -> Result<i64> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            INSERT INTO master_data_processes
                (process_date, number_of_past_days, status, created_at, completed_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(process.process_date.format("%Y-%m-%d").to_string())
        .bind(process.number_of_past_days as i64)
        .bind(process_status_str(process.status))
        .bind(process.created_at.timestamp())
        .bind(process.completed_at.map(|t| t.timestamp()))
        .execute(&mut *tx)
        .await
        .context("failed to insert master data process")?;

        let id = result.last_insert_rowid();

        for step in &process.steps {
            sqlx::query(
                r#"
                INSERT INTO master_data_steps
                    (process_id, step_number, step_name, status, error_message, started_at, completed_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(id)
            .bind(step.step_number)
            .bind(step_name_str(step.step_name))
            .bind(step_status_str(step.status))
            .bind(&step.error_message)
            .bind(step.started_at.map(|t| t.timestamp()))
            .bind(step.completed_at.map(|t| t.timestamp()))
            .execute(&mut *tx)
            .await
            .context("failed to insert master data step")?;
        }

        tx.commit().await.context("failed to commit master data process creation")?;
        Ok(id)
    }

    async fn update_process_status(&self, id: i64, status: ProcessStatus) -> Result<()> {
        let completed_at = matches!(status, ProcessStatus::Completed | ProcessStatus::Failed)
            .then(|| Utc::now().timestamp());

        sqlx::query(
            "UPDATE master_data_processes SET status = ?, completed_at = COALESCE(?, completed_at) WHERE id = ?",
        )
        .bind(process_status_str(status))
        .bind(completed_at)
        .bind(id)
        .execute(&self.pool)
        .await
        .context("failed to update master data process status")?;
        Ok(())
    }

    async fn update_step(&self, process_id: i64, step: &Step) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO master_data_steps
                (process_id, step_number, step_name, status, error_message, started_at, completed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(process_id, step_number) DO UPDATE SET
                status = excluded.status, error_message = excluded.error_message,
                started_at = excluded.started_at, completed_at = excluded.completed_at
            "#,
        )
        .bind(process_id)
        .bind(step.step_number)
        .bind(step_name_str(step.step_name))
        .bind(step_status_str(step.status))
        .bind(&step.error_message)
        .bind(step.started_at.map(|t| t.timestamp()))
        .bind(step.completed_at.map(|t| t.timestamp()))
        .execute(&self.pool)
        .await
        .context("failed to upsert master data step")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::master_data::Step;

    async fn repo() -> SqliteMasterDataRepository {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        crate::infrastructure::persistence::Database { pool: pool.clone() }
            .init_for_test()
            .await
            .unwrap();
        SqliteMasterDataRepository::new(pool)
    }

    fn process(date: NaiveDate) -> MasterDataProcess {
        MasterDataProcess {
            id: 0,
            process_date: date,
            number_of_past_days: 5,
            status: ProcessStatus::Running,
            created_at: Utc::now(),
            completed_at: None,
            steps: StepName::ordered()
                .into_iter()
                .map(|n| Step::pending(0, n))
                .collect(),
        }
    }

    #[tokio::test]
    async fn create_and_find_round_trip() {
        let repo = repo().await;
        let date = NaiveDate::from_ymd_opt(2026, 7, 30).unwrap();
        let id = repo.create(&process(date)).await.unwrap();

        let found = repo.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(found.process_date, date);
        assert_eq!(found.steps.len(), 3);
        assert_eq!(found.first_pending_step().unwrap().step_name, StepName::DailyIngestion);
    }

    #[tokio::test]
    async fn update_step_marks_progress() {
        let repo = repo().await;
        let date = NaiveDate::from_ymd_opt(2026, 7, 30).unwrap();
        let id = repo.create(&process(date)).await.unwrap();

        let mut step = Step::pending(id, StepName::DailyIngestion);
        step.status = StepStatus::Completed;
        repo.update_step(id, &step).await.unwrap();

        let found = repo.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(found.first_pending_step().unwrap().step_name, StepName::FilterPipeline);
    }
}
