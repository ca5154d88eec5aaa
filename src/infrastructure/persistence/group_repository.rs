//! Sqlite-backed `GroupRepository` (C9, §4.9, §5).
//!
//! The active-group check and the executing-state transition both run
//! inside a single sqlite transaction so concurrent schedulers cannot both
//! observe "no active group" and proceed (§5, §9 mutex discipline).

use crate::domain::errors::GroupError;
use crate::domain::group::{GroupStatus, StockGroup};
use crate::domain::repositories::GroupRepository;
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

pub struct SqliteGroupRepository {
    pool: SqlitePool,
}

impl SqliteGroupRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn status_str(s: GroupStatus) -> &'static str {
    match s {
        GroupStatus::Pending => "pending",
        GroupStatus::Executing => "executing",
        GroupStatus::Completed => "completed",
        GroupStatus::Failed => "failed",
    }
}

fn parse_status(s: &str) -> Result<GroupStatus> {
    Ok(match s {
        "pending" => GroupStatus::Pending,
        "executing" => GroupStatus::Executing,
        "completed" => GroupStatus::Completed,
        "failed" => GroupStatus::Failed,
        other => anyhow::bail!("unknown group status {other}"),
    })
}

fn row_to_group(row: &sqlx::sqlite::SqliteRow) -> Result<StockGroup> {
    let stocks_json: String = row.try_get("stocks_json")?;
    Ok(StockGroup {
        id: row.try_get("id")?,
        entry_type: serde_json::from_str(&row.try_get::<String, _>("entry_type")?)
            .context("invalid entry_type json")?,
        status: parse_status(&row.try_get::<String, _>("status")?)?,
        stocks: serde_json::from_str(&stocks_json).context("invalid stocks_json")?,
    })
}

#[async_trait]
impl GroupRepository for SqliteGroupRepository {
    async fn get_active_or_executing_group(&self) -> Result<Option<StockGroup>> {
        let row = sqlx::query(
            "SELECT * FROM stock_groups WHERE status IN ('pending', 'executing') ORDER BY id ASC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await
        .context("failed to query active group")?;

        row.as_ref().map(row_to_group).transpose()
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<StockGroup>> {
        let row = sqlx::query("SELECT * FROM stock_groups WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("failed to query group by id")?;

        row.as_ref().map(row_to_group).transpose()
    }

    async fn mark_executing(&self, id: i64) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let conflicting = sqlx::query(
            "SELECT id FROM stock_groups WHERE status = 'executing' AND id != ?",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .context("failed to check for a conflicting executing group")?;

        if let Some(row) = conflicting {
            let active_group_id: i64 = row.try_get("id")?;
            return Err(GroupError::Conflict { active_group_id, status: "executing".into() }.into());
        }

        sqlx::query("UPDATE stock_groups SET status = 'executing' WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .context("failed to mark group executing")?;

        tx.commit().await.context("failed to commit executing transition")?;
        Ok(())
    }

    async fn mark_terminal(&self, id: i64, status: GroupStatus) -> Result<()> {
        sqlx::query("UPDATE stock_groups SET status = ? WHERE id = ?")
            .bind(status_str(status))
            .bind(id)
            .execute(&self.pool)
            .await
            .context("failed to mark group terminal")?;
        Ok(())
    }
}
