//! Sqlite-backed `FilteredStockRepository` (C8, §4.8).

use crate::domain::repositories::{FilteredStock, FilteredStockRepository};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::{Row, SqlitePool};

pub struct SqliteFilteredStockRepository {
    pool: SqlitePool,
}

impl SqliteFilteredStockRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn row_to_stock(row: &sqlx::sqlite::SqliteRow) -> Result<FilteredStock> {
    let reasons_json: String = row.try_get("reasons_json")?;
    Ok(FilteredStock {
        filter_date: NaiveDate::parse_from_str(&row.try_get::<String, _>("filter_date")?, "%Y-%m-%d")
            .context("invalid filter_date")?,
        instrument_key: row.try_get("instrument_key")?,
        symbol: row.try_get("symbol")?,
        direction: serde_json::from_str(&row.try_get::<String, _>("direction")?)
            .context("invalid direction json")?,
        reasons: serde_json::from_str(&reasons_json).context("invalid reasons_json")?,
    })
}

#[async_trait]
impl FilteredStockRepository for SqliteFilteredStockRepository {
    async fn upsert_many(&self, stocks: &[FilteredStock]) -> Result<()> {
        for stock in stocks {
            sqlx::query(
                r#"
                INSERT INTO filtered_stocks
                    (filter_date, instrument_key, symbol, direction, reasons_json)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(filter_date, instrument_key) DO UPDATE SET
                    symbol = excluded.symbol, direction = excluded.direction,
                    reasons_json = excluded.reasons_json
                "#,
            )
            .bind(stock.filter_date.format("%Y-%m-%d").to_string())
            .bind(&stock.instrument_key)
            .bind(&stock.symbol)
            .bind(serde_json::to_string(&stock.direction)?)
            .bind(serde_json::to_string(&stock.reasons)?)
            .execute(&self.pool)
            .await
            .context("failed to upsert filtered stock")?;
        }
        Ok(())
    }

    async fn find_by_date(&self, filter_date: NaiveDate) -> Result<Vec<FilteredStock>> {
        let rows = sqlx::query("SELECT * FROM filtered_stocks WHERE filter_date = ?")
            .bind(filter_date.format("%Y-%m-%d").to_string())
            .fetch_all(&self.pool)
            .await
            .context("failed to query filtered stocks by date")?;

        rows.iter().map(row_to_stock).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::group::TradeSide;

    async fn repo() -> SqliteFilteredStockRepository {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        crate::infrastructure::persistence::Database { pool: pool.clone() }
            .init_for_test()
            .await
            .unwrap();
        SqliteFilteredStockRepository::new(pool)
    }

    #[tokio::test]
    async fn upsert_then_find_round_trips() {
        let repo = repo().await;
        let date = NaiveDate::from_ymd_opt(2026, 7, 30).unwrap();
        let stock = FilteredStock {
            filter_date: date,
            instrument_key: "NSE_EQ|TEST".into(),
            symbol: "TEST".into(),
            direction: TradeSide::Long,
            reasons: vec!["ema_bullish".into(), "rsi_above_60".into()],
        };
        repo.upsert_many(&[stock]).await.unwrap();

        let found = repo.find_by_date(date).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].reasons.len(), 2);
    }

    #[tokio::test]
    async fn upsert_is_idempotent_per_instrument_and_date() {
        let repo = repo().await;
        let date = NaiveDate::from_ymd_opt(2026, 7, 30).unwrap();
        let mut stock = FilteredStock {
            filter_date: date,
            instrument_key: "NSE_EQ|TEST".into(),
            symbol: "TEST".into(),
            direction: TradeSide::Long,
            reasons: vec!["ema_bullish".into()],
        };
        repo.upsert_many(&[stock.clone()]).await.unwrap();
        stock.direction = TradeSide::Short;
        stock.reasons = vec!["rsi_below_40".into()];
        repo.upsert_many(&[stock]).await.unwrap();

        let found = repo.find_by_date(date).await.unwrap();
        assert_eq!(found.len(), 1);
        assert!(matches!(found[0].direction, TradeSide::Short));
    }
}
