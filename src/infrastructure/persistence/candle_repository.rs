//! Sqlite-backed `CandleRepository` (C3, §4.3).

use crate::domain::candle::{AggregatedCandle, Candle, IndicatorVector, Interval};
use crate::domain::repositories::CandleRepository;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use sqlx::{Row, SqlitePool};

pub struct SqliteCandleRepository {
    pool: SqlitePool,
}

impl SqliteCandleRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn table_for(interval: Interval) -> &'static str {
    match interval {
        Interval::OneMin => "candles_1m",
        Interval::FiveMin => "candles_5m",
        Interval::Day => "candles_daily",
    }
}

fn row_to_candle(row: &sqlx::sqlite::SqliteRow, interval: Interval) -> sqlx::Result<Candle> {
    let ts: i64 = row.try_get("timestamp")?;
    Ok(Candle {
        instrument_key: row.try_get("instrument_key")?,
        interval,
        timestamp: Utc.timestamp_opt(ts, 0).single().unwrap_or_else(Utc::now),
        open: row.try_get("open")?,
        high: row.try_get("high")?,
        low: row.try_get("low")?,
        close: row.try_get("close")?,
        volume: row.try_get("volume")?,
        open_interest: row.try_get("open_interest")?,
    })
}

fn row_to_aggregated(row: &sqlx::sqlite::SqliteRow, interval: Interval) -> sqlx::Result<AggregatedCandle> {
    let candle = row_to_candle(row, interval)?;
    let indicators = IndicatorVector {
        ma9: row.try_get("ma9")?,
        bb_upper: row.try_get("bb_upper")?,
        bb_middle: row.try_get("bb_middle")?,
        bb_lower: row.try_get("bb_lower")?,
        bb_width: row.try_get("bb_width")?,
        bb_width_normalized: row.try_get("bb_width_normalized")?,
        bb_width_normalized_percentage: row.try_get("bb_width_normalized_percentage")?,
        vwap: row.try_get("vwap")?,
        ema5: row.try_get("ema5")?,
        ema9: row.try_get("ema9")?,
        ema50: row.try_get("ema50")?,
        atr14: row.try_get("atr14")?,
        rsi14: row.try_get("rsi14")?,
        lowest_bb_width: row.try_get("lowest_bb_width")?,
    };
    Ok(AggregatedCandle { candle, indicators })
}

#[async_trait]
impl CandleRepository for SqliteCandleRepository {
    async fn store_batch(&self, candles: &[Candle]) -> Result<()> {
        for candle in candles {
            let table = table_for(candle.interval);
            sqlx::query(&format!(
                r#"
                INSERT INTO {table}
                    (instrument_key, timestamp, open, high, low, close, volume, open_interest)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(instrument_key, timestamp) DO UPDATE SET
                    open = excluded.open, high = excluded.high, low = excluded.low,
                    close = excluded.close, volume = excluded.volume,
                    open_interest = excluded.open_interest
                "#
            ))
            .bind(&candle.instrument_key)
            .bind(candle.timestamp.timestamp())
            .bind(candle.open)
            .bind(candle.high)
            .bind(candle.low)
            .bind(candle.close)
            .bind(candle.volume)
            .bind(candle.open_interest)
            .execute(&self.pool)
            .await
            .context("failed to upsert candle")?;
        }
        Ok(())
    }

    async fn find_by_instrument_and_time_range(
        &self,
        instrument_key: &str,
        interval: Interval,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Candle>> {
        let table = table_for(interval);
        let rows = sqlx::query(&format!(
            "SELECT * FROM {table} WHERE instrument_key = ? AND timestamp BETWEEN ? AND ? ORDER BY timestamp ASC"
        ))
        .bind(instrument_key)
        .bind(from.timestamp())
        .bind(to.timestamp())
        .fetch_all(&self.pool)
        .await
        .context("failed to query candles by time range")?;

        rows.iter()
            .map(|r| row_to_candle(r, interval).map_err(Into::into))
            .collect()
    }

    async fn get_candle_date_range(
        &self,
        instrument_key: &str,
        interval: Interval,
    ) -> Result<Option<(DateTime<Utc>, DateTime<Utc>)>> {
        let table = table_for(interval);
        let row = sqlx::query(&format!(
            "SELECT MIN(timestamp) as earliest, MAX(timestamp) as latest FROM {table} WHERE instrument_key = ?"
        ))
        .bind(instrument_key)
        .fetch_one(&self.pool)
        .await
        .context("failed to query candle date range")?;

        let earliest: Option<i64> = row.try_get("earliest")?;
        let latest: Option<i64> = row.try_get("latest")?;
        Ok(match (earliest, latest) {
            (Some(e), Some(l)) => Some((
                Utc.timestamp_opt(e, 0).single().unwrap_or_else(Utc::now),
                Utc.timestamp_opt(l, 0).single().unwrap_or_else(Utc::now),
            )),
            _ => None,
        })
    }

    async fn get_aggregated_5min(
        &self,
        instrument_key: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<AggregatedCandle>> {
        let rows = sqlx::query(
            "SELECT * FROM candles_5m WHERE instrument_key = ? AND timestamp BETWEEN ? AND ? ORDER BY timestamp ASC",
        )
        .bind(instrument_key)
        .bind(from.timestamp())
        .bind(to.timestamp())
        .fetch_all(&self.pool)
        .await
        .context("failed to query aggregated 5-minute candles")?;

        rows.iter()
            .map(|r| row_to_aggregated(r, Interval::FiveMin).map_err(Into::into))
            .collect()
    }

    async fn store_aggregated(&self, series: &[AggregatedCandle]) -> Result<()> {
        for agg in series {
            let table = table_for(agg.candle.interval);
            sqlx::query(&format!(
                r#"
                INSERT INTO {table}
                    (instrument_key, timestamp, open, high, low, close, volume, open_interest,
                     ma9, bb_upper, bb_middle, bb_lower, bb_width, bb_width_normalized,
                     bb_width_normalized_percentage, vwap, ema5, ema9, ema50, atr14, rsi14, lowest_bb_width)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(instrument_key, timestamp) DO UPDATE SET
                    open = excluded.open, high = excluded.high, low = excluded.low,
                    close = excluded.close, volume = excluded.volume,
                    open_interest = excluded.open_interest, ma9 = excluded.ma9,
                    bb_upper = excluded.bb_upper, bb_middle = excluded.bb_middle,
                    bb_lower = excluded.bb_lower, bb_width = excluded.bb_width,
                    bb_width_normalized = excluded.bb_width_normalized,
                    bb_width_normalized_percentage = excluded.bb_width_normalized_percentage,
                    vwap = excluded.vwap, ema5 = excluded.ema5, ema9 = excluded.ema9,
                    ema50 = excluded.ema50, atr14 = excluded.atr14, rsi14 = excluded.rsi14,
                    lowest_bb_width = excluded.lowest_bb_width
                "#
            ))
            .bind(&agg.candle.instrument_key)
            .bind(agg.candle.timestamp.timestamp())
            .bind(agg.candle.open)
            .bind(agg.candle.high)
            .bind(agg.candle.low)
            .bind(agg.candle.close)
            .bind(agg.candle.volume)
            .bind(agg.candle.open_interest)
            .bind(agg.indicators.ma9)
            .bind(agg.indicators.bb_upper)
            .bind(agg.indicators.bb_middle)
            .bind(agg.indicators.bb_lower)
            .bind(agg.indicators.bb_width)
            .bind(agg.indicators.bb_width_normalized)
            .bind(agg.indicators.bb_width_normalized_percentage)
            .bind(agg.indicators.vwap)
            .bind(agg.indicators.ema5)
            .bind(agg.indicators.ema9)
            .bind(agg.indicators.ema50)
            .bind(agg.indicators.atr14)
            .bind(agg.indicators.rsi14)
            .bind(agg.indicators.lowest_bb_width)
            .execute(&self.pool)
            .await
            .context("failed to upsert aggregated candle")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::candle::Interval;
    use chrono::Duration;

    async fn repo() -> SqliteCandleRepository {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        crate::infrastructure::persistence::Database { pool: pool.clone() }
            .init_for_test()
            .await
            .unwrap();
        SqliteCandleRepository::new(pool)
    }

    fn candle(ts: DateTime<Utc>) -> Candle {
        Candle {
            instrument_key: "NSE_EQ|TEST".into(),
            interval: Interval::OneMin,
            timestamp: ts,
            open: 100.0,
            high: 101.0,
            low: 99.0,
            close: 100.5,
            volume: 1000,
            open_interest: 0,
        }
    }

    #[tokio::test]
    async fn round_trip_store_and_find() {
        let repo = repo().await;
        let base = Utc::now();
        let candles = vec![candle(base), candle(base + Duration::minutes(1))];
        repo.store_batch(&candles).await.unwrap();

        let found = repo
            .find_by_instrument_and_time_range(
                "NSE_EQ|TEST",
                Interval::OneMin,
                base - Duration::minutes(1),
                base + Duration::minutes(5),
            )
            .await
            .unwrap();

        assert_eq!(found.len(), 2);
        assert!(found[0].timestamp <= found[1].timestamp);
    }

    #[tokio::test]
    async fn store_batch_is_idempotent() {
        let repo = repo().await;
        let base = Utc::now();
        let candles = vec![candle(base)];
        repo.store_batch(&candles).await.unwrap();
        repo.store_batch(&candles).await.unwrap();

        let found = repo
            .find_by_instrument_and_time_range(
                "NSE_EQ|TEST",
                Interval::OneMin,
                base - Duration::minutes(1),
                base + Duration::minutes(1),
            )
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
    }
}
