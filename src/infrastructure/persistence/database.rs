use anyhow::{Context, Result};

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use tokio::fs;
use tracing::info;

/// Singleton database wrapper over the sqlite pool, grounded on the
/// teacher's `Database::new`/`init` shape.
#[derive(Clone)]
pub struct Database {
    pub pool: SqlitePool,
}

impl Database {
    pub async fn new(db_url: &str) -> Result<Self> {
        if let Some(path_part) = db_url.strip_prefix("sqlite://") {
            let path = Path::new(path_part);
            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
                && !parent.exists()
            {
                fs::create_dir_all(parent)
                    .await
                    .context("failed to create database directory")?;
            }
        }

        let options = SqliteConnectOptions::from_str(db_url)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("failed to connect to sqlite database")?;

        info!(db_url, "connected to database");

        let db = Self { pool };
        db.init().await?;
        Ok(db)
    }

    /// Exposes schema creation for in-memory pools built directly by tests.
    #[cfg(test)]
    pub async fn init_for_test(&self) -> Result<()> {
        self.init().await
    }

    async fn init(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await?;

        // Candle tables: one per interval keeps indicator columns untyped
        // per-interval instead of a sparse shared schema.
        for table in ["candles_1m", "candles_5m", "candles_daily"] {
            sqlx::query(&format!(
                r#"
                CREATE TABLE IF NOT EXISTS {table} (
                    instrument_key TEXT NOT NULL,
                    timestamp INTEGER NOT NULL,
                    open REAL NOT NULL,
                    high REAL NOT NULL,
                    low REAL NOT NULL,
                    close REAL NOT NULL,
                    volume INTEGER NOT NULL,
                    open_interest INTEGER NOT NULL DEFAULT 0,
                    ma9 REAL NOT NULL DEFAULT 0,
                    bb_upper REAL NOT NULL DEFAULT 0,
                    bb_middle REAL NOT NULL DEFAULT 0,
                    bb_lower REAL NOT NULL DEFAULT 0,
                    bb_width REAL NOT NULL DEFAULT 0,
                    bb_width_normalized REAL NOT NULL DEFAULT 0,
                    bb_width_normalized_percentage REAL NOT NULL DEFAULT 0,
                    vwap REAL NOT NULL DEFAULT 0,
                    ema5 REAL NOT NULL DEFAULT 0,
                    ema9 REAL NOT NULL DEFAULT 0,
                    ema50 REAL NOT NULL DEFAULT 0,
                    atr14 REAL NOT NULL DEFAULT 0,
                    rsi14 REAL NOT NULL DEFAULT 0,
                    lowest_bb_width REAL NOT NULL DEFAULT 0,
                    PRIMARY KEY (instrument_key, timestamp)
                );
                "#
            ))
            .execute(&mut *conn)
            .await
            .with_context(|| format!("failed to create {table} table"))?;

            sqlx::query(&format!(
                "CREATE INDEX IF NOT EXISTS idx_{table}_instrument_time ON {table} (instrument_key, timestamp);"
            ))
            .execute(&mut *conn)
            .await
            .with_context(|| format!("failed to create {table} index"))?;
        }

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS master_data_processes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                process_date TEXT NOT NULL UNIQUE,
                number_of_past_days INTEGER NOT NULL,
                status TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                completed_at INTEGER
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("failed to create master_data_processes table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS master_data_steps (
                process_id INTEGER NOT NULL,
                step_number INTEGER NOT NULL,
                step_name TEXT NOT NULL,
                status TEXT NOT NULL,
                error_message TEXT,
                started_at INTEGER,
                completed_at INTEGER,
                PRIMARY KEY (process_id, step_number)
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("failed to create master_data_steps table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS filtered_stocks (
                filter_date TEXT NOT NULL,
                instrument_key TEXT NOT NULL,
                symbol TEXT NOT NULL,
                direction TEXT NOT NULL,
                reasons_json TEXT NOT NULL,
                PRIMARY KEY (filter_date, instrument_key)
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("failed to create filtered_stocks table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS stock_groups (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                entry_type TEXT NOT NULL,
                status TEXT NOT NULL,
                stocks_json TEXT NOT NULL
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("failed to create stock_groups table")?;

        info!("database schema initialized");
        Ok(())
    }
}
