use anyhow::{Context, Result};

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use tokio::fs;
use tracing::info;

/// Singleton SQLite pool backing the alert log. Opened eagerly at
/// startup; schema creation is idempotent so repeated boots are safe.
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
            .context("failed to connect to SQLite database")?;

        info!(db_url, "connected to alert log database");

        let db = Self { pool };
        db.init().await?;
        Ok(db)
    }

    async fn init(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS alerts (
                alert_id TEXT PRIMARY KEY,
                account TEXT NOT NULL,
                action TEXT NOT NULL,
                symbol TEXT NOT NULL,
                status TEXT NOT NULL,
                stop_price TEXT,
                tp_price TEXT,
                error_msg TEXT,
                created_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("failed to create alerts table")?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_alerts_account_time ON alerts (account, created_at);")
            .execute(&mut *conn)
            .await
            .context("failed to create alerts index")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS daily_pnl (
                account_id TEXT NOT NULL,
                date TEXT NOT NULL,
                pnl TEXT NOT NULL,
                balance TEXT,
                trade_count INTEGER NOT NULL DEFAULT 0,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (account_id, date)
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("failed to create daily_pnl table")?;

        info!("alert log schema initialized");
        Ok(())
    }
}
