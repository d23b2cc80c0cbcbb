//! SQLite-backed [`AlertLog`]. Writes are best-effort: a failed insert
//! is logged and swallowed rather than propagated to the webhook path.

use crate::domain::alert::{AlertRecord, AlertStatus, DailyPnl};
use crate::domain::ports::AlertLog;
use crate::infrastructure::persistence::database::Database;
use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::Row;
use std::str::FromStr;
use tracing::warn;

pub struct SqliteAlertLog {
    db: Database,
}

impl SqliteAlertLog {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl AlertLog for SqliteAlertLog {
    async fn save(&self, record: AlertRecord) {
        let result = sqlx::query(
            r#"
            INSERT INTO alerts (alert_id, account, action, symbol, status, stop_price, tp_price, error_msg, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(alert_id) DO NOTHING
            "#,
        )
        .bind(&record.id)
        .bind(&record.account)
        .bind(&record.action)
        .bind(&record.symbol)
        .bind(record.status.to_string())
        .bind(record.stop_price.map(|d| d.to_string()))
        .bind(record.tp_price.map(|d| d.to_string()))
        .bind(&record.error)
        .bind(record.timestamp.to_rfc3339())
        .execute(&self.db.pool)
        .await;

        if let Err(e) = result {
            warn!(alert_id = %record.id, error = %e, "failed to persist alert record");
        }
    }

    async fn list(&self, limit: usize) -> Vec<AlertRecord> {
        let rows = sqlx::query("SELECT * FROM alerts ORDER BY created_at DESC LIMIT ?")
            .bind(limit as i64)
            .fetch_all(&self.db.pool)
            .await;
        match rows {
            Ok(rows) => rows.iter().filter_map(row_to_record).collect(),
            Err(e) => {
                warn!(error = %e, "failed to list alerts");
                Vec::new()
            }
        }
    }

    async fn list_today(&self) -> Vec<AlertRecord> {
        let today = chrono::Utc::now().date_naive().to_string();
        let rows = sqlx::query("SELECT * FROM alerts WHERE created_at LIKE ? ORDER BY created_at DESC")
            .bind(format!("{today}%"))
            .fetch_all(&self.db.pool)
            .await;
        match rows {
            Ok(rows) => rows.iter().filter_map(row_to_record).collect(),
            Err(e) => {
                warn!(error = %e, "failed to list today's alerts");
                Vec::new()
            }
        }
    }

    async fn save_daily_pnl(&self, pnl: DailyPnl) {
        let result = sqlx::query(
            r#"
            INSERT INTO daily_pnl (account_id, date, pnl, balance, trade_count, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(account_id, date) DO UPDATE SET
                pnl = excluded.pnl,
                balance = excluded.balance,
                trade_count = excluded.trade_count,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&pnl.account_id)
        .bind(pnl.date.to_string())
        .bind(pnl.pnl.to_string())
        .bind(pnl.balance.map(|d| d.to_string()))
        .bind(pnl.trade_count as i64)
        .bind(chrono::Utc::now().to_rfc3339())
        .execute(&self.db.pool)
        .await;

        if let Err(e) = result {
            warn!(account_id = %pnl.account_id, error = %e, "failed to persist daily pnl");
        }
    }

    async fn history_for(&self, account_id: &str, days: u32) -> Vec<DailyPnl> {
        let cutoff = (chrono::Utc::now().date_naive() - chrono::Duration::days(days as i64)).to_string();
        let rows = sqlx::query(
            "SELECT * FROM daily_pnl WHERE account_id = ? AND date >= ? ORDER BY date DESC",
        )
        .bind(account_id)
        .bind(cutoff)
        .fetch_all(&self.db.pool)
        .await;

        match rows {
            Ok(rows) => rows
                .iter()
                .filter_map(|row| {
                    let date = chrono::NaiveDate::from_str(&row.try_get::<String, _>("date").ok()?).ok()?;
                    let pnl = Decimal::from_str(&row.try_get::<String, _>("pnl").ok()?).ok()?;
                    let balance = row
                        .try_get::<Option<String>, _>("balance")
                        .ok()
                        .flatten()
                        .and_then(|s| Decimal::from_str(&s).ok());
                    let trade_count = row.try_get::<i64, _>("trade_count").ok()? as u32;
                    Some(DailyPnl {
                        account_id: account_id.to_string(),
                        date,
                        pnl,
                        balance,
                        trade_count,
                    })
                })
                .collect(),
            Err(e) => {
                warn!(account_id, error = %e, "failed to load daily pnl history");
                Vec::new()
            }
        }
    }
}

fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> Option<AlertRecord> {
    let status_str: String = row.try_get("status").ok()?;
    let status = match status_str.as_str() {
        "success" => AlertStatus::Success,
        "partial" => AlertStatus::Partial,
        "blocked" => AlertStatus::Blocked,
        "skipped" => AlertStatus::Skipped,
        _ => AlertStatus::Failed,
    };
    let timestamp_str: String = row.try_get("created_at").ok()?;
    Some(AlertRecord {
        id: row.try_get("alert_id").ok()?,
        timestamp: chrono::DateTime::parse_from_rfc3339(&timestamp_str)
            .ok()?
            .with_timezone(&chrono::Utc),
        action: row.try_get("action").ok()?,
        symbol: row.try_get("symbol").ok()?,
        account: row.try_get("account").ok()?,
        status,
        stop_price: row
            .try_get::<Option<String>, _>("stop_price")
            .ok()
            .flatten()
            .and_then(|s| Decimal::from_str(&s).ok()),
        tp_price: row
            .try_get::<Option<String>, _>("tp_price")
            .ok()
            .flatten()
            .and_then(|s| Decimal::from_str(&s).ok()),
        error: row.try_get("error_msg").ok().flatten(),
    })
}
