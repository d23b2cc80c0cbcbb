//! Audit-trail records. An [`AlertRecord`] is written once per
//! observable terminal outcome of a webhook and never mutated afterward.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Success,
    Partial,
    Failed,
    Blocked,
    Skipped,
}

impl std::fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AlertStatus::Success => "success",
            AlertStatus::Partial => "partial",
            AlertStatus::Failed => "failed",
            AlertStatus::Blocked => "blocked",
            AlertStatus::Skipped => "skipped",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AlertRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub action: String,
    pub symbol: String,
    pub account: String,
    pub status: AlertStatus,
    pub stop_price: Option<Decimal>,
    pub tp_price: Option<Decimal>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DailyPnl {
    pub account_id: String,
    pub date: chrono::NaiveDate,
    pub pnl: Decimal,
    pub balance: Option<Decimal>,
    pub trade_count: u32,
}
