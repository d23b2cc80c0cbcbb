//! Per-account risk state and the gating decision it produces.

use rust_decimal::Decimal;
use serde::Serialize;

/// Why `canExecuteTrade` refused a signal. Order here doubles as the
/// precedence order the risk manager checks in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BlockReason {
    Duplicate,
    OutsideHours,
    MaxTrades,
    MaxLoss,
    Cooldown,
}

impl std::fmt::Display for BlockReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BlockReason::Duplicate => "duplicate",
            BlockReason::OutsideHours => "outside-hours",
            BlockReason::MaxTrades => "max-trades",
            BlockReason::MaxLoss => "max-loss",
            BlockReason::Cooldown => "cooldown",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy)]
pub enum TradeDecision {
    Allowed,
    Blocked(BlockReason),
}

/// Snapshot of one account's counters for a given trading day, safe to
/// serialize back to an HTTP caller.
#[derive(Debug, Clone, Serialize)]
pub struct DailyStats {
    pub date: chrono::NaiveDate,
    pub trade_count: u32,
    pub total_profit: Decimal,
    pub total_loss: Decimal,
    pub max_trades_per_day: u32,
    pub max_daily_loss: Decimal,
}

#[derive(Debug, Clone)]
pub struct RiskThresholds {
    pub max_trades_per_day: u32,
    pub max_daily_loss: Decimal,
    pub cooldown: std::time::Duration,
    pub lock_acquire_timeout: std::time::Duration,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self {
            max_trades_per_day: 8,
            max_daily_loss: Decimal::new(400, 0),
            cooldown: std::time::Duration::from_secs(60),
            lock_acquire_timeout: std::time::Duration::from_secs(5),
        }
    }
}
