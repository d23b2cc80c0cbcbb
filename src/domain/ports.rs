use crate::domain::alert::{AlertRecord, DailyPnl};
use crate::domain::broker::{
    AccountDetails, AccountStatus, BracketResult, CloseAllResult, OpenOrder, OrderAck, OrderSide,
    Position,
};
use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;

/// Uniform order-execution contract over an upstream broker. One
/// instance per account; each owns its own session cache and must not
/// share it with another account even when `base_url` matches.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    async fn place_bracket_order(
        &self,
        side: OrderSide,
        stop_price: Decimal,
        tp_price: Decimal,
        qty: i64,
        skip_cleanup: bool,
    ) -> Result<BracketResult>;

    async fn place_market_order(&self, side: OrderSide, qty: i64) -> Result<OrderAck>;

    async fn place_limit_order(&self, side: OrderSide, qty: i64, limit_price: Decimal) -> Result<OrderAck>;

    async fn place_stop_order(&self, side: OrderSide, qty: i64, stop_price: Decimal) -> Result<OrderAck>;

    async fn cancel_order(&self, order_id: &str) -> Result<()>;

    async fn close_all_positions(&self, symbol_filter: Option<&str>) -> Result<CloseAllResult>;

    async fn get_positions(&self) -> Result<PositionQuery>;

    async fn get_open_orders(&self) -> Result<Vec<OpenOrder>>;

    async fn get_account_status(&self) -> Result<AccountStatus>;

    async fn get_account_details(&self) -> Result<AccountDetails>;
}

/// Positions, distinguishing "the broker told us nothing is open" from
/// "we could not ask" — the two degrade differently in reconciliation.
pub enum PositionQuery {
    Known(Vec<Position>),
    Unavailable,
}

/// Best-effort audit log. Implementations must never let a write
/// failure propagate to the webhook request path.
#[async_trait]
pub trait AlertLog: Send + Sync {
    async fn save(&self, record: AlertRecord);
    async fn list(&self, limit: usize) -> Vec<AlertRecord>;
    async fn list_today(&self) -> Vec<AlertRecord>;
    async fn save_daily_pnl(&self, pnl: DailyPnl);
    async fn history_for(&self, account_id: &str, days: u32) -> Vec<DailyPnl>;
}
