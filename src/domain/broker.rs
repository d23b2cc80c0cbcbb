//! Broker-facing order types and the bracket-order result contract.
//!
//! The numeric wire constants below resolve an open question: the
//! upstream ProjectX-family contract has two historically observed
//! numberings for order type/side. We commit to one, declared once here
//! so a future correction touches a single place instead of every call
//! site. See DESIGN.md for the reasoning.

use rust_decimal::Decimal;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// Wire value for `Order/place`'s `side` field.
    pub const fn wire_value(self) -> i32 {
        match self {
            OrderSide::Buy => 0,
            OrderSide::Sell => 1,
        }
    }

    pub const fn opposite(self) -> OrderSide {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "buy"),
            OrderSide::Sell => write!(f, "sell"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderType {
    Limit,
    Market,
    StopLimit,
    Stop,
}

impl OrderType {
    /// Wire value for `Order/place`'s `type` field.
    pub const fn wire_value(self) -> i32 {
        match self {
            OrderType::Limit => 1,
            OrderType::Market => 2,
            OrderType::StopLimit => 3,
            OrderType::Stop => 4,
        }
    }
}

/// An acknowledged order leg: enough to report back to the caller and to
/// cancel later if needed.
#[derive(Debug, Clone, Serialize)]
pub struct OrderAck {
    pub order_id: String,
    pub side: OrderSide,
    pub order_type: &'static str,
    pub price: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Position {
    pub symbol: String,
    /// Signed net quantity: positive long, negative short, zero flat.
    pub net_quantity: i64,
    pub average_price: Option<Decimal>,
}

impl Position {
    pub fn side(&self) -> PositionSide {
        match self.net_quantity.cmp(&0) {
            std::cmp::Ordering::Greater => PositionSide::Long,
            std::cmp::Ordering::Less => PositionSide::Short,
            std::cmp::Ordering::Equal => PositionSide::Flat,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionSide {
    Long,
    Short,
    Flat,
}

#[derive(Debug, Clone, Serialize)]
pub struct OpenOrder {
    pub order_id: String,
    pub symbol: String,
    pub side: OrderSide,
}

/// Result of the three-leg bracket transaction. If `entry` is present,
/// `stop_loss` MUST also be present — the type does not allow
/// constructing an unprotected success. An entry that fills with no
/// stop is never returned as a `BracketResult` at all: the broker
/// client raises it as an `UNPROTECTED_POSITION` error instead.
#[derive(Debug, Clone, Serialize)]
pub struct BracketResult {
    pub entry: OrderAck,
    pub stop_loss: OrderAck,
    pub take_profit: Option<OrderAck>,
    pub partial: bool,
    pub warning: Option<String>,
}

/// Result of a best-effort flatten-all-positions call.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CloseAllResult {
    pub closed: u32,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AccountStatus {
    pub connected: bool,
    pub upstream_account_id: Option<i64>,
    pub error: Option<String>,
}

/// Fuller account snapshot than [`AccountStatus`]: includes balance, used
/// to derive realized P&L across a position close/reversal.
#[derive(Debug, Clone, Serialize)]
pub struct AccountDetails {
    pub upstream_account_id: i64,
    pub balance: Option<Decimal>,
    pub display_name: Option<String>,
}
