//! The inbound webhook payload and its idempotency fingerprint.

use rust_decimal::Decimal;
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Buy,
    Sell,
    Close,
}

impl std::str::FromStr for Action {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "buy" => Ok(Action::Buy),
            "sell" => Ok(Action::Sell),
            "close" => Ok(Action::Close),
            other => anyhow::bail!("unknown action: {other}"),
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::Buy => write!(f, "buy"),
            Action::Sell => write!(f, "sell"),
            Action::Close => write!(f, "close"),
        }
    }
}

impl Action {
    pub fn to_order_side(self) -> Option<crate::domain::broker::OrderSide> {
        match self {
            Action::Buy => Some(crate::domain::broker::OrderSide::Buy),
            Action::Sell => Some(crate::domain::broker::OrderSide::Sell),
            Action::Close => None,
        }
    }
}

/// Raw JSON body posted by the charting platform. Fields are left as
/// loosely-typed as the wire format to keep parsing failures limited to
/// "could not deserialize at all", with stricter checks (range, presence)
/// performed explicitly afterwards rather than relying on serde defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct RawWebhookPayload {
    pub secret: String,
    pub action: String,
    pub symbol: Option<String>,
    pub stop: Option<serde_json::Value>,
    pub tp: Option<serde_json::Value>,
    pub account: Option<String>,
}

/// Validated payload: every field that downstream code consumes has
/// already been parsed and range-checked.
#[derive(Debug, Clone)]
pub struct WebhookPayload {
    pub action: Action,
    pub symbol: String,
    pub stop: Option<Decimal>,
    pub tp: Option<Decimal>,
    pub account: Option<String>,
}

pub const DEFAULT_SYMBOL: &str = "MNQ";

/// A deterministic idempotency key: same account, action, and
/// (rounded) prices within the same 10-second bucket collide on
/// purpose so that the charting platform's own retries are suppressed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(pub String);

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
