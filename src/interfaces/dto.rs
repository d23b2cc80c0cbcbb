//! Wire-shaped request/response types for the HTTP interface. Kept
//! separate from the domain/application types so the JSON contract can
//! evolve (camelCase, nesting) without touching orchestration code.

use crate::application::webhook_processor::WebhookOutcome;
use crate::domain::broker::OrderAck;
use crate::domain::errors::GatewayError;
use crate::domain::risk::DailyStats;
use rust_decimal::Decimal;
use serde::Serialize;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrdersDto {
    pub entry: OrderAck,
    pub stop_loss: OrderAck,
    pub take_profit: Option<OrderAck>,
}

#[derive(Debug, Serialize)]
pub struct PricesDto {
    pub stop: Option<Decimal>,
    pub tp: Option<Decimal>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookResponse {
    pub success: bool,
    pub action: String,
    pub account: String,
    pub orders: Option<OrdersDto>,
    pub prices: Option<PricesDto>,
    pub position_reconciliation:
        Option<crate::application::webhook_processor::PositionReconciliation>,
    pub daily_stats: Option<DailyStats>,
    pub execution_time_ms: u64,
    pub skipped: bool,
    pub skip_reason: Option<String>,
    pub close: Option<crate::application::webhook_processor::CloseOutcome>,
    pub warning: Option<String>,
}

impl From<WebhookOutcome> for WebhookResponse {
    fn from(outcome: WebhookOutcome) -> Self {
        let (orders, prices, warning) = match &outcome.bracket {
            Some(bracket) => (
                Some(OrdersDto {
                    entry: bracket.entry.clone(),
                    stop_loss: bracket.stop_loss.clone(),
                    take_profit: bracket.take_profit.clone(),
                }),
                Some(PricesDto {
                    stop: bracket.stop_loss.price,
                    tp: bracket.take_profit.as_ref().and_then(|o| o.price),
                }),
                bracket.warning.clone(),
            ),
            None => (None, None, None),
        };

        WebhookResponse {
            success: outcome.success,
            action: outcome.action,
            account: outcome.account,
            orders,
            prices,
            position_reconciliation: outcome.position_reconciliation,
            daily_stats: outcome.daily_stats,
            execution_time_ms: outcome.execution_time_ms,
            skipped: outcome.skipped,
            skip_reason: outcome.skip_reason,
            close: outcome.close,
            warning,
        }
    }
}

/// Error body shape. `critical`/`action`/`attemptedReversal` are only
/// populated for the two error classes that need them.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub daily_stats: Option<DailyStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub critical: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempted_reversal: Option<bool>,
}

impl From<&GatewayError> for ErrorResponse {
    fn from(err: &GatewayError) -> Self {
        let mut body = ErrorResponse {
            success: false,
            error: err.to_string(),
            reason: None,
            daily_stats: None,
            critical: None,
            action: None,
            attempted_reversal: None,
        };

        match err {
            GatewayError::RiskBlocked { reason, stats } => {
                body.reason = Some(reason.to_string());
                body.daily_stats = Some((**stats).clone());
            }
            GatewayError::UnprotectedPosition { .. } => {
                body.critical = Some(true);
                body.action = Some("MANUAL_INTERVENTION_REQUIRED");
            }
            GatewayError::ReversalFailed { .. } => {
                body.attempted_reversal = Some(true);
            }
            _ => {}
        }

        body
    }
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub healthy: bool,
    pub accounts: Vec<crate::domain::account::AccountSummary>,
    pub uptime_seconds: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookTestStep {
    pub name: String,
    pub passed: bool,
    pub detail: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookTestResponse {
    pub would_succeed: bool,
    pub steps: Vec<WebhookTestStep>,
}
