//! Orchestrates a single inbound webhook: parse, authenticate,
//! validate, reconcile against the current position, then place (or
//! skip) the bracket order.

use crate::application::account_registry::AccountRegistry;
use crate::application::broker_registry::BrokerClientRegistry;
use crate::application::risk_manager::RiskManager;
use crate::domain::alert::{AlertRecord, AlertStatus};
use crate::domain::broker::{BracketResult, CloseAllResult, OrderSide, PositionSide};
use crate::domain::errors::GatewayError;
use crate::domain::ports::{AlertLog, PositionQuery};
use crate::domain::risk::{DailyStats, TradeDecision};
use crate::domain::webhook::{Action, RawWebhookPayload, WebhookPayload, DEFAULT_SYMBOL};
use rust_decimal::Decimal;
use serde::Serialize;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

const MNQ_SANITY_RANGE: std::ops::RangeInclusive<i64> = 10_000..=50_000;
const REVERSAL_SETTLE_DELAY: Duration = Duration::from_millis(400);
const REVERSAL_RESETTLE_DELAY: Duration = Duration::from_millis(200);

pub struct WebhookProcessor {
    registry: Arc<AccountRegistry>,
    risk: Arc<RiskManager>,
    brokers: Arc<BrokerClientRegistry>,
    alerts: Arc<dyn AlertLog>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PositionReconciliation {
    pub current_side: String,
    pub intended_side: String,
    pub was_reversal: bool,
    pub position_api_available: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CloseOutcome {
    pub closed: u32,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WebhookOutcome {
    pub success: bool,
    pub action: String,
    pub account: String,
    pub skipped: bool,
    pub skip_reason: Option<String>,
    pub bracket: Option<BracketResult>,
    pub close: Option<CloseOutcome>,
    pub position_reconciliation: Option<PositionReconciliation>,
    pub daily_stats: Option<DailyStats>,
    pub execution_time_ms: u64,
}

impl WebhookProcessor {
    pub fn new(
        registry: Arc<AccountRegistry>,
        risk: Arc<RiskManager>,
        brokers: Arc<BrokerClientRegistry>,
        alerts: Arc<dyn AlertLog>,
    ) -> Self {
        Self {
            registry,
            risk,
            brokers,
            alerts,
        }
    }

    /// Called when the inbound body could not even be deserialized into
    /// [`RawWebhookPayload`] — there is no account or action to attach the
    /// alert to, so both are recorded as `"unknown"`.
    pub async fn record_unparseable_body(&self, reason: &str) {
        dispatch_alert(
            &self.alerts,
            "unknown",
            "unknown",
            None,
            None,
            AlertStatus::Failed,
            Some(reason.to_string()),
        )
        .await;
    }

    /// `pub(crate)` so the `/trading/webhook/test` handler can run the
    /// same validation without placing an order.
    pub(crate) fn parse_payload(raw: &RawWebhookPayload) -> Result<WebhookPayload, GatewayError> {
        let action = Action::from_str(&raw.action).map_err(|_| GatewayError::Validation {
            reason: format!("unknown action '{}': must be buy, sell, or close", raw.action),
        })?;
        let symbol = raw
            .symbol
            .clone()
            .unwrap_or_else(|| DEFAULT_SYMBOL.to_string());

        if action == Action::Close {
            return Ok(WebhookPayload {
                action,
                symbol,
                stop: None,
                tp: None,
                account: raw.account.clone(),
            });
        }

        let stop = parse_required_decimal(&raw.stop, "stop")?;
        let tp = parse_required_decimal(&raw.tp, "tp")?;

        if !MNQ_SANITY_RANGE.contains(&stop.trunc().to_string().parse::<i64>().unwrap_or(0))
            || !MNQ_SANITY_RANGE.contains(&tp.trunc().to_string().parse::<i64>().unwrap_or(0))
        {
            return Err(GatewayError::Validation {
                reason: "stop/tp out of sane range for MNQ".to_string(),
            });
        }

        match action {
            Action::Buy if stop >= tp => {
                return Err(GatewayError::Validation {
                    reason: "buy requires stop < tp".to_string(),
                });
            }
            Action::Sell if stop <= tp => {
                return Err(GatewayError::Validation {
                    reason: "sell requires stop > tp".to_string(),
                });
            }
            _ => {}
        }

        Ok(WebhookPayload {
            action,
            symbol,
            stop: Some(stop),
            tp: Some(tp),
            account: raw.account.clone(),
        })
    }

    pub async fn process_webhook(&self, raw: RawWebhookPayload) -> Result<WebhookOutcome, GatewayError> {
        let started = std::time::Instant::now();
        let account = self
            .registry
            .resolve(&raw.secret, raw.account.as_deref())?;
        let account_id = account.id.clone();

        let payload = match Self::parse_payload(&raw) {
            Ok(p) => p,
            Err(err) => {
                warn!(account_id = %account_id, error = %err, "webhook payload failed validation");
                if err.should_record_alert() {
                    self.record_alert(&account_id, &raw.action, None, None, AlertStatus::Failed, Some(err.to_string()))
                        .await;
                }
                return Err(err);
            }
        };

        if payload.action == Action::Close {
            return self.process_close(&account_id, &payload).await;
        }

        let fingerprint = self.risk.generate_webhook_id(&account_id, &payload);
        info!(account_id = %account_id, action = %payload.action, fingerprint = %fingerprint, "webhook accepted for processing");
        let lease = self.risk.acquire_lock(&account_id).await?;

        let outcome = self
            .process_entry(&account_id, &payload, fingerprint, started)
            .await;

        self.risk.release_lock(lease).await;
        outcome
    }

    async fn process_close(
        &self,
        account_id: &str,
        payload: &WebhookPayload,
    ) -> Result<WebhookOutcome, GatewayError> {
        let account = self
            .registry
            .get(account_id)
            .ok_or_else(|| GatewayError::AccountNotFound {
                account_id: account_id.to_string(),
            })?;
        let client = self.brokers.get_or_create(account).await;
        let balance_before = client.get_account_details().await.ok().and_then(|d| d.balance);
        let result: CloseAllResult = client
            .close_all_positions(Some(&payload.symbol))
            .await
            .map_err(|e| GatewayError::BrokerTransport {
                reason: e.to_string(),
            })?;
        if let Some(before) = balance_before {
            if let Some(after) = client.get_account_details().await.ok().and_then(|d| d.balance) {
                self.risk.update_pnl(account_id, after - before).await;
            }
        }

        let status = if result.errors.is_empty() {
            AlertStatus::Success
        } else {
            AlertStatus::Failed
        };
        self.record_alert(
            account_id,
            "close",
            None,
            None,
            status,
            if result.errors.is_empty() {
                None
            } else {
                Some(result.errors.join("; "))
            },
        )
        .await;

        Ok(WebhookOutcome {
            success: result.errors.is_empty(),
            action: "close".to_string(),
            account: account_id.to_string(),
            skipped: false,
            skip_reason: None,
            bracket: None,
            close: Some(CloseOutcome {
                closed: result.closed,
                errors: result.errors,
            }),
            position_reconciliation: None,
            daily_stats: None,
            execution_time_ms: 0,
        })
    }

    async fn process_entry(
        &self,
        account_id: &str,
        payload: &WebhookPayload,
        fingerprint: crate::domain::webhook::Fingerprint,
        started: std::time::Instant,
    ) -> Result<WebhookOutcome, GatewayError> {
        match self.risk.can_execute_trade(account_id, &fingerprint).await {
            TradeDecision::Blocked(reason) => {
                warn!(account_id, %reason, "webhook blocked by risk manager");
                let stats = self.risk.get_daily_stats(account_id).await;
                let err = GatewayError::RiskBlocked {
                    reason,
                    stats: Box::new(stats),
                };
                if err.should_record_alert() {
                    self.record_alert(
                        account_id,
                        &payload.action.to_string(),
                        payload.stop,
                        payload.tp,
                        AlertStatus::Blocked,
                        Some(reason.to_string()),
                    )
                    .await;
                }
                return Err(err);
            }
            TradeDecision::Allowed => {}
        }

        let account = self
            .registry
            .get(account_id)
            .ok_or_else(|| GatewayError::AccountNotFound {
                account_id: account_id.to_string(),
            })?;
        let client = self.brokers.get_or_create(account).await;
        let intended_side = payload
            .action
            .to_order_side()
            .expect("close handled earlier");

        let (current_side, position_api_available) = match client.get_positions().await {
            Ok(PositionQuery::Known(positions)) => {
                let side = positions
                    .iter()
                    .find(|p| p.symbol == payload.symbol)
                    .map(|p| p.side())
                    .unwrap_or(PositionSide::Flat);
                (side, true)
            }
            Ok(PositionQuery::Unavailable) | Err(_) => (PositionSide::Flat, false),
        };

        let intended_as_position_side = match intended_side {
            OrderSide::Buy => PositionSide::Long,
            OrderSide::Sell => PositionSide::Short,
        };

        let mut was_reversal = false;
        let mut skip_cleanup = false;

        if position_api_available && current_side == intended_as_position_side {
            info!(account_id, ?current_side, "already positioned in the intended direction, skipping");
            let stats = self.risk.get_daily_stats(account_id).await;
            self.record_alert(
                account_id,
                &payload.action.to_string(),
                payload.stop,
                payload.tp,
                AlertStatus::Skipped,
                Some("already positioned in the intended direction".to_string()),
            )
            .await;
            return Ok(WebhookOutcome {
                success: true,
                action: payload.action.to_string(),
                account: account_id.to_string(),
                skipped: true,
                skip_reason: Some("already positioned in the intended direction".to_string()),
                bracket: None,
                close: None,
                position_reconciliation: Some(PositionReconciliation {
                    current_side: format!("{current_side:?}").to_lowercase(),
                    intended_side: format!("{intended_as_position_side:?}").to_lowercase(),
                    was_reversal: false,
                    position_api_available,
                }),
                daily_stats: Some(stats),
                execution_time_ms: started.elapsed().as_millis() as u64,
            });
        }

        if position_api_available
            && current_side != PositionSide::Flat
            && current_side != intended_as_position_side
        {
            info!(account_id, ?current_side, ?intended_as_position_side, "reversing existing position");
            let balance_before = client.get_account_details().await.ok().and_then(|d| d.balance);
            let close = client
                .close_all_positions(Some(&payload.symbol))
                .await
                .map_err(|e| GatewayError::ReversalFailed {
                    reason: e.to_string(),
                })?;
            if !close.errors.is_empty() {
                return Err(GatewayError::ReversalFailed {
                    reason: close.errors.join("; "),
                });
            }
            if let Some(before) = balance_before {
                if let Some(after) = client.get_account_details().await.ok().and_then(|d| d.balance) {
                    self.risk.update_pnl(account_id, after - before).await;
                }
            }
            tokio::time::sleep(REVERSAL_SETTLE_DELAY).await;
            if let Ok(PositionQuery::Known(positions)) = client.get_positions().await {
                let still_open = positions.iter().any(|p| p.symbol == payload.symbol && p.net_quantity != 0);
                if still_open {
                    tokio::time::sleep(REVERSAL_RESETTLE_DELAY).await;
                }
            }
            was_reversal = true;
            skip_cleanup = true;
        }

        let stop = payload.stop.expect("validated present for non-close actions");
        let tp = payload.tp.expect("validated present for non-close actions");

        // Placement runs to completion on a detached task: once the order
        // is in flight, an entry with no known outcome is worse than a
        // client that gave up waiting on the HTTP response. Dropping the
        // outer future (client disconnect, upstream timeout) must not
        // cancel this.
        let bracket_client = client.clone();
        let risk = self.risk.clone();
        let alerts = self.alerts.clone();
        let account_id_owned = account_id.to_string();
        let action_str = payload.action.to_string();
        let payload_stop = payload.stop;
        let payload_tp = payload.tp;

        let bracket_task = tokio::spawn(async move {
            match bracket_client
                .place_bracket_order(intended_side, stop, tp, 1, skip_cleanup)
                .await
            {
                Ok(bracket) => {
                    risk.record_trade(&account_id_owned, fingerprint).await;
                    let stats = risk.get_daily_stats(&account_id_owned).await;
                    let status = if bracket.partial {
                        warn!(account_id = %account_id_owned, "bracket placed without a take-profit leg");
                        AlertStatus::Partial
                    } else {
                        info!(account_id = %account_id_owned, entry = %bracket.entry.order_id, "bracket order placed");
                        AlertStatus::Success
                    };
                    dispatch_alert(
                        &alerts,
                        &account_id_owned,
                        &action_str,
                        payload_stop,
                        payload_tp,
                        status,
                        bracket.warning.clone(),
                    )
                    .await;
                    Ok((bracket, stats))
                }
                Err(e) => {
                    let err = classify_bracket_error(e);
                    warn!(account_id = %account_id_owned, error = %err, "bracket order placement failed");
                    if err.should_record_alert() {
                        dispatch_alert(
                            &alerts,
                            &account_id_owned,
                            &action_str,
                            payload_stop,
                            payload_tp,
                            AlertStatus::Failed,
                            Some(err.to_string()),
                        )
                        .await;
                    }
                    Err(err)
                }
            }
        });

        let (bracket, stats) = bracket_task
            .await
            .map_err(|join_err| GatewayError::Internal(anyhow::anyhow!("bracket task panicked: {join_err}")))??;

        Ok(WebhookOutcome {
            success: true,
            action: payload.action.to_string(),
            account: account_id.to_string(),
            skipped: false,
            skip_reason: None,
            bracket: Some(bracket),
            close: None,
            position_reconciliation: Some(PositionReconciliation {
                current_side: format!("{current_side:?}").to_lowercase(),
                intended_side: format!("{intended_as_position_side:?}").to_lowercase(),
                was_reversal,
                position_api_available,
            }),
            daily_stats: Some(stats),
            execution_time_ms: started.elapsed().as_millis() as u64,
        })
    }

    async fn record_alert(
        &self,
        account_id: &str,
        action: &str,
        stop: Option<Decimal>,
        tp: Option<Decimal>,
        status: AlertStatus,
        error: Option<String>,
    ) {
        dispatch_alert(&self.alerts, account_id, action, stop, tp, status, error).await;
    }
}

/// Writes one alert record. Free function (not a `&self` method) so it
/// can be called from inside a detached `tokio::spawn` task that only
/// holds an owned `Arc<dyn AlertLog>`, not a borrow of `WebhookProcessor`.
async fn dispatch_alert(
    alerts: &Arc<dyn AlertLog>,
    account_id: &str,
    action: &str,
    stop: Option<Decimal>,
    tp: Option<Decimal>,
    status: AlertStatus,
    error: Option<String>,
) {
    alerts
        .save(AlertRecord {
            id: Uuid::new_v4().to_string(),
            timestamp: chrono::Utc::now(),
            action: action.to_string(),
            symbol: DEFAULT_SYMBOL.to_string(),
            account: account_id.to_string(),
            status,
            stop_price: stop,
            tp_price: tp,
            error,
        })
        .await;
}

fn classify_bracket_error(err: anyhow::Error) -> GatewayError {
    let msg = err.to_string();
    if msg.contains("UNPROTECTED_POSITION") {
        GatewayError::UnprotectedPosition { reason: msg }
    } else {
        GatewayError::BrokerTransport { reason: msg }
    }
}

fn parse_required_decimal(
    value: &Option<serde_json::Value>,
    field: &str,
) -> Result<Decimal, GatewayError> {
    let value = value.as_ref().ok_or_else(|| GatewayError::Validation {
        reason: format!("'{field}' is required"),
    })?;
    let as_str = match value {
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::String(s) => s.clone(),
        _ => {
            return Err(GatewayError::Validation {
                reason: format!("'{field}' must be a number"),
            })
        }
    };
    Decimal::from_str(&as_str).map_err(|_| GatewayError::Validation {
        reason: format!("'{field}' is not a valid number"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn payload_body(action: &str, stop: f64, tp: f64) -> RawWebhookPayload {
        RawWebhookPayload {
            secret: "s3cret".to_string(),
            action: action.to_string(),
            symbol: None,
            stop: Some(serde_json::json!(stop)),
            tp: Some(serde_json::json!(tp)),
            account: None,
        }
    }

    #[test]
    fn inverted_bracket_on_sell_is_rejected() {
        let raw = payload_body("sell", 21400.0, 21600.0);
        let err = WebhookProcessor::parse_payload(&raw).unwrap_err();
        assert!(matches!(err, GatewayError::Validation { .. }));
    }

    #[test]
    fn valid_buy_parses() {
        let raw = payload_body("buy", 21400.0, 21600.0);
        let payload = WebhookProcessor::parse_payload(&raw).unwrap();
        assert_eq!(payload.stop, Some(dec!(21400.0)));
    }

    #[test]
    fn missing_tp_is_rejected_even_when_zero() {
        let mut raw = payload_body("buy", 21400.0, 0.0);
        raw.tp = Some(serde_json::json!(0));
        let err = WebhookProcessor::parse_payload(&raw).unwrap_err();
        assert!(matches!(err, GatewayError::Validation { .. }));
    }
}
