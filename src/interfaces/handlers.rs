//! Axum handlers. Thin: parse/dispatch to [`WebhookProcessor`], map the
//! result to the wire DTOs in [`super::dto`].

use crate::domain::errors::GatewayError;
use crate::domain::webhook::RawWebhookPayload;
use crate::interfaces::dto::{
    ErrorResponse, StatusResponse, WebhookResponse, WebhookTestResponse, WebhookTestStep,
};
use crate::interfaces::http::AppState;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Deserializes the raw body manually rather than via axum's `Json`
/// extractor, which would reject a malformed body before the handler runs
/// and skip the audit trail entirely for that path.
fn parse_webhook_body(body: &Bytes) -> Result<RawWebhookPayload, serde_json::Error> {
    serde_json::from_slice::<RawWebhookPayload>(body)
}

fn error_response(err: GatewayError) -> Response {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = ErrorResponse::from(&err);
    match status {
        StatusCode::INTERNAL_SERVER_ERROR => error!(error = %err, "webhook processing failed"),
        StatusCode::FORBIDDEN | StatusCode::SERVICE_UNAVAILABLE => {
            warn!(error = %err, "webhook blocked or busy")
        }
        _ => info!(error = %err, "webhook rejected"),
    }
    (status, Json(body)).into_response()
}

pub async fn post_webhook(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let raw = match parse_webhook_body(&body) {
        Ok(raw) => raw,
        Err(e) => {
            warn!(error = %e, "webhook body failed to parse");
            state.processor.record_unparseable_body(&e.to_string()).await;
            let body = ErrorResponse::from(&GatewayError::Validation {
                reason: "request body is not a valid webhook payload".to_string(),
            });
            return (StatusCode::BAD_REQUEST, Json(body)).into_response();
        }
    };
    state.metrics.inc_received(raw.account.as_deref().unwrap_or("unresolved"));
    match state.processor.process_webhook(raw).await {
        Ok(outcome) => {
            state.metrics.inc_accepted(&outcome.account, &outcome.action);
            if let Some(bracket) = &outcome.bracket {
                if bracket.partial {
                    state.metrics.inc_bracket_partial(&outcome.account);
                } else {
                    state.metrics.inc_bracket_placed(&outcome.account);
                }
            }
            (StatusCode::OK, Json(WebhookResponse::from(outcome))).into_response()
        }
        Err(err) => {
            record_error_metric(&state, &err);
            error_response(err)
        }
    }
}

fn record_error_metric(state: &AppState, err: &GatewayError) {
    match err {
        GatewayError::RiskBlocked { reason, .. } => {
            state.metrics.inc_blocked("unknown", &reason.to_string())
        }
        GatewayError::UnprotectedPosition { .. } => {
            state.metrics.inc_unprotected_position("unknown")
        }
        other => state.metrics.inc_failed("unknown", other.to_string().as_str()),
    }
}

/// Runs the same validation pipeline as `post_webhook` without placing
/// any order. Reports pass/fail per step rather than a single verdict.
pub async fn post_webhook_test(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let raw = match parse_webhook_body(&body) {
        Ok(raw) => raw,
        Err(_) => {
            return (
                StatusCode::OK,
                Json(WebhookTestResponse {
                    would_succeed: false,
                    steps: vec![WebhookTestStep {
                        name: "parse_body".to_string(),
                        passed: false,
                        detail: Some("request body is not a valid webhook payload".to_string()),
                    }],
                }),
            )
                .into_response();
        }
    };
    let mut steps = Vec::new();

    let account_result = state.registry.resolve(&raw.secret, raw.account.as_deref());
    steps.push(WebhookTestStep {
        name: "resolve_account".to_string(),
        passed: account_result.is_ok(),
        detail: account_result.as_ref().err().map(|e| e.to_string()),
    });

    let account = match account_result {
        Ok(a) => a,
        Err(_) => {
            return (
                StatusCode::OK,
                Json(WebhookTestResponse {
                    would_succeed: false,
                    steps,
                }),
            )
                .into_response();
        }
    };

    let payload_result = crate::application::webhook_processor::WebhookProcessor::parse_payload(&raw);
    steps.push(WebhookTestStep {
        name: "parse_payload".to_string(),
        passed: payload_result.is_ok(),
        detail: payload_result.as_ref().err().map(|e| e.to_string()),
    });

    let would_succeed = payload_result.is_ok();
    if would_succeed {
        steps.push(WebhookTestStep {
            name: "account_enabled".to_string(),
            passed: account.enabled,
            detail: (!account.enabled).then(|| "account is disabled".to_string()),
        });
    }

    (
        StatusCode::OK,
        Json(WebhookTestResponse {
            would_succeed: would_succeed && account.enabled,
            steps,
        }),
    )
        .into_response()
}

pub async fn get_status(State(state): State<Arc<AppState>>) -> Response {
    let body = StatusResponse {
        healthy: true,
        accounts: state.registry.list(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
    };
    (StatusCode::OK, Json(body)).into_response()
}
