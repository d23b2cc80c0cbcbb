use crate::domain::risk::{BlockReason, DailyStats};
use thiserror::Error;

/// Every fallible boundary in the gateway returns this. Each variant
/// carries exactly the fields the HTTP layer and the alert log need;
/// anything narrower (env parsing, wire deserialization) is folded in
/// as `Internal` via `anyhow::Context` at the module boundary.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("invalid payload: {reason}")]
    Validation { reason: String },

    #[error("unauthorized webhook secret")]
    Unauthorized,

    #[error("account not found: {account_id}")]
    AccountNotFound { account_id: String },

    #[error("account disabled: {account_id}")]
    AccountDisabled { account_id: String },

    #[error("blocked by risk manager: {reason}")]
    RiskBlocked {
        reason: BlockReason,
        stats: Box<DailyStats>,
    },

    #[error("system busy: could not acquire account lock for {account_id}")]
    Busy { account_id: String },

    #[error("broker request failed: {reason}")]
    BrokerTransport { reason: String },

    #[error(
        "entry order acknowledged but protective stop failed: {reason} — manual intervention required"
    )]
    UnprotectedPosition { reason: String },

    #[error("failed to flatten existing position before reversal: {reason}")]
    ReversalFailed { reason: String },

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl GatewayError {
    /// HTTP status code this error maps to.
    pub fn status_code(&self) -> u16 {
        match self {
            GatewayError::Validation { .. } => 400,
            GatewayError::Unauthorized => 401,
            GatewayError::AccountNotFound { .. } => 404,
            GatewayError::AccountDisabled { .. } => 403,
            GatewayError::RiskBlocked { .. } => 403,
            GatewayError::Busy { .. } => 503,
            GatewayError::BrokerTransport { .. } => 500,
            GatewayError::UnprotectedPosition { .. } => 500,
            GatewayError::ReversalFailed { .. } => 500,
            GatewayError::Internal(_) => 500,
        }
    }

    /// Whether this outcome should be written to the alert log. Auth
    /// failures are deliberately excluded to avoid letting an
    /// unauthenticated caller flood the audit trail.
    pub fn should_record_alert(&self) -> bool {
        !matches!(
            self,
            GatewayError::Unauthorized
                | GatewayError::AccountNotFound { .. }
                | GatewayError::AccountDisabled { .. }
                | GatewayError::Busy { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    #[test]
    fn unprotected_position_message_names_the_reason() {
        let err = GatewayError::UnprotectedPosition {
            reason: "stop rejected by broker".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("stop rejected by broker"));
        assert!(msg.contains("manual intervention"));
        assert_eq!(err.status_code(), 500);
    }

    #[test]
    fn risk_blocked_carries_stats_for_the_response_body() {
        let stats = DailyStats {
            date: chrono::Utc::now().date_naive(),
            trade_count: 3,
            total_profit: Decimal::ZERO,
            total_loss: Decimal::new(150, 0),
            max_trades_per_day: 8,
            max_daily_loss: Decimal::new(400, 0),
        };
        let err = GatewayError::RiskBlocked {
            reason: BlockReason::Cooldown,
            stats: Box::new(stats),
        };
        assert_eq!(err.status_code(), 403);
        assert!(err.to_string().contains("cooldown"));
    }

    #[test]
    fn auth_failures_are_not_recorded_as_alerts() {
        assert!(!GatewayError::Unauthorized.should_record_alert());
        assert!(
            !GatewayError::AccountNotFound {
                account_id: "x".into()
            }
            .should_record_alert()
        );
        assert!(
            GatewayError::Validation {
                reason: "bad".into()
            }
            .should_record_alert()
        );
    }
}
