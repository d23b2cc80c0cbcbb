use crate::domain::risk::RiskThresholds;
use anyhow::{Context, Result};
use rust_decimal::Decimal;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_address: String,
    pub risk_thresholds: RiskThresholds,
    pub broker_request_timeout_secs: u64,
    pub broker_max_attempts: u32,
    pub database_url: Option<String>,
    pub observability_interval_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let bind_address =
            env::var("GATEWAY_HTTP_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

        let max_trades_per_day = env::var("MAX_TRADES_PER_DAY")
            .unwrap_or_else(|_| "8".to_string())
            .parse::<u32>()
            .context("failed to parse MAX_TRADES_PER_DAY")?;

        let max_daily_loss = env::var("MAX_DAILY_LOSS")
            .unwrap_or_else(|_| "400".to_string())
            .parse::<Decimal>()
            .context("failed to parse MAX_DAILY_LOSS")?;

        let cooldown_secs = env::var("COOLDOWN_SECONDS")
            .unwrap_or_else(|_| "60".to_string())
            .parse::<u64>()
            .context("failed to parse COOLDOWN_SECONDS")?;

        let lock_acquire_timeout_secs = env::var("LOCK_ACQUIRE_TIMEOUT_SECS")
            .unwrap_or_else(|_| "5".to_string())
            .parse::<u64>()
            .context("failed to parse LOCK_ACQUIRE_TIMEOUT_SECS")?;

        let risk_thresholds = RiskThresholds {
            max_trades_per_day,
            max_daily_loss,
            cooldown: Duration::from_secs(cooldown_secs),
            lock_acquire_timeout: Duration::from_secs(lock_acquire_timeout_secs),
        };

        let broker_request_timeout_secs = env::var("BROKER_REQUEST_TIMEOUT_SECS")
            .unwrap_or_else(|_| "10".to_string())
            .parse::<u64>()
            .context("failed to parse BROKER_REQUEST_TIMEOUT_SECS")?;

        let broker_max_attempts = env::var("BROKER_MAX_ATTEMPTS")
            .unwrap_or_else(|_| "3".to_string())
            .parse::<u32>()
            .context("failed to parse BROKER_MAX_ATTEMPTS")?;

        let database_url = env::var("DATABASE_URL").ok();

        let observability_interval_secs = env::var("OBSERVABILITY_INTERVAL_SECS")
            .unwrap_or_else(|_| "60".to_string())
            .parse::<u64>()
            .context("failed to parse OBSERVABILITY_INTERVAL_SECS")?;

        Ok(Config {
            bind_address,
            risk_thresholds,
            broker_request_timeout_secs,
            broker_max_attempts,
            database_url,
            observability_interval_secs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_risk_thresholds_match_reference_policy() {
        let defaults = RiskThresholds::default();
        assert_eq!(defaults.max_trades_per_day, 8);
        assert_eq!(defaults.max_daily_loss, Decimal::from(400));
        assert_eq!(defaults.cooldown, Duration::from_secs(60));
    }
}
