//! Webhook gateway server. Binds an HTTP listener, wires the account
//! registry, risk manager, broker client registry, and alert log, then
//! serves until `Ctrl+C`.

use anyhow::Result;
use projectx_gateway::application::account_registry::AccountRegistry;
use projectx_gateway::application::alert_log::{BackgroundAlertLog, InMemoryAlertLog};
use projectx_gateway::application::broker_registry::BrokerClientRegistry;
use projectx_gateway::application::risk_manager::RiskManager;
use projectx_gateway::application::webhook_processor::WebhookProcessor;
use projectx_gateway::config::Config;
use projectx_gateway::domain::market_calendar::MarketCalendar;
use projectx_gateway::domain::ports::AlertLog;
use projectx_gateway::infrastructure::observability::{Metrics, MetricsReporter};
use projectx_gateway::infrastructure::persistence::{Database, SqliteAlertLog};
use projectx_gateway::interfaces::{build_router, AppState};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn, Level};
use tracing_subscriber::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "webhook gateway starting");

    let config = Config::from_env()?;

    let registry = Arc::new(AccountRegistry::from_env()?);
    info!(accounts = registry.list().len(), "account registry loaded");

    let risk = Arc::new(RiskManager::new(
        config.risk_thresholds.clone(),
        MarketCalendar::default(),
    ));
    let brokers = Arc::new(BrokerClientRegistry::new(
        Duration::from_secs(config.broker_request_timeout_secs),
        config.broker_max_attempts,
    ));

    let alerts: Arc<dyn AlertLog> = match &config.database_url {
        Some(url) => {
            let db = Database::new(url).await?;
            info!(database_url = %url, "alert log backed by sqlite");
            Arc::new(BackgroundAlertLog::new(Arc::new(SqliteAlertLog::new(db))))
        }
        None => {
            warn!("DATABASE_URL not set, alert log falling back to in-memory ring buffer");
            Arc::new(BackgroundAlertLog::new(Arc::new(InMemoryAlertLog::new())))
        }
    };

    let processor = WebhookProcessor::new(registry.clone(), risk, brokers, alerts);

    let metrics = Metrics::new()?;
    let reporter = MetricsReporter::new(metrics.clone(), config.observability_interval_secs);
    tokio::spawn(reporter.run());

    let state = Arc::new(AppState {
        processor,
        registry,
        metrics,
        start_time: Instant::now(),
    });

    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    info!(addr = %config.bind_address, "listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}
