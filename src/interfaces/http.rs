//! Axum router and shared application state.

use crate::application::account_registry::AccountRegistry;
use crate::application::webhook_processor::WebhookProcessor;
use crate::infrastructure::observability::Metrics;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub struct AppState {
    pub processor: WebhookProcessor,
    pub registry: Arc<AccountRegistry>,
    pub metrics: Metrics,
    pub start_time: Instant,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/trading/webhook", post(crate::interfaces::handlers::post_webhook))
        .route(
            "/trading/webhook/test",
            post(crate::interfaces::handlers::post_webhook_test),
        )
        .route("/trading/status", get(crate::interfaces::handlers::get_status))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
