//! End-to-end scenario tests for the webhook gateway, exercising
//! `WebhookProcessor` against a stub broker client instead of the real
//! ProjectX API.

use async_trait::async_trait;
use projectx_gateway::application::account_registry::AccountRegistry;
use projectx_gateway::application::alert_log::InMemoryAlertLog;
use projectx_gateway::application::broker_registry::BrokerClientRegistry;
use projectx_gateway::application::risk_manager::RiskManager;
use projectx_gateway::application::webhook_processor::WebhookProcessor;
use projectx_gateway::domain::account::Account;
use projectx_gateway::domain::broker::{
    AccountDetails, AccountStatus, BracketResult, CloseAllResult, OpenOrder, OrderAck, OrderSide,
    Position,
};
use projectx_gateway::domain::errors::GatewayError;
use projectx_gateway::domain::market_calendar::MarketCalendar;
use projectx_gateway::domain::ports::{AlertLog, BrokerClient, PositionQuery};
use projectx_gateway::domain::risk::RiskThresholds;
use projectx_gateway::domain::webhook::RawWebhookPayload;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Broker test double. Positions are mutated in place so reversal and
/// reconciliation logic sees a consistent view across calls within one
/// `process_webhook` invocation.
struct StubBroker {
    positions: Mutex<Vec<Position>>,
    fail_stop_leg: bool,
    bracket_calls: AtomicUsize,
    close_calls: AtomicUsize,
}

impl StubBroker {
    fn flat() -> Self {
        Self {
            positions: Mutex::new(Vec::new()),
            fail_stop_leg: false,
            bracket_calls: AtomicUsize::new(0),
            close_calls: AtomicUsize::new(0),
        }
    }

    fn with_position(side: OrderSide) -> Self {
        let net = match side {
            OrderSide::Buy => 1,
            OrderSide::Sell => -1,
        };
        Self {
            positions: Mutex::new(vec![Position {
                symbol: "MNQ".to_string(),
                net_quantity: net,
                average_price: None,
            }]),
            fail_stop_leg: false,
            bracket_calls: AtomicUsize::new(0),
            close_calls: AtomicUsize::new(0),
        }
    }

    fn failing_stop_leg() -> Self {
        Self {
            positions: Mutex::new(Vec::new()),
            fail_stop_leg: true,
            bracket_calls: AtomicUsize::new(0),
            close_calls: AtomicUsize::new(0),
        }
    }

    fn ack(label: &str, side: OrderSide, price: Option<rust_decimal::Decimal>) -> OrderAck {
        OrderAck {
            order_id: label.to_string(),
            side,
            order_type: "market",
            price,
        }
    }
}

#[async_trait]
impl BrokerClient for StubBroker {
    async fn place_bracket_order(
        &self,
        side: OrderSide,
        stop_price: rust_decimal::Decimal,
        tp_price: rust_decimal::Decimal,
        qty: i64,
        _skip_cleanup: bool,
    ) -> anyhow::Result<BracketResult> {
        self.bracket_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_stop_leg {
            anyhow::bail!(
                "UNPROTECTED_POSITION: entry entry-1 filled but stop failed: simulated broker rejection"
            );
        }

        let net = match side {
            OrderSide::Buy => qty,
            OrderSide::Sell => -qty,
        };
        *self.positions.lock().await = vec![Position {
            symbol: "MNQ".to_string(),
            net_quantity: net,
            average_price: Some(stop_price),
        }];

        Ok(BracketResult {
            entry: Self::ack("entry-1", side, None),
            stop_loss: Self::ack("stop-1", side.opposite(), Some(stop_price)),
            take_profit: Some(Self::ack("tp-1", side.opposite(), Some(tp_price))),
            partial: false,
            warning: None,
        })
    }

    async fn close_all_positions(&self, _symbol_filter: Option<&str>) -> anyhow::Result<CloseAllResult> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.positions.lock().await.clear();
        Ok(CloseAllResult {
            closed: 1,
            errors: Vec::new(),
        })
    }

    async fn get_positions(&self) -> anyhow::Result<PositionQuery> {
        Ok(PositionQuery::Known(self.positions.lock().await.clone()))
    }

    async fn get_open_orders(&self) -> anyhow::Result<Vec<OpenOrder>> {
        Ok(Vec::new())
    }

    async fn get_account_status(&self) -> anyhow::Result<AccountStatus> {
        Ok(AccountStatus {
            connected: true,
            upstream_account_id: Some(1),
            error: None,
        })
    }

    async fn place_market_order(&self, side: OrderSide, _qty: i64) -> anyhow::Result<OrderAck> {
        Ok(Self::ack("market-1", side, None))
    }

    async fn place_limit_order(
        &self,
        side: OrderSide,
        _qty: i64,
        limit_price: rust_decimal::Decimal,
    ) -> anyhow::Result<OrderAck> {
        Ok(Self::ack("limit-1", side, Some(limit_price)))
    }

    async fn place_stop_order(
        &self,
        side: OrderSide,
        _qty: i64,
        stop_price: rust_decimal::Decimal,
    ) -> anyhow::Result<OrderAck> {
        Ok(Self::ack("stop-1", side, Some(stop_price)))
    }

    async fn cancel_order(&self, _order_id: &str) -> anyhow::Result<()> {
        Ok(())
    }

    async fn get_account_details(&self) -> anyhow::Result<AccountDetails> {
        Ok(AccountDetails {
            upstream_account_id: 1,
            balance: Some(rust_decimal::Decimal::ZERO),
            display_name: Some("stub".to_string()),
        })
    }
}

fn account_registry_for(id: &str, secret: &str) -> AccountRegistry {
    // SAFETY (test-only): `std::env::set_var` is unsafe in newer toolchains
    // because it races with concurrent readers; each test uses a unique
    // account id so no two tests touch the same variables.
    unsafe {
        std::env::set_var(format!("ACCOUNT_{id}_USERNAME"), "test-user");
        std::env::set_var(format!("ACCOUNT_{id}_API_KEY"), "test-key");
        std::env::set_var(format!("ACCOUNT_{id}_WEBHOOK_SECRET"), secret);
    }
    AccountRegistry::from_env().expect("registry loads from env")
}

fn processor_with(
    account_id: &str,
    secret: &str,
    broker: Arc<StubBroker>,
) -> (WebhookProcessor, Arc<InMemoryAlertLog>) {
    let registry = Arc::new(account_registry_for(account_id, secret));
    let risk = Arc::new(RiskManager::new(
        RiskThresholds::default(),
        MarketCalendar::always_open(),
    ));
    let brokers = Arc::new(BrokerClientRegistry::with_factory(move |_account: &Account| {
        broker.clone() as Arc<dyn BrokerClient>
    }));
    let alerts = Arc::new(InMemoryAlertLog::new());
    let alert_log_trait_object: Arc<dyn AlertLog> = alerts.clone();
    (
        WebhookProcessor::new(registry, risk, brokers, alert_log_trait_object),
        alerts,
    )
}

fn buy_payload(secret: &str) -> RawWebhookPayload {
    RawWebhookPayload {
        secret: secret.to_string(),
        action: "buy".to_string(),
        symbol: None,
        stop: Some(serde_json::json!(21400.0)),
        tp: Some(serde_json::json!(21600.0)),
        account: None,
    }
}

#[tokio::test]
async fn happy_path_buy_places_a_complete_bracket() {
    let broker = Arc::new(StubBroker::flat());
    let (processor, _alerts) = processor_with("HAPPY", "happy-secret", broker.clone());

    let outcome = processor
        .process_webhook(buy_payload("happy-secret"))
        .await
        .expect("buy should succeed");

    assert!(outcome.success);
    assert!(!outcome.skipped);
    let bracket = outcome.bracket.expect("bracket present");
    assert!(!bracket.partial);
    assert!(bracket.take_profit.is_some());
    assert_eq!(broker.bracket_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn duplicate_webhook_within_the_fingerprint_window_is_blocked() {
    let broker = Arc::new(StubBroker::flat());
    let (processor, _alerts) = processor_with("DUP", "dup-secret", broker.clone());

    let first = processor.process_webhook(buy_payload("dup-secret")).await;
    assert!(first.is_ok());

    let second = processor.process_webhook(buy_payload("dup-secret")).await;
    match second {
        Err(GatewayError::RiskBlocked { reason, .. }) => {
            assert_eq!(reason.to_string(), "duplicate");
        }
        other => panic!("expected duplicate block, got {other:?}"),
    }
    assert_eq!(broker.bracket_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn opposite_side_signal_reverses_the_existing_position() {
    let broker = Arc::new(StubBroker::with_position(OrderSide::Sell));
    let (processor, _alerts) = processor_with("REV", "rev-secret", broker.clone());

    let outcome = processor
        .process_webhook(buy_payload("rev-secret"))
        .await
        .expect("reversal should succeed");

    let reconciliation = outcome.position_reconciliation.expect("reconciliation reported");
    assert!(reconciliation.was_reversal);
    assert_eq!(broker.close_calls.load(Ordering::SeqCst), 1);
    assert_eq!(broker.bracket_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn same_direction_signal_is_skipped_without_placing_an_order() {
    let broker = Arc::new(StubBroker::with_position(OrderSide::Buy));
    let (processor, _alerts) = processor_with("SKIP", "skip-secret", broker.clone());

    let outcome = processor
        .process_webhook(buy_payload("skip-secret"))
        .await
        .expect("skip is a success outcome");

    assert!(outcome.skipped);
    assert_eq!(broker.bracket_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn failed_stop_leg_surfaces_as_unprotected_position() {
    let broker = Arc::new(StubBroker::failing_stop_leg());
    let (processor, alerts) = processor_with("UNPROT", "unprot-secret", broker.clone());

    let err = processor
        .process_webhook(buy_payload("unprot-secret"))
        .await
        .expect_err("stop leg failure must surface as an error");

    assert!(matches!(err, GatewayError::UnprotectedPosition { .. }));
    assert_eq!(err.status_code(), 500);

    let recorded = alerts.list(10).await;
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].status.to_string(), "failed");
}

#[tokio::test]
async fn inverted_bracket_on_sell_never_reaches_the_broker() {
    let broker = Arc::new(StubBroker::flat());
    let (processor, _alerts) = processor_with("INVERT", "invert-secret", broker.clone());

    let mut payload = buy_payload("invert-secret");
    payload.action = "sell".to_string();
    // stop below tp is correct for a buy, invalid for a sell.
    payload.stop = Some(serde_json::json!(21400.0));
    payload.tp = Some(serde_json::json!(21600.0));

    let err = processor
        .process_webhook(payload)
        .await
        .expect_err("inverted sell bracket must be rejected");

    assert!(matches!(err, GatewayError::Validation { .. }));
    assert_eq!(broker.bracket_calls.load(Ordering::SeqCst), 0);
}
