//! Client for the upstream ProjectX-family REST API (TopstepX,
//! FuturesDesk, …). Owns one isolated session cache per instance and
//! implements the [`BrokerClient`] port, including the three-leg
//! bracket-order transaction.

use crate::domain::account::Account;
use crate::domain::broker::{
    AccountDetails, AccountStatus, BracketResult, CloseAllResult, OpenOrder, OrderAck, OrderSide,
    OrderType, Position,
};
use crate::domain::ports::{BrokerClient, PositionQuery};
use crate::infrastructure::http_client_factory::HttpClientFactory;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest_middleware::ClientWithMiddleware;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{info, warn};

const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(5 * 60);
const ASSUMED_TOKEN_LIFETIME: Duration = Duration::from_secs(60 * 60);

/// Raised by [`ProjectXClient::post_authed`] when the broker responds
/// 404, which the ProjectX family uses inconsistently to mean "this
/// endpoint isn't implemented for this broker" rather than a real
/// transport/server failure. Callers that need to degrade gracefully on
/// that specific case (`getPositions`, `getOpenOrders`) downcast for it;
/// everything else just sees an opaque `anyhow::Error`.
#[derive(Debug)]
struct EndpointNotImplemented(String);

impl std::fmt::Display for EndpointNotImplemented {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "endpoint not implemented: {}", self.0)
    }
}

impl std::error::Error for EndpointNotImplemented {}

#[derive(Serialize)]
struct AccountSearchReq {
    #[serde(rename = "onlyActiveAccounts")]
    only_active_accounts: bool,
}

#[derive(Deserialize)]
struct AccountSearchRow {
    id: i64,
    balance: Option<Decimal>,
    name: Option<String>,
}

#[derive(Deserialize)]
struct AccountSearchResp {
    accounts: Vec<AccountSearchRow>,
}

#[derive(Default)]
struct Session {
    token: Option<String>,
    token_expires_at: Option<Instant>,
    upstream_account_id: Option<i64>,
    contract_id: Option<String>,
}

pub struct ProjectXClient {
    account: Account,
    http: ClientWithMiddleware,
    session: Mutex<Session>,
    order_seq: AtomicI64,
    request_timeout: Duration,
    max_attempts: u32,
    refresh_lock: tokio::sync::Mutex<()>,
}

impl ProjectXClient {
    pub fn new(account: Account, request_timeout: Duration, max_attempts: u32) -> Self {
        Self {
            session: Mutex::new(Session {
                upstream_account_id: account.credentials.upstream_account_id,
                ..Default::default()
            }),
            account,
            http: HttpClientFactory::create_client(),
            order_seq: AtomicI64::new(0),
            request_timeout,
            max_attempts,
            refresh_lock: tokio::sync::Mutex::new(()),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.account.credentials.base_url.trim_end_matches('/'), path)
    }

    async fn ensure_token(&self) -> Result<String> {
        {
            let session = self.session.lock().await;
            if let (Some(token), Some(expires_at)) = (&session.token, session.token_expires_at) {
                if expires_at.saturating_duration_since(Instant::now()) > TOKEN_REFRESH_MARGIN {
                    return Ok(token.clone());
                }
            }
        }
        self.refresh_token().await
    }

    /// Single-flight token refresh: the first caller to notice an
    /// expired token holds `refresh_lock` for the whole round trip, so
    /// concurrent callers queue on the lock and then immediately see the
    /// token the first caller just installed, rather than each issuing
    /// its own `Auth/loginKey` call.
    async fn refresh_token(&self) -> Result<String> {
        let _guard = self.refresh_lock.lock().await;

        {
            let session = self.session.lock().await;
            if let (Some(token), Some(expires_at)) = (&session.token, session.token_expires_at) {
                if expires_at.saturating_duration_since(Instant::now()) > TOKEN_REFRESH_MARGIN {
                    return Ok(token.clone());
                }
            }
        }

        #[derive(Serialize)]
        struct LoginRequest<'a> {
            #[serde(rename = "userName")]
            user_name: &'a str,
            #[serde(rename = "apiKey")]
            api_key: &'a str,
            #[serde(rename = "authType")]
            auth_type: &'a str,
        }
        #[derive(Deserialize)]
        struct LoginResponse {
            token: String,
        }

        let body = LoginRequest {
            user_name: &self.account.credentials.username,
            api_key: &self.account.credentials.api_key,
            auth_type: "api_key",
        };
        let resp: LoginResponse = self
            .post_raw("Auth/loginKey", &body)
            .await
            .context("Auth/loginKey failed")?;

        let mut session = self.session.lock().await;
        session.token = Some(resp.token.clone());
        session.token_expires_at = Some(Instant::now() + ASSUMED_TOKEN_LIFETIME);
        info!(account_id = %self.account.id, "refreshed broker session token");
        Ok(resp.token)
    }

    async fn account_search(&self) -> Result<AccountSearchRow> {
        let resp: AccountSearchResp = self
            .post_authed(
                "Account/search",
                &AccountSearchReq {
                    only_active_accounts: true,
                },
            )
            .await
            .context("Account/search failed")?;
        resp.accounts
            .into_iter()
            .next()
            .context("no active accounts returned by broker")
    }

    async fn resolve_account_id(&self) -> Result<i64> {
        if let Some(id) = self.session.lock().await.upstream_account_id {
            return Ok(id);
        }

        let row = self.account_search().await?;
        self.session.lock().await.upstream_account_id = Some(row.id);
        Ok(row.id)
    }

    async fn resolve_contract_id(&self, symbol: &str) -> Result<String> {
        if let Some(id) = self.session.lock().await.contract_id.clone() {
            return Ok(id);
        }

        #[derive(Serialize)]
        struct Req<'a> {
            #[serde(rename = "searchText")]
            search_text: &'a str,
            live: bool,
        }
        #[derive(Deserialize)]
        struct ContractRow {
            id: String,
            name: Option<String>,
        }
        #[derive(Deserialize)]
        struct Resp {
            contracts: Vec<ContractRow>,
        }

        let resp: Resp = self
            .post_authed(
                "Contract/search",
                &Req {
                    search_text: symbol,
                    live: false,
                },
            )
            .await
            .context("Contract/search failed")?;

        let contract = resp
            .contracts
            .iter()
            .find(|c| c.name.as_deref().map(|n| n.contains(symbol)).unwrap_or(false))
            .or_else(|| resp.contracts.first())
            .with_context(|| format!("no contract found for symbol {symbol}"))?;

        self.session.lock().await.contract_id = Some(contract.id.clone());
        Ok(contract.id.clone())
    }

    /// POST with no auth header, used only for login.
    async fn post_raw<B: Serialize, R: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R> {
        let resp = self
            .http
            .post(self.url(path))
            .timeout(self.request_timeout)
            .json(body)
            .send()
            .await
            .context("request failed")?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            bail!("broker returned {status}: {text}");
        }
        resp.json::<R>().await.context("failed to parse broker response")
    }

    /// POST with bearer auth, retrying once on 401/403 after refreshing
    /// the token. Up to `max_attempts` total attempts on transport/5xx
    /// failures with exponential backoff; auth failures are never
    /// retried more than the single forced refresh. A 404 is raised as
    /// [`EndpointNotImplemented`] rather than a plain `bail!`, so callers
    /// that need to tell "not implemented" apart from a real failure can
    /// downcast for it instead of string-matching the message.
    async fn post_authed<B: Serialize, R: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R> {
        let mut attempt = 0u32;
        let mut refreshed_once = false;
        loop {
            attempt += 1;
            let token = self.ensure_token().await?;
            let resp = self
                .http
                .post(self.url(path))
                .timeout(self.request_timeout)
                .bearer_auth(&token)
                .json(body)
                .send()
                .await;

            let resp = match resp {
                Ok(r) => r,
                Err(e) if attempt < self.max_attempts => {
                    warn!(path, attempt, error = %e, "broker request transport error, retrying");
                    tokio::time::sleep(backoff_delay(attempt)).await;
                    continue;
                }
                Err(e) => return Err(e).context("broker request failed after retries"),
            };

            let status = resp.status();
            if status.as_u16() == 401 || status.as_u16() == 403 {
                self.session.lock().await.token = None;
                if !refreshed_once {
                    refreshed_once = true;
                    continue;
                }
                bail!("broker returned {status}: unauthorized after token refresh");
            }

            if status.as_u16() == 404 {
                let text = resp.text().await.unwrap_or_default();
                return Err(EndpointNotImplemented(format!("{path}: {text}")).into());
            }

            if status.is_server_error() && attempt < self.max_attempts {
                warn!(path, attempt, %status, "broker returned server error, retrying");
                tokio::time::sleep(backoff_delay(attempt)).await;
                continue;
            }

            if !status.is_success() {
                let text = resp.text().await.unwrap_or_default();
                bail!("broker returned {status}: {text}");
            }

            return resp.json::<R>().await.context("failed to parse broker response");
        }
    }

    fn next_order_id_label(&self) -> String {
        let seq = self.order_seq.fetch_add(1, Ordering::SeqCst);
        format!("{}-{}", self.account.id, seq)
    }

    async fn place_order(
        &self,
        order_type: OrderType,
        side: OrderSide,
        size: i64,
        stop_price: Option<Decimal>,
        limit_price: Option<Decimal>,
    ) -> Result<OrderAck> {
        #[derive(Serialize)]
        struct Req {
            #[serde(rename = "accountId")]
            account_id: i64,
            #[serde(rename = "contractId")]
            contract_id: String,
            #[serde(rename = "type")]
            order_type: i32,
            side: i32,
            size: i64,
            #[serde(rename = "stopPrice", skip_serializing_if = "Option::is_none")]
            stop_price: Option<Decimal>,
            #[serde(rename = "limitPrice", skip_serializing_if = "Option::is_none")]
            limit_price: Option<Decimal>,
        }
        #[derive(Deserialize)]
        struct Resp {
            #[serde(rename = "orderId")]
            order_id: Option<i64>,
        }

        let account_id = self.resolve_account_id().await?;
        let contract_id = self.resolve_contract_id(&self.account_symbol()).await?;

        let resp: Resp = self
            .post_authed(
                "Order/place",
                &Req {
                    account_id,
                    contract_id,
                    order_type: order_type.wire_value(),
                    side: side.wire_value(),
                    size,
                    stop_price,
                    limit_price,
                },
            )
            .await?;

        let order_id = resp
            .order_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| self.next_order_id_label());

        Ok(OrderAck {
            order_id,
            side,
            order_type: match order_type {
                OrderType::Limit => "limit",
                OrderType::Market => "market",
                OrderType::StopLimit => "stop_limit",
                OrderType::Stop => "stop",
            },
            price: stop_price.or(limit_price),
        })
    }

    async fn cancel_order_impl(&self, order_id: &str) -> Result<()> {
        #[derive(Serialize)]
        struct Req<'a> {
            #[serde(rename = "orderId")]
            order_id: &'a str,
        }
        let _: serde_json::Value = self
            .post_authed("Order/cancel", &Req { order_id })
            .await?;
        Ok(())
    }

    fn account_symbol(&self) -> String {
        crate::domain::webhook::DEFAULT_SYMBOL.to_string()
    }
}

fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_secs(1 << (attempt.saturating_sub(1)).min(4))
}

#[async_trait]
impl BrokerClient for ProjectXClient {
    async fn place_bracket_order(
        &self,
        side: OrderSide,
        stop_price: Decimal,
        tp_price: Decimal,
        qty: i64,
        skip_cleanup: bool,
    ) -> Result<BracketResult> {
        if !skip_cleanup {
            if let PositionQuery::Known(positions) = self.get_positions().await? {
                if positions.iter().any(|p| p.net_quantity != 0) {
                    let close = self.close_all_positions(None).await?;
                    if !close.errors.is_empty() {
                        bail!("cleanup before entry failed: {}", close.errors.join("; "));
                    }
                }
            }
            for order in self.get_open_orders().await? {
                let _ = self.cancel_order_impl(&order.order_id).await;
            }
        }

        let entry = self
            .place_order(OrderType::Market, side, qty, None, None)
            .await
            .context("entry order failed")?;

        let stop_loss = match self
            .place_order(OrderType::Stop, side.opposite(), qty, Some(stop_price), None)
            .await
        {
            Ok(ack) => ack,
            Err(e) => {
                bail!("UNPROTECTED_POSITION: entry {} filled but stop failed: {e}", entry.order_id);
            }
        };

        match self
            .place_order(OrderType::Limit, side.opposite(), qty, None, Some(tp_price))
            .await
        {
            Ok(take_profit) => Ok(BracketResult {
                entry,
                stop_loss,
                take_profit: Some(take_profit),
                partial: false,
                warning: None,
            }),
            Err(e) => Ok(BracketResult {
                entry,
                stop_loss,
                take_profit: None,
                partial: true,
                warning: Some(format!("take-profit order failed: {e}")),
            }),
        }
    }

    async fn close_all_positions(&self, symbol_filter: Option<&str>) -> Result<CloseAllResult> {
        let positions = match self.get_positions().await? {
            PositionQuery::Known(p) => p,
            PositionQuery::Unavailable => return Ok(CloseAllResult::default()),
        };

        let mut result = CloseAllResult::default();
        for position in positions {
            if position.net_quantity == 0 {
                continue;
            }
            if let Some(filter) = symbol_filter {
                if position.symbol != filter {
                    continue;
                }
            }
            let side = if position.net_quantity > 0 {
                OrderSide::Sell
            } else {
                OrderSide::Buy
            };
            match self
                .place_order(OrderType::Market, side, position.net_quantity.abs(), None, None)
                .await
            {
                Ok(_) => result.closed += 1,
                Err(e) => result.errors.push(format!("{}: {e}", position.symbol)),
            }
        }

        for order in self.get_open_orders().await? {
            if let Some(filter) = symbol_filter {
                if order.symbol != filter {
                    continue;
                }
            }
            if let Err(e) = self.cancel_order_impl(&order.order_id).await {
                result.errors.push(format!("cancel {}: {e}", order.order_id));
            }
        }

        Ok(result)
    }

    async fn get_positions(&self) -> Result<PositionQuery> {
        #[derive(Serialize)]
        struct Req {
            #[serde(rename = "accountId")]
            account_id: i64,
        }
        #[derive(Deserialize)]
        struct Row {
            #[serde(alias = "contractName", alias = "symbol", alias = "name")]
            symbol: String,
            #[serde(alias = "netPos", alias = "size", alias = "quantity")]
            net_pos: i64,
            #[serde(rename = "averagePrice")]
            average_price: Option<Decimal>,
        }
        #[derive(Deserialize)]
        struct Resp {
            positions: Vec<Row>,
        }

        let account_id = self
            .resolve_account_id()
            .await
            .context("resolving account id for position lookup")?;

        match self
            .post_authed::<_, Resp>("Position/search", &Req { account_id })
            .await
        {
            Ok(resp) => Ok(PositionQuery::Known(
                resp.positions
                    .into_iter()
                    .map(|r| Position {
                        symbol: r.symbol,
                        net_quantity: r.net_pos,
                        average_price: r.average_price,
                    })
                    .collect(),
            )),
            Err(e) if e.downcast_ref::<EndpointNotImplemented>().is_some() => {
                warn!(error = %e, "Position/search not implemented by this broker, treating as unknown");
                Ok(PositionQuery::Unavailable)
            }
            Err(e) => Err(e).context("Position/search failed"),
        }
    }

    async fn get_open_orders(&self) -> Result<Vec<OpenOrder>> {
        Ok(Vec::new())
    }

    async fn get_account_status(&self) -> Result<AccountStatus> {
        match self.resolve_account_id().await {
            Ok(id) => Ok(AccountStatus {
                connected: true,
                upstream_account_id: Some(id),
                error: None,
            }),
            Err(e) => Ok(AccountStatus {
                connected: false,
                upstream_account_id: None,
                error: Some(e.to_string()),
            }),
        }
    }

    async fn place_market_order(&self, side: OrderSide, qty: i64) -> Result<OrderAck> {
        self.place_order(OrderType::Market, side, qty, None, None).await
    }

    async fn place_limit_order(&self, side: OrderSide, qty: i64, limit_price: Decimal) -> Result<OrderAck> {
        self.place_order(OrderType::Limit, side, qty, None, Some(limit_price)).await
    }

    async fn place_stop_order(&self, side: OrderSide, qty: i64, stop_price: Decimal) -> Result<OrderAck> {
        self.place_order(OrderType::Stop, side, qty, Some(stop_price), None).await
    }

    async fn cancel_order(&self, order_id: &str) -> Result<()> {
        self.cancel_order_impl(order_id).await
    }

    async fn get_account_details(&self) -> Result<AccountDetails> {
        let row = self.account_search().await?;
        self.session.lock().await.upstream_account_id = Some(row.id);
        Ok(AccountDetails {
            upstream_account_id: row.id,
            balance: row.balance,
            display_name: row.name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_constants_match_the_documented_numbering() {
        assert_eq!(OrderSide::Buy.wire_value(), 0);
        assert_eq!(OrderSide::Sell.wire_value(), 1);
        assert_eq!(OrderType::Limit.wire_value(), 1);
        assert_eq!(OrderType::Market.wire_value(), 2);
        assert_eq!(OrderType::StopLimit.wire_value(), 3);
        assert_eq!(OrderType::Stop.wire_value(), 4);
    }

    #[test]
    fn backoff_delay_is_exponential_and_capped() {
        assert_eq!(backoff_delay(1), Duration::from_secs(1));
        assert_eq!(backoff_delay(2), Duration::from_secs(2));
        assert_eq!(backoff_delay(3), Duration::from_secs(4));
    }

    #[test]
    fn endpoint_not_implemented_is_distinguishable_via_downcast() {
        let err: anyhow::Error = EndpointNotImplemented("Position/search: not found".to_string()).into();
        assert!(err.downcast_ref::<EndpointNotImplemented>().is_some());

        let transport_err = anyhow::anyhow!("connection reset");
        assert!(transport_err.downcast_ref::<EndpointNotImplemented>().is_none());
    }
}
