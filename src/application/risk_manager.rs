//! Per-account risk gating: mutual exclusion, idempotency, daily
//! counters, and the trading-hours gate.

use crate::domain::errors::GatewayError;
use crate::domain::market_calendar::MarketCalendar;
use crate::domain::risk::{BlockReason, DailyStats, RiskThresholds, TradeDecision};
use crate::domain::webhook::{Fingerprint, WebhookPayload};
use rust_decimal::Decimal;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

const FINGERPRINT_BUCKET_SECS: i64 = 10;
const DUPLICATE_RING_CAPACITY: usize = 256;
const DUPLICATE_TTL: Duration = Duration::from_secs(600);

struct FingerprintEntry {
    fingerprint: Fingerprint,
    inserted_at: Instant,
}

struct AccountState {
    date: chrono::NaiveDate,
    trade_count: u32,
    total_profit: Decimal,
    total_loss: Decimal,
    last_trade_time: Option<Instant>,
    recent: VecDeque<FingerprintEntry>,
}

impl AccountState {
    fn new(date: chrono::NaiveDate) -> Self {
        Self {
            date,
            trade_count: 0,
            total_profit: Decimal::ZERO,
            total_loss: Decimal::ZERO,
            last_trade_time: None,
            recent: VecDeque::new(),
        }
    }

    fn rollover_if_needed(&mut self, today: chrono::NaiveDate) {
        if self.date != today {
            info!(old_date = %self.date, new_date = %today, "risk counters rolled over at ET midnight");
            *self = AccountState::new(today);
        }
    }

    fn evict_expired(&mut self) {
        let now = Instant::now();
        while let Some(front) = self.recent.front() {
            if now.duration_since(front.inserted_at) > DUPLICATE_TTL {
                self.recent.pop_front();
            } else {
                break;
            }
        }
        while self.recent.len() > DUPLICATE_RING_CAPACITY {
            self.recent.pop_front();
        }
    }

    fn contains(&self, fp: &Fingerprint) -> bool {
        self.recent.iter().any(|e| &e.fingerprint == fp)
    }
}

/// Per-account lease handle. Must be released exactly once via
/// [`RiskManager::release_lock`] on every exit path; holding it past the
/// request it was acquired for starves every other signal targeting the
/// same account.
pub struct LeaseToken {
    account_id: String,
}

pub struct RiskManager {
    thresholds: RiskThresholds,
    calendar: MarketCalendar,
    locks: RwLock<HashMap<String, Arc<Mutex<()>>>>,
    held: Mutex<HashMap<String, tokio::sync::OwnedMutexGuard<()>>>,
    state: RwLock<HashMap<String, AccountState>>,
}

impl RiskManager {
    pub fn new(thresholds: RiskThresholds, calendar: MarketCalendar) -> Self {
        Self {
            thresholds,
            calendar,
            locks: RwLock::new(HashMap::new()),
            held: Mutex::new(HashMap::new()),
            state: RwLock::new(HashMap::new()),
        }
    }

    async fn lock_for(&self, account_id: &str) -> Arc<Mutex<()>> {
        if let Some(lock) = self.locks.read().await.get(account_id) {
            return lock.clone();
        }
        let mut locks = self.locks.write().await;
        locks
            .entry(account_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Blocks up to the configured timeout waiting for this account's
    /// turn. The owned guard is parked in `held`, keyed by account id,
    /// until [`RiskManager::release_lock`] removes and drops it.
    pub async fn acquire_lock(&self, account_id: &str) -> Result<LeaseToken, GatewayError> {
        let mutex = self.lock_for(account_id).await;
        let guard = tokio::time::timeout(self.thresholds.lock_acquire_timeout, mutex.lock_owned())
            .await
            .map_err(|_| GatewayError::Busy {
                account_id: account_id.to_string(),
            })?;
        self.held.lock().await.insert(account_id.to_string(), guard);
        Ok(LeaseToken {
            account_id: account_id.to_string(),
        })
    }

    pub async fn release_lock(&self, lease: LeaseToken) {
        self.held.lock().await.remove(&lease.account_id);
    }

    fn today() -> chrono::NaiveDate {
        MarketCalendar::now_et().date_naive()
    }

    pub fn generate_webhook_id(&self, account_id: &str, payload: &WebhookPayload) -> Fingerprint {
        let bucket = chrono::Utc::now().timestamp() / FINGERPRINT_BUCKET_SECS;
        let mut hasher = Sha256::new();
        hasher.update(account_id.as_bytes());
        hasher.update(payload.action.to_string().as_bytes());
        hasher.update(payload.symbol.as_bytes());
        if let Some(stop) = payload.stop {
            hasher.update(stop.round_dp(2).to_string().as_bytes());
        }
        if let Some(tp) = payload.tp {
            hasher.update(tp.round_dp(2).to_string().as_bytes());
        }
        hasher.update(bucket.to_be_bytes());
        Fingerprint(hex::encode(hasher.finalize()))
    }

    pub async fn can_execute_trade(
        &self,
        account_id: &str,
        fingerprint: &Fingerprint,
    ) -> TradeDecision {
        let today = Self::today();
        let mut state = self.state.write().await;
        let entry = state
            .entry(account_id.to_string())
            .or_insert_with(|| AccountState::new(today));
        entry.rollover_if_needed(today);
        entry.evict_expired();

        if entry.contains(fingerprint) {
            return TradeDecision::Blocked(BlockReason::Duplicate);
        }
        if !self.calendar.is_open(MarketCalendar::now_et()).open {
            return TradeDecision::Blocked(BlockReason::OutsideHours);
        }
        if entry.trade_count >= self.thresholds.max_trades_per_day {
            return TradeDecision::Blocked(BlockReason::MaxTrades);
        }
        if entry.total_loss >= self.thresholds.max_daily_loss {
            return TradeDecision::Blocked(BlockReason::MaxLoss);
        }
        if let Some(last) = entry.last_trade_time {
            if last.elapsed() < self.thresholds.cooldown {
                return TradeDecision::Blocked(BlockReason::Cooldown);
            }
        }
        TradeDecision::Allowed
    }

    pub async fn record_trade(&self, account_id: &str, fingerprint: Fingerprint) {
        let today = Self::today();
        let mut state = self.state.write().await;
        let entry = state
            .entry(account_id.to_string())
            .or_insert_with(|| AccountState::new(today));
        entry.rollover_if_needed(today);
        entry.trade_count += 1;
        entry.last_trade_time = Some(Instant::now());
        entry.recent.push_back(FingerprintEntry {
            fingerprint,
            inserted_at: Instant::now(),
        });
        entry.evict_expired();
        info!(account_id, trade_count = entry.trade_count, "trade recorded");
    }

    pub async fn update_pnl(&self, account_id: &str, delta: Decimal) {
        let today = Self::today();
        let mut state = self.state.write().await;
        let entry = state
            .entry(account_id.to_string())
            .or_insert_with(|| AccountState::new(today));
        entry.rollover_if_needed(today);
        if delta.is_sign_negative() {
            entry.total_loss += -delta;
        } else {
            entry.total_profit += delta;
        }
        if entry.total_loss >= self.thresholds.max_daily_loss {
            warn!(account_id, total_loss = %entry.total_loss, "daily loss limit reached");
        }
    }

    pub async fn get_daily_stats(&self, account_id: &str) -> DailyStats {
        let today = Self::today();
        let mut state = self.state.write().await;
        let entry = state
            .entry(account_id.to_string())
            .or_insert_with(|| AccountState::new(today));
        entry.rollover_if_needed(today);
        DailyStats {
            date: entry.date,
            trade_count: entry.trade_count,
            total_profit: entry.total_profit,
            total_loss: entry.total_loss,
            max_trades_per_day: self.thresholds.max_trades_per_day,
            max_daily_loss: self.thresholds.max_daily_loss,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::webhook::Action;
    use rust_decimal_macros::dec;

    fn always_open_calendar() -> MarketCalendar {
        MarketCalendar::always_open()
    }

    fn payload(action: Action, stop: Option<Decimal>, tp: Option<Decimal>) -> WebhookPayload {
        WebhookPayload {
            action,
            symbol: "MNQ".to_string(),
            stop,
            tp,
            account: None,
        }
    }

    #[tokio::test]
    async fn fingerprint_is_stable_within_the_same_bucket() {
        let rm = RiskManager::new(RiskThresholds::default(), always_open_calendar());
        let p = payload(Action::Buy, Some(dec!(21400.00)), Some(dec!(21600.00)));
        let a = rm.generate_webhook_id("acct", &p);
        let b = rm.generate_webhook_id("acct", &p);
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn duplicate_fingerprint_is_blocked_after_record() {
        let rm = RiskManager::new(RiskThresholds::default(), always_open_calendar());
        let p = payload(Action::Buy, Some(dec!(21400.00)), Some(dec!(21600.00)));
        let fp = rm.generate_webhook_id("acct", &p);
        rm.record_trade("acct", fp.clone()).await;
        match rm.can_execute_trade("acct", &fp).await {
            TradeDecision::Blocked(BlockReason::Duplicate) => {}
            other => panic!("expected duplicate block, got {:?}", matches_variant(&other)),
        }
    }

    fn matches_variant(d: &TradeDecision) -> &'static str {
        match d {
            TradeDecision::Allowed => "allowed",
            TradeDecision::Blocked(_) => "blocked",
        }
    }

    #[tokio::test]
    async fn max_trades_precedes_cooldown() {
        let mut thresholds = RiskThresholds::default();
        thresholds.max_trades_per_day = 1;
        thresholds.cooldown = Duration::from_secs(600);
        let rm = RiskManager::new(thresholds, always_open_calendar());
        let p = payload(Action::Buy, Some(dec!(21400.00)), Some(dec!(21600.00)));
        let fp1 = rm.generate_webhook_id("acct", &p);
        rm.record_trade("acct", fp1).await;

        let p2 = payload(Action::Sell, Some(dec!(21700.00)), Some(dec!(21500.00)));
        let fp2 = rm.generate_webhook_id("acct", &p2);
        match rm.can_execute_trade("acct", &fp2).await {
            TradeDecision::Blocked(BlockReason::MaxTrades) => {}
            other => panic!("expected max-trades, got {:?}", matches_variant(&other)),
        }
    }

    #[tokio::test]
    async fn per_account_lock_is_mutually_exclusive() {
        let rm = Arc::new(RiskManager::new(
            RiskThresholds::default(),
            always_open_calendar(),
        ));
        let lease = rm.acquire_lock("acct").await.expect("first lease");

        let rm2 = rm.clone();
        let blocked = tokio::spawn(async move { rm2.acquire_lock("acct").await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!blocked.is_finished());

        rm.release_lock(lease).await;
        let second = blocked.await.unwrap();
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn distinct_accounts_do_not_block_each_other() {
        let rm = Arc::new(RiskManager::new(
            RiskThresholds::default(),
            always_open_calendar(),
        ));
        let lease_a = rm.acquire_lock("a").await.unwrap();
        let lease_b = rm
            .acquire_lock("b")
            .await
            .expect("account b must not wait on account a's lock");
        rm.release_lock(lease_a).await;
        rm.release_lock(lease_b).await;
    }
}
