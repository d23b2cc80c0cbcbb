//! Alert log implementations: an in-memory ring buffer fallback, and a
//! background-dispatching wrapper that keeps `save` off the request's
//! hot path regardless of which backend it wraps.

use crate::domain::alert::{AlertRecord, DailyPnl};
use crate::domain::ports::AlertLog;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};
use tracing::warn;

const RING_CAPACITY: usize = 256;
const DISPATCH_QUEUE_CAPACITY: usize = 512;

/// Process-local fallback used when no persistence backend is
/// configured. Never errors; bounded by dropping the oldest record.
pub struct InMemoryAlertLog {
    records: Mutex<VecDeque<AlertRecord>>,
    pnl: Mutex<Vec<DailyPnl>>,
}

impl InMemoryAlertLog {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(VecDeque::with_capacity(RING_CAPACITY)),
            pnl: Mutex::new(Vec::new()),
        }
    }
}

impl Default for InMemoryAlertLog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AlertLog for InMemoryAlertLog {
    async fn save(&self, record: AlertRecord) {
        let mut records = self.records.lock().await;
        if records.len() >= RING_CAPACITY {
            records.pop_front();
        }
        records.push_back(record);
    }

    async fn list(&self, limit: usize) -> Vec<AlertRecord> {
        let records = self.records.lock().await;
        records.iter().rev().take(limit).cloned().collect()
    }

    async fn list_today(&self) -> Vec<AlertRecord> {
        let today = chrono::Utc::now().date_naive();
        let records = self.records.lock().await;
        records
            .iter()
            .rev()
            .filter(|r| r.timestamp.date_naive() == today)
            .cloned()
            .collect()
    }

    async fn save_daily_pnl(&self, pnl: DailyPnl) {
        let mut store = self.pnl.lock().await;
        store.retain(|p| !(p.account_id == pnl.account_id && p.date == pnl.date));
        store.push(pnl);
    }

    async fn history_for(&self, account_id: &str, days: u32) -> Vec<DailyPnl> {
        let cutoff = chrono::Utc::now().date_naive() - chrono::Duration::days(days as i64);
        let store = self.pnl.lock().await;
        store
            .iter()
            .filter(|p| p.account_id == account_id && p.date >= cutoff)
            .cloned()
            .collect()
    }
}

/// Wraps any [`AlertLog`] and dispatches writes through a bounded
/// in-memory queue drained by a background task, so `save` returns
/// immediately regardless of how slow the inner backend is. Overflow
/// evicts the oldest queued record to make room for the one just written,
/// incrementing a counter, rather than blocking the caller or dropping
/// the newest alert.
pub struct BackgroundAlertLog {
    inner: Arc<dyn AlertLog>,
    queue: Arc<Mutex<VecDeque<AlertRecord>>>,
    notify: Arc<Notify>,
    dropped: Arc<AtomicU64>,
}

impl BackgroundAlertLog {
    pub fn new(inner: Arc<dyn AlertLog>) -> Self {
        let queue = Arc::new(Mutex::new(VecDeque::with_capacity(DISPATCH_QUEUE_CAPACITY)));
        let notify = Arc::new(Notify::new());
        let worker_inner = inner.clone();
        let worker_queue = queue.clone();
        let worker_notify = notify.clone();
        tokio::spawn(async move {
            loop {
                let next = worker_queue.lock().await.pop_front();
                match next {
                    Some(record) => worker_inner.save(record).await,
                    None => worker_notify.notified().await,
                }
            }
        });
        Self {
            inner,
            queue,
            notify,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Pushes `record` onto `queue`, evicting the oldest entry first if the
/// queue is already at `capacity`. Standalone so the eviction rule can be
/// exercised synchronously without a background task in the loop.
fn enqueue_with_eviction(
    queue: &mut VecDeque<AlertRecord>,
    dropped: &AtomicU64,
    capacity: usize,
    record: AlertRecord,
) {
    if queue.len() >= capacity {
        queue.pop_front();
        dropped.fetch_add(1, Ordering::Relaxed);
        warn!("alert log dispatch queue full, dropping oldest queued record");
    }
    queue.push_back(record);
}

#[async_trait]
impl AlertLog for BackgroundAlertLog {
    async fn save(&self, record: AlertRecord) {
        let mut queue = self.queue.lock().await;
        enqueue_with_eviction(&mut queue, &self.dropped, DISPATCH_QUEUE_CAPACITY, record);
        drop(queue);
        self.notify.notify_one();
    }

    async fn list(&self, limit: usize) -> Vec<AlertRecord> {
        self.inner.list(limit).await
    }

    async fn list_today(&self) -> Vec<AlertRecord> {
        self.inner.list_today().await
    }

    async fn save_daily_pnl(&self, pnl: DailyPnl) {
        self.inner.save_daily_pnl(pnl).await;
    }

    async fn history_for(&self, account_id: &str, days: u32) -> Vec<DailyPnl> {
        self.inner.history_for(account_id, days).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::alert::AlertStatus;

    fn sample(id: &str) -> AlertRecord {
        AlertRecord {
            id: id.to_string(),
            timestamp: chrono::Utc::now(),
            action: "buy".to_string(),
            symbol: "MNQ".to_string(),
            account: "default".to_string(),
            status: AlertStatus::Success,
            stop_price: None,
            tp_price: None,
            error: None,
        }
    }

    #[tokio::test]
    async fn in_memory_log_returns_most_recent_first() {
        let log = InMemoryAlertLog::new();
        log.save(sample("1")).await;
        log.save(sample("2")).await;
        let recent = log.list(10).await;
        assert_eq!(recent[0].id, "2");
        assert_eq!(recent[1].id, "1");
    }

    #[tokio::test]
    async fn in_memory_log_evicts_oldest_past_capacity() {
        let log = InMemoryAlertLog::new();
        for i in 0..(RING_CAPACITY + 10) {
            log.save(sample(&i.to_string())).await;
        }
        let all = log.list(RING_CAPACITY + 10).await;
        assert_eq!(all.len(), RING_CAPACITY);
        assert_eq!(all.last().unwrap().id, "10");
    }

    #[test]
    fn enqueue_with_eviction_drops_oldest_not_newest() {
        let mut queue = VecDeque::new();
        let dropped = AtomicU64::new(0);
        for i in 0..3 {
            enqueue_with_eviction(&mut queue, &dropped, 3, sample(&i.to_string()));
        }
        assert_eq!(dropped.load(Ordering::Relaxed), 0);

        enqueue_with_eviction(&mut queue, &dropped, 3, sample("3"));

        assert_eq!(dropped.load(Ordering::Relaxed), 1);
        assert_eq!(queue.len(), 3);
        let ids: Vec<&str> = queue.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
    }

    #[tokio::test]
    async fn background_log_forwards_to_inner() {
        let inner = Arc::new(InMemoryAlertLog::new());
        let dispatching = BackgroundAlertLog::new(inner.clone());
        dispatching.save(sample("bg")).await;
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let recent = dispatching.list(10).await;
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].id, "bg");
    }
}
