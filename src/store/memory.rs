use super::{CounterStore, Topology};
use crate::error::{OverlayError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// How often an increment also sweeps every expired counter out of the map.
const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy)]
struct Counter {
    value: u64,
    expires_at: Option<Instant>,
}

#[derive(Debug, Default)]
struct Counters {
    entries: HashMap<String, Counter>,
    next_sweep: Option<Instant>,
}

impl Counters {
    fn sweep(&mut self, now: Instant) {
        if self.next_sweep.is_some_and(|at| now < at) {
            return;
        }
        self.entries
            .retain(|_, c| !MemoryCounterStore::expired(c, now));
        self.next_sweep = Some(now + SWEEP_INTERVAL);
    }
}

/// Process-local counter store with the same expiry rules as Redis.
///
/// Counters are not shared between instances, so this is only suitable for
/// tests and single-process development runs.
#[derive(Debug, Default, Clone)]
pub struct MemoryCounterStore {
    counters: Arc<Mutex<Counters>>,
    closed: Arc<AtomicBool>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of `key`, if it exists and has not expired.
    pub fn get(&self, key: &str) -> Option<u64> {
        let counters = self.counters.lock().ok()?;
        counters
            .entries
            .get(key)
            .filter(|c| !Self::expired(c, Instant::now()))
            .map(|c| c.value)
    }

    /// Remaining time to live of `key`.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let counters = self.counters.lock().ok()?;
        let now = Instant::now();
        counters
            .entries
            .get(key)
            .and_then(|c| c.expires_at)
            .map(|at| at.saturating_duration_since(now))
    }

    /// Number of counters held, expired or not.
    pub fn len(&self) -> usize {
        self.counters.lock().map(|c| c.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn expired(counter: &Counter, now: Instant) -> bool {
        counter.expires_at.is_some_and(|at| at <= now)
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn increment_and_maybe_expire(&self, key: &str, ttl_secs: u64) -> Result<u64> {
        if self.is_closed() {
            return Err(OverlayError::StoreUnavailable(
                "memory store has been closed".into(),
            ));
        }

        let mut counters = self
            .counters
            .lock()
            .map_err(|_| OverlayError::StoreUnavailable("memory store lock poisoned".into()))?;
        let now = Instant::now();
        counters.sweep(now);

        let counter = counters.entries.entry(key.to_string()).or_insert(Counter {
            value: 0,
            expires_at: None,
        });
        if Self::expired(counter, now) {
            *counter = Counter {
                value: 0,
                expires_at: None,
            };
        }

        counter.value += 1;
        if counter.value == 1 {
            counter.expires_at = Some(now + Duration::from_secs(ttl_secs));
        }
        Ok(counter.value)
    }

    async fn ping(&self) -> Result<()> {
        if self.is_closed() {
            return Err(OverlayError::StoreUnavailable(
                "memory store has been closed".into(),
            ));
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn topology(&self) -> &'static str {
        "memory"
    }
}

/// Connector that hands out one shared [`MemoryCounterStore`] for any topology.
///
/// Each requested topology is recorded so callers can check which path was taken.
#[derive(Debug, Default, Clone)]
pub struct MemoryConnector {
    store: MemoryCounterStore,
    requested: Arc<Mutex<Vec<Topology>>>,
}

impl MemoryConnector {
    pub fn new(store: MemoryCounterStore) -> Self {
        Self {
            store,
            requested: Arc::default(),
        }
    }

    pub fn store(&self) -> &MemoryCounterStore {
        &self.store
    }

    pub fn requested(&self) -> Vec<Topology> {
        self.requested
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl super::Connector for MemoryConnector {
    async fn connect(&self, topology: &Topology) -> Result<Arc<dyn CounterStore>> {
        if let Ok(mut requested) = self.requested.lock() {
            requested.push(topology.clone());
        }
        Ok(Arc::new(self.store.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_first_increment_sets_expiry() {
        let store = MemoryCounterStore::new();
        assert_eq!(store.increment_and_maybe_expire("k", 60).await.unwrap(), 1);
        assert!(store.ttl("k").unwrap() <= Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_later_increments_do_not_extend_expiry() {
        let store = MemoryCounterStore::new();
        store.increment_and_maybe_expire("k", 60).await.unwrap();
        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(store.increment_and_maybe_expire("k", 60).await.unwrap(), 2);
        assert_eq!(store.ttl("k").unwrap(), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_counter_restarts_after_expiry() {
        let store = MemoryCounterStore::new();
        store.increment_and_maybe_expire("k", 60).await.unwrap();
        store.increment_and_maybe_expire("k", 60).await.unwrap();
        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(store.get("k"), None);
        assert_eq!(store.increment_and_maybe_expire("k", 60).await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_counters_are_evicted() {
        let store = MemoryCounterStore::new();
        for client in ["a", "b", "c"] {
            store.increment_and_maybe_expire(client, 60).await.unwrap();
        }
        assert_eq!(store.len(), 3);

        tokio::time::advance(Duration::from_secs(61)).await;
        store.increment_and_maybe_expire("d", 60).await.unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.get("d"), Some(1));
    }

    #[tokio::test]
    async fn test_closed_store_is_unavailable() {
        let store = MemoryCounterStore::new();
        store.close().await.unwrap();
        assert!(matches!(
            store.increment_and_maybe_expire("k", 60).await,
            Err(OverlayError::StoreUnavailable(_))
        ));
        assert!(store.ping().await.is_err());
    }
}
