use crate::clock::{Clock, SystemClock};
use crate::config_store::SharedConfig;
use crate::error::Result;
use crate::key_generator::{WindowKey, WINDOW_SECS};
use crate::store::StoreSlot;
use std::sync::Arc;

/// Outcome of counting one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed {
        count: u64,
        limit: u64,
    },
    Rejected {
        count: u64,
        limit: u64,
        retry_after_secs: u64,
    },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed { .. })
    }
}

/// Fixed-window per-client limiter over the shared counter store.
#[derive(Clone)]
pub struct RateLimiter {
    store: StoreSlot,
    config: SharedConfig,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(store: StoreSlot, config: SharedConfig) -> Self {
        Self::with_clock(store, config, Arc::new(SystemClock))
    }

    pub fn with_clock(store: StoreSlot, config: SharedConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            config,
            clock,
        }
    }

    /// Count one request from `client` against the current window.
    ///
    /// # Panics
    ///
    /// Panics if the counter store connection has not been established yet.
    pub async fn check(&self, client: &str) -> Result<Decision> {
        let store = self.store.acquire().await?;

        let now = self.clock.unix_seconds();
        let key = WindowKey::new(client, now);
        let count = store
            .increment_and_maybe_expire(&key.to_string(), WINDOW_SECS)
            .await?;
        let limit = self.config.read().await.rate_limit_per_minute;

        if count > limit {
            Ok(Decision::Rejected {
                count,
                limit,
                retry_after_secs: key.seconds_remaining(now),
            })
        } else {
            Ok(Decision::Allowed { count, limit })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config_store::OverlayConfig;
    use crate::error::OverlayError;
    use crate::store::{CounterStore, MemoryCounterStore};

    fn limiter(quota: u64, clock: ManualClock) -> (RateLimiter, MemoryCounterStore) {
        let store = MemoryCounterStore::new();
        let config = OverlayConfig {
            rate_limit_per_minute: quota,
            ..OverlayConfig::default()
        };
        let limiter = RateLimiter::with_clock(
            StoreSlot::open(Arc::new(store.clone())),
            config.into_shared(),
            Arc::new(clock),
        );
        (limiter, store)
    }

    #[tokio::test]
    async fn test_quota_boundary() {
        let (limiter, _) = limiter(3, ManualClock::new(600));

        for n in 1..=3 {
            assert_eq!(
                limiter.check("10.0.0.1").await.unwrap(),
                Decision::Allowed { count: n, limit: 3 }
            );
        }
        let fourth = limiter.check("10.0.0.1").await.unwrap();
        assert!(!fourth.is_allowed());
    }

    #[tokio::test]
    async fn test_clients_are_counted_separately() {
        let (limiter, _) = limiter(1, ManualClock::new(600));

        assert!(limiter.check("10.0.0.1").await.unwrap().is_allowed());
        assert!(limiter.check("10.0.0.2").await.unwrap().is_allowed());
        assert!(!limiter.check("10.0.0.1").await.unwrap().is_allowed());
    }

    #[tokio::test]
    async fn test_minute_rollover_grants_fresh_quota() {
        let clock = ManualClock::new(659);
        let (limiter, _) = limiter(2, clock.clone());

        for _ in 0..2 {
            assert!(limiter.check("c").await.unwrap().is_allowed());
        }
        assert!(!limiter.check("c").await.unwrap().is_allowed());

        clock.advance(1);
        for _ in 0..2 {
            assert!(limiter.check("c").await.unwrap().is_allowed());
        }
        assert!(!limiter.check("c").await.unwrap().is_allowed());
    }

    #[tokio::test]
    async fn test_rejection_reports_time_left_in_window() {
        let (limiter, _) = limiter(1, ManualClock::new(610));
        limiter.check("c").await.unwrap();

        match limiter.check("c").await.unwrap() {
            Decision::Rejected {
                retry_after_secs, ..
            } => assert_eq!(retry_after_secs, 50),
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_raised_quota_applies_immediately() {
        let store = MemoryCounterStore::new();
        let config = OverlayConfig {
            rate_limit_per_minute: 1,
            ..OverlayConfig::default()
        }
        .into_shared();
        let limiter = RateLimiter::with_clock(
            StoreSlot::open(Arc::new(store)),
            config.clone(),
            Arc::new(ManualClock::new(0)),
        );

        limiter.check("c").await.unwrap();
        assert!(!limiter.check("c").await.unwrap().is_allowed());

        config.write().await.rate_limit_per_minute = 10;
        assert!(limiter.check("c").await.unwrap().is_allowed());
    }

    #[tokio::test]
    async fn test_closed_store_fails_closed() {
        let (limiter, store) = limiter(5, ManualClock::new(0));
        store.close().await.unwrap();

        assert!(matches!(
            limiter.check("c").await,
            Err(OverlayError::StoreUnavailable(_))
        ));
    }

    #[tokio::test]
    #[should_panic(expected = "before the counter store connection")]
    async fn test_check_before_connect_panics() {
        let limiter = RateLimiter::new(StoreSlot::new(), OverlayConfig::default().into_shared());
        let _ = limiter.check("c").await;
    }
}
