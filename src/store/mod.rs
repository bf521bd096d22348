//! Counter store adapter.
//!
//! The limiter only needs one primitive from the cache: increment a key and,
//! when that increment created it, give it a window-length expiry. Every
//! topology implements [`CounterStore`]; a [`Connector`] turns a
//! [`Topology`] into a live store at startup.

pub mod memory;
pub mod redis;
pub mod topology;

pub use memory::{MemoryConnector, MemoryCounterStore};
pub use self::redis::{RedisConnector, RedisCounterStore};
pub use topology::{NodeAddr, Topology};

use crate::error::{OverlayError, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Increment `key`, creating it at 1. When the result is 1 the key gets a
    /// `ttl_secs` expiry; existing expiries are never reset.
    async fn increment_and_maybe_expire(&self, key: &str, ttl_secs: u64) -> Result<u64>;

    /// Round-trip check used by the health endpoint.
    async fn ping(&self) -> Result<()>;

    /// Release the connection. Later operations fail with `StoreUnavailable`.
    async fn close(&self) -> Result<()>;

    fn topology(&self) -> &'static str;
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, topology: &Topology) -> Result<Arc<dyn CounterStore>>;
}

enum SlotState {
    Pending,
    Open(Arc<dyn CounterStore>),
    Closed,
}

/// Holder for the process-wide store handle.
///
/// Filled once at startup, emptied once at shutdown.
#[derive(Clone)]
pub struct StoreSlot {
    state: Arc<RwLock<SlotState>>,
}

impl Default for StoreSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl StoreSlot {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(SlotState::Pending)),
        }
    }

    /// Slot that is already open, for wiring a store without a lifecycle.
    pub fn open(store: Arc<dyn CounterStore>) -> Self {
        Self {
            state: Arc::new(RwLock::new(SlotState::Open(store))),
        }
    }

    pub async fn install(&self, store: Arc<dyn CounterStore>) {
        let mut state = self.state.write().await;
        assert!(
            matches!(*state, SlotState::Pending),
            "counter store connection installed twice"
        );
        *state = SlotState::Open(store);
    }

    /// Current store handle.
    ///
    /// # Panics
    ///
    /// Panics if called before the connection was installed.
    pub async fn acquire(&self) -> Result<Arc<dyn CounterStore>> {
        match &*self.state.read().await {
            SlotState::Open(store) => Ok(Arc::clone(store)),
            SlotState::Closed => Err(OverlayError::StoreUnavailable(
                "counter store connection has been closed".into(),
            )),
            SlotState::Pending => {
                panic!("rate limiter used before the counter store connection was established")
            }
        }
    }

    pub async fn is_open(&self) -> bool {
        matches!(*self.state.read().await, SlotState::Open(_))
    }

    /// Take the handle out, leaving the slot closed. Returns `None` if it was never opened
    /// or already taken.
    pub async fn take(&self) -> Option<Arc<dyn CounterStore>> {
        let mut state = self.state.write().await;
        match std::mem::replace(&mut *state, SlotState::Closed) {
            SlotState::Open(store) => Some(store),
            SlotState::Pending | SlotState::Closed => None,
        }
    }
}
