//! Startup and shutdown ordering.
//!
//! ```text
//! UNSTARTED --start--> RUNNING --shutdown--> DRAINING --> STOPPED
//! ```
//!
//! Signals never do I/O themselves: they only flip the shutdown flag. The
//! drain (persist configuration, then close the store) runs once on the
//! normal task path, and every caller of [`Lifecycle::shutdown`] waits for
//! that single run.

use crate::clock::{Clock, SystemClock};
use crate::config_store::{ConfigStore, OverlayConfig, SharedConfig};
use crate::error::{OverlayError, Result};
use crate::handlers::AppState;
use crate::rate_limiter::RateLimiter;
use crate::server::{create_app, ShutdownSignals};
use crate::store::{Connector, StoreSlot, Topology};
use axum::Router;
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{watch, OnceCell};
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Unstarted,
    Running,
    Draining,
    Stopped,
}

pub struct Lifecycle {
    config_store: ConfigStore,
    topology: Topology,
    connector: Arc<dyn Connector>,
    clock: Arc<dyn Clock>,
    config: SharedConfig,
    store: StoreSlot,
    state: watch::Sender<LifecycleState>,
    stop: watch::Sender<bool>,
    drained: OnceCell<Result<(), String>>,
}

impl Lifecycle {
    pub fn new(
        config_store: ConfigStore,
        topology: Topology,
        connector: Arc<dyn Connector>,
    ) -> Arc<Self> {
        Self::with_clock(config_store, topology, connector, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config_store: ConfigStore,
        topology: Topology,
        connector: Arc<dyn Connector>,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        let (state, _) = watch::channel(LifecycleState::Unstarted);
        let (stop, _) = watch::channel(false);

        Arc::new(Self {
            config_store,
            topology,
            connector,
            clock,
            config: OverlayConfig::default().into_shared(),
            store: StoreSlot::new(),
            state,
            stop,
            drained: OnceCell::new(),
        })
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    pub fn config(&self) -> SharedConfig {
        Arc::clone(&self.config)
    }

    /// Load the configuration, then connect the counter store.
    ///
    /// # Panics
    ///
    /// Panics if called more than once.
    pub async fn start(&self) -> Result<()> {
        assert_eq!(
            self.state(),
            LifecycleState::Unstarted,
            "lifecycle started twice"
        );

        let loaded = self.config_store.load()?;
        *self.config.write().await = loaded;

        tracing::info!(topology = self.topology.mode(), "Connecting counter store");
        let store = self.connector.connect(&self.topology).await?;
        self.store.install(store).await;

        self.state.send_replace(LifecycleState::Running);
        tracing::info!("Lifecycle running");
        Ok(())
    }

    pub fn app_state(&self) -> AppState {
        let limiter = RateLimiter::with_clock(
            self.store.clone(),
            self.config(),
            Arc::clone(&self.clock),
        );
        AppState::new(
            self.config(),
            self.config_store.clone(),
            self.store.clone(),
            limiter,
        )
    }

    pub fn router(&self) -> Router {
        create_app(self.app_state())
    }

    /// Ask the serving loop to stop. Returns `false` if a stop was already requested.
    pub fn request_shutdown(&self) -> bool {
        !self.stop.send_replace(true)
    }

    /// Resolves once a shutdown has been requested.
    pub async fn shutdown_requested(&self) {
        let mut stop = self.stop.subscribe();
        let _ = stop.wait_for(|requested| *requested).await;
    }

    /// Forward SIGINT/SIGTERM into [`request_shutdown`](Self::request_shutdown).
    pub fn watch_signals(self: &Arc<Self>) -> Result<JoinHandle<()>> {
        let mut signals = ShutdownSignals::install().map_err(OverlayError::Server)?;
        let lifecycle = Arc::clone(self);

        Ok(tokio::spawn(async move {
            loop {
                let signal = signals.recv().await;
                if lifecycle.request_shutdown() {
                    tracing::info!(signal, "Received signal, initiating graceful shutdown");
                } else {
                    tracing::warn!(signal, "Shutdown already in progress, ignoring signal");
                }
            }
        }))
    }

    /// Serve until a shutdown is requested, give in-flight requests `grace`,
    /// then drain.
    ///
    /// # Panics
    ///
    /// Panics if [`start`](Self::start) has not completed.
    pub async fn serve(self: &Arc<Self>, listener: TcpListener, grace: Duration) -> Result<()> {
        assert_eq!(
            self.state(),
            LifecycleState::Running,
            "serve called before the lifecycle was started"
        );

        if let Ok(addr) = listener.local_addr() {
            tracing::info!(%addr, "Overlay server listening");
        }

        let app = self
            .router()
            .into_make_service_with_connect_info::<SocketAddr>();
        let lifecycle = Arc::clone(self);
        let server = axum::serve(listener, app)
            .with_graceful_shutdown(async move { lifecycle.shutdown_requested().await });

        let served = tokio::select! {
            result = server.into_future() => result,
            _ = self.grace_elapsed(grace) => {
                tracing::warn!(
                    grace_secs = grace.as_secs(),
                    "In-flight requests still running after grace period, dropping them"
                );
                Ok(())
            }
        };

        let drained = self.shutdown().await;
        served.map_err(OverlayError::Server)?;
        drained
    }

    async fn grace_elapsed(&self, grace: Duration) {
        self.shutdown_requested().await;
        tokio::time::sleep(grace).await;
    }

    /// Persist configuration and close the store, exactly once.
    ///
    /// Concurrent and repeated callers all wait for the same drain and see its outcome.
    pub async fn shutdown(&self) -> Result<()> {
        self.request_shutdown();
        self.drained
            .get_or_init(|| self.drain())
            .await
            .clone()
            .map_err(OverlayError::ShutdownFailed)
    }

    async fn drain(&self) -> Result<(), String> {
        let previous = self.state.send_replace(LifecycleState::Draining);
        tracing::info!(from = ?previous, "Draining");

        // Never started means nothing was loaded; writing would clobber the file with defaults.
        let persisted = if previous == LifecycleState::Unstarted {
            tracing::info!("Lifecycle never started, skipping configuration persistence");
            Ok(())
        } else {
            let snapshot = self.config.read().await.clone();
            match self.config_store.save(&snapshot) {
                Ok(()) => {
                    tracing::info!(
                        path = %self.config_store.path().display(),
                        "Configuration persisted"
                    );
                    Ok(())
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to persist configuration");
                    Err(e.to_string())
                }
            }
        };

        if let Some(store) = self.store.take().await {
            if let Err(e) = store.close().await {
                tracing::warn!(error = %e, "Counter store close failed, continuing shutdown");
            }
        }

        self.state.send_replace(LifecycleState::Stopped);
        tracing::info!("Lifecycle stopped");
        persisted
    }
}
