use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use std::time::Instant;

use crate::config_store::{ConfigStore, ConfigUpdate, OverlayConfig, SharedConfig};
use crate::error::Result;
use crate::health::HealthChecker;
use crate::rate_limiter::RateLimiter;
use crate::response::OverlayMessage;
use crate::store::StoreSlot;

/// Application state shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: SharedConfig,
    pub config_store: ConfigStore,
    pub store: StoreSlot,
    pub limiter: RateLimiter,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(
        config: SharedConfig,
        config_store: ConfigStore,
        store: StoreSlot,
        limiter: RateLimiter,
    ) -> Self {
        Self {
            config,
            config_store,
            store,
            limiter,
            started_at: Instant::now(),
        }
    }
}

/// Return the overlay greeting
pub async fn get_overlay(State(state): State<AppState>) -> Json<OverlayMessage> {
    let config = state.config.read().await;
    Json(OverlayMessage {
        message: config.greeting.clone(),
    })
}

/// Current in-memory configuration
pub async fn get_config(State(state): State<AppState>) -> Json<OverlayConfig> {
    Json(state.config.read().await.clone())
}

/// Apply a partial update; persisted on shutdown or flush
pub async fn update_config(
    State(state): State<AppState>,
    Json(update): Json<ConfigUpdate>,
) -> Result<Json<OverlayConfig>> {
    let mut config = state.config.write().await;
    config.apply(&update)?;

    tracing::info!(
        rate_limit_per_minute = config.rate_limit_per_minute,
        greeting = %config.greeting,
        "Overlay configuration updated"
    );
    Ok(Json(config.clone()))
}

/// Write the in-memory configuration to disk now
pub async fn flush_config(State(state): State<AppState>) -> Result<Json<OverlayConfig>> {
    let snapshot = state.config.read().await.clone();
    state.config_store.save(&snapshot)?;

    tracing::info!(path = %state.config_store.path().display(), "Overlay configuration flushed");
    Ok(Json(snapshot))
}

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let health = HealthChecker::new(state.store.clone(), state.started_at)
        .check_health()
        .await;

    let status = if health.status == "healthy" {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(health))
}
