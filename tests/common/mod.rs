#![allow(dead_code)]

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use overlay_throttle::clock::ManualClock;
use overlay_throttle::config_store::{ConfigStore, OverlayConfig, SharedConfig};
use overlay_throttle::create_app;
use overlay_throttle::handlers::AppState;
use overlay_throttle::rate_limiter::RateLimiter;
use overlay_throttle::store::{MemoryCounterStore, StoreSlot};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tower::ServiceExt;

/// Start of a window, so tests never straddle a minute boundary by accident.
pub const WINDOW_START: u64 = 1_700_000_040;

pub fn scratch_config_path() -> PathBuf {
    std::env::temp_dir()
        .join(format!("overlay-it-{}", uuid::Uuid::new_v4()))
        .join("overlay.json")
}

pub struct TestApp {
    pub app: Router,
    pub store: MemoryCounterStore,
    pub clock: ManualClock,
    pub config: SharedConfig,
    pub config_store: ConfigStore,
}

impl TestApp {
    pub fn with_quota(quota: u64) -> Self {
        let config_store = ConfigStore::new(scratch_config_path());
        let loaded = config_store.load().expect("default config");
        let config = OverlayConfig {
            rate_limit_per_minute: quota,
            ..loaded
        }
        .into_shared();

        let store = MemoryCounterStore::new();
        let slot = StoreSlot::open(Arc::new(store.clone()));
        let clock = ManualClock::new(WINDOW_START);
        let limiter = RateLimiter::with_clock(slot.clone(), config.clone(), Arc::new(clock.clone()));
        let app = create_app(AppState::new(
            config.clone(),
            config_store.clone(),
            slot,
            limiter,
        ));

        Self {
            app,
            store,
            clock,
            config,
            config_store,
        }
    }

    pub async fn get(&self, uri: &str, client: [u8; 4]) -> TestResponse {
        self.send(Method::GET, uri, client, None).await
    }

    pub async fn post(
        &self,
        uri: &str,
        client: [u8; 4],
        body: serde_json::Value,
    ) -> TestResponse {
        self.send(Method::POST, uri, client, Some(body)).await
    }

    pub async fn send(
        &self,
        method: Method,
        uri: &str,
        client: [u8; 4],
        body: Option<serde_json::Value>,
    ) -> TestResponse {
        let builder = Request::builder().method(method).uri(uri);
        let mut request = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from((client, 40000))));

        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);

        TestResponse {
            status,
            json,
            retry_after,
        }
    }
}

pub struct TestResponse {
    pub status: StatusCode,
    pub json: serde_json::Value,
    pub retry_after: Option<String>,
}
