use serde::{Deserialize, Serialize};
use std::time::{Instant, SystemTime};

use crate::store::StoreSlot;

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub timestamp: u64,
    pub version: String,
    pub uptime_seconds: u64,
    pub dependencies: DependencyStatus,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DependencyStatus {
    pub counter_store: ServiceStatus,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub status: String,
    pub topology: Option<String>,
    pub response_time_ms: u64,
    pub error: Option<String>,
}

pub struct HealthChecker {
    store: StoreSlot,
    started_at: Instant,
}

impl HealthChecker {
    pub fn new(store: StoreSlot, started_at: Instant) -> Self {
        Self { store, started_at }
    }

    pub async fn check_health(&self) -> HealthStatus {
        let store_status = self.check_store().await;

        // Without the store every request fails closed, so there is no degraded mode.
        let overall_status = if store_status.status == "healthy" {
            "healthy"
        } else {
            "unhealthy"
        };

        HealthStatus {
            status: overall_status.to_string(),
            timestamp: SystemTime::now()
                .duration_since(SystemTime::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: self.started_at.elapsed().as_secs(),
            dependencies: DependencyStatus {
                counter_store: store_status,
            },
        }
    }

    async fn check_store(&self) -> ServiceStatus {
        let start = Instant::now();

        if !self.store.is_open().await {
            return ServiceStatus {
                status: "unavailable".to_string(),
                topology: None,
                response_time_ms: 0,
                error: Some("counter store is not connected".to_string()),
            };
        }

        let store = match self.store.acquire().await {
            Ok(store) => store,
            Err(e) => {
                return ServiceStatus {
                    status: "unavailable".to_string(),
                    topology: None,
                    response_time_ms: 0,
                    error: Some(e.to_string()),
                }
            }
        };

        let result = store.ping().await;
        let response_time_ms = start.elapsed().as_millis() as u64;

        ServiceStatus {
            status: if result.is_ok() { "healthy" } else { "unavailable" }.to_string(),
            topology: Some(store.topology().to_string()),
            response_time_ms,
            error: result.err().map(|e| e.to_string()),
        }
    }
}
